use crate::error::AppError;

/// One chunk produced by the splitter: dense 0-based index, the exact slice
/// of the source text it covers, and its half-open char span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: usize,
    pub content: String,
    pub start_char: usize,
    pub end_char: usize,
    pub token_count: usize,
}

/// Fraction of the window the sentence-boundary search may walk back over.
const SENTENCE_TOLERANCE_DIVISOR: usize = 8;

/// Deterministic token-aware splitter. Greedy windows of at most
/// `max_tokens`, preferring a sentence boundary inside the tolerance window;
/// every chunk after the first starts with the last `overlap_tokens` tokens
/// of its predecessor.
pub fn chunk_text(
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<ChunkSpan>, AppError> {
    if max_tokens == 0 {
        return Err(AppError::Validation(
            "max_chunk_tokens must be greater than zero".into(),
        ));
    }
    if overlap_tokens >= max_tokens {
        return Err(AppError::Validation(format!(
            "chunk_overlap_tokens ({overlap_tokens}) must be smaller than max_chunk_tokens ({max_tokens})"
        )));
    }

    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let tolerance = (max_tokens / SENTENCE_TOLERANCE_DIVISOR).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let mut end = (start + max_tokens).min(tokens.len());

        if end < tokens.len() {
            if let Some(boundary) = sentence_boundary(text, &tokens, end, tolerance) {
                // Only take the boundary if the next window still advances.
                if boundary.saturating_sub(overlap_tokens) > start {
                    end = boundary;
                }
            }
        }

        let span_start = if chunks.is_empty() {
            0
        } else {
            tokens[start].0
        };
        let span_end = if end == tokens.len() {
            text.len()
        } else {
            tokens[end - 1].1
        };

        chunks.push(ChunkSpan {
            index: chunks.len(),
            content: text[span_start..span_end].to_string(),
            start_char: span_start,
            end_char: span_end,
            token_count: end - start,
        });

        if end >= tokens.len() {
            break;
        }
        start = end - overlap_tokens;
    }

    Ok(chunks)
}

pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Byte spans of whitespace-delimited tokens.
fn tokenize(text: &str) -> Vec<(usize, usize)> {
    let mut tokens = Vec::new();
    let mut token_start: Option<usize> = None;

    for (offset, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(start) = token_start.take() {
                tokens.push((start, offset));
            }
        } else if token_start.is_none() {
            token_start = Some(offset);
        }
    }
    if let Some(start) = token_start {
        tokens.push((start, text.len()));
    }

    tokens
}

/// Index one past the latest sentence-final token within the tolerance
/// window ending at `end`.
fn sentence_boundary(
    text: &str,
    tokens: &[(usize, usize)],
    end: usize,
    tolerance: usize,
) -> Option<usize> {
    let window_start = end.saturating_sub(tolerance);
    for candidate in (window_start..end).rev() {
        let (start, stop) = tokens[candidate];
        if text[start..stop].ends_with(['.', '!', '?']) {
            return Some(candidate + 1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_tokens(count: usize) -> String {
        (0..count)
            .map(|i| format!("w{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = chunk_text("", 100, 10).expect("chunk empty text");
        assert!(chunks.is_empty());

        let chunks = chunk_text("   \n\t  ", 100, 10).expect("chunk whitespace");
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_text_yields_one_chunk() {
        let text = "just a handful of tokens here";
        let chunks = chunk_text(text, 100, 10).expect("chunk short text");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, text);
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[0].end_char, text.len());
        assert_eq!(chunks[0].token_count, 6);
    }

    #[test]
    fn overlap_windows_match_the_stride() {
        // 9000 tokens, windows of 1000 with 100 overlap: tokens [0,1000),
        // [900,1900), ..., [8100,9000) -> 10 chunks.
        let text = synthetic_tokens(9000);
        let chunks = chunk_text(&text, 1000, 100).expect("chunk synthetic text");

        assert_eq!(chunks.len(), 10);
        assert!(chunks.iter().enumerate().all(|(i, c)| c.index == i));
        assert!(chunks[..9].iter().all(|c| c.token_count == 1000));
        // The tail window covers the remaining [8100, 9000) tokens.
        assert_eq!(chunks[9].token_count, 900);

        // Chunk 1 starts with token 900, the head overlap from chunk 0.
        assert!(chunks[1].content.starts_with("w900 "));
        assert!(chunks[0].content.ends_with("w999"));

        // Spans are exact slices of the source.
        for chunk in &chunks {
            assert_eq!(chunk.content, &text[chunk.start_char..chunk.end_char]);
        }
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[9].end_char, text.len());
    }

    #[test]
    fn spans_are_non_decreasing_and_cover_the_text() {
        let text = synthetic_tokens(2500);
        let chunks = chunk_text(&text, 400, 50).expect("chunk text");

        let mut covered_until = 0usize;
        for window in chunks.windows(2) {
            assert!(window[0].start_char <= window[1].start_char);
            // Overlap means the next span starts before the previous ends.
            assert!(window[1].start_char < window[0].end_char);
        }
        for chunk in &chunks {
            assert!(chunk.start_char <= covered_until, "gap before chunk {}", chunk.index);
            covered_until = covered_until.max(chunk.end_char);
        }
        assert_eq!(covered_until, text.len());
    }

    #[test]
    fn sentence_boundaries_are_preferred_inside_the_tolerance_window() {
        // 20-token window; a sentence ends at token 18, inside the tolerance.
        let mut words: Vec<String> = (0..30).map(|i| format!("w{i}")).collect();
        words[18] = "end.".to_string();
        let text = words.join(" ");

        let chunks = chunk_text(&text, 20, 2).expect("chunk text");
        assert_eq!(chunks[0].token_count, 19);
        assert!(chunks[0].content.ends_with("end."));
        // The next chunk carries the configured overlap.
        assert!(chunks[1].content.starts_with("w17 end. w19"));
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        assert!(matches!(
            chunk_text("some text", 0, 0),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            chunk_text("some text", 10, 10),
            Err(AppError::Validation(_))
        ));
    }
}
