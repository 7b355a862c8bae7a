use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use tokio::time::timeout;

use common::{
    error::AppError,
    storage::types::{entity::Entity, event::EventCategory},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};

use crate::prompts::{
    confirm_schema, extraction_schema, ENTITY_CONFIRM_SYSTEM_MESSAGE,
    EVENT_CANONICALIZE_SYSTEM_MESSAGE, EVENT_EXTRACTION_SYSTEM_MESSAGE,
};
use crate::types::{ConfirmOutcome, EventDraft, ExtractionBatch, MentionDraft};

/// Per-attempt ceiling for one LLM call.
const LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// Seam between the extraction pipeline and its external collaborators (LLM
/// provider and embedding service); tests swap in mocks.
#[async_trait]
pub trait ExtractionServices: Send + Sync {
    /// Prompt A: candidate events with evidence and entity mentions.
    async fn extract_candidates(&self, content: &str) -> Result<Vec<EventDraft>, AppError>;

    /// Prompt B: normalized summaries, near-duplicates merged.
    async fn canonicalize_events(
        &self,
        drafts: Vec<EventDraft>,
    ) -> Result<Vec<EventDraft>, AppError>;

    /// Confirm-or-reject one mention against one stored candidate.
    async fn confirm_entity(
        &self,
        mention: &MentionDraft,
        candidate: &Entity,
    ) -> Result<ConfirmOutcome, AppError>;

    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError>;

    fn event_model(&self) -> &str;
    fn entity_model(&self) -> &str;
}

pub struct DefaultExtractionServices {
    openai_client: Arc<Client<OpenAIConfig>>,
    embedder: Arc<EmbeddingProvider>,
    config: AppConfig,
}

impl DefaultExtractionServices {
    pub fn new(
        openai_client: Arc<Client<OpenAIConfig>>,
        embedder: Arc<EmbeddingProvider>,
        config: AppConfig,
    ) -> Self {
        Self {
            openai_client,
            embedder,
            config,
        }
    }

    fn structured_request(
        &self,
        model: &str,
        system_message: &str,
        user_message: String,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<CreateChatCompletionRequest, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: schema_name.into(),
                schema: Some(schema),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages([
                ChatCompletionRequestSystemMessage::from(system_message).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .response_format(response_format)
            .build()?;

        Ok(request)
    }

    async fn complete<T>(&self, request: CreateChatCompletionRequest) -> Result<T, AppError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = timeout(LLM_TIMEOUT, self.openai_client.chat().create(request))
            .await
            .map_err(|_| AppError::Timeout("llm call exceeded the attempt deadline".into()))??;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or(AppError::LLMParsing(
                "No content found in LLM response".into(),
            ))?;

        serde_json::from_str::<T>(content).map_err(|e| {
            AppError::LLMParsing(format!("Failed to parse LLM response against schema: {e}"))
        })
    }
}

#[async_trait]
impl ExtractionServices for DefaultExtractionServices {
    async fn extract_candidates(&self, content: &str) -> Result<Vec<EventDraft>, AppError> {
        let user_message = format!(
            "Categories: {}\n\nText revision:\n{content}",
            EventCategory::variants().join(", ")
        );
        let request = self.structured_request(
            &self.config.event_model,
            EVENT_EXTRACTION_SYSTEM_MESSAGE,
            user_message,
            "event_extraction",
            extraction_schema(),
        )?;

        let batch: ExtractionBatch = self.complete(request).await?;
        Ok(batch.events)
    }

    async fn canonicalize_events(
        &self,
        drafts: Vec<EventDraft>,
    ) -> Result<Vec<EventDraft>, AppError> {
        if drafts.is_empty() {
            return Ok(drafts);
        }

        let user_message = format!(
            "Candidate events:\n{}",
            serde_json::to_string_pretty(&ExtractionBatch { events: drafts })
                .map_err(|e| AppError::Extraction(format!("candidate serialization failed: {e}")))?
        );
        let request = self.structured_request(
            &self.config.event_model,
            EVENT_CANONICALIZE_SYSTEM_MESSAGE,
            user_message,
            "event_canonicalization",
            extraction_schema(),
        )?;

        let batch: ExtractionBatch = self.complete(request).await?;
        Ok(batch.events)
    }

    async fn confirm_entity(
        &self,
        mention: &MentionDraft,
        candidate: &Entity,
    ) -> Result<ConfirmOutcome, AppError> {
        let user_message = format!(
            "Mention: {:?}\nMention clues: {:?}\n\nCandidate canonical name: {:?}\nCandidate aliases: {:?}\nCandidate clues: {:?}",
            mention.surface_form,
            mention.context_clues,
            candidate.canonical_name,
            candidate.aliases,
            candidate.context_clues,
        );
        let request = self.structured_request(
            &self.config.entity_model,
            ENTITY_CONFIRM_SYSTEM_MESSAGE,
            user_message,
            "entity_confirmation",
            confirm_schema(),
        )?;

        self.complete(request).await
    }

    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        self.embedder.embed(input).await
    }

    fn event_model(&self) -> &str {
        &self.config.event_model
    }

    fn entity_model(&self) -> &str {
        &self.config.entity_model
    }
}
