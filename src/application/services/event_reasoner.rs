//! Event Reasoner
//!
//! Drives the LLM stage for one event: build the prompt, short-circuit empty
//! events, call the gateway, validate the response and run behavioural role
//! inference on the accepted summary.

use std::sync::Arc;

use tracing::{info, warn};

use crate::application::services::context_builder::ContextBuilder;
use crate::application::services::response_validator::ResponseValidator;
use crate::application::services::role_classifier::RoleClassifier;
use crate::domain::entities::Event;
use crate::domain::gateways::{GenerationOptions, LlmGateway};

/// Summary text for events with nobody in frame; no LLM call is made.
pub const EMPTY_EVENT_SUMMARY: &str = "该视频中无人出现";

/// Generation settings for event summaries.
const EVENT_SUMMARY_OPTIONS: GenerationOptions = GenerationOptions {
    temperature: 0.2,
    max_tokens: 256,
};

/// Produces the narrative summary for each event.
pub struct EventReasoner {
    context_builder: ContextBuilder,
    validator: ResponseValidator,
    classifier: RoleClassifier,
    llm: Arc<dyn LlmGateway>,
}

impl EventReasoner {
    pub fn new(
        context_builder: ContextBuilder,
        validator: ResponseValidator,
        classifier: RoleClassifier,
        llm: Arc<dyn LlmGateway>,
    ) -> Self {
        Self {
            context_builder,
            validator,
            classifier,
            llm,
        }
    }

    /// Summarizes one event in place: sets `prompt_text`, `summary_text` and
    /// behaviour-inferred roles. LLM failures degrade to the deterministic
    /// fallback summary rather than aborting the run.
    pub async fn summarize(&self, event: &mut Event) {
        if event.is_empty_of_people() {
            info!("Event has no people, skipping LLM call");
            event.summary_text = Some(EMPTY_EVENT_SUMMARY.to_string());
            return;
        }

        let user_prompt = self.context_builder.build_user_prompt(event);
        let system_prompt = self.context_builder.build_system_prompt(event);
        event.prompt_text = Some(user_prompt.clone());

        let summary = match self
            .llm
            .generate(&system_prompt, &user_prompt, EVENT_SUMMARY_OPTIONS)
            .await
        {
            Ok(response) => {
                let validated = self.validator.validate(&response, event);
                if validated.used_fallback {
                    info!("LLM summary replaced by deterministic template");
                }
                validated.summary_text
            }
            Err(e) => {
                warn!(error = %e, "LLM call failed, using deterministic template");
                self.validator.fallback_summary(event)
            }
        };

        event.summary_text = Some(summary);

        self.classifier.apply_to_event(event);
    }
}
