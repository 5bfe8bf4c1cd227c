use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::gateway::{GatewayError, InferenceGateway, Prompt};
use crate::stage::Stage;

/// What a [`ScriptedGateway`] was asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub stage: Stage,
    pub text: String,
    pub had_image: bool,
    pub max_output_tokens: u64,
}

/// Replays queued responses in call order and records every prompt.
pub struct ScriptedGateway {
    responses: Mutex<VecDeque<Result<String, GatewayError>>>,
    recorded: Mutex<Vec<RecordedPrompt>>,
}

impl ScriptedGateway {
    pub fn new(responses: impl IntoIterator<Item = Result<String, GatewayError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn replying<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|text| Ok(text.into())))
    }

    pub fn recorded(&self) -> Vec<RecordedPrompt> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl InferenceGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, prompt: &Prompt<'_>, max_output_tokens: u64) -> Result<String, GatewayError> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedPrompt {
                stage: prompt.stage,
                text: prompt.text.clone(),
                had_image: prompt.image.is_some(),
                max_output_tokens,
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Err(GatewayError::unavailable(format!(
                    "no scripted response left for {}",
                    prompt.stage
                )))
            })
    }
}
