//! In-process backends for agent tests.

use llrefine_core::{
    CompletionRequest, CompletionResponse, Embedder, FinishReason, LlmProvider, ProviderError,
    Role, Usage,
};
use std::collections::VecDeque;
use std::sync::Mutex;

const VOCABULARY: &[&str] = &["laptop", "lightweight", "ultrabook", "gaming", "desktop", "mouse", "budget"];

/// Replays canned answers in order and records every (system, user) pair
pub(crate) struct ScriptedProvider {
    answers: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    pub(crate) fn new(answers: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.answers.lock().unwrap().len()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let text_for = |role: Role| {
            request
                .messages
                .iter()
                .filter(|m| m.role == role)
                .map(|m| m.content.clone())
                .collect::<Vec<_>>()
                .join("\n")
        };
        self.calls
            .lock()
            .unwrap()
            .push((text_for(Role::System), text_for(Role::User)));

        let answer = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Other("script exhausted".into())))?;

        Ok(CompletionResponse {
            model: request.model.unwrap_or_else(|| self.default_model().to_string()),
            content: Some(answer),
            finish_reason: FinishReason::Stop,
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        })
    }
}

impl Embedder for ScriptedProvider {
    fn embedding_model(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vector = vec![0.0; VOCABULARY.len()];
        for token in text.split(|c: char| !c.is_alphanumeric()) {
            let token = token.to_lowercase();
            if let Some(slot) = VOCABULARY.iter().position(|w| *w == token) {
                vector[slot] += 1.0;
            }
        }
        Ok(vector)
    }
}
