use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::task;

use crate::{
    config::AppConfig,
    error::{GenerationError, InitError},
    model::{loader::ModelArtifacts, types::{Consultation, ModelInfo}},
    prompt,
    sampling::SamplingOptions,
};

/// The seam between the HTTP dispatcher and the consultation engine.
/// Implementations never fail a consultation: errors become answer text.
#[async_trait]
pub trait ConsultingBackend: Send + Sync {
    async fn consult(
        &self,
        question: &str,
        category: &str,
        max_new_tokens: Option<usize>,
    ) -> Consultation;

    async fn consult_batch(&self, questions: &[String], category: &str) -> Vec<Consultation>;

    fn model_info(&self) -> ModelInfo;
}

pub fn error_answer(details: &str) -> String {
    format!("Sorry, I encountered an error processing your request: {details}")
}

/// Owns the loaded model artifacts and drives generations against them.
pub struct Consultant {
    artifacts: Arc<ModelArtifacts>,
    sampling: SamplingOptions,
}

impl Consultant {
    pub fn initialize(config: &AppConfig) -> Result<Self, InitError> {
        let artifacts = ModelArtifacts::load(config)?;
        Ok(Self {
            artifacts: Arc::new(artifacts),
            sampling: config.sampling.clone(),
        })
    }

    pub fn release(&self) {
        self.artifacts.model.release();
    }

    async fn run_generation(
        &self,
        question: String,
        category: String,
        max_new_tokens: Option<usize>,
    ) -> Result<String, GenerationError> {
        let artifacts = self.artifacts.clone();
        let mut opts = self.sampling.clone();
        if let Some(budget) = max_new_tokens {
            opts.max_new_tokens = budget;
        }

        task::spawn_blocking(move || {
            let prompt = prompt::build(&question, &category);
            artifacts.model.generate(&artifacts.tokenizer, &prompt, &opts)
        })
        .await
        .map_err(|err| GenerationError::Inference(format!("generation task failed: {err}")))?
    }
}

#[async_trait]
impl ConsultingBackend for Consultant {
    async fn consult(
        &self,
        question: &str,
        category: &str,
        max_new_tokens: Option<usize>,
    ) -> Consultation {
        let category = prompt::normalize(category).to_string();
        let question = question.trim().to_string();
        let started = Instant::now();

        let answer = if question.is_empty() {
            tracing::warn!("blank question reached the engine");
            error_answer("question must not be empty")
        } else {
            match self
                .run_generation(question, category.clone(), max_new_tokens)
                .await
            {
                Ok(text) if text.is_empty() => {
                    tracing::warn!(%category, "model produced an empty completion");
                    error_answer("model produced an empty response")
                }
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(%err, %category, "generation failed");
                    error_answer(&err.to_string())
                }
            }
        };

        tracing::info!(
            %category,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "consultation complete"
        );

        Consultation { answer, category }
    }

    /// Strictly sequential: the model is a single shared resource, and one
    /// failing question must not abort the rest of the batch.
    async fn consult_batch(&self, questions: &[String], category: &str) -> Vec<Consultation> {
        let mut results = Vec::with_capacity(questions.len());
        for question in questions {
            results.push(self.consult(question, category, None).await);
        }
        results
    }

    fn model_info(&self) -> ModelInfo {
        self.artifacts.model.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_answer_uses_the_fixed_template() {
        assert_eq!(
            error_answer("model execution failed: boom"),
            "Sorry, I encountered an error processing your request: model execution failed: boom"
        );
    }
}
