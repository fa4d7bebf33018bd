use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    error::ApiError,
    model::{ConsultingBackend, ModelInfo},
    prompt,
    state::ServiceState,
};

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn ConsultingBackend>,
    pub lifecycle: ServiceState,
}

pub fn build_router(backend: Arc<dyn ConsultingBackend>, lifecycle: ServiceState) -> Router {
    let state = AppState { backend, lifecycle };

    Router::new()
        .route("/health", get(health))
        .route("/api/consult", get(consult))
        .route("/api/batch-consult", post(batch_consult))
        .route("/api/model-info", get(model_info))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Debug, Deserialize)]
pub struct ConsultParams {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    max_new_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ConsultResponse {
    question: String,
    answer: String,
    category: String,
    processing_time_seconds: f64,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchConsultRequest {
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Serialize)]
struct BatchItem {
    question: String,
    answer: String,
    index: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchConsultResponse {
    results: Vec<BatchItem>,
    total_questions: usize,
    category: String,
    processing_time_seconds: f64,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_info: ModelInfo,
    timestamp: String,
}

async fn consult(
    State(state): State<AppState>,
    Query(params): Query<ConsultParams>,
) -> Result<Json<ConsultResponse>, ApiError> {
    ensure_accepting(&state)?;

    let question = params.question.unwrap_or_default().trim().to_string();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question parameter is required".into()));
    }
    let category = params.category.unwrap_or_else(|| prompt::GENERAL.to_string());

    let started = Instant::now();
    let outcome = state
        .backend
        .consult(&question, &category, params.max_new_tokens)
        .await;

    Ok(Json(ConsultResponse {
        question,
        answer: outcome.answer,
        category: outcome.category,
        processing_time_seconds: round_seconds(started.elapsed()),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

async fn batch_consult(
    State(state): State<AppState>,
    Json(request): Json<BatchConsultRequest>,
) -> Result<Json<BatchConsultResponse>, ApiError> {
    ensure_accepting(&state)?;

    if request.questions.is_empty() {
        return Err(ApiError::BadRequest("questions array is required".into()));
    }
    let category = prompt::normalize(request.category.as_deref().unwrap_or(prompt::GENERAL));

    let started = Instant::now();
    let outcomes = state
        .backend
        .consult_batch(&request.questions, category)
        .await;

    let results = request
        .questions
        .iter()
        .zip(outcomes)
        .enumerate()
        .map(|(index, (question, outcome))| BatchItem {
            question: question.clone(),
            answer: outcome.answer,
            index,
        })
        .collect::<Vec<_>>();

    Ok(Json(BatchConsultResponse {
        total_questions: results.len(),
        results,
        category: category.to_string(),
        processing_time_seconds: round_seconds(started.elapsed()),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

async fn model_info(State(state): State<AppState>) -> Result<Json<ModelInfo>, ApiError> {
    ensure_accepting(&state)?;
    Ok(Json(state.backend.model_info()))
}

async fn health(State(state): State<AppState>) -> Response {
    if !state.lifecycle.is_accepting() {
        return ApiError::ShuttingDown.into_response();
    }

    let info = state.backend.model_info();
    let (status, code) = if info.error.is_some() {
        ("unhealthy", StatusCode::INTERNAL_SERVER_ERROR)
    } else {
        ("healthy", StatusCode::OK)
    };

    (
        code,
        Json(HealthResponse {
            status,
            model_info: info,
            timestamp: Utc::now().to_rfc3339(),
        }),
    )
        .into_response()
}

fn ensure_accepting(state: &AppState) -> Result<(), ApiError> {
    if state.lifecycle.is_accepting() {
        Ok(())
    } else {
        Err(ApiError::ShuttingDown)
    }
}

fn round_seconds(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::model::{Consultation, error_answer};

    /// Backend double: answers echo the question, except a designated
    /// poison question that reports a generation failure the way the real
    /// engine does.
    struct StubBackend {
        poison: Option<String>,
    }

    #[async_trait]
    impl ConsultingBackend for StubBackend {
        async fn consult(
            &self,
            question: &str,
            category: &str,
            _max_new_tokens: Option<usize>,
        ) -> Consultation {
            let category = prompt::normalize(category).to_string();
            let answer = if self.poison.as_deref() == Some(question) {
                error_answer("model execution failed: boom")
            } else {
                format!("echo: {question}")
            };
            Consultation { answer, category }
        }

        async fn consult_batch(&self, questions: &[String], category: &str) -> Vec<Consultation> {
            let mut results = Vec::with_capacity(questions.len());
            for question in questions {
                results.push(self.consult(question, category, None).await);
            }
            results
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                model_name: "stub".into(),
                device: "cpu".into(),
                dtype: "float32".into(),
                parameters: Some("0.10M".into()),
                error: None,
            }
        }
    }

    fn app_state(poison: Option<&str>) -> AppState {
        AppState {
            backend: Arc::new(StubBackend {
                poison: poison.map(str::to_string),
            }),
            lifecycle: ServiceState::new(),
        }
    }

    fn consult_params(question: Option<&str>, category: Option<&str>) -> ConsultParams {
        ConsultParams {
            question: question.map(str::to_string),
            category: category.map(str::to_string),
            max_new_tokens: None,
        }
    }

    #[tokio::test]
    async fn consult_answers_with_normalized_category() {
        let state = app_state(None);
        let response = consult(
            State(state),
            Query(consult_params(Some("How can I improve cash flow?"), Some("FINANCE"))),
        )
        .await
        .expect("consult succeeds");

        assert_eq!(response.0.answer, "echo: How can I improve cash flow?");
        assert_eq!(response.0.category, "finance");
    }

    #[tokio::test]
    async fn consult_rejects_missing_or_blank_question() {
        let state = app_state(None);
        let missing = consult(State(state.clone()), Query(consult_params(None, None))).await;
        assert!(matches!(missing, Err(ApiError::BadRequest(_))));

        let blank = consult(State(state), Query(consult_params(Some("   "), None))).await;
        assert!(matches!(blank, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn unknown_category_maps_to_general() {
        let state = app_state(None);
        let response = consult(
            State(state),
            Query(consult_params(Some("q"), Some("unknown-xyz"))),
        )
        .await
        .expect("consult succeeds");
        assert_eq!(response.0.category, "general");
    }

    #[tokio::test]
    async fn batch_preserves_order_and_absorbs_failures() {
        let state = app_state(Some("q2"));
        let request = BatchConsultRequest {
            questions: vec!["q1".into(), "q2".into()],
            category: None,
        };

        let response = batch_consult(State(state), Json(request))
            .await
            .expect("batch succeeds despite one failing item");
        let body = response.0;

        assert_eq!(body.total_questions, 2);
        assert_eq!(body.results.len(), 2);
        assert_eq!(body.results[0].question, "q1");
        assert_eq!(body.results[0].index, 0);
        assert_eq!(body.results[0].answer, "echo: q1");
        assert_eq!(body.results[1].question, "q2");
        assert_eq!(body.results[1].index, 1);
        assert!(
            body.results[1]
                .answer
                .starts_with("Sorry, I encountered an error processing your request:")
        );
    }

    #[tokio::test]
    async fn batch_rejects_empty_question_list() {
        let state = app_state(None);
        let request = BatchConsultRequest {
            questions: Vec::new(),
            category: Some("finance".into()),
        };
        let result = batch_consult(State(state), Json(request)).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn drained_service_refuses_every_endpoint() {
        let state = app_state(None);
        state.lifecycle.begin_drain();

        let consult_result = consult(
            State(state.clone()),
            Query(consult_params(Some("q"), None)),
        )
        .await;
        assert!(matches!(consult_result, Err(ApiError::ShuttingDown)));

        let batch_result = batch_consult(
            State(state.clone()),
            Json(BatchConsultRequest {
                questions: vec!["q".into()],
                category: None,
            }),
        )
        .await;
        assert!(matches!(batch_result, Err(ApiError::ShuttingDown)));

        let info_result = model_info(State(state.clone())).await;
        assert!(matches!(info_result, Err(ApiError::ShuttingDown)));

        let health_response = health(State(state)).await;
        assert_eq!(health_response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn healthy_backend_reports_healthy() {
        let state = app_state(None);
        let response = health(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
