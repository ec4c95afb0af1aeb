//! HTTP surface for notesrag.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `POST /query` – Answer a question from retrieved notes. Body `{question, top_k?}`; returns
//!   `{answer, generation, sources: [{id, source, page, distance}]}`.
//! - `POST /search` – Retrieval only. Same body; returns ranked passages without generation.
//! - `POST /reload` – Swap in the generation the index `CURRENT` pointer names.
//! - `GET /health` – Active generation and vector count.
//! - `GET /metrics` – Query counters.
//!
//! Errors are returned as `{"error": {"kind", "message"}}`: 400 for invalid input or a malformed
//! body, 404 when the index holds no context, 502 when an upstream model fails, 500 otherwise.

use crate::index::SearchResult;
use crate::metrics::MetricsSnapshot;
use crate::query::{Answer, QueryApi, QueryError, ReloadOutcome};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router exposing the query API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: QueryApi + 'static,
{
    Router::new()
        .route("/query", post(query::<S>))
        .route("/search", post(search::<S>))
        .route("/reload", post(reload::<S>))
        .route("/health", get(health::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for `POST /query` and `POST /search`.
#[derive(Deserialize)]
struct QuestionRequest {
    /// Natural-language question.
    question: String,
    /// Number of passages to retrieve (defaults to `QUERY_DEFAULT_TOP_K`).
    #[serde(default)]
    top_k: Option<i64>,
}

/// Answer a question from the active index.
async fn query<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<QuestionRequest>, JsonRejection>,
) -> Result<Json<Answer>, AppError>
where
    S: QueryApi,
{
    let Json(request) = payload?;
    let answer = service.ask(&request.question, request.top_k).await?;
    tracing::info!(
        generation = %answer.generation,
        sources = answer.sources.len(),
        "Query answered"
    );
    Ok(Json(answer))
}

/// Response body for `POST /search`.
#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

/// Retrieve passages without calling the generation backend.
async fn search<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<QuestionRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError>
where
    S: QueryApi,
{
    let Json(request) = payload?;
    let results = service.search(&request.question, request.top_k).await?;
    Ok(Json(SearchResponse { results }))
}

/// Swap in the generation named by the index pointer.
async fn reload<S>(State(service): State<Arc<S>>) -> Result<Json<ReloadOutcome>, AppError>
where
    S: QueryApi,
{
    Ok(Json(service.reload().await?))
}

/// Response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    generation: String,
    vectors: usize,
}

async fn health<S>(State(service): State<Arc<S>>) -> Json<HealthResponse>
where
    S: QueryApi,
{
    let (generation, vectors) = service.active_generation();
    Json(HealthResponse {
        status: "ok",
        generation,
        vectors,
    })
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: QueryApi,
{
    Json(service.metrics_snapshot())
}

enum AppError {
    Request(JsonRejection),
    Query(QueryError),
}

impl AppError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        let query = match self {
            Self::Request(_) => return (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::Query(query) => query,
        };
        match query {
            QueryError::InvalidQuestion => (StatusCode::BAD_REQUEST, "invalid_question"),
            QueryError::InvalidTopK(_) => (StatusCode::BAD_REQUEST, "invalid_top_k"),
            QueryError::NoRelevantContext => (StatusCode::NOT_FOUND, "no_relevant_context"),
            QueryError::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_failed"),
            QueryError::EmptyEmbedding => (StatusCode::BAD_GATEWAY, "empty_embedding"),
            QueryError::DimensionMismatch { .. } => (StatusCode::BAD_GATEWAY, "dimension_mismatch"),
            QueryError::Generation(_) => (StatusCode::BAD_GATEWAY, "generation_failed"),
            QueryError::GenerationSetup(_) => (StatusCode::INTERNAL_SERVER_ERROR, "setup_error"),
            QueryError::Index(_) => (StatusCode::INTERNAL_SERVER_ERROR, "index_error"),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Request(rejection) => rejection.body_text(),
            Self::Query(error) => error.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = self.message();
        if status.is_server_error() {
            tracing::warn!(kind, error = %message, "Request failed");
        }
        let body = json!({
            "error": {
                "kind": kind,
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<QueryError> for AppError {
    fn from(inner: QueryError) -> Self {
        Self::Query(inner)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Request(rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::create_router;
    use crate::generation::GenerationError;
    use crate::index::{IndexError, SearchResult};
    use crate::metrics::MetricsSnapshot;
    use crate::query::{Answer, Citation, QueryApi, QueryError, ReloadOutcome};
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        GenerationDown,
        Empty,
        ReloadBroken,
    }

    struct StubQueryService {
        behavior: Behavior,
        calls: Mutex<Vec<(String, Option<i64>)>>,
    }

    impl StubQueryService {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn result() -> SearchResult {
            SearchResult {
                rank: 1,
                ordinal: 0,
                id: "geo.pdf#p1#c1".into(),
                distance: 0.25,
                source: "geo.pdf".into(),
                page: 1,
                snippet: "Paris is the capital".into(),
                text: "Paris is the capital of France.".into(),
            }
        }
    }

    #[async_trait]
    impl QueryApi for StubQueryService {
        async fn ask(&self, question: &str, top_k: Option<i64>) -> Result<Answer, QueryError> {
            self.calls.lock().await.push((question.to_string(), top_k));
            if question.trim().is_empty() {
                return Err(QueryError::InvalidQuestion);
            }
            match self.behavior {
                Behavior::Succeed | Behavior::ReloadBroken => Ok(Answer {
                    answer: "Paris.".into(),
                    generation: "g1".into(),
                    sources: vec![Citation::from(&Self::result())],
                }),
                Behavior::GenerationDown => Err(QueryError::Generation(GenerationError::Status {
                    status: 500,
                    body: "boom".into(),
                })),
                Behavior::Empty => Err(QueryError::NoRelevantContext),
            }
        }

        async fn search(
            &self,
            question: &str,
            top_k: Option<i64>,
        ) -> Result<Vec<SearchResult>, QueryError> {
            self.calls.lock().await.push((question.to_string(), top_k));
            if let Some(k) = top_k
                && k <= 0
            {
                return Err(QueryError::InvalidTopK(k));
            }
            Ok(vec![Self::result()])
        }

        async fn reload(&self) -> Result<ReloadOutcome, QueryError> {
            match self.behavior {
                Behavior::ReloadBroken => Err(QueryError::Index(IndexError::NoActiveGeneration(
                    PathBuf::from("index"),
                ))),
                _ => Ok(ReloadOutcome {
                    generation: "g2".into(),
                    vectors: 3,
                }),
            }
        }

        fn active_generation(&self) -> (String, usize) {
            ("g1".into(), 3)
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                questions_answered: 4,
                ..MetricsSnapshot::default()
            }
        }
    }

    async fn send(
        service: Arc<StubQueryService>,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request");

        let response = create_router(service)
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn query_route_returns_answer_with_sources() {
        let service = StubQueryService::new(Behavior::Succeed);
        let (status, body) = send(
            service.clone(),
            Method::POST,
            "/query",
            Some(json!({"question": "What is the capital of France?", "top_k": 2})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "Paris.");
        assert_eq!(body["sources"][0]["source"], "geo.pdf");
        assert_eq!(body["sources"][0]["page"], 1);
        let calls = service.calls.lock().await.clone();
        assert_eq!(calls, vec![("What is the capital of France?".to_string(), Some(2))]);
    }

    #[tokio::test]
    async fn query_route_maps_errors_to_statuses() {
        let (status, body) = send(
            StubQueryService::new(Behavior::GenerationDown),
            Method::POST,
            "/query",
            Some(json!({"question": "Why?"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["kind"], "generation_failed");

        let (status, body) = send(
            StubQueryService::new(Behavior::Empty),
            Method::POST,
            "/query",
            Some(json!({"question": "Why?"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "no_relevant_context");

        let (status, body) = send(
            StubQueryService::new(Behavior::Succeed),
            Method::POST,
            "/query",
            Some(json!({"question": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_question");
    }

    #[tokio::test]
    async fn malformed_bodies_use_the_error_envelope() {
        let service = StubQueryService::new(Behavior::Succeed);
        let (status, body) = send(
            service.clone(),
            Method::POST,
            "/query",
            Some(json!({"top_k": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_request");
        assert!(body["error"]["message"].as_str().is_some_and(|m| m.contains("question")));

        let (status, body) = send(
            service.clone(),
            Method::POST,
            "/search",
            Some(json!({"question": "capital", "top_k": "five"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_request");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/search")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .expect("request");
        let response = create_router(service.clone())
            .oneshot(request)
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(service.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn search_route_hides_full_text_and_rejects_bad_top_k() {
        let (status, body) = send(
            StubQueryService::new(Behavior::Succeed),
            Method::POST,
            "/search",
            Some(json!({"question": "capital"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["rank"], 1);
        assert_eq!(body["results"][0]["snippet"], "Paris is the capital");
        assert!(body["results"][0].get("text").is_none());

        let (status, body) = send(
            StubQueryService::new(Behavior::Succeed),
            Method::POST,
            "/search",
            Some(json!({"question": "capital", "top_k": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_top_k");
    }

    #[tokio::test]
    async fn reload_health_and_metrics_routes() {
        let (status, body) = send(StubQueryService::new(Behavior::Succeed), Method::POST, "/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"generation": "g2", "vectors": 3}));

        let (status, body) =
            send(StubQueryService::new(Behavior::ReloadBroken), Method::POST, "/reload", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["kind"], "index_error");

        let (status, body) = send(StubQueryService::new(Behavior::Succeed), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "generation": "g1", "vectors": 3}));

        let (_, body) = send(StubQueryService::new(Behavior::Succeed), Method::GET, "/metrics", None).await;
        assert_eq!(body["questions_answered"], 4);
        assert_eq!(body["reloads"], 0);
    }
}
