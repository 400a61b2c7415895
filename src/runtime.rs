use crate::{
    auth::api_key_auth,
    engine::{
        run::{judge_submission, SubmissionReport},
        validate_submission, Evaluator, ExecutionRequest, JudgeEvent, SubmissionTemplate,
        TestCase,
    },
    error::EngineError,
};

use axum::debug_handler;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::Span;

/* ---------------- server ---------------- */

/// Build the HTTP router around a shared evaluator.
pub fn router(evaluator: Evaluator) -> Router {
    let protected = Router::new()
        .route("/run", post(run))
        .route("/judge", post(judge))
        .route("/validate", post(validate))
        .layer(middleware::from_fn(api_key_auth));

    Router::new()
        .route("/health", get(health))
        .route("/languages", get(languages))
        .merge(protected)
        .with_state(evaluator)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<Body>| {
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        path = %req.uri().path(),
                    )
                })
                .on_response(|res: &Response, latency: Duration, _span: &Span| {
                    tracing::info!(
                        status = res.status().as_u16(),
                        latency_ms = latency.as_millis(),
                        "request completed"
                    );
                }),
        )
}

pub async fn serve(addr: &str, evaluator: Evaluator) -> anyhow::Result<()> {
    let backend = evaluator.backend();
    let app = router(evaluator);

    let socket: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(socket).await?;

    tracing::info!(backend, "codejudge runtime listening on http://{}", socket);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

/* ---------------- request models ---------------- */

#[derive(Debug, Deserialize)]
struct JudgeRequest {
    #[serde(flatten)]
    submission: SubmissionTemplate,
    #[serde(default)]
    cases: Vec<TestCase>,
}

#[derive(Debug, Serialize)]
struct JudgeResponse {
    #[serde(flatten)]
    report: SubmissionReport,
    events: Vec<JudgeEvent>,
}

#[derive(Debug, Serialize)]
struct LanguageInfo<'a> {
    language: &'a str,
    compiled: bool,
}

/* ---------------- endpoints ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn languages(State(evaluator): State<Evaluator>) -> impl IntoResponse {
    let languages: Vec<LanguageInfo<'_>> = evaluator
        .registry()
        .languages()
        .map(|(language, recipe)| LanguageInfo {
            language,
            compiled: recipe.has_compile_step(),
        })
        .collect();

    Json(serde_json::json!({ "languages": languages }))
}

#[debug_handler]
async fn run(
    State(evaluator): State<Evaluator>,
    Json(req): Json<ExecutionRequest>,
) -> impl IntoResponse {
    let template = SubmissionTemplate {
        language: req.language.clone(),
        source: req.source.clone(),
        limits: req.limits.clone(),
    };
    let validation = validate_submission(evaluator.registry(), &template);
    if !validation.is_valid() {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(validation)).into_response();
    }

    match evaluator.run_single(&req).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => engine_error(e),
    }
}

#[debug_handler]
async fn judge(
    State(evaluator): State<Evaluator>,
    Json(req): Json<JudgeRequest>,
) -> impl IntoResponse {
    let result = judge_submission(
        &evaluator,
        req.submission,
        req.cases,
        std::future::pending(),
    )
    .await;

    match result {
        Ok((report, sink)) => {
            let status = match report {
                SubmissionReport::Judged { .. } => StatusCode::OK,
                SubmissionReport::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (
                status,
                Json(JudgeResponse {
                    report,
                    events: sink.into_events(),
                }),
            )
                .into_response()
        }
        Err(e) => engine_error(e),
    }
}

#[debug_handler]
async fn validate(
    State(evaluator): State<Evaluator>,
    Json(template): Json<SubmissionTemplate>,
) -> impl IntoResponse {
    Json(validate_submission(evaluator.registry(), &template))
}

fn engine_error(e: EngineError) -> Response {
    let status = match e {
        EngineError::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
        EngineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status,
        Json(serde_json::json!({
            "ok": false,
            "error": e.to_string(),
        })),
    )
        .into_response()
}
