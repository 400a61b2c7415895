use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::env;

/// Environment variable holding the bearer token for protected routes.
pub const API_KEY_ENV: &str = "JUDGE_API_KEY";

pub async fn api_key_auth(req: Request<Body>, next: Next) -> Response {
    let expected = match env::var(API_KEY_ENV) {
        Ok(v) if !v.is_empty() => v,
        _ => {
            tracing::error!("{} is not set; rejecting protected request", API_KEY_ENV);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "ok": false,
                    "error": "API key not configured"
                })),
            )
                .into_response();
        }
    };

    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(value) if value.strip_prefix("Bearer ") == Some(expected.as_str()) => {
            next.run(req).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "ok": false,
                "error": "Unauthorized"
            })),
        )
            .into_response(),
    }
}
