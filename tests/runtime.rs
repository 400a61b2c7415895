use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use codejudge::config::Runtime;
use codejudge::engine::Evaluator;
use codejudge::runtime::router;
use codejudge::sandbox::LocalSandbox;
use codejudge::toolchain::ToolchainRegistry;
use tower::ServiceExt;

const KEY: &str = "test-key";

fn app() -> axum::Router {
    std::env::set_var("JUDGE_API_KEY", KEY);
    let evaluator = Evaluator::new(
        Arc::new(ToolchainRegistry::builtin(&Runtime::default())),
        Arc::new(LocalSandbox::new()),
    );
    router(evaluator)
}

fn post(path: &str, body: serde_json::Value, key: Option<&str>) -> Request<Body> {
    let mut req = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        req = req.header(header::AUTHORIZATION, format!("Bearer {key}"));
    }
    req.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(res: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn limits() -> serde_json::Value {
    serde_json::json!({
        "wall_clock_seconds": 1,
        "memory_bytes": 268435456,
        "cpu_share": 1.0,
        "network": "disabled"
    })
}

#[tokio::test]
async fn health_is_public() {
    let res = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn languages_lists_builtin_toolchains() {
    let res = app()
        .oneshot(Request::get("/languages").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = json_body(res).await;
    let names: Vec<_> = body["languages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["language"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["c", "cpp", "java", "js", "py"]);
}

#[tokio::test]
async fn run_requires_a_bearer_key() {
    let body = serde_json::json!({ "language": "py", "source": "print(1)", "limits": limits() });

    let res = app().oneshot(post("/run", body.clone(), None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app()
        .oneshot(post("/run", body, Some("wrong")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn validate_reports_coded_errors() {
    let body = serde_json::json!({ "language": "cobol", "source": "", "limits": limits() });
    let res = app()
        .oneshot(post("/validate", body, Some(KEY)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = json_body(res).await;
    assert_eq!(body["valid"], false);
    let codes: Vec<_> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["code"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(codes, vec!["LANGUAGE_UNSUPPORTED", "SOURCE_EMPTY"]);
}

#[tokio::test]
async fn judge_with_no_cases_reports_no_test_cases() {
    let body = serde_json::json!({
        "language": "py",
        "source": "print(1)",
        "limits": limits(),
        "cases": []
    });
    let res = app().oneshot(post("/judge", body, Some(KEY))).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = json_body(res).await;
    assert_eq!(body["outcome"], "judged");
    assert_eq!(body["judgement"]["verdict"], "no_test_cases");
    assert_eq!(body["judgement"]["cases_run"], 0);
    assert_eq!(body["events"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn judge_rejects_missing_limit_fields() {
    let body = serde_json::json!({
        "language": "py",
        "source": "print(1)",
        "limits": { "wall_clock_seconds": 1 },
    });
    let res = app().oneshot(post("/judge", body, Some(KEY))).await.unwrap();
    assert!(res.status().is_client_error());
}
