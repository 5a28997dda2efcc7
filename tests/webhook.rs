use crate::common::run_test;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use cinch_merge_gate::config::Config;
use cinch_merge_gate::db::{bus, projects, pull_requests};
use cinch_merge_gate::webhook::{self, WebhookQuery};
use cinch_merge_gate::AppState;

const SECRET: &str = "s3kr3t";

fn state_for(db_url: &str) -> std::sync::Arc<AppState> {
    let config = Config {
        database_url: db_url.to_owned(),
        repo_base_dir: std::env::temp_dir().to_string_lossy().into_owned(),
        provider_token: String::new(),
        provider_webhook_secret: SECRET.to_owned(),
        provider_api_url: "https://example.invalid".to_owned(),
        provider_clone_base_url: "https://example.invalid".to_owned(),
        server_url: "http://localhost:8000".to_owned(),
        port: 8000,
    };
    AppState::new(config)
}

fn headers_with_event(kind: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("X-Hook-Event", kind.parse().unwrap());
    headers
}

/// S3 — a push to the base branch invalidates relative state for every open
/// pull request of that project and enqueues exactly one `MasterMoved` event.
#[tokio::test]
async fn base_push_invalidates_relative_state_and_enqueues_once() {
    run_test(|ctx| async move {
        let client = ctx.client();
        let proj = projects::set_base_tip(client, "acme", "widgets", "old")
            .await
            .unwrap();
        let pr = pull_requests::upsert_from_webhook(
            client, proj.id, 1, "h", "t", "a", true,
        )
        .await
        .unwrap();
        pull_requests::set_relative_state(client, pr.id, Some(1), Some(0), Some(true), Some("mh"))
            .await
            .unwrap();

        let state = state_for(&db_url_of(ctx));
        let body = serde_json::json!({
            "ref": "refs/heads/master",
            "after": "new",
            "repository": {"owner": {"login": "acme"}, "name": "widgets"},
        })
        .to_string();

        let response = webhook::handle(
            State(state),
            Query(WebhookQuery {
                secret: Some(SECRET.to_owned()),
            }),
            headers_with_event("push"),
            body,
        )
        .await;
        assert_response_ok(response).await;

        let refreshed = pull_requests::find(client, proj.id, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.ahead, None);
        assert_eq!(refreshed.behind, None);
        assert_eq!(refreshed.is_mergeable, None);

        let claimed = bus::claim_batch(client, 10).await.unwrap();
        let master_moved: Vec<_> = claimed.iter().filter(|e| e.kind == "MasterMoved").collect();
        assert_eq!(master_moved.len(), 1);
    })
    .await;
}

/// S4 — a push to a non-base ref is ignored: no relative-state writes, no
/// bus events, and a 200 response body explaining why.
#[tokio::test]
async fn non_base_push_is_ignored() {
    run_test(|ctx| async move {
        let client = ctx.client();
        projects::set_base_tip(client, "acme", "widgets", "old")
            .await
            .unwrap();

        let state = state_for(&db_url_of(ctx));
        let body = serde_json::json!({
            "ref": "refs/heads/feature-x",
            "after": "new",
            "repository": {"owner": {"login": "acme"}, "name": "widgets"},
        })
        .to_string();

        let response = webhook::handle(
            State(state),
            Query(WebhookQuery {
                secret: Some(SECRET.to_owned()),
            }),
            headers_with_event("push"),
            body,
        )
        .await;
        let (status, text) = response_parts(response).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(text, "Ignoring: non-base push");

        let claimed = bus::claim_batch(client, 10).await.unwrap();
        assert!(claimed.is_empty());
    })
    .await;
}

/// S5 — a request with the wrong (or missing) secret is rejected with 401,
/// before any payload parsing happens.
#[tokio::test]
async fn wrong_secret_is_rejected() {
    run_test(|ctx| async move {
        let state = state_for(&db_url_of(ctx));
        let response = webhook::handle(
            State(state),
            Query(WebhookQuery { secret: None }),
            headers_with_event("push"),
            "not even valid json".to_owned(),
        )
        .await;
        let (status, _) = response_parts(response).await;
        assert_eq!(status, axum::http::StatusCode::UNAUTHORIZED);
    })
    .await;
}

fn db_url_of(ctx: &crate::common::TestContext) -> String {
    ctx.database_url()
}

async fn assert_response_ok(response: axum::response::Response) {
    let (status, text) = response_parts(response).await;
    assert_eq!(status, axum::http::StatusCode::OK, "body: {text}");
}

async fn response_parts(response: axum::response::Response) -> (axum::http::StatusCode, String) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}
