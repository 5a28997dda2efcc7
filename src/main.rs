use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use axum::body::Body;
use axum::error_handling::HandleErrorLayer;
use axum::http::HeaderName;
use axum::routing::{get, post};
use axum::{BoxError, Router};
use hyper::{Request, StatusCode};
use tower::ServiceBuilder;
use tower::buffer::BufferLayer;
use tower::limit::RateLimitLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;

use cinch_merge_gate::{AppState, api, ci, config::Config, db, webhook, worker};

async fn run_server(addr: SocketAddr) -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    let skip_migrations = std::env::var("SKIP_DB_MIGRATIONS").is_ok_and(|v| v == "1");

    let state = AppState::new(config);

    if !skip_migrations {
        let client = state.db.get().await.context("connecting for migrations")?;
        db::run_migrations(&client)
            .await
            .context("running database migrations")?;
    }

    worker::spawn(state.clone());

    const REQUEST_ID_HEADER: &str = "x-request-id";
    const X_REQUEST_ID: HeaderName = HeaderName::from_static(REQUEST_ID_HEADER);

    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            X_REQUEST_ID.clone(),
            MakeRequestUuid,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let request_id = request.headers().get(REQUEST_ID_HEADER);
                    if let Some(request_id) = request_id {
                        info_span!("request", request_id = ?request_id)
                    } else {
                        tracing::error!("could not extract request_id");
                        info_span!("request")
                    }
                })
                .on_request(|request: &Request<Body>, _span: &tracing::Span| {
                    tracing::info!(?request);
                })
                .on_response(|response: &axum::response::Response<_>, dur, _span: &tracing::Span| {
                    tracing::info!("response={} in {dur:?}", response.status());
                }),
        )
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(CompressionLayer::new())
        .layer(CatchPanicLayer::new());

    // Ingest endpoints are externally triggered (webhooks, CI callbacks) and
    // get a modest rate limit; the read API does not.
    let ingest = Router::new()
        .route("/hooks/provider", post(webhook::handle))
        .route("/ci/build_sha", post(ci::build_sha))
        .route("/ci/build_status", post(ci::build_status))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: BoxError| async move {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Unhandled error: {err}"),
                    )
                }))
                .layer(BufferLayer::new(32))
                .layer(RateLimitLayer::new(20, Duration::from_secs(1))),
        );

    let app = Router::new()
        .route("/", get(api::liveness))
        .route("/api/pulls", get(api::list_pulls))
        .route("/api/pulls/{owner}/{repo}/{number}", get(api::pull_detail))
        .route("/api/jobs/{owner}/{repo}/{number}", get(api::job_status))
        .merge(ingest)
        .layer(middleware)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(std::env::var_os("DISABLE_COLOR").is_none())
        .try_init()
        .unwrap();

    let port: u16 = std::env::var("PORT")
        .ok()
        .map(|p| p.parse())
        .transpose()?
        .unwrap_or(8000);
    let addr = ([0, 0, 0, 0], port).into();
    run_server(addr).await.context("failed to run the server")?;
    Ok(())
}
