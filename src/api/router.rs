use std::time::Duration;

use axum::{
    Json, Router,
    http::{HeaderName, Request, Response, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{MakeSpan, OnFailure, OnResponse, TraceLayer},
};
use tracing::{Level, Span, error, field, info, span, warn};

use crate::{transport::HostTransport, wallet::Wallet};

use super::{
    Env,
    error::ErrorResponse,
    handlers::{
        delete_allowance, delete_file, get_consensus, get_contracts, get_download, get_downloads,
        get_file, get_files, get_hosts, get_renter, get_stream, post_allowance, post_block,
        post_clear_downloads, post_host, post_rate_limit, post_stream_cache_size, post_upload,
        stop,
    },
};

#[derive(Clone)]
struct CustomMakeSpan;
impl<B> MakeSpan<B> for CustomMakeSpan {
    fn make_span(&mut self, req: &Request<B>) -> Span {
        let id = req
            .extensions()
            .get::<RequestId>()
            .and_then(|id| id.header_value().to_str().ok())
            .unwrap_or("unknown");
        span!(
            Level::INFO,
            "renter_api",
            id = %id,
            method = %req.method(),
            path = %req.uri().path(),
            version = ?req.version(),
            error = field::Empty,
        )
    }
}

/// Client errors are expected traffic (missing files, bad ranges); only
/// server errors are logged as errors.
#[derive(Clone)]
struct CustomOnResponse;
impl<B> OnResponse<B> for CustomOnResponse {
    fn on_response(self, res: &Response<B>, latency: Duration, _: &Span) {
        let status = res.status();
        if status.is_server_error() {
            error!("{} {}ms", status, latency.as_millis());
        } else if status.is_client_error() {
            warn!("{} {}ms", status, latency.as_millis());
        } else {
            info!("{} {}ms", status, latency.as_millis());
        }
    }
}

#[derive(Clone)]
struct NoOpOnFailure;
impl<B> OnFailure<B> for NoOpOnFailure {
    fn on_failure(&mut self, _res: B, _latency: Duration, _span: &Span) {}
}

fn handle_panic(panic: Box<dyn std::any::Any + Send>) -> axum::response::Response {
    let message = panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("Handler panicked")
        .to_string();

    let error_response = Json(ErrorResponse { error: message });
    (StatusCode::INTERNAL_SERVER_ERROR, error_response).into_response()
}

pub fn new<T: HostTransport, W: Wallet>(env: Env<T, W>) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");
    let timeout = Duration::from_secs(env.config.api_timeout_secs.max(1));

    Router::new()
        .nest(
            "/api",
            Router::new()
                .nest(
                    "/renter",
                    Router::new()
                        .route("/", get(get_renter::<T, W>))
                        .route(
                            "/allowance",
                            post(post_allowance::<T, W>).delete(delete_allowance::<T, W>),
                        )
                        .route("/ratelimit", post(post_rate_limit::<T, W>))
                        .route("/streamcachesize", post(post_stream_cache_size::<T, W>))
                        .route("/contracts", get(get_contracts::<T, W>))
                        .route("/downloads", get(get_downloads::<T, W>))
                        .route("/downloads/clear", post(post_clear_downloads::<T, W>))
                        .route("/files", get(get_files::<T, W>))
                        .route(
                            "/files/{*path}",
                            get(get_file::<T, W>).delete(delete_file::<T, W>),
                        )
                        .route("/upload", post(post_upload::<T, W>))
                        .route("/download/{*path}", get(get_download::<T, W>))
                        .route("/stream/{*path}", get(get_stream::<T, W>)),
                )
                .nest(
                    "/consensus",
                    Router::new()
                        .route("/", get(get_consensus::<T, W>))
                        .route("/blocks", post(post_block::<T, W>)),
                )
                .route(
                    "/hostdb/hosts",
                    get(get_hosts::<T, W>).post(post_host::<T, W>),
                )
                .route("/stop", get(stop::<T, W>)),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    x_request_id.clone(),
                    MakeRequestUuid,
                ))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(CustomMakeSpan)
                        .on_response(CustomOnResponse)
                        .on_failure(NoOpOnFailure),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id))
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(env)
}
