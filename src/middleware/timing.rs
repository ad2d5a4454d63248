use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

pub const PROCESS_TIME_HEADER: HeaderName = HeaderName::from_static("x-process-time");

/// Requests slower than this are logged at `warn`.
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_millis(500);

/// track_timing
///
/// Outermost middleware. Measures the full handling time, reports it in the
/// `x-process-time` header (milliseconds) and flags slow requests. It never
/// changes the status or body.
pub async fn track_timing(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let mut response = next.run(request).await;

    let elapsed = started.elapsed();
    let millis = elapsed.as_secs_f64() * 1000.0;
    if let Ok(value) = HeaderValue::from_str(&format!("{millis:.2}")) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }

    if elapsed > SLOW_REQUEST_THRESHOLD {
        tracing::warn!(%method, %path, status = response.status().as_u16(), elapsed_ms = millis, "slow request");
    } else {
        tracing::debug!(%method, %path, status = response.status().as_u16(), elapsed_ms = millis, "request completed");
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, middleware, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn adds_process_time_header() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(track_timing));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let value = response.headers().get(PROCESS_TIME_HEADER).unwrap();
        let millis: f64 = value.to_str().unwrap().parse().unwrap();
        assert!(millis >= 0.0);
    }
}
