use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::debug;

/// Layer that adds two response headers:
///
///   X-Response-Time-Us  — total handler wall time in microseconds
///   Server-Timing       — same value in the standard Server-Timing format
///
/// and emits one debug line per request.
pub async fn timing(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();
    let us = elapsed.as_micros() as u64;

    if let Ok(value) = us.to_string().parse() {
        response.headers_mut().insert("X-Response-Time-Us", value);
    }

    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(value) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", value);
    }

    debug!(status = response.status().as_u16(), %method, path, us, "request served");
    response
}
