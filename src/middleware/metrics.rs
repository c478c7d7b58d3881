use crate::state::AppState;
use actix_web::{
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web, Error,
};
use std::time::Instant;

/// Count every admin API request and time it per endpoint.
///
/// Endpoints are keyed by method and route pattern, so unknown paths all land
/// under one `"<METHOD> <unmatched>"` entry instead of one entry each.
pub async fn record_metrics(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let start_time = Instant::now();
    let route = req.match_pattern().unwrap_or_else(|| "<unmatched>".to_string());
    let endpoint = format!("{} {}", req.method(), route);
    let state = req.app_data::<web::Data<AppState>>().cloned();

    if let Some(state) = &state {
        state.increment_request_count();
    }

    let result = next.call(req).await;
    let duration_ms = start_time.elapsed().as_millis() as u64;

    let is_error = match &result {
        Ok(response) => response.status().is_client_error() || response.status().is_server_error(),
        Err(_) => true,
    };

    if let Some(state) = &state {
        state.record_endpoint_request(&endpoint, duration_ms, is_error);
        if is_error {
            state.increment_error_count();
        }
    }

    result
}
