use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;

/// Static bearer-token gate. With no token configured, open access is
/// allowed on loopback only; anything else is refused outright.
pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if state.api_token.is_empty() {
        let is_loopback = matches!(
            state.api_host.as_str(),
            "127.0.0.1" | "::1" | "localhost"
        );
        if is_loopback {
            return next.run(req).await;
        }
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "success": false,
                "error": "no API token configured; refusing access on a non-loopback address"
            })),
        )
            .into_response();
    }

    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == state.api_token)
        .unwrap_or(false);

    if authorized {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "success": false,
                "error": "invalid or missing bearer token"
            })),
        )
            .into_response()
    }
}
