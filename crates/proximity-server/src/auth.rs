//! Session authentication. Proximity fronts this with an external
//! reverse proxy or SSO layer (see SPEC_FULL §6); this middleware only
//! checks that a session cookie was attached upstream, it never issues
//! or validates credentials itself.
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

const SESSION_COOKIE: &str = "proximity_session";

pub async fn require_session(request: Request, next: Next) -> Result<Response, StatusCode> {
    let has_session = request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|cookies| cookies.split(';').any(|c| c.trim().starts_with(&format!("{SESSION_COOKIE}="))))
        .unwrap_or(false);

    if !has_session {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
