use anyhow::{Context, Result};
use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use std::path::Path;

use crate::state::AppState;

/// Load the bearer token, minting one on first run. The token file is the
/// only credential store the daemon has.
pub fn load_or_create_token(data_dir: &Path) -> Result<String> {
    let path = data_dir.join("token");

    if let Ok(existing) = std::fs::read_to_string(&path) {
        let token = existing.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let token = uuid::Uuid::new_v4().simple().to_string();
    std::fs::write(&path, &token)
        .with_context(|| format!("writing token file {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
    }

    Ok(token)
}

#[derive(Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

/// Bearer auth for every mutating endpoint. The SSE client cannot set
/// headers, so the token is also accepted as a query parameter.
pub async fn require_token(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let header_token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let presented = header_token.or(query.token.as_deref());

    match presented {
        Some(token) if token == state.token.as_ref() => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
