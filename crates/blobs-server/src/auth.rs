//! Authentication middleware
//!
//! With a configured token, a request is let through when it carries
//! `authorization: Bearer <token>`, or, on direct storage paths, a
//! `signature` query parameter minted by the control-plane emulation.
//! Without a token every request is trusted.

use crate::error::ServerError;
use crate::handlers::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, header},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Query parameter carrying a signed-URL signature
pub const SIGNATURE_PARAM: &str = "signature";

/// Path prefix of the control-plane emulation
pub const CONTROL_PLANE_PREFIX: &str = "/api/v1/";

/// Access class a signature grants
#[must_use]
pub fn verb(method: &Method) -> &'static str {
    match *method {
        Method::PUT => "write",
        Method::DELETE => "delete",
        _ => "read",
    }
}

fn mac(token: &str, verb: &str, path: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(token.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(format!("{verb} {path}").as_bytes());
    mac
}

/// Sign `{verb} {path}` with the server token
#[must_use]
pub fn sign(token: &str, verb: &str, path: &str) -> String {
    hex::encode(mac(token, verb, path).finalize().into_bytes())
}

fn verify(token: &str, verb: &str, path: &str, signature: &str) -> bool {
    hex::decode(signature).is_ok_and(|expected| mac(token, verb, path).verify_slice(&expected).is_ok())
}

fn query_signature(request: &Request<Body>) -> Option<String> {
    request.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name == SIGNATURE_PARAM).then(|| value.to_string())
        })
    })
}

/// Authentication middleware layer
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    let Some(token) = state.token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let path = request.uri().path();
    if path == "/health" {
        return Ok(next.run(request).await);
    }

    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if bearer == Some(token) {
        return Ok(next.run(request).await);
    }

    if !path.starts_with(CONTROL_PLANE_PREFIX)
        && let Some(signature) = query_signature(&request)
    {
        if verify(token, verb(request.method()), path, &signature) {
            debug!("signed request for {}", path);
            return Ok(next.run(request).await);
        }
        warn!("rejected bad signature for {} {}", request.method(), path);
        return Err(ServerError::forbidden("invalid signature"));
    }

    warn!("rejected unauthenticated {} {}", request.method(), path);
    Err(ServerError::forbidden(if bearer.is_some() {
        "invalid token"
    } else {
        "missing authorization header"
    }))
}
