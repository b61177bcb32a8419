use axum::http::HeaderMap;

use crate::error::AppError;

/// Checks presented bearer tokens against the configured API token.
#[derive(Clone)]
pub struct ApiTokenVerifier {
    token: String,
}

impl ApiTokenVerifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn verify(&self, presented: &str) -> Result<(), AppError> {
        if constant_time_eq(self.token.as_bytes(), presented.as_bytes()) {
            Ok(())
        } else {
            Err(AppError::unauthorized("Bearer token is not valid"))
        }
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

fn constant_time_eq(expected: &[u8], presented: &[u8]) -> bool {
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .iter()
        .zip(presented)
        .fold(0_u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
