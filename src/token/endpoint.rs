//! Form-encoded requests to an OAuth2 token endpoint.

use serde::Deserialize;
use tracing::warn;

use super::Token;
use crate::error::{Error, Result};

/// Token response from an OAuth2 token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Error response from an OAuth2 token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// POST `form` to `token_url` and decode the token response.
///
/// `invalid_grant` maps to [`Error::TokenExpired`]; any other rejection
/// becomes [`Error::TokenExchange`].
pub(crate) async fn request_token(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<Token> {
    let response = http.post(token_url).form(form).send().await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        if let Ok(error) = serde_json::from_str::<TokenErrorResponse>(&body) {
            warn!(
                error = %error.error,
                description = ?error.error_description,
                "Token request failed"
            );
            if error.error == "invalid_grant" {
                return Err(Error::TokenExpired);
            }
            return Err(Error::TokenExchange(
                error.error_description.unwrap_or(error.error),
            ));
        }
        return Err(Error::TokenExchange(format!(
            "HTTP {}: {}",
            status.as_u16(),
            body
        )));
    }

    let parsed: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| Error::TokenExchange(format!("Failed to parse token response: {}", e)))?;

    let mut token = Token::new(parsed.access_token, parsed.expires_in)
        .with_refresh_token(parsed.refresh_token.filter(|rt| !rt.is_empty()));
    if let Some(kind) = parsed.token_type.filter(|t| !t.is_empty()) {
        token.token_type = kind;
    }
    Ok(token)
}
