//! Token acquisition and session cookie handling
//!
//! Gateways running firmware 7 and later require a JWT issued by the
//! Enphase token service. The token is obtained in two steps: a login to
//! Enlighten yields a web session id, which Entrez exchanges for a JWT
//! scoped to one gateway serial.

use crate::error::{EnvoyError, Result};
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default Enlighten login service
pub const ENLIGHTEN_BASE: &str = "https://enlighten.enphaseenergy.com";

/// Default Entrez token service
pub const ENTREZ_BASE: &str = "https://entrez.enphaseenergy.com";

/// Name of the cookie carrying the gateway session
pub const SESSION_COOKIE: &str = "sessionId";

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    session_id: &'a str,
    serial_num: &'a str,
    username: &'a str,
}

/// Client for the Enlighten/Entrez token exchange.
#[derive(Debug, Clone)]
pub(crate) struct TokenService {
    http: reqwest::Client,
    enlighten_base: String,
    entrez_base: String,
}

impl TokenService {
    pub(crate) fn new(http: reqwest::Client, enlighten_base: String, entrez_base: String) -> Self {
        Self {
            http,
            enlighten_base: enlighten_base.trim_end_matches('/').to_string(),
            entrez_base: entrez_base.trim_end_matches('/').to_string(),
        }
    }

    /// Obtain a fresh JWT for `serial`.
    pub(crate) async fn fetch_token(
        &self,
        username: &str,
        password: &str,
        serial: &str,
    ) -> Result<String> {
        let session_id = self.login(username, password).await?;

        let url = format!("{}/tokens", self.entrez_base);
        let resp = self
            .http
            .post(&url)
            .json(&TokenRequest {
                session_id: &session_id,
                serial_num: serial,
                username,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EnvoyError::Token(format!(
                "token service returned {}",
                status.as_u16()
            )));
        }

        let token = resp.text().await?.trim().to_string();
        if token.is_empty() {
            return Err(EnvoyError::Token("token service returned an empty token".into()));
        }
        Ok(token)
    }

    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let path = "/login/login.json";
        let url = format!("{}{}", self.enlighten_base, path);
        let resp = self
            .http
            .post(&url)
            .form(&[("user[email]", username), ("user[password]", password)])
            .send()
            .await?;

        let status = resp.status();
        debug!(status = status.as_u16(), "Enlighten login response");
        if !status.is_success() {
            return Err(EnvoyError::Token(format!(
                "login returned {}",
                status.as_u16()
            )));
        }

        let body = resp.bytes().await?;
        let login: LoginResponse =
            serde_json::from_slice(&body).map_err(|source| EnvoyError::Decode {
                path: path.to_string(),
                source,
            })?;

        match login.session_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(EnvoyError::Token(
                login
                    .message
                    .unwrap_or_else(|| "login response carried no session id".to_string()),
            )),
        }
    }
}

/// Extract the gateway session id from `Set-Cookie` headers.
pub(crate) fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookie| cookie.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_session_cookie_found() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("other=1; Path=/"));
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("sessionId=Zx81k2; Path=/; HttpOnly; Secure"),
        );

        assert_eq!(session_cookie(&headers), Some("Zx81k2".to_string()));
    }

    #[test]
    fn test_session_cookie_missing_or_empty() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_cookie(&headers), None);

        headers.append(SET_COOKIE, HeaderValue::from_static("sessionId=; Path=/"));
        assert_eq!(session_cookie(&headers), None);
    }

    #[test]
    fn test_token_service_trims_base() {
        let service = TokenService::new(
            reqwest::Client::new(),
            "https://enlighten.example/".to_string(),
            "https://entrez.example//".to_string(),
        );
        assert_eq!(service.enlighten_base, "https://enlighten.example");
        assert_eq!(service.entrez_base, "https://entrez.example");
    }
}
