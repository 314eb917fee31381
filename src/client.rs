//! Gateway client
//!
//! [`EnvoyClient`] talks HTTP(S) to the gateway's local API. It owns the
//! JWT and the gateway session, establishes both lazily on the first request
//! and reports every transition to its [`SessionObserver`].

use crate::auth::{session_cookie, TokenService, ENLIGHTEN_BASE, ENTREZ_BASE, SESSION_COOKIE};
use crate::error::{EnvoyError, Result};
use crate::model::{CommCheck, Inverter, Production};
use crate::observer::{NoopObserver, SessionObserver};
use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Default gateway address (the name the gateway announces over mDNS)
pub const DEFAULT_GATEWAY_ADDRESS: &str = "https://envoy.local";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const COMM_CHECK_PATH: &str = "/installer/pcu_comm_check";
const PRODUCTION_PATH: &str = "/production.json";
const INVERTERS_PATH: &str = "/api/v1/production/inverters";
const CHECK_JWT_PATH: &str = "/auth/check_jwt";

/// Operations the exporter needs from a gateway.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Ask the gateway which micro-inverters it can currently reach
    async fn comm_check(&self) -> Result<CommCheck>;

    /// Fetch production totals
    async fn production(&self) -> Result<Production>;

    /// Fetch the last report of every inverter
    async fn inverters(&self) -> Result<Vec<Inverter>>;

    /// Drop the cached session so the next request establishes a new one
    async fn invalidate_session(&self);
}

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default)]
struct AuthState {
    jwt: Option<String>,
    session: Option<String>,
}

/// HTTP client for one gateway.
pub struct EnvoyClient {
    http: reqwest::Client,
    base: Url,
    serial: String,
    credentials: Option<Credentials>,
    tokens: TokenService,
    state: Mutex<AuthState>,
    observer: Arc<dyn SessionObserver>,
    debug: bool,
}

impl fmt::Debug for EnvoyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvoyClient")
            .field("base", &self.base.as_str())
            .field("serial", &self.serial)
            .field("credentials", &self.credentials)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl EnvoyClient {
    /// Start building a client for the gateway with the given serial
    pub fn builder(serial: impl Into<String>) -> EnvoyClientBuilder {
        EnvoyClientBuilder::new(serial)
    }

    /// Gateway serial this client authenticates against
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Base URL of the gateway
    pub fn gateway_address(&self) -> &str {
        self.base.as_str()
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| EnvoyError::InvalidAddress(format!("{}{}: {}", self.base, path, e)))
    }

    /// Return the current session, establishing it (and a JWT) if needed.
    async fn session(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(session) = &state.session {
            return Ok(session.clone());
        }

        let jwt = match &state.jwt {
            Some(jwt) => jwt.clone(),
            None => {
                let jwt = self.refresh_jwt().await?;
                state.jwt = Some(jwt.clone());
                jwt
            }
        };

        match self.check_jwt(&jwt).await {
            Ok(session) => {
                debug!(session = %session, "Gateway session established");
                self.observer.session_refreshed(&session);
                state.session = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                // A rejected token can only be replaced when we can log in again.
                if e.is_unauthorized() && self.credentials.is_some() {
                    state.jwt = None;
                }
                self.observer.session_error(&e);
                Err(e)
            }
        }
    }

    async fn refresh_jwt(&self) -> Result<String> {
        let Some(credentials) = &self.credentials else {
            let err = EnvoyError::MissingCredentials;
            self.observer.jwt_error(&err);
            return Err(err);
        };

        match self
            .tokens
            .fetch_token(&credentials.username, &credentials.password, &self.serial)
            .await
        {
            Ok(jwt) => {
                debug!(serial = %self.serial, "JWT obtained from token service");
                self.observer.jwt_refreshed();
                Ok(jwt)
            }
            Err(e) => {
                self.observer.jwt_error(&e);
                Err(e)
            }
        }
    }

    async fn check_jwt(&self, jwt: &str) -> Result<String> {
        let resp = self
            .http
            .get(self.url(CHECK_JWT_PATH)?)
            .bearer_auth(jwt)
            .send()
            .await?;

        match resp.status() {
            StatusCode::UNAUTHORIZED => Err(EnvoyError::Unauthorized {
                path: CHECK_JWT_PATH.to_string(),
            }),
            status if !status.is_success() => Err(EnvoyError::Status {
                status: status.as_u16(),
                path: CHECK_JWT_PATH.to_string(),
            }),
            _ => session_cookie(resp.headers()).ok_or_else(|| {
                EnvoyError::Session(format!("gateway did not return a {} cookie", SESSION_COOKIE))
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let session = self.session().await?;
        self.observer.session_used(&session);

        let resp = self
            .http
            .get(self.url(path)?)
            .header(COOKIE, format!("{}={}", SESSION_COOKIE, session))
            .send()
            .await?;

        let status = resp.status();
        if self.debug {
            debug!(path, status = status.as_u16(), "Gateway response");
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(EnvoyError::Unauthorized {
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            return Err(EnvoyError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| EnvoyError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

#[async_trait]
impl DeviceClient for EnvoyClient {
    async fn comm_check(&self) -> Result<CommCheck> {
        self.get_json(COMM_CHECK_PATH).await
    }

    async fn production(&self) -> Result<Production> {
        self.get_json(PRODUCTION_PATH).await
    }

    async fn inverters(&self) -> Result<Vec<Inverter>> {
        self.get_json(INVERTERS_PATH).await
    }

    async fn invalidate_session(&self) {
        let mut state = self.state.lock().await;
        if state.session.take().is_some() {
            debug!(serial = %self.serial, "Gateway session invalidated");
        }
    }
}

/// Builder for [`EnvoyClient`]
pub struct EnvoyClientBuilder {
    serial: String,
    address: String,
    username: Option<String>,
    password: Option<String>,
    jwt: Option<String>,
    debug: bool,
    timeout: Duration,
    observer: Option<Arc<dyn SessionObserver>>,
    enlighten_base: String,
    entrez_base: String,
}

impl EnvoyClientBuilder {
    fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            address: DEFAULT_GATEWAY_ADDRESS.to_string(),
            username: None,
            password: None,
            jwt: None,
            debug: false,
            timeout: DEFAULT_TIMEOUT,
            observer: None,
            enlighten_base: ENLIGHTEN_BASE.to_string(),
            entrez_base: ENTREZ_BASE.to_string(),
        }
    }

    /// Gateway base URL
    pub fn gateway_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Enlighten account used to obtain tokens. Empty values are ignored.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = non_empty(username.into());
        self.password = non_empty(password.into());
        self
    }

    /// Pre-issued JWT. An empty value is ignored.
    pub fn jwt(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = non_empty(jwt.into());
        self
    }

    /// Log every gateway response status
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Receiver of session lifecycle events
    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Override the token service endpoints
    pub fn token_services(
        mut self,
        enlighten_base: impl Into<String>,
        entrez_base: impl Into<String>,
    ) -> Self {
        self.enlighten_base = enlighten_base.into();
        self.entrez_base = entrez_base.into();
        self
    }

    /// Validate the options and create the client
    pub fn build(self) -> Result<EnvoyClient> {
        let base = Url::parse(&self.address)
            .map_err(|e| EnvoyError::InvalidAddress(format!("{}: {}", self.address, e)))?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(EnvoyError::InvalidAddress(self.address));
        }

        let credentials = match (self.username, self.password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        };
        if self.jwt.is_none() && credentials.is_none() {
            return Err(EnvoyError::MissingCredentials);
        }

        // The gateway only ever presents a self-signed certificate.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(self.timeout)
            .build()?;
        let token_http = reqwest::Client::builder().timeout(self.timeout).build()?;

        Ok(EnvoyClient {
            http,
            base,
            serial: self.serial,
            credentials,
            tokens: TokenService::new(token_http, self.enlighten_base, self.entrez_base),
            state: Mutex::new(AuthState {
                jwt: self.jwt,
                session: None,
            }),
            observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            debug: self.debug,
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_credentials() {
        let result = EnvoyClient::builder("122300000001").build();
        assert!(matches!(result, Err(EnvoyError::MissingCredentials)));

        let result = EnvoyClient::builder("122300000001")
            .credentials("owner@example.com", "")
            .build();
        assert!(matches!(result, Err(EnvoyError::MissingCredentials)));
    }

    #[test]
    fn test_build_with_jwt() {
        let client = EnvoyClient::builder("122300000001")
            .jwt("eyJhbGciOi")
            .build()
            .unwrap();
        assert_eq!(client.serial(), "122300000001");
        assert_eq!(client.gateway_address(), "https://envoy.local/");
    }

    #[test]
    fn test_build_rejects_bad_address() {
        let result = EnvoyClient::builder("122300000001")
            .jwt("token")
            .gateway_address("not a url")
            .build();
        assert!(matches!(result, Err(EnvoyError::InvalidAddress(_))));

        let result = EnvoyClient::builder("122300000001")
            .jwt("token")
            .gateway_address("ftp://192.168.1.20")
            .build();
        assert!(matches!(result, Err(EnvoyError::InvalidAddress(_))));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials {
            username: "owner@example.com".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("owner@example.com"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_url_join() {
        let client = EnvoyClient::builder("122300000001")
            .jwt("token")
            .gateway_address("http://192.168.1.20:8080")
            .build()
            .unwrap();
        let url = client.url(PRODUCTION_PATH).unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.20:8080/production.json");
    }
}
