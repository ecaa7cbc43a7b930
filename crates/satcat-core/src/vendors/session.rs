//! Authenticated HTTP session shared by every request an adapter makes.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use satcat_vendors::Vendor;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::HttpSettings;
use crate::error::{CatalogError, Result};

/// Tokens are refreshed this long before the vendor says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn from_settings(http: &HttpSettings, max_retries: Option<u32>) -> Self {
        Self {
            max_retries: max_retries.unwrap_or(http.max_retries),
            base: Duration::from_millis(http.backoff_base_ms),
            cap: Duration::from_millis(http.backoff_cap_ms),
        }
    }

    /// `min(base * 2^attempt, cap)`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.cap)
    }
}

#[derive(Debug, Clone)]
pub enum TokenExchange {
    /// Form POST trading an API key for a bearer token.
    ApiKey { url: String, api_key: String },
    /// Basic-auth POST returning a bearer token.
    Basic {
        url: String,
        username: String,
        password: String,
    },
}

#[derive(Debug, Clone)]
pub enum AuthScheme {
    None,
    Header { name: &'static str, value: String },
    Basic {
        username: String,
        password: Option<String>,
    },
    TokenExchange(TokenExchange),
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "accessToken")]
    access_token: String,
    #[serde(alias = "expiresIn", default)]
    expires_in: Option<u64>,
}

pub struct VendorSession {
    vendor: Vendor,
    client: Client,
    auth: AuthScheme,
    token: Mutex<Option<CachedToken>>,
    retry: RetryPolicy,
}

impl VendorSession {
    pub fn new(vendor: Vendor, auth: AuthScheme, http: &HttpSettings, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(http.timeout())
            .user_agent(concat!("satcat/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            vendor,
            client,
            auth,
            token: Mutex::new(None),
            retry,
        })
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Sends an authenticated request, retrying 429/5xx/network failures with
    /// backoff and re-authenticating once on 401.
    pub async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        self.send_inner(build, true).await
    }

    /// Same retry rules, but without vendor credentials. Used for signed or
    /// public asset URLs that live outside the vendor API.
    pub async fn send_public<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        self.send_inner(build, false).await
    }

    pub async fn json<F>(&self, build: F) -> Result<Value>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let response = self.send(build).await?;
        response.json::<Value>().await.map_err(|err| CatalogError::VendorTransient {
            vendor: self.vendor,
            message: format!("response body was not valid JSON: {err}"),
        })
    }

    pub async fn bytes<F>(&self, build: F) -> Result<Bytes>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        Ok(self.send(build).await?.bytes().await?)
    }

    pub async fn public_bytes(&self, url: &str) -> Result<Bytes> {
        Ok(self.send_public(|client| client.get(url)).await?.bytes().await?)
    }

    async fn send_inner<F>(&self, build: F, authenticate: bool) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let mut attempt: u32 = 0;
        let mut reauthenticated = false;

        loop {
            let token = if authenticate { self.bearer_token().await? } else { None };
            let mut request = build(&self.client);
            if authenticate {
                request = self.authorize(request, token.as_deref());
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if attempt >= self.retry.max_retries {
                        return Err(CatalogError::VendorTransient {
                            vendor: self.vendor,
                            message: err.to_string(),
                        });
                    }
                    let wait = self.retry.delay(attempt);
                    warn!(vendor = %self.vendor, attempt, error = %err, ?wait, "request failed, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::UNAUTHORIZED {
                if authenticate && !reauthenticated && matches!(self.auth, AuthScheme::TokenExchange(_)) {
                    info!(vendor = %self.vendor, "token rejected, re-authenticating");
                    self.invalidate(token.as_deref()).await;
                    reauthenticated = true;
                    continue;
                }
                return Err(CatalogError::VendorAuthFailed {
                    vendor: self.vendor,
                    message: error_body(response).await,
                });
            }

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if attempt >= self.retry.max_retries {
                    return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                        CatalogError::VendorRateLimited {
                            vendor: self.vendor,
                            attempts: attempt + 1,
                        }
                    } else {
                        CatalogError::VendorTransient {
                            vendor: self.vendor,
                            message: format!("status {}: {}", status.as_u16(), error_body(response).await),
                        }
                    });
                }
                let wait = retry_after(&response)
                    .map(|wait| wait.min(self.retry.cap))
                    .unwrap_or_else(|| self.retry.delay(attempt));
                warn!(vendor = %self.vendor, status = status.as_u16(), attempt, ?wait, "vendor throttled or unavailable, backing off");
                tokio::time::sleep(wait).await;
                attempt += 1;
                continue;
            }

            return Err(CatalogError::VendorRejected {
                vendor: self.vendor,
                status: status.as_u16(),
                message: error_body(response).await,
            });
        }
    }

    fn authorize(&self, request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match &self.auth {
            AuthScheme::None => request,
            AuthScheme::Header { name, value } => request.header(*name, value),
            AuthScheme::Basic { username, password } => request.basic_auth(username, password.as_ref()),
            AuthScheme::TokenExchange(_) => match token {
                Some(token) => request.bearer_auth(token),
                None => request,
            },
        }
    }

    /// Returns a valid token, exchanging credentials if needed. The lock is
    /// held across the exchange so concurrent callers wait for one refresh.
    async fn bearer_token(&self) -> Result<Option<String>> {
        let AuthScheme::TokenExchange(exchange) = &self.auth else {
            return Ok(None);
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(Some(token.value.clone()));
            }
        }

        let fresh = self.exchange(exchange).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(Some(value))
    }

    /// Drops the cached token only if it is the one that was rejected.
    async fn invalidate(&self, used: Option<&str>) {
        let mut cached = self.token.lock().await;
        if cached.as_ref().map(|token| token.value.as_str()) == used {
            *cached = None;
        }
    }

    async fn exchange(&self, exchange: &TokenExchange) -> Result<CachedToken> {
        let request = match exchange {
            TokenExchange::ApiKey { url, api_key } => self.client.post(url).form(&[
                ("apikey", api_key.as_str()),
                ("grant_type", "api_key"),
                ("client_id", "IDP"),
            ]),
            TokenExchange::Basic {
                url,
                username,
                password,
            } => self.client.post(url).basic_auth(username, Some(password)),
        };

        let response = request.send().await.map_err(|err| CatalogError::VendorTransient {
            vendor: self.vendor,
            message: format!("token exchange failed: {err}"),
        })?;
        let status = response.status();
        if status.is_client_error() {
            return Err(CatalogError::VendorAuthFailed {
                vendor: self.vendor,
                message: format!("token exchange returned {}: {}", status.as_u16(), error_body(response).await),
            });
        }
        if !status.is_success() {
            return Err(CatalogError::VendorTransient {
                vendor: self.vendor,
                message: format!("token exchange returned {}", status.as_u16()),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|err| CatalogError::VendorAuthFailed {
            vendor: self.vendor,
            message: format!("malformed token response: {err}"),
        })?;
        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        debug!(vendor = %self.vendor, lifetime_secs = lifetime.as_secs(), "obtained access token");
        Ok(CachedToken {
            value: body.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn error_body(response: Response) -> String {
    let mut text = response.text().await.unwrap_or_default();
    if text.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(6), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn retry_policy_prefers_vendor_override() {
        let http = HttpSettings::default();
        assert_eq!(RetryPolicy::from_settings(&http, None).max_retries, 5);
        assert_eq!(RetryPolicy::from_settings(&http, Some(2)).max_retries, 2);
    }
}
