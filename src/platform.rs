//! Platform API adapter: short-lived access tokens and media downloads.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

const TOKEN_URL: &str = "https://api.weixin.qq.com/cgi-bin/token";
const MEDIA_URL: &str = "https://api.weixin.qq.com/cgi-bin/media/get";

/// Refresh this long before the advertised expiry, to absorb clock skew.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Seam for backends that need raw platform media (voice bytes).
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_media(&self, media_id: &str) -> Result<Vec<u8>, String>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    errcode: Option<i64>,
    errmsg: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct PlatformClient {
    app_id: String,
    app_secret: String,
    http: reqwest::Client,
    token: tokio::sync::Mutex<Option<CachedToken>>,
}

impl PlatformClient {
    pub fn new(app_id: String, app_secret: String) -> Self {
        Self {
            app_id,
            app_secret,
            http: reqwest::Client::new(),
            token: tokio::sync::Mutex::new(None),
        }
    }

    /// Current access token, fetching a fresh one when the cached token is
    /// absent or about to expire.
    async fn access_token(&self) -> Result<String, String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("Fetching platform access token");
        let url = format!(
            "{TOKEN_URL}?grant_type=client_credential&appid={}&secret={}",
            self.app_id, self.app_secret
        );
        let response: TokenResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?
            .json()
            .await
            .map_err(|e| format!("bad token response: {e}"))?;

        let value = match response.access_token {
            Some(token) => token,
            None => {
                return Err(format!(
                    "token request rejected: {} {}",
                    response.errcode.unwrap_or_default(),
                    response.errmsg.unwrap_or_default()
                ));
            }
        };
        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(7200))
            .saturating_sub(EXPIRY_MARGIN);

        info!("Platform access token refreshed (valid {:?})", lifetime);
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }
}

#[async_trait]
impl MediaFetcher for PlatformClient {
    /// Download a temporary media asset by its platform handle.
    async fn fetch_media(&self, media_id: &str) -> Result<Vec<u8>, String> {
        let token = self.access_token().await?;
        let url = format!("{MEDIA_URL}?access_token={token}&media_id={media_id}");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("media download failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("media download failed: {status}"));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("media read failed: {e}"))?;

        // Error bodies come back as JSON instead of raw media.
        if bytes.starts_with(b"{") {
            if let Ok(err) = serde_json::from_slice::<TokenResponse>(&bytes) {
                if err.errcode.is_some() {
                    return Err(format!(
                        "media download rejected: {} {}",
                        err.errcode.unwrap_or_default(),
                        err.errmsg.unwrap_or_default()
                    ));
                }
            }
        }

        debug!("Downloaded media {media_id}: {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_parse_success() {
        let raw = r#"{"access_token":"tok123","expires_in":7200}"#;
        let parsed: TokenResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.access_token.as_deref(), Some("tok123"));
        assert_eq!(parsed.expires_in, Some(7200));
    }

    #[test]
    fn test_token_response_parse_error() {
        let raw = r#"{"errcode":40013,"errmsg":"invalid appid"}"#;
        let parsed: TokenResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.access_token.is_none());
        assert_eq!(parsed.errcode, Some(40013));
    }
}
