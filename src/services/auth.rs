//! OAuth 2.0 authentication service for DonationAlerts
//!
//! Handles the authorization-code exchange, proactive refresh with a safety
//! margin, and user-identity resolution against the DonationAlerts API.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::services::SettingsManager;

const DA_TOKEN_URL: &str = "https://www.donationalerts.com/oauth/token";
const DA_AUTHORIZE_URL: &str = "https://www.donationalerts.com/oauth/authorize";
const DA_API_BASE: &str = "https://www.donationalerts.com/api/v1";

/// Scopes requested on exchange and refresh: donation subscribe, user show,
/// custom-alert store, donation index.
pub const DA_SCOPE: &str =
    "oauth-donation-subscribe oauth-user-show oauth-custom_alert-store oauth-donation-index";

/// Refresh this long before the recorded expiry, so a token cannot expire
/// mid-connection.
pub const REFRESH_SAFETY_MARGIN_SECS: i64 = 60;

/// Errors from the token lifecycle
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("DonationAlerts client credentials are not configured")]
    MissingCredentials,

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Authorization expired or revoked; reconnect your DonationAlerts account")]
    ExpiredOrRevoked,

    #[error("Network error: {0}")]
    Network(String),
}

impl AuthError {
    /// Terminal failures require the user to restart the authorization flow;
    /// the rest are retriable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthError::ExpiredOrRevoked | AuthError::MissingCredentials)
    }
}

/// Token response from the OAuth endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// DonationAlerts account info from the user endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationAlertsUser {
    pub id: String,
    pub name: String,
    /// Short-lived credential authorizing one realtime connection, distinct
    /// from the OAuth access token
    pub socket_connection_token: String,
}

/// Whether a token with the given absolute expiry should be refreshed now.
/// An unknown expiry (<= 0) is treated as already expired.
pub fn token_needs_refresh(expires_at: i64, now: i64) -> bool {
    expires_at <= 0 || now >= expires_at - REFRESH_SAFETY_MARGIN_SECS
}

/// Build the authorization URL the user opens in a browser
pub fn build_authorize_url(client_id: &str, redirect_uri: &str) -> String {
    let params = [
        ("client_id", client_id),
        ("redirect_uri", redirect_uri),
        ("response_type", "code"),
        ("scope", DA_SCOPE),
    ];

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", DA_AUTHORIZE_URL, query)
}

/// OAuth service for the DonationAlerts token lifecycle
pub struct DonationAlertsAuth {
    settings: Arc<SettingsManager>,
    http_client: reqwest::Client,
    /// Single-flight guard so two near-simultaneous refreshes cannot write
    /// two different refresh tokens
    refresh_lock: Mutex<()>,
}

impl DonationAlertsAuth {
    pub fn new(settings: Arc<SettingsManager>) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AuthError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            settings,
            http_client,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Exchange an authorization code for tokens and store them
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AuthError> {
        let settings = self
            .settings
            .load()
            .map_err(AuthError::ExchangeFailed)?;

        if !settings.has_oauth_client() {
            return Err(AuthError::MissingCredentials);
        }

        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("client_id", settings.donation_alerts_client_id.as_str());
        params.insert("client_secret", settings.donation_alerts_client_secret.as_str());
        params.insert("redirect_uri", redirect_uri);
        params.insert("code", code);

        info!("Exchanging DonationAlerts authorization code for tokens");

        let response = self
            .http_client
            .post(DA_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Token exchange request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Token exchange failed: {} - {}", status, body);
            if status.as_u16() == 401 || status.as_u16() == 400 {
                // The code is single-use and short-lived
                return Err(AuthError::ExpiredOrRevoked);
            }
            return Err(AuthError::ExchangeFailed(format!("HTTP {status}")));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::ExchangeFailed(format!("Failed to parse token response: {e}")))?;

        self.settings
            .apply_tokens(
                &tokens.access_token,
                tokens.refresh_token.as_deref(),
                tokens.expires_in,
            )
            .map_err(AuthError::ExchangeFailed)?;

        info!("Successfully obtained DonationAlerts tokens");
        Ok(tokens)
    }

    /// Refresh the access token using the stored refresh token
    async fn refresh(&self) -> Result<TokenResponse, AuthError> {
        let settings = self.settings.load().map_err(AuthError::RefreshFailed)?;

        if !settings.has_oauth_client() || settings.donation_alerts_refresh_token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", settings.donation_alerts_refresh_token.as_str());
        params.insert("client_id", settings.donation_alerts_client_id.as_str());
        params.insert("client_secret", settings.donation_alerts_client_secret.as_str());
        params.insert("scope", DA_SCOPE);

        info!("Refreshing DonationAlerts access token");

        let response = self
            .http_client
            .post(DA_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Token refresh request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Token refresh failed: {} - {}", status, body);
            if status.as_u16() == 401 {
                return Err(AuthError::ExpiredOrRevoked);
            }
            return Err(AuthError::RefreshFailed(format!("HTTP {status}")));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("Failed to parse token response: {e}")))?;

        self.settings
            .apply_tokens(
                &tokens.access_token,
                tokens.refresh_token.as_deref(),
                tokens.expires_in,
            )
            .map_err(AuthError::RefreshFailed)?;

        info!("Successfully refreshed DonationAlerts tokens");
        Ok(tokens)
    }

    /// Return a valid access token, refreshing proactively when the stored
    /// one is within the safety margin of its expiry.
    ///
    /// A failed refresh never falls back to the stale token; the error tells
    /// the caller whether to retry or restart the authorization flow.
    pub async fn ensure_fresh_token(&self) -> Result<String, AuthError> {
        let settings = self.settings.load().map_err(AuthError::RefreshFailed)?;

        if !settings.has_tokens() {
            return Err(AuthError::MissingCredentials);
        }

        let now = chrono::Utc::now().timestamp();
        if !token_needs_refresh(settings.donation_alerts_token_expires_at, now) {
            return Ok(settings.donation_alerts_access_token);
        }

        // Single-flight: concurrent callers serialize here and re-check,
        // so only the first one actually hits the token endpoint.
        let _guard = self.refresh_lock.lock().await;
        let settings = self.settings.load().map_err(AuthError::RefreshFailed)?;
        let now = chrono::Utc::now().timestamp();
        if !token_needs_refresh(settings.donation_alerts_token_expires_at, now) {
            return Ok(settings.donation_alerts_access_token);
        }

        warn!("DonationAlerts access token is stale, refreshing before use");
        let tokens = self.refresh().await?;
        Ok(tokens.access_token)
    }

    /// Fetch account id, display name, and the realtime session token
    pub async fn fetch_user(&self, access_token: &str) -> Result<DonationAlertsUser, AuthError> {
        let response = self
            .http_client
            .get(format!("{}/user/oauth", DA_API_BASE))
            .header("Authorization", format!("Bearer {access_token}"))
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("User info request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("User info fetch failed: {} - {}", status, body);
            if status.as_u16() == 401 {
                return Err(AuthError::ExpiredOrRevoked);
            }
            return Err(AuthError::Network(format!(
                "Failed to fetch DonationAlerts user info: HTTP {status}"
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("Failed to parse user response: {e}")))?;

        let user = &data["data"];
        let id = match &user["id"] {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => s.clone(),
            _ => {
                return Err(AuthError::Network(
                    "No account id in DonationAlerts user response".to_string(),
                ))
            }
        };

        let socket_connection_token = user["socket_connection_token"]
            .as_str()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AuthError::Network("No socket connection token in user response".to_string())
            })?
            .to_string();

        let resolved = DonationAlertsUser {
            id,
            name: user["name"].as_str().unwrap_or("").to_string(),
            socket_connection_token,
        };

        self.settings
            .set_user_id(&resolved.id)
            .map_err(AuthError::Network)?;

        info!(
            "Resolved DonationAlerts user: {} (ID: {})",
            resolved.name, resolved.id
        );
        Ok(resolved)
    }

    /// Trade the realtime connection's client id for per-channel
    /// subscription tokens
    pub async fn subscribe_channels(
        &self,
        access_token: &str,
        channels: &[String],
        client_id: &str,
    ) -> Result<Vec<(String, String)>, AuthError> {
        let response = self
            .http_client
            .post(format!("{}/centrifuge/subscribe", DA_API_BASE))
            .header("Authorization", format!("Bearer {access_token}"))
            .json(&serde_json::json!({
                "channels": channels,
                "client": client_id,
            }))
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Channel subscribe request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Channel subscribe failed: {} - {}", status, body);
            if status.as_u16() == 401 {
                return Err(AuthError::ExpiredOrRevoked);
            }
            return Err(AuthError::Network(format!(
                "Channel subscribe failed: HTTP {status}"
            )));
        }

        let data: serde_json::Value = response.json().await.map_err(|e| {
            AuthError::Network(format!("Failed to parse channel subscribe response: {e}"))
        })?;

        let tokens = data["channels"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let channel = entry["channel"].as_str()?;
                        let token = entry["token"].as_str()?;
                        Some((channel.to_string(), token.to_string()))
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if tokens.is_empty() {
            return Err(AuthError::Network(
                "Channel subscribe response carries no tokens".to_string(),
            ));
        }
        Ok(tokens)
    }
}
