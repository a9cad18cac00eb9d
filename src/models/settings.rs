// Settings Model
// Credentials, API keys, and admission filter thresholds

use serde::{Deserialize, Serialize};

fn default_min_donation_amount() -> f64 {
    100.0
}

fn default_min_view_count() -> u64 {
    50_000
}

fn default_min_like_count() -> u64 {
    10_000
}

fn default_history_limit() -> usize {
    50
}

/// Application settings
///
/// Mutated only through `SettingsManager` (token writes) and explicit user
/// edits; everything else reads a cloned snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    // DonationAlerts OAuth application
    #[serde(default)]
    pub donation_alerts_client_id: String,
    #[serde(default)]
    pub donation_alerts_client_secret: String,

    // DonationAlerts OAuth tokens
    #[serde(default)]
    pub donation_alerts_access_token: String,
    #[serde(default)]
    pub donation_alerts_refresh_token: String,
    /// Absolute expiry (unix seconds). 0 means unknown, which is treated as
    /// already expired so a refresh always fires before use.
    #[serde(default)]
    pub donation_alerts_token_expires_at: i64,
    /// Resolved account id, cached after the first user-info fetch
    #[serde(default)]
    pub donation_alerts_user_id: String,

    // YouTube Data API
    #[serde(default)]
    pub youtube_api_key: String,

    // Admission filters
    #[serde(default = "default_min_donation_amount")]
    pub min_donation_amount: f64,
    #[serde(default = "default_min_view_count")]
    pub min_view_count: u64,
    #[serde(default = "default_min_like_count")]
    pub min_like_count: u64,
    /// Case-insensitive substrings rejected against video titles
    #[serde(default)]
    pub blacklisted_keywords: Vec<String>,

    // Playback history cap (oldest entries discarded)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            donation_alerts_client_id: String::new(),
            donation_alerts_client_secret: String::new(),
            donation_alerts_access_token: String::new(),
            donation_alerts_refresh_token: String::new(),
            donation_alerts_token_expires_at: 0,
            donation_alerts_user_id: String::new(),
            youtube_api_key: String::new(),
            min_donation_amount: default_min_donation_amount(),
            min_view_count: default_min_view_count(),
            min_like_count: default_min_like_count(),
            blacklisted_keywords: Vec::new(),
            history_limit: default_history_limit(),
        }
    }
}

impl Settings {
    /// OAuth client credentials present (authorization flow can be started)
    pub fn has_oauth_client(&self) -> bool {
        !self.donation_alerts_client_id.is_empty()
            && !self.donation_alerts_client_secret.is_empty()
    }

    /// Tokens present (a realtime connection can be attempted)
    pub fn has_tokens(&self) -> bool {
        !self.donation_alerts_access_token.is_empty()
    }
}
