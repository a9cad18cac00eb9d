// SettingsManager Service
// Handles settings persistence and token writes

use crate::models::Settings;
use crate::services::encryption::Encryption;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::RwLock;
use tokio::sync::watch;

/// Fields in settings.json (camelCase) that contain sensitive data and are
/// encrypted at rest.
const SENSITIVE_FIELDS: &[&str] = &[
    "donationAlertsClientSecret",
    "donationAlertsAccessToken",
    "donationAlertsRefreshToken",
    "youtubeApiKey",
];

/// Manages settings storage and retrieval.
///
/// This is the one piece of mutable shared state; every write goes through
/// `save` (or the token setters below) so derived fields stay consistent and
/// subscribers observe each change.
pub struct SettingsManager {
    settings_path: PathBuf,
    app_data_dir: PathBuf,
    cache: RwLock<Option<Settings>>,
    revision_tx: watch::Sender<u64>,
}

impl SettingsManager {
    /// Create a new SettingsManager with the given app data directory
    pub fn new(app_data_dir: PathBuf) -> Self {
        let settings_path = app_data_dir.join("settings.json");
        let (revision_tx, _) = watch::channel(0);
        Self {
            settings_path,
            app_data_dir,
            cache: RwLock::new(None),
            revision_tx,
        }
    }

    /// Subscribe to settings changes. The value is a revision counter; the
    /// content itself is read via `load()`.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load(&self) -> Result<Settings, String> {
        // Check cache first
        if let Ok(cache) = self.cache.read() {
            if let Some(ref settings) = *cache {
                return Ok(settings.clone());
            }
        }

        let settings = if self.settings_path.exists() {
            let content = std::fs::read_to_string(&self.settings_path)
                .map_err(|e| format!("Failed to read settings: {e}"))?;

            let mut user_value: Value = serde_json::from_str(&content)
                .map_err(|e| format!("Failed to parse settings: {e}"))?;

            // Decrypt sensitive fields so in-memory Settings always has plaintext
            self.decrypt_sensitive_fields(&mut user_value);

            let defaults_value = serde_json::to_value(Settings::default())
                .map_err(|e| format!("Failed to build default settings: {e}"))?;

            let changed = merge_missing_settings(&mut user_value, &defaults_value);

            let settings: Settings = serde_json::from_value(user_value)
                .map_err(|e| format!("Failed to parse settings: {e}"))?;

            if changed {
                self.save_internal(&settings)?;
            }

            settings
        } else {
            // Return defaults and save them
            let defaults = Settings::default();
            self.save_internal(&defaults)?;
            defaults
        };

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(settings)
    }

    /// Save settings to disk and notify subscribers
    pub fn save(&self, settings: &Settings) -> Result<(), String> {
        self.save_internal(settings)?;

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        self.revision_tx.send_modify(|rev| *rev += 1);
        Ok(())
    }

    /// Apply a token response from the OAuth endpoint in one write.
    ///
    /// The absolute expiry is computed here from `expires_in` so no caller
    /// ever stores a relative lifetime; a response without a refresh token
    /// keeps the current one.
    pub fn apply_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: Option<u64>,
    ) -> Result<Settings, String> {
        let mut settings = self.load()?;
        settings.donation_alerts_access_token = access_token.to_string();
        if let Some(refresh) = refresh_token.filter(|t| !t.is_empty()) {
            settings.donation_alerts_refresh_token = refresh.to_string();
        }
        settings.donation_alerts_token_expires_at = match expires_in {
            Some(secs) => chrono::Utc::now().timestamp() + secs as i64,
            // Unknown lifetime is treated as already expired
            None => 0,
        };
        self.save(&settings)?;
        Ok(settings)
    }

    /// Cache the resolved account id after a user-info fetch
    pub fn set_user_id(&self, user_id: &str) -> Result<(), String> {
        let mut settings = self.load()?;
        if settings.donation_alerts_user_id == user_id {
            return Ok(());
        }
        settings.donation_alerts_user_id = user_id.to_string();
        self.save(&settings)
    }

    /// Drop stored tokens (the user must restart the authorization flow)
    pub fn clear_tokens(&self) -> Result<(), String> {
        let mut settings = self.load()?;
        settings.donation_alerts_access_token = String::new();
        settings.donation_alerts_refresh_token = String::new();
        settings.donation_alerts_token_expires_at = 0;
        self.save(&settings)
    }

    /// Internal save without cache update or notification
    fn save_internal(&self, settings: &Settings) -> Result<(), String> {
        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {e}"))?;
        }

        let mut value = serde_json::to_value(settings)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        // Encrypt sensitive fields before writing to disk
        self.encrypt_sensitive_fields(&mut value);

        let content = serde_json::to_string_pretty(&value)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        std::fs::write(&self.settings_path, content)
            .map_err(|e| format!("Failed to write settings: {e}"))
    }

    /// Decrypt sensitive fields in a JSON Value (ENC:: -> plaintext)
    fn decrypt_sensitive_fields(&self, value: &mut Value) {
        if let Value::Object(map) = value {
            for &field in SENSITIVE_FIELDS {
                if let Some(Value::String(val)) = map.get(field) {
                    if Encryption::is_encrypted(val) {
                        match Encryption::decrypt_token(val, &self.app_data_dir) {
                            Ok(plaintext) => {
                                map.insert(field.to_string(), Value::String(plaintext));
                            }
                            Err(e) => {
                                log::warn!("Failed to decrypt settings field '{}': {}", field, e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Encrypt sensitive fields in a JSON Value (plaintext -> ENC::)
    fn encrypt_sensitive_fields(&self, value: &mut Value) {
        if let Value::Object(map) = value {
            for &field in SENSITIVE_FIELDS {
                if let Some(Value::String(val)) = map.get(field) {
                    if !val.is_empty() && !Encryption::is_encrypted(val) {
                        match Encryption::encrypt_token(val, &self.app_data_dir) {
                            Ok(encrypted) => {
                                map.insert(field.to_string(), Value::String(encrypted));
                            }
                            Err(e) => {
                                log::warn!("Failed to encrypt settings field '{}': {}", field, e);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn merge_missing_settings(target: &mut Value, defaults: &Value) -> bool {
    match (target, defaults) {
        (Value::Object(target_map), Value::Object(defaults_map)) => {
            let mut changed = false;
            for (key, default_value) in defaults_map {
                match target_map.get_mut(key) {
                    Some(target_value) => {
                        if merge_missing_settings(target_value, default_value) {
                            changed = true;
                        }
                    }
                    None => {
                        target_map.insert(key.clone(), default_value.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        _ => false,
    }
}
