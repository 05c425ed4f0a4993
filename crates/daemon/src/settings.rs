//! File-backed user settings and integrations under the daemon home.
//!
//! `settings.json` holds credentials plus free-form overrides;
//! credential reads through the API are always masked.
//! `integrations.json` tracks installed third-party integrations.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ami_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub credentials: HashMap<String, Credential>,
    /// Free-form overrides (budget_*, llm_* …) passed through verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Integrations {
    #[serde(default)]
    pub installed: Vec<String>,
    #[serde(default)]
    pub configs: HashMap<String, IntegrationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub configured_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SettingsStore {
    settings_path: PathBuf,
    integrations_path: PathBuf,
    settings: Mutex<Settings>,
    integrations: Mutex<Integrations>,
}

impl SettingsStore {
    /// Load both files (missing files mean defaults).
    pub fn open(settings_path: PathBuf, integrations_path: PathBuf) -> Result<Self> {
        let settings = read_json(&settings_path)?.unwrap_or_default();
        let integrations = read_json(&integrations_path)?.unwrap_or_default();
        Ok(Self {
            settings_path,
            integrations_path,
            settings: Mutex::new(settings),
            integrations: Mutex::new(integrations),
        })
    }

    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    /// Shallow-merge a JSON patch into the settings and persist.
    pub fn update_settings(&self, patch: Value) -> Result<Settings> {
        let Value::Object(patch) = patch else {
            return Err(Error::InvalidInput("settings patch must be an object".into()));
        };

        let mut settings = self.settings.lock();
        for (key, value) in patch {
            if key == "credentials" {
                let credentials: HashMap<String, Credential> = serde_json::from_value(value)
                    .map_err(|e| Error::InvalidInput(format!("bad credentials shape: {e}")))?;
                settings.credentials.extend(credentials);
            } else if value.is_null() {
                settings.extra.remove(&key);
            } else {
                settings.extra.insert(key, value);
            }
        }
        write_json(&self.settings_path, &*settings)?;
        Ok(settings.clone())
    }

    /// Credentials projection with masked keys.
    pub fn masked_credentials(&self) -> Value {
        let settings = self.settings.lock();
        let masked: serde_json::Map<String, Value> = settings
            .credentials
            .iter()
            .map(|(provider, cred)| {
                let key = cred
                    .api_key
                    .as_deref()
                    .map(mask_key)
                    .unwrap_or_else(|| "(not set)".into());
                (provider.clone(), serde_json::json!({ "api_key": key }))
            })
            .collect();
        Value::Object(masked)
    }

    // ── integrations ─────────────────────────────────────────────────

    pub fn integrations(&self) -> Integrations {
        self.integrations.lock().clone()
    }

    pub fn install_integration(&self, id: &str, api_key: Option<String>) -> Result<()> {
        let mut integrations = self.integrations.lock();
        if !integrations.installed.iter().any(|i| i == id) {
            integrations.installed.push(id.to_owned());
        }
        integrations.configs.insert(
            id.to_owned(),
            IntegrationConfig {
                api_key,
                configured_at: Utc::now(),
            },
        );
        write_json(&self.integrations_path, &*integrations)
    }

    pub fn remove_integration(&self, id: &str) -> Result<bool> {
        let mut integrations = self.integrations.lock();
        let existed = integrations.installed.iter().any(|i| i == id);
        integrations.installed.retain(|i| i != id);
        integrations.configs.remove(id);
        write_json(&self.integrations_path, &*integrations)?;
        Ok(existed)
    }
}

/// First 6 + `***` + last 4; short keys are fully masked.
pub fn mask_key(key: &str) -> String {
    if key.len() <= 10 {
        return "***".into();
    }
    format!("{}***{}", &key[..6], &key[key.len() - 4..])
}

// ── file helpers ───────────────────────────────────────────────────

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SettingsStore {
        SettingsStore::open(
            dir.path().join("settings.json"),
            dir.path().join("integrations.json"),
        )
        .unwrap()
    }

    #[test]
    fn mask_key_shapes() {
        assert_eq!(mask_key("sk-ant-abcdef1234567890"), "sk-ant***7890");
        assert_eq!(mask_key("short"), "***");
    }

    #[test]
    fn settings_roundtrip_via_disk() {
        let dir = TempDir::new().unwrap();
        {
            let s = store(&dir);
            s.update_settings(serde_json::json!({
                "credentials": {"anthropic": {"api_key": "sk-ant-abcdef1234567890"}},
                "budget_monthly_usd": 25
            }))
            .unwrap();
        }
        // Fresh store reloads from disk.
        let s = store(&dir);
        let settings = s.settings();
        assert_eq!(
            settings.credentials["anthropic"].api_key.as_deref(),
            Some("sk-ant-abcdef1234567890")
        );
        assert_eq!(settings.extra["budget_monthly_usd"], 25);
    }

    #[test]
    fn masked_credentials_never_leak_keys() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.update_settings(serde_json::json!({
            "credentials": {"anthropic": {"api_key": "sk-ant-abcdef1234567890"}}
        }))
        .unwrap();
        let masked = s.masked_credentials();
        let text = masked.to_string();
        assert!(text.contains("sk-ant***7890"));
        assert!(!text.contains("abcdef123456"));
    }

    #[test]
    fn null_removes_extra_key() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.update_settings(serde_json::json!({"llm_model": "claude"})).unwrap();
        s.update_settings(serde_json::json!({"llm_model": null})).unwrap();
        assert!(s.settings().extra.get("llm_model").is_none());
    }

    #[test]
    fn integrations_install_and_remove() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.install_integration("notion", Some("key123".into())).unwrap();
        s.install_integration("notion", Some("key456".into())).unwrap();

        let integrations = s.integrations();
        assert_eq!(integrations.installed, vec!["notion"]);
        assert_eq!(
            integrations.configs["notion"].api_key.as_deref(),
            Some("key456")
        );

        assert!(s.remove_integration("notion").unwrap());
        assert!(!s.remove_integration("notion").unwrap());
        assert!(s.integrations().installed.is_empty());
    }

    #[test]
    fn bad_patch_shape_is_rejected() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        assert!(s.update_settings(serde_json::json!([1, 2, 3])).is_err());
    }
}
