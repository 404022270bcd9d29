// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration loading: YAML file overlaid by environment variables.
//!
//! Precedence (lowest to highest): struct defaults, `argus.yaml`, then
//! `ARGUS_`-prefixed environment variables with `__` separating nesting
//! levels (`ARGUS_LLM__MODEL=gpt-4o` sets `llm.model`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Operating mode for the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Host collectors + SDK telemetry
    Full,
    /// SDK telemetry only, no host access
    SdkOnly,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Full
    }
}

/// HTTP/WebSocket server settings (consumed by the transport layer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7600,
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key: String::new(),
            base_url: None,
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

/// Token budget for background AI work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiBudgetConfig {
    pub daily_token_limit: u64,
    pub hourly_token_limit: u64,
    /// Fraction of each window reserved for urgent-priority work
    pub priority_reserve: f64,
    pub review_frequency_hours: u64,
    pub digest_frequency_hours: u64,
}

impl Default for AiBudgetConfig {
    fn default() -> Self {
        Self {
            daily_token_limit: 5_000_000,
            hourly_token_limit: 500_000,
            priority_reserve: 0.3,
            review_frequency_hours: 6,
            digest_frequency_hours: 24,
        }
    }
}

/// Storage paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "/data".to_string(),
        }
    }
}

impl StorageConfig {
    /// Path of the embedded time-series database.
    pub fn metrics_db_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("argus_ts")
    }

    /// Path of the embedded operational database.
    pub fn operational_db_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("argus_ops")
    }
}

/// Background collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// System metrics sampling interval in seconds
    pub metrics_interval: u64,
    /// Process table sampling interval in seconds
    pub process_interval: u64,
    pub log_paths: Vec<String>,
    /// Set when running containerised with the host filesystem mounted
    pub host_root: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            metrics_interval: 15,
            process_interval: 30,
            log_paths: vec![
                "/var/log/syslog".to_string(),
                "/var/log/auth.log".to_string(),
            ],
            host_root: String::new(),
        }
    }
}

/// Alert delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub webhook_urls: Vec<String>,
    /// Digest batching window in seconds
    pub batch_window: u64,
    /// Minimum severity forwarded to external channels
    pub min_external_severity: String,
    /// Add an AI triage line to digests when budget allows
    pub ai_enhance: bool,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            webhook_urls: Vec::new(),
            batch_window: 90,
            min_external_severity: "NOTABLE".to_string(),
            ai_enhance: false,
        }
    }
}

/// Security and authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub secret_key: String,
    pub session_expiry_hours: u64,
    pub max_login_attempts: u32,
    pub lockout_minutes: u64,
}

pub(crate) const DEFAULT_SECRET: &str = "change-me-on-first-run";

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: DEFAULT_SECRET.to_string(),
            session_expiry_hours: 24,
            max_login_attempts: 10,
            lockout_minutes: 15,
        }
    }
}

/// Root configuration for the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: Mode,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub ai_budget: AiBudgetConfig,
    pub storage: StorageConfig,
    pub collector: CollectorConfig,
    pub alerting: AlertingConfig,
    pub security: SecurityConfig,
    pub debug: bool,
}

/// Environment variable prefix.
const ENV_PREFIX: &str = "ARGUS_";

/// Default config file locations, checked in order.
const CONFIG_CANDIDATES: &[&str] = &["argus.yaml", "argus.yml", "/etc/argus/argus.yaml"];

impl Settings {
    /// Loads settings from the first config file found plus the environment.
    pub fn load() -> Result<Self> {
        let path = CONFIG_CANDIDATES
            .iter()
            .map(Path::new)
            .find(|p| p.exists());
        Self::load_from(path)
    }

    /// Loads settings from an explicit file (or defaults when `None`),
    /// then applies environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut root = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let value: serde_yaml::Value = serde_yaml::from_str(&text)
                    .with_context(|| format!("Invalid YAML in {}", path.display()))?;
                info!(path = %path.display(), "Loaded configuration file");
                value
            }
            None => serde_yaml::Value::Mapping(Default::default()),
        };

        apply_env_overrides(&mut root, std::env::vars());

        let settings: Settings =
            serde_yaml::from_value(root).context("Configuration did not match expected shape")?;
        Ok(settings)
    }

    /// Ensures a real secret key exists, generating and persisting one on
    /// first run when the user left the default in place.
    pub fn ensure_secret_key(&mut self) -> Result<()> {
        if self.security.secret_key != DEFAULT_SECRET {
            return Ok(());
        }

        let secret_file = Path::new(&self.storage.data_dir).join(".secret_key");
        if secret_file.exists() {
            self.security.secret_key = std::fs::read_to_string(&secret_file)?.trim().to_string();
            info!(path = %secret_file.display(), "Loaded secret key");
        } else {
            let key = generate_secret_key();
            std::fs::create_dir_all(&self.storage.data_dir)?;
            std::fs::write(&secret_file, &key)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&secret_file, std::fs::Permissions::from_mode(0o600))?;
            }
            self.security.secret_key = key;
            info!(path = %secret_file.display(), "Generated new secret key");
        }
        Ok(())
    }
}

/// Two v4 UUIDs give 256 bits of randomness in a copy-pasteable form.
fn generate_secret_key() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Applies `ARGUS_SECTION__FIELD=value` overrides onto the YAML tree.
fn apply_env_overrides(
    root: &mut serde_yaml::Value,
    vars: impl Iterator<Item = (String, String)>,
) {
    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = rest.split("__").map(|s| s.to_lowercase()).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            continue;
        }

        // Scalars are parsed as YAML so numbers/bools/lists keep their types.
        let parsed: serde_yaml::Value = serde_yaml::from_str(&raw)
            .unwrap_or_else(|_| serde_yaml::Value::String(raw.clone()));

        let mut node = &mut *root;
        for segment in &segments[..segments.len() - 1] {
            let map = match node {
                serde_yaml::Value::Mapping(map) => map,
                other => {
                    *other = serde_yaml::Value::Mapping(Default::default());
                    match other {
                        serde_yaml::Value::Mapping(map) => map,
                        _ => unreachable!(),
                    }
                }
            };
            let key = serde_yaml::Value::String(segment.clone());
            node = map
                .entry(key)
                .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
        }

        if let serde_yaml::Value::Mapping(map) = node {
            let leaf = serde_yaml::Value::String(segments[segments.len() - 1].clone());
            map.insert(leaf, parsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.mode, Mode::Full);
        assert_eq!(settings.server.port, 7600);
        assert_eq!(settings.ai_budget.daily_token_limit, 5_000_000);
        assert!((settings.ai_budget.priority_reserve - 0.3).abs() < f64::EPSILON);
        assert_eq!(settings.alerting.batch_window, 90);
        assert_eq!(settings.collector.metrics_interval, 15);
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("argus.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "mode: sdk_only\nllm:\n  provider: anthropic\n  model: claude-sonnet-4-5\nalerting:\n  batch_window: 30"
        )
        .unwrap();

        let settings = Settings::load_from(Some(path.as_path())).unwrap();
        assert_eq!(settings.mode, Mode::SdkOnly);
        assert_eq!(settings.llm.provider, "anthropic");
        assert_eq!(settings.alerting.batch_window, 30);
        // Untouched sections keep defaults
        assert_eq!(settings.server.port, 7600);
    }

    #[test]
    fn test_env_overrides_yaml() {
        let mut root: serde_yaml::Value =
            serde_yaml::from_str("llm:\n  model: gpt-4o\nserver:\n  port: 7600").unwrap();

        apply_env_overrides(
            &mut root,
            vec![
                ("ARGUS_LLM__MODEL".to_string(), "gpt-4o-mini".to_string()),
                ("ARGUS_SERVER__PORT".to_string(), "8080".to_string()),
                ("ARGUS_DEBUG".to_string(), "true".to_string()),
                ("UNRELATED".to_string(), "ignored".to_string()),
            ]
            .into_iter(),
        );

        let settings: Settings = serde_yaml::from_value(root).unwrap();
        assert_eq!(settings.llm.model, "gpt-4o-mini");
        assert_eq!(settings.server.port, 8080);
        assert!(settings.debug);
    }

    #[test]
    fn test_env_creates_missing_sections() {
        let mut root = serde_yaml::Value::Mapping(Default::default());
        apply_env_overrides(
            &mut root,
            vec![(
                "ARGUS_AI_BUDGET__HOURLY_TOKEN_LIMIT".to_string(),
                "1000".to_string(),
            )]
            .into_iter(),
        );
        let settings: Settings = serde_yaml::from_value(root).unwrap();
        assert_eq!(settings.ai_budget.hourly_token_limit, 1000);
    }

    #[test]
    fn test_secret_key_generated_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings {
            storage: StorageConfig {
                data_dir: dir.path().to_str().unwrap().to_string(),
            },
            ..Default::default()
        };

        settings.ensure_secret_key().unwrap();
        let generated = settings.security.secret_key.clone();
        assert_ne!(generated, DEFAULT_SECRET);
        assert!(generated.len() >= 32);

        // Second run loads the same key back
        let mut settings2 = Settings {
            storage: StorageConfig {
                data_dir: dir.path().to_str().unwrap().to_string(),
            },
            ..Default::default()
        };
        settings2.ensure_secret_key().unwrap();
        assert_eq!(settings2.security.secret_key, generated);
    }

    #[test]
    fn test_user_secret_key_untouched() {
        let mut settings = Settings::default();
        settings.security.secret_key = "user-provided".to_string();
        settings.ensure_secret_key().unwrap();
        assert_eq!(settings.security.secret_key, "user-provided");
    }

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig {
            data_dir: "/data".to_string(),
        };
        assert_eq!(storage.metrics_db_path(), PathBuf::from("/data/argus_ts"));
        assert_eq!(
            storage.operational_db_path(),
            PathBuf::from("/data/argus_ops")
        );
    }
}
