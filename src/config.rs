//! Engine-Konfiguration
//!
//! Alle Verzögerungen der Call-Engine sind benannte Konstanten und lassen sich
//! über Umgebungsvariablen überschreiben.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Simulierte Latenz bis eine Verbindung steht
pub const DEFAULT_CONNECT_LATENCY: Duration = Duration::from_millis(1500);

/// Maximale Klingeldauer eines eingehenden Anrufs
pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Abklingzeit zwischen `Ended` und `Idle`
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(2000);

/// Maximale Anzahl Einträge in der Anrufliste
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

const ENV_CONNECT_LATENCY: &str = "CALL_CONNECT_LATENCY_MS";
const ENV_RING_TIMEOUT: &str = "CALL_RING_TIMEOUT_MS";
const ENV_COOLDOWN: &str = "CALL_COOLDOWN_MS";
const ENV_PRESENCE_POLICY: &str = "CALL_PRESENCE_POLICY";
const ENV_HISTORY_LIMIT: &str = "CALL_HISTORY_LIMIT";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("Unknown presence policy: {0:?} (expected 'advisory' or 'require-online')")]
    UnknownPresencePolicy(String),
}

// ============================================================================
// PRESENCE POLICY
// ============================================================================

/// Wie der Online-Status eines Teilnehmers behandelt wird
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresencePolicy {
    /// Presence ist nur ein Hinweis für die UI
    #[default]
    Advisory,
    /// `start_call`/`accept_call` werden bei Offline-Teilnehmern abgewiesen
    RequireOnline,
}

impl std::str::FromStr for PresencePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(Self::Advisory),
            "require-online" | "require_online" => Ok(Self::RequireOnline),
            other => Err(ConfigError::UnknownPresencePolicy(other.to_string())),
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub connect_latency_ms: u64,
    pub ring_timeout_ms: u64,
    pub cooldown_ms: u64,
    pub presence_policy: PresencePolicy,
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_latency_ms: DEFAULT_CONNECT_LATENCY.as_millis() as u64,
            ring_timeout_ms: DEFAULT_RING_TIMEOUT.as_millis() as u64,
            cooldown_ms: DEFAULT_COOLDOWN.as_millis() as u64,
            presence_policy: PresencePolicy::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Lädt die Defaults und wendet Overrides aus der Umgebung an
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Wie `from_env`, aber mit beliebiger Variablen-Quelle
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var(&lookup, ENV_CONNECT_LATENCY)? {
            config.connect_latency_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, ENV_RING_TIMEOUT)? {
            config.ring_timeout_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, ENV_COOLDOWN)? {
            config.cooldown_ms = ms;
        }
        if let Some(limit) = parse_var(&lookup, ENV_HISTORY_LIMIT)? {
            config.history_limit = limit;
        }
        if let Some(policy) = lookup(ENV_PRESENCE_POLICY) {
            config.presence_policy = policy.parse()?;
        }

        Ok(config)
    }

    pub fn connect_latency(&self) -> Duration {
        Duration::from_millis(self.connect_latency_ms)
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_millis(self.ring_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_match_reference_delays() {
        let config = EngineConfig::default();
        assert_eq!(config.connect_latency(), Duration::from_millis(1500));
        assert_eq!(config.ring_timeout(), Duration::from_millis(15_000));
        assert_eq!(config.cooldown(), Duration::from_millis(2000));
        assert_eq!(config.presence_policy, PresencePolicy::Advisory);
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("CALL_RING_TIMEOUT_MS", "500"),
            ("CALL_PRESENCE_POLICY", "require-online"),
            ("CALL_HISTORY_LIMIT", " 3 "),
        ]))
        .unwrap();

        assert_eq!(config.ring_timeout(), Duration::from_millis(500));
        assert_eq!(config.connect_latency(), DEFAULT_CONNECT_LATENCY);
        assert_eq!(config.presence_policy, PresencePolicy::RequireOnline);
        assert_eq!(config.history_limit, 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = EngineConfig::from_lookup(lookup_from(&[("CALL_COOLDOWN_MS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "CALL_COOLDOWN_MS",
                value: "soon".to_string()
            }
        );

        let err = EngineConfig::from_lookup(lookup_from(&[("CALL_PRESENCE_POLICY", "strict")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPresencePolicy(_)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"cooldown_ms": 10}"#).unwrap();
        assert_eq!(config.cooldown(), Duration::from_millis(10));
        assert_eq!(config.ring_timeout(), DEFAULT_RING_TIMEOUT);
    }
}
