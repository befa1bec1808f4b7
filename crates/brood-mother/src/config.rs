use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use brood_contracts::intent::TransformationMode;
use serde::{Deserialize, Serialize};

pub const ATTRACT_IDLE_MS_DEFAULT: u64 = 1_600;
pub const INFERENCE_IDLE_MS_DEFAULT: u64 = 4_200;
pub const COMMIT_COOLDOWN_MS_DEFAULT: u64 = 12_000;
pub const REJECT_COOLDOWN_MS_DEFAULT: u64 = 4_500;
pub const INFERENCE_TIMEOUT_MS_DEFAULT: u64 = 30_000;
pub const INFERENCE_EXTENSION_MS_DEFAULT: u64 = 8_000;
pub const GENERATION_TIMEOUT_MS_DEFAULT: u64 = 90_000;
pub const GENERATION_EXTENSION_MS_DEFAULT: u64 = 30_000;
pub const TRANSPORT_RETRY_MAX_DEFAULT: u32 = 2;
pub const TRANSPORT_RETRY_MAX_LIMIT: u32 = 6;
pub const TRANSPORT_RETRY_BACKOFF_MS_DEFAULT: u64 = 350;
/// The realtime worker gives up on its own after this long.
pub const WORKER_TIMEOUT_FLOOR_MS_DEFAULT: u64 = 42_000;
pub const WORKER_GRACE_MS_DEFAULT: u64 = 2_000;
pub const CANCEL_DISCARD_GRACE_MS_DEFAULT: u64 = 3_000;
pub const REJECTION_MEMORY_PER_KEY_DEFAULT: usize = 6;
pub const IGNORED_ID_LIMIT_DEFAULT: usize = 16;

const DURATION_MS_RANGE: (u64, u64) = (50, 600_000);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotherConfig {
    pub attract_idle_ms: u64,
    pub inference_idle_ms: u64,
    pub commit_cooldown_ms: u64,
    pub reject_cooldown_ms: u64,
    pub inference_timeout_ms: u64,
    pub inference_extension_ms: u64,
    pub generation_timeout_ms: u64,
    pub generation_extension_ms: u64,
    pub max_transport_retries: u32,
    pub retry_backoff_ms: u64,
    pub worker_timeout_floor_ms: u64,
    pub worker_grace_ms: u64,
    pub cancel_discard_grace_ms: u64,
    pub rejection_memory_per_key: usize,
    pub ignored_id_limit: usize,
    pub default_mode: TransformationMode,
    pub follow_up_after_reject: bool,
}

impl Default for MotherConfig {
    fn default() -> Self {
        Self {
            attract_idle_ms: ATTRACT_IDLE_MS_DEFAULT,
            inference_idle_ms: INFERENCE_IDLE_MS_DEFAULT,
            commit_cooldown_ms: COMMIT_COOLDOWN_MS_DEFAULT,
            reject_cooldown_ms: REJECT_COOLDOWN_MS_DEFAULT,
            inference_timeout_ms: INFERENCE_TIMEOUT_MS_DEFAULT,
            inference_extension_ms: INFERENCE_EXTENSION_MS_DEFAULT,
            generation_timeout_ms: GENERATION_TIMEOUT_MS_DEFAULT,
            generation_extension_ms: GENERATION_EXTENSION_MS_DEFAULT,
            max_transport_retries: TRANSPORT_RETRY_MAX_DEFAULT,
            retry_backoff_ms: TRANSPORT_RETRY_BACKOFF_MS_DEFAULT,
            worker_timeout_floor_ms: WORKER_TIMEOUT_FLOOR_MS_DEFAULT,
            worker_grace_ms: WORKER_GRACE_MS_DEFAULT,
            cancel_discard_grace_ms: CANCEL_DISCARD_GRACE_MS_DEFAULT,
            rejection_memory_per_key: REJECTION_MEMORY_PER_KEY_DEFAULT,
            ignored_id_limit: IGNORED_ID_LIMIT_DEFAULT,
            default_mode: TransformationMode::default(),
            follow_up_after_reject: true,
        }
    }
}

impl MotherConfig {
    /// Defaults, then the JSON file, then `BROOD_MOTHER_*` environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read mother config {}", path.display()))?;
        let parsed: Self = serde_json::from_str(&raw)
            .with_context(|| format!("invalid mother config {}", path.display()))?;
        Ok(parsed.with_env_overrides())
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let duration = |key: &str, current: u64| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(|value| value.clamp(DURATION_MS_RANGE.0, DURATION_MS_RANGE.1))
                .unwrap_or(current)
        };
        self.attract_idle_ms = duration("BROOD_MOTHER_ATTRACT_IDLE_MS", self.attract_idle_ms);
        self.inference_idle_ms =
            duration("BROOD_MOTHER_INFERENCE_IDLE_MS", self.inference_idle_ms);
        self.commit_cooldown_ms =
            duration("BROOD_MOTHER_COMMIT_COOLDOWN_MS", self.commit_cooldown_ms);
        self.reject_cooldown_ms =
            duration("BROOD_MOTHER_REJECT_COOLDOWN_MS", self.reject_cooldown_ms);
        self.inference_timeout_ms =
            duration("BROOD_MOTHER_INFERENCE_TIMEOUT_MS", self.inference_timeout_ms);
        self.generation_timeout_ms =
            duration("BROOD_MOTHER_GENERATION_TIMEOUT_MS", self.generation_timeout_ms);
        self.cancel_discard_grace_ms = duration(
            "BROOD_MOTHER_CANCEL_DISCARD_GRACE_MS",
            self.cancel_discard_grace_ms,
        );

        if let Some(value) = lookup("BROOD_MOTHER_TRANSPORT_RETRIES")
            .or_else(|| lookup("BROOD_REALTIME_TRANSPORT_RETRIES"))
            .and_then(|raw| raw.trim().parse::<u32>().ok())
        {
            self.max_transport_retries = value.min(TRANSPORT_RETRY_MAX_LIMIT);
        }
        if let Some(value) = lookup("BROOD_REALTIME_TRANSPORT_RETRY_BACKOFF_MS")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
        {
            self.retry_backoff_ms = value.clamp(50, 5_000);
        }
        if let Some(mode) =
            lookup("BROOD_MOTHER_DEFAULT_MODE").and_then(|raw| TransformationMode::parse(&raw))
        {
            self.default_mode = mode;
        }
        if let Some(raw) = lookup("BROOD_MOTHER_FOLLOW_UP") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" => self.follow_up_after_reject = true,
                "0" | "false" | "off" => self.follow_up_after_reject = false,
                _ => {}
            }
        }
        self
    }

    pub fn attract_idle(&self) -> Duration {
        Duration::from_millis(self.attract_idle_ms)
    }

    pub fn inference_idle(&self) -> Duration {
        Duration::from_millis(self.inference_idle_ms)
    }

    pub fn commit_cooldown(&self) -> Duration {
        Duration::from_millis(self.commit_cooldown_ms)
    }

    pub fn reject_cooldown(&self) -> Duration {
        Duration::from_millis(self.reject_cooldown_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn inference_extension(&self) -> Duration {
        Duration::from_millis(self.inference_extension_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn generation_extension(&self) -> Duration {
        Duration::from_millis(self.generation_extension_ms)
    }

    pub fn worker_timeout_floor(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_floor_ms)
    }

    pub fn worker_grace(&self) -> Duration {
        Duration::from_millis(self.worker_grace_ms)
    }

    pub fn cancel_discard_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_discard_grace_ms)
    }

    /// Linear backoff, as the realtime worker reconnects.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.retry_backoff_ms
                .saturating_mul(u64::from(attempt.max(1))),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use brood_contracts::intent::TransformationMode;

    use super::{MotherConfig, TRANSPORT_RETRY_MAX_LIMIT};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reject_cooldown_is_shorter_than_commit_cooldown() {
        let config = MotherConfig::default();
        assert!(config.reject_cooldown() < config.commit_cooldown());
        assert!(config.attract_idle() < config.inference_idle());
    }

    #[test]
    fn env_overrides_are_clamped() {
        let config = MotherConfig::default().with_overrides(lookup(&[
            ("BROOD_MOTHER_ATTRACT_IDLE_MS", "1"),
            ("BROOD_MOTHER_INFERENCE_TIMEOUT_MS", "99999999"),
            ("BROOD_REALTIME_TRANSPORT_RETRIES", "40"),
            ("BROOD_MOTHER_DEFAULT_MODE", "Purify"),
            ("BROOD_MOTHER_FOLLOW_UP", "off"),
        ]));
        assert_eq!(config.attract_idle_ms, 50);
        assert_eq!(config.inference_timeout_ms, 600_000);
        assert_eq!(config.max_transport_retries, TRANSPORT_RETRY_MAX_LIMIT);
        assert_eq!(config.default_mode, TransformationMode::Purify);
        assert!(!config.follow_up_after_reject);
    }

    #[test]
    fn garbage_overrides_keep_current_values() {
        let config = MotherConfig::default().with_overrides(lookup(&[
            ("BROOD_MOTHER_COMMIT_COOLDOWN_MS", "soon"),
            ("BROOD_MOTHER_DEFAULT_MODE", "glitch"),
            ("BROOD_MOTHER_FOLLOW_UP", "maybe"),
        ]));
        assert_eq!(config, MotherConfig::default());
    }

    #[test]
    fn load_merges_partial_json_over_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("mother.json");
        std::fs::write(
            &path,
            r#"{"reject_cooldown_ms": 1000, "default_mode": "fracture"}"#,
        )?;
        let config = MotherConfig::load(&path)?;
        assert_eq!(config.reject_cooldown_ms, 1000);
        assert_eq!(config.default_mode, TransformationMode::Fracture);
        assert_eq!(config.attract_idle_ms, super::ATTRACT_IDLE_MS_DEFAULT);
        Ok(())
    }

    #[test]
    fn retry_backoff_grows_linearly() {
        let config = MotherConfig::default();
        assert_eq!(config.retry_backoff(0), Duration::from_millis(350));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(700));
    }
}
