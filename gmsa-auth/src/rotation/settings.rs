use super::RotationError;
use crate::config::{Conf, Profile};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_BACKUPS: usize = 100;
const MAX_RETRIES: u32 = 10;

/// Rotation schedule and limits. Durations travel as whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    pub enabled: bool,
    #[serde(with = "seconds")]
    pub check_interval: Duration,
    /// Password age at which a new keytab is generated.
    #[serde(with = "seconds")]
    pub rotation_threshold: Duration,
    pub backup_keytabs: bool,
    pub max_backups: usize,
    pub max_retries: u32,
    #[serde(with = "seconds")]
    pub retry_delay: Duration,
    #[serde(with = "seconds")]
    pub generation_timeout: Duration,
    #[serde(with = "seconds")]
    pub self_test_timeout: Duration,
    pub account_name: Option<String>,
    pub msktutil_path: String,
    pub ktpass_path: String,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: Duration::from_secs(60 * 60),
            // AD rotates managed passwords every 30 days
            rotation_threshold: Duration::from_secs(25 * 24 * 60 * 60),
            backup_keytabs: true,
            max_backups: 5,
            max_retries: 3,
            retry_delay: Duration::from_secs(5 * 60),
            generation_timeout: Duration::from_secs(120),
            self_test_timeout: Duration::from_secs(30),
            account_name: None,
            msktutil_path: "msktutil".to_owned(),
            ktpass_path: "ktpass".to_owned(),
        }
    }
}

impl RotationSettings {
    pub fn from_profile(profile: &Profile) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            profile
                .get_int(key)
                .and_then(|secs| u64::try_from(secs).ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        Self {
            enabled: profile
                .get_bool(Conf::ROTATION_ENABLED)
                .unwrap_or(defaults.enabled),
            check_interval: secs(Conf::CHECK_INTERVAL, defaults.check_interval),
            rotation_threshold: secs(Conf::ROTATION_THRESHOLD, defaults.rotation_threshold),
            backup_keytabs: profile
                .get_bool(Conf::BACKUP_KEYTABS)
                .unwrap_or(defaults.backup_keytabs),
            max_backups: profile
                .get_int(Conf::MAX_BACKUPS)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.max_backups),
            max_retries: profile
                .get_int(Conf::MAX_RETRIES)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.max_retries),
            retry_delay: secs(Conf::RETRY_DELAY, defaults.retry_delay),
            generation_timeout: secs(Conf::GENERATION_TIMEOUT, defaults.generation_timeout),
            self_test_timeout: secs(Conf::SELF_TEST_TIMEOUT, defaults.self_test_timeout),
            account_name: profile.get_string(Conf::ACCOUNT_NAME),
            msktutil_path: profile
                .get_string(Conf::MSKTUTIL_PATH)
                .unwrap_or(defaults.msktutil_path),
            ktpass_path: profile
                .get_string(Conf::KTPASS_PATH)
                .unwrap_or(defaults.ktpass_path),
        }
    }

    pub fn validate(&self) -> Result<(), RotationError> {
        if self.check_interval.is_zero() {
            return Err(RotationError::InvalidSettings("check_interval"));
        }
        if self.rotation_threshold.is_zero() {
            return Err(RotationError::InvalidSettings("rotation_threshold"));
        }
        if self.generation_timeout.is_zero() {
            return Err(RotationError::InvalidSettings("generation_timeout"));
        }
        if self.self_test_timeout.is_zero() {
            return Err(RotationError::InvalidSettings("self_test_timeout"));
        }
        if self.max_backups > MAX_BACKUPS {
            return Err(RotationError::InvalidSettings("max_backups"));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(RotationError::InvalidSettings("max_retries"));
        }
        Ok(())
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
