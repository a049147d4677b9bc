use crate::{rotation::RotationStatus, Config, Kvno, RotationState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Login counters shared by every request.
#[derive(Debug, Default)]
pub struct Health {
    logins_succeeded: AtomicU64,
    logins_failed: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub configured: bool,
    pub keytab_entries: usize,
    pub kvno: Option<Kvno>,
    pub rotation_enabled: bool,
    pub rotation_status: RotationState,
    pub last_rotation: Option<DateTime<Utc>>,
    pub logins_succeeded: u64,
    pub logins_failed: u64,
}

impl Health {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_login(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.logins_succeeded
        } else {
            &self.logins_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self, config: Option<&Config>, rotation: &RotationStatus) -> HealthReport {
        HealthReport {
            configured: config.is_some(),
            keytab_entries: config.map_or(0, |config| config.keytab.len()),
            kvno: config.and_then(|config| config.keytab.max_kvno()),
            rotation_enabled: rotation.enabled,
            rotation_status: rotation.status,
            last_rotation: rotation.last_rotation,
            logins_succeeded: self.logins_succeeded.load(Ordering::Relaxed),
            logins_failed: self.logins_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::record;

    #[test]
    fn test_report() {
        let health = Health::new();
        health.record_login(true);
        health.record_login(false);
        health.record_login(true);

        let report = health.report(None, &RotationStatus::default());
        assert!(!report.configured);
        assert_eq!(report.kvno, None);
        assert_eq!(report.logins_succeeded, 2);
        assert_eq!(report.logins_failed, 1);

        let config = Config::from_record(record()).unwrap();
        let report = health.report(Some(&config), &RotationStatus::default());
        assert!(report.configured);
        assert_eq!(report.keytab_entries, 1);
        assert_eq!(report.kvno, Some(3));
        assert_eq!(report.rotation_status, RotationState::Idle);
    }
}
