use super::{Config, ConfigError, ConfigRecord};
use crate::Keytab;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::Arc;

/// Holds the active configuration snapshot.
///
/// Readers load an `Arc<Config>` without locking and keep using it for the
/// whole request, so a concurrent replacement never shows them a mix of old
/// and new fields. Writers are serialized so compare-and-swap is exact.
///
/// Anything that both persists a configuration and swaps the snapshot holds
/// [`ConfigStore::lock_commit`] across the two steps, so storage and memory
/// see the writes in the same order.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: ArcSwapOption<Config>,
    write_lock: Mutex<()>,
    commit_lock: tokio::sync::Mutex<()>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `record` and makes it the active configuration.
    pub fn set(&self, record: ConfigRecord) -> Result<(), ConfigError> {
        let config = Config::from_record(record)?;
        self.install(config);
        Ok(())
    }

    pub fn install(&self, config: Config) -> Arc<Config> {
        let config = Arc::new(config);
        let _guard = self.write_lock.lock();
        self.current.store(Some(Arc::clone(&config)));
        config
    }

    pub async fn lock_commit(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.commit_lock.lock().await
    }

    pub fn get(&self) -> Option<Arc<Config>> {
        self.current.load_full()
    }

    pub fn clear(&self) -> Option<Arc<Config>> {
        let _guard = self.write_lock.lock();
        self.current.swap(None)
    }

    /// Replaces the snapshot only if it is still `expected`.
    pub fn compare_and_swap(&self, expected: &Arc<Config>, new: Arc<Config>) -> bool {
        let _guard = self.write_lock.lock();
        match self.current.load_full() {
            Some(current) if Arc::ptr_eq(&current, expected) => {
                self.current.store(Some(new));
                true
            }
            _ => false,
        }
    }

    /// Installs `keytab` on top of `expected`, keeping every other field.
    /// Fails with `Superseded` when an administrative write landed in between.
    pub fn replace_keytab(
        &self,
        expected: &Arc<Config>,
        keytab: Keytab,
    ) -> Result<Arc<Config>, ConfigError> {
        let new = Arc::new(expected.with_keytab(keytab));
        if self.compare_and_swap(expected, Arc::clone(&new)) {
            Ok(new)
        } else {
            Err(ConfigError::Superseded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{keytab_for, record};

    #[test]
    fn test_set_then_get() {
        let store = ConfigStore::new();
        assert!(store.get().is_none());
        store.set(record()).unwrap();
        let config = store.get().unwrap();
        assert_eq!(config.realm, "EXAMPLE.COM");
        assert!(store.clear().is_some());
        assert!(store.get().is_none());
    }

    #[test]
    fn test_invalid_record_keeps_previous_snapshot() {
        let store = ConfigStore::new();
        store.set(record()).unwrap();
        let before = store.get().unwrap();
        let mut bad = record();
        bad.realm.clear();
        assert!(matches!(store.set(bad), Err(ConfigError::MissingField("realm"))));
        assert!(Arc::ptr_eq(&before, &store.get().unwrap()));
    }

    #[test]
    fn test_replace_keytab_detects_concurrent_write() {
        let store = ConfigStore::new();
        store.set(record()).unwrap();
        let snapshot = store.get().unwrap();
        let rotated = store
            .replace_keytab(&snapshot, keytab_for("HTTP/vault.example.com@EXAMPLE.COM", 9))
            .unwrap();
        assert_eq!(rotated.keytab.max_kvno(), Some(9));
        assert_eq!(rotated.spn, snapshot.spn);
        assert!(matches!(
            store.replace_keytab(&snapshot, keytab_for("HTTP/vault.example.com@EXAMPLE.COM", 10)),
            Err(ConfigError::Superseded)
        ));
        assert_eq!(store.get().unwrap().keytab.max_kvno(), Some(9));
    }
}
