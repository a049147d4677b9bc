mod common;

use async_trait::async_trait;
use common::*;
use gmsa_auth::{
    rotation::{RotationStrategy, StopOutcome},
    storage::CONFIG_KEY,
    Backend, Config, ConfigRecord, ConfigStore, Keytab, LoginRequest, MemoryStorage, Principal,
    Profile, Role, RotationManager, RotationSettings, RotationState, Storage, StorageError,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;

/// Returns the next kvno for the configured service, optionally after a
/// pause, and announces each call.
struct NextKvno {
    started: Arc<Notify>,
    delay: Duration,
}

#[async_trait]
impl RotationStrategy for NextKvno {
    fn name(&self) -> &'static str {
        "next-kvno"
    }

    async fn generate(
        &self,
        config: &Config,
        _settings: &RotationSettings,
    ) -> anyhow::Result<Vec<u8>> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        let kvno = config.keytab.max_kvno().unwrap_or(0) + 1;
        Ok(keytab(kvno).to_bytes()?)
    }
}

/// Hands out a keytab for some other service, which the self-test rejects.
struct WrongService;

#[async_trait]
impl RotationStrategy for WrongService {
    fn name(&self) -> &'static str {
        "wrong-service"
    }

    async fn generate(
        &self,
        _config: &Config,
        _settings: &RotationSettings,
    ) -> anyhow::Result<Vec<u8>> {
        let principal =
            Principal::parse_name("HTTP/other.example.com@EXAMPLE.COM", None, 0)?;
        let entries = keytab(9)
            .entries()
            .iter()
            .cloned()
            .map(|mut entry| {
                entry.principal = principal.clone();
                entry
            })
            .collect();
        Ok(Keytab::from_entries(entries)?.to_bytes()?)
    }
}

struct Unreachable {
    attempts: Arc<Notify>,
}

#[async_trait]
impl RotationStrategy for Unreachable {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn generate(
        &self,
        _config: &Config,
        _settings: &RotationSettings,
    ) -> anyhow::Result<Vec<u8>> {
        self.attempts.notify_one();
        anyhow::bail!("cannot reach a domain controller")
    }
}

/// Memory storage whose next configuration write, once armed, waits for
/// `release`.
#[derive(Default)]
struct HeldConfigWrite {
    inner: MemoryStorage,
    armed: AtomicBool,
    reached: Notify,
    release: Notify,
}

#[async_trait]
impl Storage for HeldConfigWrite {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        if key == CONFIG_KEY && self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}

fn manager(
    strategy: Arc<dyn RotationStrategy>,
    settings: RotationSettings,
) -> (RotationManager, Arc<ConfigStore>) {
    let store = Arc::new(ConfigStore::new());
    store.set(record(&keytab(2))).unwrap();
    let manager = RotationManager::new(
        store.clone(),
        Arc::new(MemoryStorage::new()),
        strategy,
        settings,
    );
    (manager, store)
}

#[tokio::test]
async fn test_repeated_stop_is_harmless() {
    let strategy = Arc::new(NextKvno {
        started: Arc::new(Notify::new()),
        delay: Duration::ZERO,
    });
    let (manager, _) = manager(strategy, RotationSettings::default());
    assert_eq!(manager.stop().await, StopOutcome::AlreadyStopped);

    manager.start();
    let (a, b, c) = tokio::join!(manager.stop(), manager.stop(), manager.stop());
    let stopped = [a, b, c]
        .iter()
        .filter(|outcome| **outcome == StopOutcome::Stopped)
        .count();
    assert_eq!(stopped, 1);
    assert_eq!(manager.stop().await, StopOutcome::AlreadyStopped);
    assert!(!manager.is_running());
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_rotation() {
    let started = Arc::new(Notify::new());
    let strategy = Arc::new(NextKvno {
        started: started.clone(),
        delay: Duration::from_millis(200),
    });
    let (manager, store) = manager(strategy, RotationSettings::default());
    let before = store.get().unwrap();

    manager.start();
    manager.trigger();
    started.notified().await;
    assert_eq!(manager.status().status, RotationState::Rotating);

    assert_eq!(manager.stop().await, StopOutcome::Stopped);
    let after = store.get().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.keytab.max_kvno(), Some(3));
    let status = manager.status();
    assert_eq!(status.status, RotationState::Idle);
    assert!(status.last_rotation.is_some());
}

#[tokio::test]
async fn test_stop_interrupts_retry_delay() {
    let attempts = Arc::new(Notify::new());
    let settings = RotationSettings {
        retry_delay: Duration::from_secs(3600),
        ..Default::default()
    };
    let (manager, _) = manager(
        Arc::new(Unreachable {
            attempts: attempts.clone(),
        }),
        settings,
    );

    manager.start();
    manager.trigger();
    attempts.notified().await;
    let stopped = tokio::time::timeout(Duration::from_secs(10), manager.stop())
        .await
        .unwrap();
    assert_eq!(stopped, StopOutcome::Stopped);
    let status = manager.status();
    assert_eq!(status.status, RotationState::Failed);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn test_failed_self_test_keeps_serving_old_keytab() {
    let keytab = keytab(2);
    let backend = Backend::with_strategy(
        Arc::new(MemoryStorage::new()),
        &Profile::empty(),
        Arc::new(WrongService),
    );
    backend.write_config(record(&keytab)).await.unwrap();
    backend.write_role(Role::new("app")).await.unwrap();
    backend
        .write_rotation_config(RotationSettings {
            max_retries: 0,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(backend.rotate_now().await.is_err());
    let status = backend.rotation_status();
    assert_eq!(status.status, RotationState::RolledBack);
    assert!(status.last_error.unwrap().contains("self-test"));
    assert_eq!(backend.read_config().unwrap().kvnos, vec![2]);

    let login = LoginRequest {
        role: "app".to_owned(),
        spnego: token(&keytab, &[]),
        cb_tlse: None,
    };
    assert!(backend.login(&login).await.is_ok());
    backend.shutdown().await;
}

#[tokio::test]
async fn test_admin_write_during_rotation_commit_stays_durable() {
    let storage = Arc::new(HeldConfigWrite::default());
    let strategy = Arc::new(NextKvno {
        started: Arc::new(Notify::new()),
        delay: Duration::ZERO,
    });
    let backend = Backend::with_strategy(storage.clone(), &Profile::empty(), strategy.clone());
    backend.write_config(record(&keytab(2))).await.unwrap();

    let admin = ConfigRecord {
        allow_channel_binding: true,
        ..record(&keytab(7))
    };
    storage.armed.store(true, Ordering::SeqCst);
    let (rotated, written) = tokio::join!(backend.rotate_now(), async {
        // the rotation has swapped the snapshot and is persisting it
        storage.reached.notified().await;
        let write = backend.write_config(admin.clone());
        tokio::pin!(write);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), &mut write)
                .await
                .is_err(),
            "administrative write finished while a rotation commit was in flight"
        );
        storage.release.notify_one();
        write.await
    });
    rotated.unwrap();
    let written = written.unwrap();
    assert_eq!(written.kvnos, vec![7]);
    assert!(written.allow_channel_binding);
    assert_eq!(backend.read_config(), Some(written.clone()));

    // a restart sees what was being served
    let restarted = Backend::with_strategy(storage.clone(), &Profile::empty(), strategy);
    restarted.initialize().await.unwrap();
    assert_eq!(restarted.read_config(), Some(written));
}
