mod settings;
mod state;
mod stop_signal;
pub mod strategy;

pub use self::{
    settings::RotationSettings,
    state::{RotationState, RotationStatus},
    stop_signal::StopSignal,
    strategy::{platform_strategy, RotationStrategy},
};
use crate::{
    config::ConfigStore,
    storage::{self, Storage, StorageError},
    Config, ConfigError, Keytab, KeytabError, Kvno, Principal, TicketBuilder, Validator,
};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::Notify, task::JoinHandle};

const SELF_TEST_CLIENT: &str = "gmsa-auth-self-test";

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("no configuration to rotate")]
    NotConfigured,
    #[error("invalid rotation setting: {0}")]
    InvalidSettings(&'static str),
    #[error("keytab generation failed: {0:#}")]
    Generation(anyhow::Error),
    #[error("keytab generation timed out")]
    GenerationTimeout,
    #[error("generated keytab is invalid: {0}")]
    InvalidKeytab(#[from] KeytabError),
    #[error("self-test failed: {0}")]
    SelfTest(String),
    #[error("self-test timed out")]
    SelfTestTimeout,
    #[error("configuration changed during rotation")]
    Superseded,
    #[error("cannot persist rotated configuration: {0}")]
    Persist(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RotationError {
    /// Failures after which the previous keytab was put back in place.
    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            Self::SelfTest(_) | Self::SelfTestTimeout | Self::Persist(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The password is younger than the rotation threshold.
    NotDue,
    Rotated { kvno: Option<Kvno> },
}

/// Background keytab rotation. Cloning shares the same manager.
#[derive(Clone)]
pub struct RotationManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<ConfigStore>,
    storage: Arc<dyn Storage>,
    strategy: Arc<dyn RotationStrategy>,
    settings: Mutex<RotationSettings>,
    status: Mutex<RotationStatus>,
    lifecycle: Mutex<Lifecycle>,
    trigger: Notify,
    // one cycle at a time, whether scheduled or manual
    cycle_lock: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct Lifecycle {
    signal: Option<StopSignal>,
    task: Option<JoinHandle<()>>,
}

impl RotationManager {
    pub fn new(
        store: Arc<ConfigStore>,
        storage: Arc<dyn Storage>,
        strategy: Arc<dyn RotationStrategy>,
        settings: RotationSettings,
    ) -> Self {
        let status = RotationStatus {
            enabled: settings.enabled,
            ..Default::default()
        };
        Self {
            inner: Arc::new(Inner {
                store,
                storage,
                strategy,
                settings: Mutex::new(settings),
                status: Mutex::new(status),
                lifecycle: Mutex::new(Lifecycle::default()),
                trigger: Notify::new(),
                cycle_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Restores persisted settings and the last reported status.
    pub async fn load(&self) -> Result<(), RotationError> {
        let storage = self.inner.storage.as_ref();
        if let Some(settings) =
            storage::get_json::<RotationSettings>(storage, storage::ROTATION_CONFIG_KEY).await?
        {
            *self.inner.settings.lock() = settings;
        }
        let enabled = self.inner.settings.lock().enabled;
        let mut status = storage::get_json::<RotationStatus>(storage, storage::ROTATION_STATUS_KEY)
            .await?
            .unwrap_or_default();
        // a cycle cut short by a restart is not running any more
        if status.status.is_active() {
            status.status = RotationState::Idle;
        }
        status.enabled = enabled;
        *self.inner.status.lock() = status;
        Ok(())
    }

    pub fn settings(&self) -> RotationSettings {
        self.inner.settings.lock().clone()
    }

    /// Validates and persists new settings, then starts or stops the
    /// background task to match `enabled`.
    pub async fn configure(&self, settings: RotationSettings) -> Result<(), RotationError> {
        settings.validate()?;
        storage::put_json(
            self.inner.storage.as_ref(),
            storage::ROTATION_CONFIG_KEY,
            &settings,
        )
        .await?;
        let enabled = settings.enabled;
        *self.inner.settings.lock() = settings;
        self.inner.status.lock().enabled = enabled;
        if enabled {
            self.start();
        } else {
            self.stop().await;
        }
        Ok(())
    }

    pub fn status(&self) -> RotationStatus {
        self.inner.status.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().signal.is_some()
    }

    pub fn start(&self) -> StartOutcome {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.signal.is_some() {
            return StartOutcome::AlreadyRunning;
        }
        let signal = StopSignal::new();
        let task = tokio::spawn(run(Arc::clone(&self.inner), signal.clone()));
        lifecycle.signal = Some(signal);
        lifecycle.task = Some(task);
        tracing::info!("keytab rotation started");
        StartOutcome::Started
    }

    /// Stops the background task, waiting for an in-flight cycle to finish.
    /// Safe to call any number of times, concurrently or not.
    pub async fn stop(&self) -> StopOutcome {
        let (signal, task) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            (lifecycle.signal.take(), lifecycle.task.take())
        };
        let signal = match signal {
            Some(signal) => signal,
            None => return StopOutcome::AlreadyStopped,
        };
        signal.fire();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "keytab rotation task ended abnormally");
            }
        }
        tracing::info!("keytab rotation stopped");
        StopOutcome::Stopped
    }

    /// Asks the background task to run a forced cycle now. Ignored when the
    /// task is not running or a cycle is already under way.
    pub fn trigger(&self) -> bool {
        if !self.is_running() || self.inner.status.lock().status.is_active() {
            tracing::debug!("keytab rotation trigger ignored");
            return false;
        }
        self.inner.trigger.notify_one();
        true
    }

    /// Runs one cycle in the caller's task. Waits for any cycle already in
    /// progress first.
    pub async fn check_now(&self, force: bool) -> Result<CycleOutcome, RotationError> {
        self.inner.run_cycle(force, None).await
    }
}

async fn run(inner: Arc<Inner>, signal: StopSignal) {
    loop {
        let interval = inner.settings.lock().check_interval;
        let force = tokio::select! {
            _ = signal.cancelled() => break,
            _ = tokio::time::sleep(interval) => false,
            _ = inner.trigger.notified() => true,
        };
        // an in-flight cycle is never interrupted; stop waits for it
        if let Err(err) = inner.run_cycle(force, Some(&signal)).await {
            tracing::warn!(error = %err, "keytab rotation cycle failed");
        }
        if signal.is_fired() {
            break;
        }
    }
}

impl Inner {
    fn set_state(&self, state: RotationState) {
        self.status.lock().status = state;
    }

    async fn persist_status(&self) {
        let status = self.status.lock().clone();
        if let Err(err) =
            storage::put_json(self.storage.as_ref(), storage::ROTATION_STATUS_KEY, &status).await
        {
            tracing::warn!(error = %err, "cannot persist rotation status");
        }
    }

    async fn finish(&self, state: RotationState, error: Option<String>) {
        {
            let mut status = self.status.lock();
            status.status = state;
            status.last_error = error;
        }
        self.persist_status().await;
    }

    async fn run_cycle(
        &self,
        force: bool,
        signal: Option<&StopSignal>,
    ) -> Result<CycleOutcome, RotationError> {
        let _cycle = self.cycle_lock.lock().await;
        let now = Utc::now();
        {
            let mut status = self.status.lock();
            status.status = RotationState::Checking;
            status.last_check = Some(now);
        }
        let settings = self.settings.lock().clone();
        let config = match self.store.get() {
            Some(config) => config,
            None => {
                self.finish(RotationState::Idle, None).await;
                return Err(RotationError::NotConfigured);
            }
        };

        let last_set = self.password_last_set(&config, &settings).await;
        let age = last_set.map(|last_set| now - last_set);
        {
            let mut status = self.status.lock();
            status.password_age = age.and_then(|age| u64::try_from(age.num_seconds()).ok());
            status.next_rotation_estimate = last_set.and_then(|last_set| {
                chrono::Duration::from_std(settings.rotation_threshold)
                    .ok()
                    .map(|threshold| last_set + threshold)
            });
        }
        let due = match age.and_then(|age| age.to_std().ok()) {
            Some(age) => age >= settings.rotation_threshold,
            // the clock says the password is from the future
            None if last_set.is_some() => false,
            None => {
                tracing::warn!("password age unknown, rotating only on request");
                false
            }
        };
        if !force && !due {
            tracing::debug!(password_age = ?age.map(|a| a.num_seconds()), "keytab rotation not due");
            self.finish(RotationState::Idle, None).await;
            return Ok(CycleOutcome::NotDue);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.rotate_once(&settings).await {
                Ok(rotated) => {
                    let kvno = rotated.keytab.max_kvno();
                    tracing::info!(attempt, kvno = ?kvno, "keytab rotated");
                    {
                        let mut status = self.status.lock();
                        status.last_rotation = Some(Utc::now());
                        status.password_age = Some(0);
                        status.next_rotation_estimate = chrono::Duration::from_std(
                            settings.rotation_threshold,
                        )
                        .ok()
                        .map(|threshold| Utc::now() + threshold);
                    }
                    self.finish(RotationState::Idle, None).await;
                    return Ok(CycleOutcome::Rotated { kvno });
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "keytab rotation attempt failed");
                    let stopping = signal.map_or(false, StopSignal::is_fired);
                    let retryable = !matches!(
                        err,
                        RotationError::NotConfigured | RotationError::Superseded
                    );
                    if attempt > settings.max_retries || stopping || !retryable {
                        let state = if err.is_rollback() {
                            RotationState::RolledBack
                        } else {
                            RotationState::Failed
                        };
                        self.finish(state, Some(err.to_string())).await;
                        return Err(err);
                    }
                    if !wait_retry(signal, settings.retry_delay).await {
                        // stopped while waiting to retry
                        self.finish(RotationState::Failed, Some(err.to_string()))
                            .await;
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn password_last_set(
        &self,
        config: &Config,
        settings: &RotationSettings,
    ) -> Option<DateTime<Utc>> {
        match self.strategy.password_last_set(config, settings).await {
            Ok(Some(last_set)) => return Some(last_set),
            Ok(None) => (),
            Err(err) => {
                tracing::warn!(strategy = self.strategy.name(), error = %format!("{:#}", err), "cannot read password age");
            }
        }
        config
            .keytab
            .newest_timestamp()
            .and_then(|timestamp| Utc.timestamp_opt(timestamp.into(), 0).single())
    }

    async fn rotate_once(&self, settings: &RotationSettings) -> Result<Arc<Config>, RotationError> {
        let current = self.store.get().ok_or(RotationError::NotConfigured)?;

        self.set_state(RotationState::Rotating);
        let bytes = tokio::time::timeout(
            settings.generation_timeout,
            self.strategy.generate(&current, settings),
        )
        .await
        .map_err(|_| RotationError::GenerationTimeout)?
        .map_err(RotationError::Generation)?;
        let keytab = Keytab::from_bytes(&bytes)?;

        if settings.backup_keytabs && settings.max_backups > 0 {
            self.backup(&current.keytab, settings.max_backups).await?;
        }

        self.set_state(RotationState::Testing);
        let candidate = Arc::new(current.with_keytab(keytab));
        self_test_with_timeout(Arc::clone(&candidate), settings.self_test_timeout).await?;

        let _commit = self.store.lock_commit().await;
        let committed = self
            .store
            .replace_keytab(&current, candidate.keytab.clone())
            .map_err(|err| match err {
                ConfigError::Superseded => RotationError::Superseded,
                err => RotationError::Persist(err.to_string()),
            })?;
        if let Err(err) = self.persist_config(&committed).await {
            // nothing durable changed, so the live snapshot goes back too
            self.store.compare_and_swap(&committed, current);
            return Err(RotationError::Persist(err));
        }
        Ok(committed)
    }

    async fn persist_config(&self, config: &Config) -> Result<(), String> {
        let record = config.to_record().map_err(|err| err.to_string())?;
        storage::put_json(self.storage.as_ref(), storage::CONFIG_KEY, &record)
            .await
            .map_err(|err| err.to_string())
    }

    /// Archives `keytab` under its backup time and prunes the oldest
    /// backups beyond `max_backups`.
    async fn backup(&self, keytab: &Keytab, max_backups: usize) -> Result<(), RotationError> {
        let key = format!(
            "{}{:013}",
            storage::ROTATION_BACKUP_PREFIX,
            Utc::now().timestamp_millis()
        );
        self.storage.put(&key, keytab.to_bytes()?).await?;
        let backups = self.storage.list(storage::ROTATION_BACKUP_PREFIX).await?;
        let excess = backups.len().saturating_sub(max_backups);
        for key in &backups[..excess] {
            self.storage.delete(key).await?;
        }
        tracing::debug!(%key, pruned = excess, "archived previous keytab");
        Ok(())
    }
}

/// Sleeps for `delay` unless stopped first. Returns whether to retry.
async fn wait_retry(signal: Option<&StopSignal>, delay: Duration) -> bool {
    match signal {
        Some(signal) => tokio::select! {
            _ = signal.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        },
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

async fn self_test_with_timeout(
    candidate: Arc<Config>,
    timeout: Duration,
) -> Result<(), RotationError> {
    let test = tokio::task::spawn_blocking(move || self_test(candidate));
    match tokio::time::timeout(timeout, test).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(RotationError::SelfTest(err.to_string())),
        Err(_) => Err(RotationError::SelfTestTimeout),
    }
}

/// Mints a ticket with the candidate keytab and accepts it the way a login
/// would.
fn self_test(candidate: Arc<Config>) -> Result<(), RotationError> {
    let spn = candidate
        .service_principal()
        .ok_or_else(|| RotationError::SelfTest("configured SPN does not parse".to_owned()))?;
    let entry = candidate
        .keytab
        .best_key(&spn)
        .ok_or_else(|| RotationError::SelfTest(format!("no usable key for {}", spn)))?;
    let client = Principal::new(&[SELF_TEST_CLIENT], &candidate.realm);
    let token = TicketBuilder::new(entry, client)
        .build_base64()
        .map_err(|err| RotationError::SelfTest(err.to_string()))?;
    Validator::new(Arc::clone(&candidate))
        .validate(&token, None)
        .map_err(|err| RotationError::SelfTest(err.to_string()))?;
    Ok(())
}
