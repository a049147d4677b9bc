#[cfg(windows)]
mod ktpass;
#[cfg(unix)]
mod msktutil;

#[cfg(windows)]
pub use self::ktpass::Ktpass;
#[cfg(unix)]
pub use self::msktutil::Msktutil;
use super::RotationSettings;
use crate::Config;
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{path::PathBuf, process::Output, sync::Arc};

/// Produces a fresh keytab for the configured service account.
#[async_trait]
pub trait RotationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resets the account password and returns the new keytab bytes.
    async fn generate(&self, config: &Config, settings: &RotationSettings)
        -> anyhow::Result<Vec<u8>>;

    /// When the directory last changed the account password, if the platform
    /// can tell. Otherwise the keytab timestamps are used.
    async fn password_last_set(
        &self,
        _config: &Config,
        _settings: &RotationSettings,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(None)
    }
}

#[cfg(unix)]
pub fn platform_strategy() -> Arc<dyn RotationStrategy> {
    Arc::new(Msktutil)
}

#[cfg(windows)]
pub fn platform_strategy() -> Arc<dyn RotationStrategy> {
    Arc::new(Ktpass)
}

/// A keytab path in the temp directory that is removed when dropped.
pub(crate) struct TempKeytab {
    path: PathBuf,
}

impl TempKeytab {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!(
            "gmsa-auth-{}-{:08x}.keytab",
            std::process::id(),
            rand::random::<u32>()
        ));
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub async fn read(&self) -> anyhow::Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("cannot read generated keytab {}", self.path.display()))
    }
}

impl Drop for TempKeytab {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Turns a finished tool run into an error carrying its stderr.
pub(crate) fn check_output(tool: &str, output: &Output) -> anyhow::Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    bail!("{} exited with {}: {}", tool, output.status, stderr.trim())
}
