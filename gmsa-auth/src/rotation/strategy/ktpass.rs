use super::{check_output, RotationStrategy, TempKeytab};
use crate::{pac::filetime_to_datetime, rotation::RotationSettings, Config};
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

/// Resets the service account password with `ktpass` and exports the new
/// keys. The password age comes from the account's `pwdLastSet`.
#[derive(Debug, Default)]
pub struct Ktpass;

#[async_trait]
impl RotationStrategy for Ktpass {
    fn name(&self) -> &'static str {
        "ktpass"
    }

    async fn generate(
        &self,
        config: &Config,
        settings: &RotationSettings,
    ) -> anyhow::Result<Vec<u8>> {
        let account_name = match &settings.account_name {
            Some(account_name) => account_name,
            None => bail!("rotation.account_name is required for ktpass"),
        };
        let keytab = TempKeytab::new();
        tracing::info!(tool = %settings.ktpass_path, account = %account_name, "generating keytab");
        let output = Command::new(&settings.ktpass_path)
            .arg("/out")
            .arg(keytab.path())
            .arg("/princ")
            .arg(format!("{}@{}", config.spn, config.realm))
            .arg("/mapuser")
            .arg(account_name)
            .args(["/pass", "+rndPass", "/crypto", "AES256-SHA1"])
            .args(["/ptype", "KRB5_NT_PRINCIPAL"])
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("cannot run {}", settings.ktpass_path))?;
        check_output("ktpass", &output)?;
        keytab.read().await
    }

    async fn password_last_set(
        &self,
        _config: &Config,
        settings: &RotationSettings,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let account_name = match &settings.account_name {
            Some(account_name) => account_name,
            None => return Ok(None),
        };
        let script = format!(
            "(Get-ADServiceAccount -Identity '{}' -Properties pwdLastSet).pwdLastSet",
            account_name.replace('\'', "''")
        );
        let output = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(script)
            .kill_on_drop(true)
            .output()
            .await
            .context("cannot run powershell")?;
        check_output("powershell", &output)?;
        let filetime: u64 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .context("pwdLastSet is not a FILETIME")?;
        Ok(filetime_to_datetime(filetime))
    }
}
