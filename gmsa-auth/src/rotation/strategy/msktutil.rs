use super::{check_output, RotationStrategy, TempKeytab};
use crate::{rotation::RotationSettings, Config};
use anyhow::Context;
use async_trait::async_trait;
use nix::unistd::Uid;
use tokio::process::Command;

/// Updates the machine or managed service account password through
/// `msktutil` and writes the new keys to a keytab.
#[derive(Debug, Default)]
pub struct Msktutil;

#[async_trait]
impl RotationStrategy for Msktutil {
    fn name(&self) -> &'static str {
        "msktutil"
    }

    async fn generate(
        &self,
        config: &Config,
        settings: &RotationSettings,
    ) -> anyhow::Result<Vec<u8>> {
        if !Uid::effective().is_root() {
            tracing::warn!("msktutil usually needs root to reset the account password");
        }
        let hostname = dns_lookup::get_hostname().context("cannot determine hostname")?;
        let keytab = TempKeytab::new();

        let mut command = Command::new(&settings.msktutil_path);
        command
            .arg("--update")
            .arg("--keytab")
            .arg(keytab.path())
            .arg("--realm")
            .arg(&config.realm)
            .arg("--hostname")
            .arg(&hostname)
            .arg("--service")
            .arg(&config.spn);
        if let Some(account_name) = &settings.account_name {
            command
                .arg("--use-service-account")
                .arg("--account-name")
                .arg(account_name);
        }
        if let Some(kdc) = config.kdcs.first() {
            // msktutil talks LDAP to the DC, so the Kerberos port is dropped
            command.arg("--server").arg(kdc_host(kdc));
        }
        tracing::info!(tool = %settings.msktutil_path, %hostname, "generating keytab");
        let output = command
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("cannot run {}", settings.msktutil_path))?;
        check_output("msktutil", &output)?;
        keytab.read().await
    }
}

fn kdc_host(kdc: &str) -> &str {
    match kdc.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => kdc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdc_host() {
        assert_eq!(kdc_host("dc1.example.com"), "dc1.example.com");
        assert_eq!(kdc_host("dc1.example.com:88"), "dc1.example.com");
        assert_eq!(kdc_host("[fe80::1]:88"), "[fe80::1]");
        assert_eq!(kdc_host("[fe80::1]"), "[fe80::1]");
    }
}
