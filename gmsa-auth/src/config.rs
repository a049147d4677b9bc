mod normalize;
mod profile;
mod store;

pub use self::{normalize::NormalizationRules, profile::Profile, store::ConfigStore};
use crate::{Keytab, KeytabError, Kvno, Principal};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, time::Duration};
use thiserror::Error;

pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(24 * 60 * 60);

const MAX_REALM_LENGTH: usize = 256;
const MAX_SPN_LENGTH: usize = 256;
const MAX_KDC_LENGTH: usize = 256;
const MAX_KDCS: usize = 32;
const MAX_KEYTAB_LENGTH: usize = 1 << 20;
const MAX_AFFIXES: usize = 32;
const MAX_AFFIX_LENGTH: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("keytab is invalid: {0}")]
    InvalidKeytab(#[from] KeytabError),
    #[error("field exceeds its size limit: {0}")]
    OversizedField(&'static str),
    #[error("invalid value for field: {0}")]
    InvalidField(&'static str),
    #[error("configuration changed concurrently")]
    Superseded,
}

/// The administrative write, also the persisted form. The keytab travels as
/// base64.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigRecord {
    pub realm: String,
    pub kdcs: Vec<String>,
    pub spn: String,
    pub keytab: String,
    pub allow_channel_binding: bool,
    pub clock_skew_sec: Option<u64>,
    pub realm_case_sensitive: bool,
    pub spn_case_sensitive: bool,
    pub realm_suffixes: Vec<String>,
    pub spn_suffixes: Vec<String>,
    pub realm_prefixes: Vec<String>,
    pub spn_prefixes: Vec<String>,
}

/// A validated configuration. The realm is stored uppercase and the keytab is
/// parsed into at least one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub realm: String,
    pub kdcs: Vec<String>,
    pub spn: String,
    pub keytab: Keytab,
    pub clock_skew: Duration,
    pub allow_channel_binding: bool,
    pub normalization: NormalizationRules,
}

impl Config {
    pub fn from_record(record: ConfigRecord) -> Result<Self, ConfigError> {
        let realm = record.realm.trim();
        if realm.is_empty() {
            return Err(ConfigError::MissingField("realm"));
        }
        if realm.len() > MAX_REALM_LENGTH {
            return Err(ConfigError::OversizedField("realm"));
        }
        if !realm.is_ascii() || realm.contains(|c: char| c == '@' || c == '/') {
            return Err(ConfigError::InvalidField("realm"));
        }
        let realm = realm.to_ascii_uppercase();

        let spn = record.spn.trim();
        if spn.is_empty() {
            return Err(ConfigError::MissingField("spn"));
        }
        if spn.len() > MAX_SPN_LENGTH {
            return Err(ConfigError::OversizedField("spn"));
        }
        Principal::parse_name(spn, Some(&realm), 0).map_err(|_| ConfigError::InvalidField("spn"))?;

        if record.kdcs.len() > MAX_KDCS {
            return Err(ConfigError::OversizedField("kdcs"));
        }
        let mut kdcs = Vec::with_capacity(record.kdcs.len());
        for kdc in &record.kdcs {
            kdcs.push(validate_kdc(kdc)?);
        }

        if record.keytab.is_empty() {
            return Err(ConfigError::MissingField("keytab"));
        }
        // base64 expands by 4/3; refuse before allocating for the decode
        if record.keytab.len() > MAX_KEYTAB_LENGTH / 3 * 4 + 4 {
            return Err(ConfigError::OversizedField("keytab"));
        }
        let keytab = STANDARD
            .decode(record.keytab.trim())
            .map_err(|_| ConfigError::InvalidField("keytab"))?;
        if keytab.len() > MAX_KEYTAB_LENGTH {
            return Err(ConfigError::OversizedField("keytab"));
        }
        let keytab = Keytab::from_bytes(&keytab)?;

        let clock_skew = record
            .clock_skew_sec
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CLOCK_SKEW);
        if clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::OversizedField("clock_skew_sec"));
        }

        check_affixes(&record.realm_suffixes, "realm_suffixes")?;
        check_affixes(&record.spn_suffixes, "spn_suffixes")?;
        check_affixes(&record.realm_prefixes, "realm_prefixes")?;
        check_affixes(&record.spn_prefixes, "spn_prefixes")?;

        Ok(Self {
            realm,
            kdcs,
            spn: spn.to_owned(),
            keytab,
            clock_skew,
            allow_channel_binding: record.allow_channel_binding,
            normalization: NormalizationRules {
                realm_case_sensitive: record.realm_case_sensitive,
                spn_case_sensitive: record.spn_case_sensitive,
                realm_suffixes: record.realm_suffixes,
                spn_suffixes: record.spn_suffixes,
                realm_prefixes: record.realm_prefixes,
                spn_prefixes: record.spn_prefixes,
            },
        })
    }

    pub fn to_record(&self) -> Result<ConfigRecord, ConfigError> {
        Ok(ConfigRecord {
            realm: self.realm.clone(),
            kdcs: self.kdcs.clone(),
            spn: self.spn.clone(),
            keytab: STANDARD.encode(self.keytab.to_bytes()?),
            allow_channel_binding: self.allow_channel_binding,
            clock_skew_sec: Some(self.clock_skew.as_secs()),
            realm_case_sensitive: self.normalization.realm_case_sensitive,
            spn_case_sensitive: self.normalization.spn_case_sensitive,
            realm_suffixes: self.normalization.realm_suffixes.clone(),
            spn_suffixes: self.normalization.spn_suffixes.clone(),
            realm_prefixes: self.normalization.realm_prefixes.clone(),
            spn_prefixes: self.normalization.spn_prefixes.clone(),
        })
    }

    pub fn with_keytab(&self, keytab: Keytab) -> Self {
        Self {
            keytab,
            ..self.clone()
        }
    }

    /// The configured SPN as a principal in the configured realm.
    pub fn service_principal(&self) -> Option<Principal> {
        Principal::parse_name(&self.spn, Some(&self.realm), 0).ok()
    }

    pub fn normalize_realm(&self, realm: &str) -> String {
        self.normalization.normalize_realm(realm)
    }

    pub fn normalize_spn(&self, spn: &str) -> String {
        self.normalization.normalize_spn(spn)
    }

    /// What a config read returns: everything but key material.
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            realm: self.realm.clone(),
            kdcs: self.kdcs.clone(),
            spn: self.spn.clone(),
            keytab_entries: self.keytab.len(),
            kvnos: self.keytab.kvnos(),
            allow_channel_binding: self.allow_channel_binding,
            clock_skew_sec: self.clock_skew.as_secs(),
            normalization: self.normalization.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub realm: String,
    pub kdcs: Vec<String>,
    pub spn: String,
    pub keytab_entries: usize,
    pub kvnos: Vec<Kvno>,
    pub allow_channel_binding: bool,
    pub clock_skew_sec: u64,
    pub normalization: NormalizationRules,
}

fn check_affixes(affixes: &[String], field: &'static str) -> Result<(), ConfigError> {
    if affixes.len() > MAX_AFFIXES || affixes.iter().any(|affix| affix.len() > MAX_AFFIX_LENGTH) {
        return Err(ConfigError::OversizedField(field));
    }
    Ok(())
}

/// The instants `skew` before and after `now`, saturating at the ends of the
/// representable range.
pub(crate) fn skew_window(now: DateTime<Utc>, skew: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    match chrono::Duration::from_std(skew) {
        Ok(skew) => (
            now.checked_sub_signed(skew).unwrap_or(DateTime::<Utc>::MIN_UTC),
            now.checked_add_signed(skew).unwrap_or(DateTime::<Utc>::MAX_UTC),
        ),
        Err(_) => (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC),
    }
}

// host, host:port, [v6]:port
fn validate_kdc(kdc: &str) -> Result<String, ConfigError> {
    let kdc = kdc.trim();
    if kdc.len() > MAX_KDC_LENGTH {
        return Err(ConfigError::OversizedField("kdcs"));
    }
    let (host, port) = match kdc.strip_prefix('[') {
        Some(rest) => match rest.split_once(']') {
            Some((host, "")) => (host, None),
            Some((host, port)) => (host, Some(port.strip_prefix(':').unwrap_or(port))),
            None => return Err(ConfigError::InvalidField("kdcs")),
        },
        None => match kdc.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (kdc, None),
        },
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));
    let port_ok = match port {
        Some(port) => port.parse::<u16>().map(|p| p != 0).unwrap_or(false),
        None => true,
    };
    if !host_ok || !port_ok {
        return Err(ConfigError::InvalidField("kdcs"));
    }
    Ok(kdc.to_owned())
}

macro_rules! conf {
    ($name:ident, $value:expr) => {
        pub const $name: &'static str = $value;
    };
}

/// Profile keys understood by the service.
pub struct Conf;

impl Conf {
    conf!(CLOCKSKEW, "defaults.clockskew");
    conf!(DEFAULT_POLICIES, "defaults.default_policies");
    conf!(ROTATION_ENABLED, "rotation.enabled");
    conf!(CHECK_INTERVAL, "rotation.check_interval");
    conf!(ROTATION_THRESHOLD, "rotation.rotation_threshold");
    conf!(BACKUP_KEYTABS, "rotation.backup_keytabs");
    conf!(MAX_BACKUPS, "rotation.max_backups");
    conf!(MAX_RETRIES, "rotation.max_retries");
    conf!(RETRY_DELAY, "rotation.retry_delay");
    conf!(GENERATION_TIMEOUT, "rotation.generation_timeout");
    conf!(SELF_TEST_TIMEOUT, "rotation.self_test_timeout");
    conf!(ACCOUNT_NAME, "rotation.account_name");
    conf!(MSKTUTIL_PATH, "rotation.msktutil_path");
    conf!(KTPASS_PATH, "rotation.ktpass_path");
}

/// Service-wide defaults drawn from the profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub clock_skew: Duration,
    pub default_policies: BTreeSet<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self::from_profile(&Profile::empty())
    }
}

impl Defaults {
    pub fn from_profile(profile: &Profile) -> Self {
        let clock_skew = profile
            .get_int(Conf::CLOCKSKEW)
            .and_then(|secs| u64::try_from(secs).ok())
            .map(Duration::from_secs)
            .filter(|skew| *skew <= MAX_CLOCK_SKEW)
            .unwrap_or(DEFAULT_CLOCK_SKEW);
        let default_policies = profile
            .get_string(Conf::DEFAULT_POLICIES)
            .map(|policies| split_list(&policies))
            .unwrap_or_default();
        Self {
            clock_skew,
            default_policies,
        }
    }
}

pub(crate) fn split_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{Enctype, Keyblock, KeytabEntry};

    pub(crate) fn keytab_for(name: &str, vno: Kvno) -> Keytab {
        let principal = Principal::parse_name(name, None, 0).unwrap();
        Keytab::from_entries(vec![KeytabEntry {
            principal,
            timestamp: 1_700_000_000,
            vno,
            key: Keyblock::random(Enctype::AES256_CTS_HMAC_SHA1_96).unwrap(),
        }])
        .unwrap()
    }

    pub(crate) fn record() -> ConfigRecord {
        let keytab = keytab_for("HTTP/vault.example.com@EXAMPLE.COM", 3);
        ConfigRecord {
            realm: "example.com".to_owned(),
            kdcs: vec!["dc1.example.com".to_owned(), "dc2.example.com:88".to_owned()],
            spn: "HTTP/vault.example.com".to_owned(),
            keytab: STANDARD.encode(keytab.to_bytes().unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_record_normalizes_realm_and_defaults_skew() {
        let config = Config::from_record(record()).unwrap();
        assert_eq!(config.realm, "EXAMPLE.COM");
        assert_eq!(config.clock_skew, DEFAULT_CLOCK_SKEW);
        assert_eq!(
            config.service_principal().unwrap().to_string(),
            "HTTP/vault.example.com@EXAMPLE.COM"
        );
        let summary = config.summary();
        assert_eq!(summary.keytab_entries, 1);
        assert_eq!(summary.kvnos, vec![3]);
    }

    #[test]
    fn test_missing_fields() {
        let mut no_realm = record();
        no_realm.realm.clear();
        assert!(matches!(
            Config::from_record(no_realm),
            Err(ConfigError::MissingField("realm"))
        ));

        let mut blank_spn = record();
        blank_spn.spn = "  ".to_owned();
        assert!(matches!(
            Config::from_record(blank_spn),
            Err(ConfigError::MissingField("spn"))
        ));

        let mut no_keytab = record();
        no_keytab.keytab.clear();
        assert!(matches!(
            Config::from_record(no_keytab),
            Err(ConfigError::MissingField("keytab"))
        ));
    }

    #[test]
    fn test_oversized_fields() {
        let mut long_realm = record();
        long_realm.realm = "A".repeat(MAX_REALM_LENGTH + 1);
        assert!(matches!(
            Config::from_record(long_realm),
            Err(ConfigError::OversizedField("realm"))
        ));

        let mut many_kdcs = record();
        many_kdcs.kdcs = vec!["dc.example.com".to_owned(); MAX_KDCS + 1];
        assert!(matches!(
            Config::from_record(many_kdcs),
            Err(ConfigError::OversizedField("kdcs"))
        ));

        let mut huge_keytab = record();
        huge_keytab.keytab = STANDARD.encode(vec![0u8; MAX_KEYTAB_LENGTH + 1]);
        assert!(matches!(
            Config::from_record(huge_keytab),
            Err(ConfigError::OversizedField("keytab"))
        ));
    }

    #[test]
    fn test_invalid_fields() {
        let mut bad_kdc = record();
        bad_kdc.kdcs = vec!["dc1.example.com:notaport".to_owned()];
        assert!(matches!(
            Config::from_record(bad_kdc),
            Err(ConfigError::InvalidField("kdcs"))
        ));

        let mut bad_base64 = record();
        bad_base64.keytab = "!!not base64!!".to_owned();
        assert!(matches!(
            Config::from_record(bad_base64),
            Err(ConfigError::InvalidField("keytab"))
        ));

        let mut garbage = record();
        garbage.keytab = STANDARD.encode([5, 2, 0, 0, 0, 9, 1]);
        assert!(matches!(
            Config::from_record(garbage),
            Err(ConfigError::InvalidKeytab(KeytabError::Truncated))
        ));

        assert!(validate_kdc("[fe80::1]:88").is_ok());
        assert!(validate_kdc("dc1.example.com:0").is_err());
    }

    #[test]
    fn test_record_round_trip() {
        let config = Config::from_record(record()).unwrap();
        let restored = Config::from_record(config.to_record().unwrap()).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_defaults_from_profile() {
        let profile =
            Profile::from_ini("[defaults]\nclockskew = 60\ndefault_policies = base, audit\n")
                .unwrap();
        let defaults = Defaults::from_profile(&profile);
        assert_eq!(defaults.clock_skew, Duration::from_secs(60));
        assert_eq!(
            defaults.default_policies,
            BTreeSet::from(["audit".to_owned(), "base".to_owned()])
        );
        assert_eq!(Defaults::default().clock_skew, DEFAULT_CLOCK_SKEW);
    }

    #[test]
    fn test_clock_skew_ceiling() {
        let oversized = ConfigRecord {
            clock_skew_sec: Some(10_000_000_000_000),
            ..record()
        };
        assert!(matches!(
            Config::from_record(oversized),
            Err(ConfigError::OversizedField("clock_skew_sec"))
        ));
        let wrapping = ConfigRecord {
            clock_skew_sec: Some(u64::MAX),
            ..record()
        };
        assert!(Config::from_record(wrapping).is_err());

        let at_ceiling = ConfigRecord {
            clock_skew_sec: Some(MAX_CLOCK_SKEW.as_secs()),
            ..record()
        };
        assert_eq!(
            Config::from_record(at_ceiling).unwrap().clock_skew,
            MAX_CLOCK_SKEW
        );

        let profile = Profile::from_ini("[defaults]\nclockskew = 9999999999\n").unwrap();
        assert_eq!(Defaults::from_profile(&profile).clock_skew, DEFAULT_CLOCK_SKEW);
    }

    #[test]
    fn test_skew_window_saturates() {
        let now = Utc::now();
        let (earliest, latest) = skew_window(now, Duration::from_secs(60));
        assert_eq!(latest - earliest, chrono::Duration::seconds(120));

        let (earliest, latest) = skew_window(now, Duration::from_secs(u64::MAX));
        assert_eq!(earliest, DateTime::<Utc>::MIN_UTC);
        assert_eq!(latest, DateTime::<Utc>::MAX_UTC);
        let (_, latest) = skew_window(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1));
        assert_eq!(latest, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_normalization_lists_are_bounded() {
        let too_many = ConfigRecord {
            realm_suffixes: (0..=MAX_AFFIXES).map(|i| format!(".corp{}", i)).collect(),
            ..record()
        };
        assert!(matches!(
            Config::from_record(too_many),
            Err(ConfigError::OversizedField("realm_suffixes"))
        ));
        let too_long = ConfigRecord {
            spn_prefixes: vec!["x".repeat(MAX_AFFIX_LENGTH + 1)],
            ..record()
        };
        assert!(matches!(
            Config::from_record(too_long),
            Err(ConfigError::OversizedField("spn_prefixes"))
        ));
        let within = ConfigRecord {
            realm_prefixes: (0..MAX_AFFIXES).map(|i| format!("corp{}.", i)).collect(),
            spn_suffixes: vec!["x".repeat(MAX_AFFIX_LENGTH)],
            ..record()
        };
        assert!(Config::from_record(within).is_ok());
    }
}
