use serde::{Deserialize, Serialize};

/// How realm and SPN values are compared against allow-lists.
///
/// Case folding happens first (realms upper, SPNs lower) unless the matching
/// `*_case_sensitive` flag is set. Configured suffixes and prefixes are then
/// stripped until none applies, so normalizing twice is the same as once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationRules {
    pub realm_case_sensitive: bool,
    pub spn_case_sensitive: bool,
    pub realm_suffixes: Vec<String>,
    pub spn_suffixes: Vec<String>,
    pub realm_prefixes: Vec<String>,
    pub spn_prefixes: Vec<String>,
}

impl NormalizationRules {
    pub fn normalize_realm(&self, realm: &str) -> String {
        let folded = if self.realm_case_sensitive {
            realm.to_owned()
        } else {
            realm.to_ascii_uppercase()
        };
        strip(
            folded,
            &self.realm_prefixes,
            &self.realm_suffixes,
            !self.realm_case_sensitive,
        )
    }

    pub fn normalize_spn(&self, spn: &str) -> String {
        let folded = if self.spn_case_sensitive {
            spn.to_owned()
        } else {
            spn.to_ascii_lowercase()
        };
        strip(
            folded,
            &self.spn_prefixes,
            &self.spn_suffixes,
            !self.spn_case_sensitive,
        )
    }
}

// An affix or trim that would consume the whole value is skipped, so a
// non-empty value never normalizes to the empty string.
fn strip(mut value: String, prefixes: &[String], suffixes: &[String], casefold: bool) -> String {
    loop {
        let before = value.len();
        let trimmed = value.trim();
        if !trimmed.is_empty() && trimmed.len() != value.len() {
            value = trimmed.to_owned();
        }
        for suffix in suffixes.iter().filter(|s| !s.is_empty()) {
            if value.len() > suffix.len() && ends_with(&value, suffix, casefold) {
                value.truncate(value.len() - suffix.len());
            }
        }
        for prefix in prefixes.iter().filter(|p| !p.is_empty()) {
            if value.len() > prefix.len() && starts_with(&value, prefix, casefold) {
                value.drain(..prefix.len());
            }
        }
        if value.len() == before {
            return value;
        }
    }
}

fn ends_with(value: &str, suffix: &str, casefold: bool) -> bool {
    let start = value.len() - suffix.len();
    match value.get(start..) {
        Some(tail) if casefold => tail.eq_ignore_ascii_case(suffix),
        Some(tail) => tail == suffix,
        None => false,
    }
}

fn starts_with(value: &str, prefix: &str, casefold: bool) -> bool {
    match value.get(..prefix.len()) {
        Some(head) if casefold => head.eq_ignore_ascii_case(prefix),
        Some(head) => head == prefix,
        None => false,
    }
}
