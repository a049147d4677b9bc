use crate::pac::{Sid, SidParseError};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, time::Duration};
use thiserror::Error;

const MAX_NAME_LENGTH: usize = 128;
const MAX_LIST_LENGTH: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleError {
    #[error("invalid role name {0:?}")]
    InvalidName(String),
    #[error(transparent)]
    InvalidSid(#[from] SidParseError),
    #[error("invalid value for field: {0}")]
    InvalidField(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    #[default]
    Default,
    Service,
}

/// How a role's policies combine with the service-wide defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    #[default]
    Union,
    /// Role policies replace the defaults unless the role has none.
    Override,
}

/// A named authorization rule. Empty allow-lists place no restriction.
/// `period` and `max_ttl` are seconds, zero meaning unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
    pub name: String,
    pub allowed_realms: BTreeSet<String>,
    pub allowed_spns: BTreeSet<String>,
    pub bound_group_sids: BTreeSet<String>,
    pub token_policies: BTreeSet<String>,
    pub deny_policies: BTreeSet<String>,
    pub token_type: TokenType,
    pub period: u64,
    pub max_ttl: u64,
    pub merge_strategy: MergeStrategy,
}

impl Role {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Checks the role and returns it with SIDs in canonical `S-1-...` form
    /// and blank list items removed.
    pub fn validated(mut self) -> Result<Self, RoleError> {
        validate_name(&self.name)?;
        self.allowed_realms = clean_list(self.allowed_realms, "allowed_realms")?;
        self.allowed_spns = clean_list(self.allowed_spns, "allowed_spns")?;
        self.token_policies = clean_list(self.token_policies, "token_policies")?;
        self.deny_policies = clean_list(self.deny_policies, "deny_policies")?;
        self.bound_group_sids = clean_list(self.bound_group_sids, "bound_group_sids")?
            .iter()
            .map(|sid| sid.parse::<Sid>().map(|sid| sid.to_string()))
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    pub fn period(&self) -> Option<Duration> {
        (self.period != 0).then(|| Duration::from_secs(self.period))
    }

    pub fn max_ttl(&self) -> Option<Duration> {
        (self.max_ttl != 0).then(|| Duration::from_secs(self.max_ttl))
    }
}

pub fn validate_name(name: &str) -> Result<(), RoleError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RoleError::InvalidName(name.to_owned()))
    }
}

fn clean_list(
    list: BTreeSet<String>,
    field: &'static str,
) -> Result<BTreeSet<String>, RoleError> {
    if list.len() > MAX_LIST_LENGTH {
        return Err(RoleError::InvalidField(field));
    }
    Ok(list
        .into_iter()
        .map(|item| item.trim().to_owned())
        .filter(|item| !item.is_empty())
        .collect())
}
