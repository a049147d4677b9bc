use crate::{
    config::NormalizationRules,
    role::{MergeStrategy, Role, TokenType},
    validator::ValidationResult,
};
use serde::Serialize;
use std::{collections::BTreeSet, time::Duration};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("realm {0} is not allowed by the role")]
    RealmNotAllowed(String),
    #[error("service principal {0} is not allowed by the role")]
    SpnNotAllowed(String),
    #[error("role requires group membership but the ticket carried no PAC")]
    MissingPac,
    #[error("no group SID matches the role")]
    NoGroupMatch,
}

/// What the authorizer needs to know about an authenticated caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub realm: String,
    pub spn: String,
    pub group_sids: BTreeSet<String>,
    pub pac_present: bool,
}

impl From<&ValidationResult> for Identity {
    fn from(result: &ValidationResult) -> Self {
        Self {
            realm: result.realm.clone(),
            spn: result.spn.clone(),
            group_sids: result.group_sids.clone(),
            pac_present: result.pac_present,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub policies: BTreeSet<String>,
    pub token_type: TokenType,
    pub ttl: Option<Duration>,
    pub period: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    rules: NormalizationRules,
    default_policies: BTreeSet<String>,
}

impl Authorizer {
    pub fn new(rules: NormalizationRules, default_policies: BTreeSet<String>) -> Self {
        Self {
            rules,
            default_policies,
        }
    }

    pub fn authorize(&self, role: &Role, identity: &Identity) -> Result<Decision, AuthzError> {
        let realm = self.rules.normalize_realm(&identity.realm);
        if !role.allowed_realms.is_empty()
            && !role
                .allowed_realms
                .iter()
                .any(|allowed| self.rules.normalize_realm(allowed) == realm)
        {
            return Err(AuthzError::RealmNotAllowed(realm));
        }

        let spn = self.rules.normalize_spn(&identity.spn);
        if !role.allowed_spns.is_empty()
            && !role
                .allowed_spns
                .iter()
                .any(|allowed| self.rules.normalize_spn(allowed) == spn)
        {
            return Err(AuthzError::SpnNotAllowed(spn));
        }

        if !role.bound_group_sids.is_empty() {
            if !identity.pac_present {
                return Err(AuthzError::MissingPac);
            }
            let matched = role
                .bound_group_sids
                .iter()
                .any(|sid| identity.group_sids.contains(sid));
            if !matched {
                return Err(AuthzError::NoGroupMatch);
            }
        }

        let mut policies = match role.merge_strategy {
            MergeStrategy::Union => role
                .token_policies
                .union(&self.default_policies)
                .cloned()
                .collect(),
            MergeStrategy::Override => role.token_policies.clone(),
        };
        // deny always wins
        policies.retain(|policy| !role.deny_policies.contains(policy));

        let ttl = [role.max_ttl(), role.period()].into_iter().flatten().min();
        Ok(Decision {
            policies,
            token_type: role.token_type,
            ttl,
            period: role.period(),
        })
    }
}
