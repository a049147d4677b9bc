pub mod authz;
pub mod backend;
pub mod config;
pub mod crypto;
pub mod error;
pub mod health;
pub mod keytab;
mod krb;
pub mod pac;
pub mod principal;
pub mod role;
pub mod rotation;
pub mod storage;
pub mod ticket;
pub mod validator;

pub use self::{
    authz::{Authorizer, AuthzError, Decision, Identity},
    backend::{Backend, BackendError, LoginError, LoginRequest, LoginResponse},
    config::{Config, ConfigError, ConfigRecord, ConfigStore, NormalizationRules, Profile},
    crypto::krb::{CryptoError, Enctype, KeyUsage, Keyblock, Keytype},
    keytab::{Keytab, KeytabEntry, KeytabError, Kvno},
    krb::StrConv,
    pac::{PacError, PacInfo, Sid},
    principal::{NameType, Principal, PrincipalError},
    role::{MergeStrategy, Role, RoleError, TokenType},
    rotation::{RotationManager, RotationSettings, RotationState, RotationStatus},
    storage::{MemoryStorage, Storage, StorageError},
    ticket::TicketBuilder,
    validator::{AuthError, ValidationResult, Validator},
};
use std::process::ExitCode;

pub type Flags = i32;
pub type Timestamp = u32;

pub fn prefix_progname_to_error_if_needed(progname: &str, result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) if err.to_string().starts_with(&format!("Usage: {}", progname)) => {
            eprintln!("{:?}", err);
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{}: {:?}", progname, err);
            ExitCode::FAILURE
        }
    }
}
