use crate::{
    authz::{Authorizer, AuthzError, Decision, Identity},
    config::{ConfigSummary, Defaults},
    error,
    health::{Health, HealthReport},
    pac::PacError,
    role::{self, Role, RoleError},
    rotation::{self, CycleOutcome, RotationError, RotationManager, RotationStrategy},
    storage::{self, Storage, StorageError},
    validator::{AuthError, Validator},
    Config, ConfigError, ConfigRecord, ConfigStore, Profile, RotationSettings, RotationStatus,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Role(#[from] RoleError),
    #[error(transparent)]
    Rotation(#[from] RotationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub role: String,
    /// Base64 SPNEGO token from the `Authorization: Negotiate` header.
    pub spnego: String,
    /// Base64 `tls-server-end-point` certificate hash of the client's TLS
    /// session.
    pub cb_tlse: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginResponse {
    pub principal: String,
    pub realm: String,
    pub role: String,
    pub spn: String,
    pub sids_count: usize,
    pub decision: Decision,
}

/// A rejected login. `Display` is safe to return to the caller; the wrapped
/// detail is meant for the audit log.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("invalid login request")]
    Input(String),
    #[error("authentication failed")]
    Authentication(AuthError),
    #[error("permission denied")]
    Authorization(AuthzError),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl LoginError {
    pub fn code(&self) -> Option<&'static error::Error> {
        match self {
            Self::Authentication(err) => err.code(),
            _ => None,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Input(detail) | Self::NotConfigured(detail) => detail.clone(),
            Self::Authentication(err) => err.to_string(),
            Self::Authorization(err) => err.to_string(),
        }
    }
}

impl From<AuthError> for LoginError {
    fn from(err: AuthError) -> Self {
        if err.is_input_error() || matches!(err, AuthError::Pac(PacError::Malformed(_))) {
            Self::Input(err.to_string())
        } else {
            Self::Authentication(err)
        }
    }
}

/// Everything a mounted instance owns: storage, the live configuration, the
/// rotation manager and the login counters.
pub struct Backend {
    storage: Arc<dyn Storage>,
    store: Arc<ConfigStore>,
    defaults: Defaults,
    rotation: RotationManager,
    health: Health,
}

impl Backend {
    /// A backend rotating with the platform's tool.
    pub fn new(storage: Arc<dyn Storage>, profile: &Profile) -> Self {
        Self::with_strategy(storage, profile, rotation::platform_strategy())
    }

    pub fn with_strategy(
        storage: Arc<dyn Storage>,
        profile: &Profile,
        strategy: Arc<dyn RotationStrategy>,
    ) -> Self {
        let store = Arc::new(ConfigStore::new());
        let rotation = RotationManager::new(
            Arc::clone(&store),
            Arc::clone(&storage),
            strategy,
            RotationSettings::from_profile(profile),
        );
        Self {
            storage,
            store,
            defaults: Defaults::from_profile(profile),
            rotation,
            health: Health::new(),
        }
    }

    /// Restores persisted state and starts rotation when it is enabled.
    pub async fn initialize(&self) -> Result<(), BackendError> {
        if let Some(record) =
            storage::get_json::<ConfigRecord>(self.storage.as_ref(), storage::CONFIG_KEY).await?
        {
            self.store.set(record)?;
        }
        self.rotation.load().await?;
        if self.rotation.settings().enabled {
            self.rotation.start();
        }
        tracing::info!(configured = self.store.get().is_some(), "backend initialized");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.rotation.stop().await;
    }

    pub async fn write_config(&self, mut record: ConfigRecord) -> Result<ConfigSummary, BackendError> {
        if record.clock_skew_sec.is_none() {
            record.clock_skew_sec = Some(self.defaults.clock_skew.as_secs());
        }
        let config = Config::from_record(record)?;
        let config = {
            let _commit = self.store.lock_commit().await;
            storage::put_json(
                self.storage.as_ref(),
                storage::CONFIG_KEY,
                &config.to_record()?,
            )
            .await?;
            self.store.install(config)
        };
        tracing::info!(
            realm = %config.realm,
            spn = %config.spn,
            kvno = ?config.keytab.max_kvno(),
            "configuration written"
        );
        // a delete stopped rotation; resume it for the new configuration
        if self.rotation.settings().enabled {
            self.rotation.start();
        }
        Ok(config.summary())
    }

    pub fn read_config(&self) -> Option<ConfigSummary> {
        self.store.get().map(|config| config.summary())
    }

    /// Removes the configuration. Rotation is stopped first since there is
    /// nothing left to rotate; the next `write_config` starts it again.
    pub async fn delete_config(&self) -> Result<(), BackendError> {
        self.rotation.stop().await;
        let _commit = self.store.lock_commit().await;
        self.storage.delete(storage::CONFIG_KEY).await?;
        self.store.clear();
        tracing::info!("configuration deleted");
        Ok(())
    }

    pub async fn write_role(&self, role: Role) -> Result<Role, BackendError> {
        let role = role.validated()?;
        storage::put_json(self.storage.as_ref(), &role_key(&role.name), &role).await?;
        tracing::info!(role = %role.name, "role written");
        Ok(role)
    }

    pub async fn read_role(&self, name: &str) -> Result<Option<Role>, BackendError> {
        role::validate_name(name)?;
        Ok(storage::get_json(self.storage.as_ref(), &role_key(name)).await?)
    }

    pub async fn list_roles(&self) -> Result<Vec<String>, BackendError> {
        let keys = self.storage.list(storage::ROLE_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(storage::ROLE_PREFIX))
            .map(str::to_owned)
            .collect())
    }

    pub async fn delete_role(&self, name: &str) -> Result<(), BackendError> {
        role::validate_name(name)?;
        self.storage.delete(&role_key(name)).await?;
        tracing::info!(role = %name, "role deleted");
        Ok(())
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, LoginError> {
        let result = self.authenticate(request).await;
        self.health.record_login(result.is_ok());
        match &result {
            Ok(response) => tracing::info!(
                principal = %response.principal,
                role = %response.role,
                sids = response.sids_count,
                "login succeeded"
            ),
            Err(err) => tracing::warn!(
                role = %request.role,
                token_length = request.spnego.len(),
                code = ?err.code().map(|code| code.code),
                class = %err,
                detail = %err.detail(),
                "login rejected"
            ),
        }
        result
    }

    async fn authenticate(&self, request: &LoginRequest) -> Result<LoginResponse, LoginError> {
        let config = self
            .store
            .get()
            .ok_or_else(|| LoginError::NotConfigured("no configuration written".to_owned()))?;
        let role = match self.read_role(&request.role).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                return Err(LoginError::NotConfigured(format!(
                    "role {} does not exist",
                    request.role
                )))
            }
            Err(BackendError::Role(err)) => return Err(LoginError::Input(err.to_string())),
            Err(err) => return Err(LoginError::NotConfigured(err.to_string())),
        };
        let channel_binding = match &request.cb_tlse {
            Some(hash) => Some(
                STANDARD
                    .decode(hash.trim())
                    .map_err(|_| LoginError::Input("cb_tlse is not valid base64".to_owned()))?,
            ),
            None => None,
        };

        let result =
            Validator::new(Arc::clone(&config)).validate(&request.spnego, channel_binding.as_deref())?;
        let authorizer = Authorizer::new(
            config.normalization.clone(),
            self.defaults.default_policies.clone(),
        );
        let decision = authorizer
            .authorize(&role, &Identity::from(&result))
            .map_err(LoginError::Authorization)?;

        Ok(LoginResponse {
            principal: result.principal,
            realm: result.realm,
            role: role.name,
            spn: result.spn,
            sids_count: result.group_sids.len(),
            decision,
        })
    }

    pub fn rotation_config(&self) -> RotationSettings {
        self.rotation.settings()
    }

    pub async fn write_rotation_config(
        &self,
        settings: RotationSettings,
    ) -> Result<(), BackendError> {
        Ok(self.rotation.configure(settings).await?)
    }

    pub fn rotation_status(&self) -> RotationStatus {
        self.rotation.status()
    }

    /// Runs a forced rotation cycle and waits for its outcome.
    pub async fn rotate_now(&self) -> Result<CycleOutcome, BackendError> {
        Ok(self.rotation.check_now(true).await?)
    }

    pub fn health(&self) -> HealthReport {
        self.health
            .report(self.store.get().as_deref(), &self.rotation.status())
    }
}

fn role_key(name: &str) -> String {
    format!("{}{}", storage::ROLE_PREFIX, name)
}
