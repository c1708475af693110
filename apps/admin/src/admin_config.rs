use std::env;
use std::time::Duration;

use tenantgate_application::{
    DEFAULT_CACHE_NAMESPACE, NoTemplatePolicy, PermissionCacheConfig, ResolverPolicy,
};
use tenantgate_core::{AppError, AppResult, TenantId, UserId};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// Operator command selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Migrate,
    PurgeCache,
    Inspect { tenant_id: TenantId, user_id: UserId },
    Templates { tenant_id: TenantId },
}

impl AdminCommand {
    pub fn parse(args: &[String]) -> AppResult<Self> {
        match args {
            [command] if command == "migrate" => Ok(Self::Migrate),
            [command] if command == "purge-cache" => Ok(Self::PurgeCache),
            [command, tenant_id, user_id] if command == "inspect" => Ok(Self::Inspect {
                tenant_id: parse_tenant_id(tenant_id)?,
                user_id: UserId::new(user_id.as_str())?,
            }),
            [command, tenant_id] if command == "templates" => Ok(Self::Templates {
                tenant_id: parse_tenant_id(tenant_id)?,
            }),
            _ => Err(AppError::Validation(
                "usage: tenantgate-admin migrate | purge-cache | inspect <tenant-uuid> <user-id> | templates <tenant-uuid>"
                    .to_owned(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub command: AdminCommand,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub cache: PermissionCacheConfig,
    pub policy: ResolverPolicy,
}

impl AdminConfig {
    pub fn load() -> AppResult<Self> {
        let args = env::args().skip(1).collect::<Vec<_>>();
        Self::from_sources(&args, |name| env::var(name).ok())
    }

    fn from_sources(
        args: &[String],
        lookup: impl Fn(&str) -> Option<String>,
    ) -> AppResult<Self> {
        let command = AdminCommand::parse(args)?;

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| AppError::Validation("DATABASE_URL is required".to_owned()))?;
        let redis_url = lookup("REDIS_URL")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let ttl_seconds = match lookup("PERMISSION_CACHE_TTL_SECONDS") {
            Some(value) => value.trim().parse::<u64>().map_err(|error| {
                AppError::Validation(format!(
                    "invalid PERMISSION_CACHE_TTL_SECONDS value '{value}': {error}"
                ))
            })?,
            None => DEFAULT_CACHE_TTL_SECONDS,
        };
        if ttl_seconds == 0 {
            return Err(AppError::Validation(
                "PERMISSION_CACHE_TTL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        let namespace = lookup("PERMISSION_CACHE_NAMESPACE")
            .unwrap_or_else(|| DEFAULT_CACHE_NAMESPACE.to_owned());
        let cache = PermissionCacheConfig::new(Duration::from_secs(ttl_seconds), namespace)
            .map_err(|error| {
                AppError::Validation(format!("invalid PERMISSION_CACHE_NAMESPACE: {error}"))
            })?;

        let no_template = match lookup("PERMISSION_NO_TEMPLATE_POLICY") {
            Some(value) => NoTemplatePolicy::parse(value.as_str()).map_err(|error| {
                AppError::Validation(format!("invalid PERMISSION_NO_TEMPLATE_POLICY: {error}"))
            })?,
            None => NoTemplatePolicy::default(),
        };

        Ok(Self {
            command,
            database_url,
            redis_url,
            cache,
            policy: ResolverPolicy { no_template },
        })
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn parse_tenant_id(value: &str) -> AppResult<TenantId> {
    Uuid::parse_str(value)
        .map(TenantId::from_uuid)
        .map_err(|error| AppError::Validation(format!("invalid tenant id '{value}': {error}")))
}
