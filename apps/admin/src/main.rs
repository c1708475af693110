//! Tenantgate operator tooling.

#![forbid(unsafe_code)]

mod admin_config;

use std::sync::Arc;

use admin_config::{AdminCommand, AdminConfig, init_tracing};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tenantgate_application::{
    CacheStore, InvalidationBus, PermissionCache,
    PermissionCacheDependencies, PermissionResolver, PermissionTemplateService, SessionContext,
};
use tenantgate_core::{AppError, AppResult, TenantId, UserId};
use tenantgate_infrastructure::{
    InMemoryCacheStore, PostgresMembershipRepository, PostgresTemplateDocumentStore,
    RedisCacheStore, SystemClock,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AdminConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;

    match config.command.clone() {
        AdminCommand::Migrate => {
            sqlx::migrate!("../../crates/infrastructure/migrations")
                .run(&pool)
                .await
                .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;
            info!("database migrations applied successfully");
        }
        AdminCommand::PurgeCache => {
            if config.redis_url.is_none() {
                warn!("REDIS_URL is not set, purging an empty in-process cache");
            }
            let runtime = Runtime::build(&config, pool)?;
            let removed = runtime.cache.clear_all().await?;
            info!(
                namespace = %config.cache.namespace,
                removed,
                "permission cache purged"
            );
        }
        AdminCommand::Inspect { tenant_id, user_id } => {
            let runtime = Runtime::build(&config, pool)?;
            let effective = runtime.inspect(&config, tenant_id, user_id).await?;
            print_json(&effective)?;
        }
        AdminCommand::Templates { tenant_id } => {
            let runtime = Runtime::build(&config, pool)?;
            let templates = runtime.templates.list_by_tenant(tenant_id).await?;
            info!(tenant_id = %tenant_id, count = templates.len(), "listed permission templates");
            print_json(&templates)?;
        }
    }

    Ok(())
}

struct Runtime {
    bus: Arc<InvalidationBus>,
    cache: PermissionCache,
    templates: PermissionTemplateService,
}

impl Runtime {
    fn build(config: &AdminConfig, pool: PgPool) -> AppResult<Self> {
        let store = build_cache_store(config.redis_url.as_deref())?;
        let documents = Arc::new(PostgresTemplateDocumentStore::new(pool.clone()));
        let memberships = Arc::new(PostgresMembershipRepository::new(pool));
        let bus = Arc::new(InvalidationBus::new());
        let clock = Arc::new(SystemClock);

        let cache = PermissionCache::new(
            PermissionCacheDependencies {
                store,
                documents: documents.clone(),
                memberships,
                bus: bus.clone(),
                clock: clock.clone(),
            },
            config.cache.clone(),
        );
        let templates = PermissionTemplateService::new(documents, bus.clone(), clock);

        Ok(Self {
            bus,
            cache,
            templates,
        })
    }

    async fn inspect(
        &self,
        config: &AdminConfig,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> AppResult<Value> {
        let memberships = self.cache.remember_memberships_for_user(&user_id).await?;
        info!(user_id = %user_id, tenants = memberships.len(), "loaded user memberships");
        let membership = memberships
            .into_iter()
            .find(|membership| membership.tenant_id == tenant_id)
            .ok_or_else(|| AppError::MembershipNotFound {
                tenant_id,
                user_id: user_id.clone(),
            })?;

        let resolver = PermissionResolver::open(
            SessionContext {
                user_id,
                tenant_id,
                is_owner: false,
                membership: Some(membership),
            },
            self.cache.clone(),
            self.bus.clone(),
            config.policy,
        );
        let effective = resolver.resolve().await;
        resolver.close();

        serde_json::to_value(&effective).map_err(|error| {
            AppError::Internal(format!("failed to encode effective permissions: {error}"))
        })
    }
}

fn build_cache_store(redis_url: Option<&str>) -> AppResult<Arc<dyn CacheStore>> {
    match redis_url {
        Some(redis_url) => {
            let client = redis::Client::open(redis_url).map_err(|error| {
                AppError::Validation(format!("invalid REDIS_URL: {error}"))
            })?;
            Ok(Arc::new(RedisCacheStore::new(client)))
        }
        None => Ok(Arc::new(InMemoryCacheStore::new())),
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn print_json(value: &impl serde::Serialize) -> AppResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|error| AppError::Internal(format!("failed to render output: {error}")))?;
    println!("{rendered}");
    Ok(())
}
