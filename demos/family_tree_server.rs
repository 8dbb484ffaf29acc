use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use family_tree::api::{FamilyTreeApp, HasStore, ResolvesIdentity};
use family_tree::config::ServerConfig;
use family_tree::db::{PgFamilyStore, create_family_tables};
use family_tree::error::{LibError, Result};
use family_tree::memory::MemoryStore;
use family_tree::models::{FamilyCode, Role, UserId};
use family_tree::permissions::Identity;
use family_tree::store::FamilyStore;

const DEFAULT_DEV_USER_ID: &str = "00000000-0000-0000-0000-000000000001";

#[derive(Clone)]
struct DemoApp {
    store: Arc<dyn FamilyStore>,
    require_dev_header: bool,
}

impl HasStore for DemoApp {
    fn store(&self) -> Arc<dyn FamilyStore> {
        Arc::clone(&self.store)
    }
}

impl ResolvesIdentity for DemoApp {
    async fn resolve_identity(&self, parts: &Parts) -> Result<Identity> {
        let headers = &parts.headers;
        let user_id = match header_value(headers, "x-dev-user-id") {
            Some(raw) => raw.parse::<UserId>().map_err(|err| {
                LibError::invalid("x-dev-user-id must be a UUID", anyhow!(err))
            })?,
            None if self.require_dev_header => {
                return Err(LibError::unauthenticated(anyhow!(
                    "x-dev-user-id header is required"
                )));
            }
            None => DEFAULT_DEV_USER_ID
                .parse::<UserId>()
                .map_err(|err| LibError::unknown("Invalid default dev user", anyhow!(err)))?,
        };

        let role = match header_value(headers, "x-dev-role") {
            Some(raw) => Some(Role::from_db_value(&raw.trim().to_ascii_lowercase()).ok_or_else(
                || LibError::invalid("x-dev-role must be admin or citizen", anyhow!("role '{}'", raw)),
            )?),
            None => None,
        };

        let mut identity = match self.store.get_user(user_id).await? {
            Some(user) => Identity::from_user(&user),
            None => {
                let family_code = header_value(headers, "x-dev-family-code")
                    .map(FamilyCode::parse)
                    .transpose()?;
                Identity::new(user_id, Role::Citizen, family_code)
            }
        };
        if let Some(role) = role {
            identity.role = role;
        }
        Ok(identity)
    }
}

impl FamilyTreeApp for DemoApp {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("family_tree=info,info")),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let store: Arc<dyn FamilyStore> = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(database_url)
                .await
                .context("failed to connect to postgres")?;
            create_family_tables(&pool)
                .await
                .context("failed to run family tree migrations")?;
            tracing::info!(max_connections = config.max_connections, "connected to postgres");
            Arc::new(PgFamilyStore::from_pool(&pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let app_state = DemoApp {
        store,
        require_dev_header: config.require_dev_header,
    };

    let api_v1 = Router::new()
        .route("/healthz", get(health_handler))
        .merge(family_tree::api::routes::<DemoApp>());

    let app = Router::new().nest("/api/v1", api_v1).with_state(app_state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.bind))?;

    tracing::info!(bind = %config.bind, "family tree server listening");
    tracing::info!("api base path: /api/v1");
    tracing::info!("identity headers: x-dev-user-id, x-dev-role, x-dev-family-code");

    axum::serve(listener, app)
        .await
        .context("family tree server failed")
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true
    }))
}

fn header_value<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key).and_then(|value| value.to_str().ok())
}
