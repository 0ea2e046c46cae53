//! Service wiring: pick a session backend, build the codec and `AuthService`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sessionguard_auth::{
    AuthService, CodecError, DeadlineSessionStore, Hs256TokenCodec, InMemorySessionStore, SessionStore,
    StoreError,
};
use sessionguard_events::{InMemoryEventBus, SessionEvent};
use sessionguard_infra::{AppConfig, InMemoryIdentityDirectory, PostgresSessionStore, RegistrationError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("signing key rejected: {0}")]
    Codec(#[from] CodecError),

    #[error("session store: {0}")]
    Store(#[from] StoreError),

    #[error("seed user: {0}")]
    Seed(#[from] RegistrationError),
}

/// Everything request handlers need, shared via `Extension<Arc<AppServices>>`.
pub struct AppServices {
    pub auth: Arc<AuthService>,
    pub directory: Arc<InMemoryIdentityDirectory>,
    pub events: Arc<InMemoryEventBus<SessionEvent>>,
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, StartupError> {
    let codec = Arc::new(Hs256TokenCodec::new(config.jwt_secret.as_bytes(), &config.audience)?);

    let store: Arc<dyn SessionStore> = match &config.database_url {
        Some(url) => {
            let pg = PostgresSessionStore::connect(url, 10).await?;
            pg.ensure_schema().await?;
            info!("using postgres session store");
            Arc::new(DeadlineSessionStore::new(pg, config.store_timeout))
        }
        None => {
            warn!("DATABASE_URL not set; sessions are kept in memory and lost on restart");
            Arc::new(DeadlineSessionStore::new(InMemorySessionStore::new(), config.store_timeout))
        }
    };

    let directory = Arc::new(InMemoryIdentityDirectory::new());
    for (login, password) in &config.seed_users {
        directory.register(login, password)?;
    }

    let events = Arc::new(InMemoryEventBus::new());
    let auth = Arc::new(AuthService::new(
        codec,
        store,
        directory.clone(),
        events.clone(),
        config.auth_settings(),
    ));

    Ok(AppServices {
        auth,
        directory,
        events,
    })
}

/// Periodically drop sessions idle past the refresh lifetime.
pub fn spawn_idle_purge(auth: Arc<AuthService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = auth.purge_idle(Utc::now()).await {
                warn!(error = %e, "idle session purge failed");
            }
        }
    })
}
