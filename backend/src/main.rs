//! Chat worker entry-point: loads settings, wires the adapters, and runs the
//! presence sweep until interrupted.

use std::sync::Arc;

use color_eyre::eyre::{WrapErr, eyre};
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use roomchat::domain::ports::CacheStore;
use roomchat::domain::{CacheLayer, ChatPorts, FilterPolicy};
use roomchat::outbound::{
    BroadcastPublisher, InMemoryCacheStore, InMemoryChatStore, RedisCacheStore,
};
use roomchat::{ChatServices, ChatSettings};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = ChatSettings::load_from_iter(std::env::args_os())
        .map_err(|err| eyre!("failed to load settings: {err}"))?;
    let config = settings.to_config();
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);

    let cache: Arc<dyn CacheStore> = match settings.redis_url.as_deref() {
        Some(url) => Arc::new(
            RedisCacheStore::connect(url)
                .await
                .wrap_err("failed to connect to redis")?,
        ),
        None => {
            warn!("no redis url configured; using the in-memory cache");
            Arc::new(InMemoryCacheStore::new(clock.clone()))
        }
    };
    let policy = match settings.filter_policy_path.as_deref() {
        Some(path) => FilterPolicy::load(path).wrap_err("failed to load filter policy")?,
        None => FilterPolicy::default(),
    };

    let ports = ChatPorts {
        store: Arc::new(InMemoryChatStore::new()),
        cache: CacheLayer::new(cache, clock.clone(), config.cache),
        publisher: Arc::new(BroadcastPublisher::default()),
        clock,
        config,
    };
    let services = ChatServices::new(ports, Arc::new(policy));

    let mut ticker = tokio::time::interval(settings.sweep_interval());
    info!(interval_secs = settings.sweep_interval().as_secs(), "chat worker started");
    loop {
        tokio::select! {
            _ = ticker.tick() => match services.presence.sweep().await {
                Ok(report) if !report.affected.is_empty() => {
                    info!(affected = report.affected.len(), "presence sweep completed");
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "presence sweep failed"),
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    error!(error = %err, "failed to listen for shutdown signal");
                }
                break;
            }
        }
    }
    info!("chat worker stopped");
    Ok(())
}
