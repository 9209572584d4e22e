use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_core::{
    config::Config,
    history::{HistoryStore, MemoryHistoryStore},
    maintenance::{Maintenance, MaintenanceConfig},
    messaging::pacing::{OutboundPacer, PacingConfig},
    security::RateLimiter,
};
use relay_hf::{HfClient, HfClientConfig};
use relay_telegram::router::Services;

#[tokio::main]
async fn main() -> Result<(), relay_core::Error> {
    relay_core::logging::init("relay")?;

    let cfg = Arc::new(Config::load()?);

    let history: Arc<dyn HistoryStore> = match &cfg.history_file {
        Some(path) => Arc::new(MemoryHistoryStore::open(path).await?),
        None => Arc::new(MemoryHistoryStore::new()),
    };
    let limiter = Arc::new(RateLimiter::from_config(&cfg));
    let completion = Arc::new(HfClient::new(HfClientConfig::from_config(&cfg))?);
    let pacer = Arc::new(OutboundPacer::new(PacingConfig::from_config(&cfg)));

    let cancel = CancellationToken::new();
    let maintenance = Maintenance::new(
        MaintenanceConfig::from_config(&cfg),
        limiter.clone(),
        history.clone(),
    )
    .with_pacer(pacer.clone())
    .spawn(cancel.clone());

    let polled = relay_telegram::router::run_polling(
        cfg.clone(),
        Services {
            limiter,
            history: history.clone(),
            completion,
            pacer,
        },
    )
    .await;

    cancel.cancel();
    if let Err(e) = maintenance.await {
        warn!(error = %e, "maintenance task ended abnormally");
    }
    if let Err(e) = history.flush().await {
        warn!(error = %e, "final history flush failed");
    }
    info!("shutdown complete");

    polled.map_err(|e| relay_core::Error::External(format!("telegram bot failed: {e}")))
}
