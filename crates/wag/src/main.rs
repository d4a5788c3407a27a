use std::sync::Arc;

use anyhow::Context;

use wag_core::{
    config::Config,
    handler::{HandlerSettings, MessageHandler},
};
use wag_engine::EngineClient;
use wag_meta::MetaMessenger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Arc::new(Config::load().context("failed to load configuration")?);
    wag_core::logging::init("wag", &cfg.log_level)?;

    tracing::info!(
        engine = %cfg.engine_base_url,
        org = %cfg.engine_org,
        sandbox = cfg.in_meta_sandbox_mode,
        "starting whatsapp gateway"
    );

    let messenger = Arc::new(MetaMessenger::from_config(&cfg)?);
    let engine = Arc::new(EngineClient::from_config(&cfg)?);
    let handler = Arc::new(MessageHandler::new(
        messenger,
        engine,
        HandlerSettings::from_config(&cfg),
    ));

    wag_meta::router::run_server(cfg, handler)
        .await
        .context("gateway server failed")
}
