use std::sync::Arc;

use calc_relay_core::{config::Config, store::JsonFileStore};

#[tokio::main]
async fn main() -> Result<(), calc_relay_core::Error> {
    calc_relay_core::logging::init("calc_relay")?;

    let cfg = Arc::new(Config::load()?);
    let store = Arc::new(JsonFileStore::open(cfg.store_file.clone()).await?);

    calc_relay_telegram::router::run_polling(cfg, store)
        .await
        .map_err(|e| calc_relay_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
