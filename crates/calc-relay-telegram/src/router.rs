use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use calc_relay_core::{
    config::Config,
    handler::RelayDeps,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    relay::RelayDispatcher,
    store::AccumulatorStore,
    utils::AuditLogger,
};

use crate::handlers;
use crate::TelegramMessenger;

pub struct AppState {
    pub deps: RelayDeps,
    pub dispatcher: RelayDispatcher,
}

pub async fn run_polling(
    cfg: Arc<Config>,
    store: Arc<dyn AccumulatorStore>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // Basic startup info.
    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "calc-relay started"),
        Err(e) => tracing::warn!("get_me failed: {e}"),
    }
    tracing::info!(
        admins = cfg.admins.len(),
        mappings = cfg.group_mappings.len(),
        show_process = cfg.show_process,
        independent_mode = cfg.independent_mode,
        initial_value = cfg.initial_value,
        "relay configured"
    );
    for (src, dst) in &cfg.group_mappings {
        tracing::info!(source = src.0, destination = dst.0, "relay mapping");
    }

    // Several source groups can point at one destination; throttle per chat to
    // stay clear of Telegram 429s. A single RetryAfter retry still lives in the adapter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let deps = RelayDeps::new(cfg.clone(), store).with_audit(AuditLogger::new(
        cfg.audit_log_path.clone(),
        cfg.audit_log_json,
    ));
    let state = Arc::new(AppState {
        deps,
        dispatcher: RelayDispatcher::new(messenger),
    });

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
