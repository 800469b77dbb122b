use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use demobot_core::{
    chats::ChatRegistry,
    config::Config,
    dispatcher::{Dispatcher, LoopSettings},
    domain::{ChatId, MessageId},
    i18n::Texts,
    polls::PollBook,
    reports::{FileReportSink, ReportSink},
    utils::unix_now,
    Result,
};

use crate::{handlers, HttpTransport};

/// Everything the moderation handlers share.
pub struct AppState {
    pub cfg: Arc<Config>,
    pub dispatcher: Dispatcher,
    pub polls: PollBook,
    pub chats: ChatRegistry,
    pub texts: Texts,
    pub reports: Arc<dyn ReportSink>,
    /// The open `/lang` keyboard of each chat; a newer one retires the older.
    pub lang_choosers: Mutex<HashMap<ChatId, MessageId>>,
}

impl AppState {
    /// Load persisted state from the files under `cfg.data_dir`.
    pub fn load(cfg: Arc<Config>, dispatcher: Dispatcher) -> Result<Self> {
        Ok(Self {
            polls: PollBook::load(cfg.polls_file())?,
            chats: ChatRegistry::load(cfg.chats_file())?,
            texts: Texts::load(cfg.langs_file(), cfg.default_lang)?,
            reports: Arc::new(FileReportSink::new(cfg.reports_file())),
            lang_choosers: Mutex::new(HashMap::new()),
            dispatcher,
            cfg,
        })
    }
}

/// Run the bot until `cancel` fires.
pub async fn run(cfg: Arc<Config>, cancel: CancellationToken) -> anyhow::Result<()> {
    let transport = Arc::new(HttpTransport::new(
        &cfg.api_url,
        &cfg.telegram_bot_token,
        cfg.long_poll_timeout,
    )?);
    let settings = LoopSettings {
        long_poll_timeout: cfg.long_poll_timeout,
        ..LoopSettings::default()
    };
    let (dispatcher, update_loop) = Dispatcher::new(transport, cfg.bot_username.clone(), settings);

    let state = Arc::new(AppState::load(cfg.clone(), dispatcher)?);
    handlers::register(&state)?;

    tracing::info!(
        bot = %cfg.bot_username,
        data_dir = %cfg.data_dir.display(),
        active_polls = state.polls.len(),
        known_chats = state.chats.all().len(),
        "bot started"
    );

    let updates = tokio::spawn(update_loop.run(cancel.clone()));
    let sweeps = tokio::spawn(run_sweeps(state.clone(), cfg.sweep_interval, cancel.clone()));

    updates.await?;
    sweeps.await?;
    tracing::info!("bot stopped");
    Ok(())
}

/// Decide due polls every `every` until `cancel` fires.
pub async fn run_sweeps(state: Arc<AppState>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = state.polls.sweep(&state.dispatcher, &state.texts, unix_now()).await;
                if !report.kicked.is_empty() || !report.expired.is_empty() {
                    tracing::info!(
                        kicked = report.kicked.len(),
                        expired = report.expired.len(),
                        "poll sweep finished"
                    );
                }
            }
        }
    }
}
