//! Moderation handlers.
//!
//! Three message listeners run on every update (kick candidates, poll tallies,
//! chat tracking) and two commands start conversations (`/report`, `/lang`).

use std::sync::Arc;

use demobot_core::{
    domain::{ChatId, UserId},
    Result,
};

use crate::router::AppState;

mod candidate;
mod chat_tracker;
mod commands;
mod poll_updates;

pub use candidate::{find_candidate, Candidate, KickCandidates};
pub use chat_tracker::ChatTracker;
pub use poll_updates::PollUpdates;

/// Run a snapshot write on the blocking pool, off the dispatch pass.
pub(crate) fn persist_in_background<F>(what: &'static str, write: F)
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        if let Err(e) = write() {
            tracing::error!("failed to save {what}: {e}");
        }
    });
}

/// Install every handler on the state's dispatcher.
pub fn register(state: &Arc<AppState>) -> Result<()> {
    let dispatcher = &state.dispatcher;

    let s = state.clone();
    dispatcher.add_command_listener(
        "report",
        move |chat_id: ChatId, user_id: UserId| commands::report(s.clone(), chat_id, user_id),
        None,
    )?;
    let s = state.clone();
    dispatcher.add_command_listener(
        "lang",
        move |chat_id: ChatId, user_id: UserId| commands::choose_lang(s.clone(), chat_id, user_id),
        None,
    )?;

    dispatcher.add_message_listener(KickCandidates::new(state.clone()));
    dispatcher.add_message_listener(PollUpdates::new(state.clone()));
    dispatcher.add_message_listener(ChatTracker::new(state.clone()));
    Ok(())
}
