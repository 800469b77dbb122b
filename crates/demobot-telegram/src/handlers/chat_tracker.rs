use std::sync::Arc;

use demobot_core::{
    registry::{ListenerOutcome, MessageListener},
    update::Update,
    Result,
};

use crate::{handlers::persist_in_background, router::AppState};

/// Remembers every chat an update comes from.
pub struct ChatTracker {
    state: Arc<AppState>,
}

impl ChatTracker {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl MessageListener for ChatTracker {
    fn on_update(&self, update: &Update) -> Result<ListenerOutcome> {
        let mut grew = false;
        for chat_id in update.chat_ids() {
            if self.state.chats.insert(chat_id) {
                tracing::info!(chat_id = chat_id.0, "new chat");
                grew = true;
            }
        }
        if grew {
            let state = self.state.clone();
            persist_in_background("chats", move || state.chats.persist());
        }
        Ok(ListenerOutcome::Continue)
    }
}
