//! Listener registry: message listeners, command handlers, inline handlers.
//!
//! Each collection sits behind its own mutex, held only while the collection is
//! read or mutated. Dispatch works on a snapshot of the message listeners, so
//! listeners may register or remove listeners while a pass is running.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, UserId},
    update::Update,
    utils::lock,
    Result,
};

/// What a message listener wants after seeing an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerOutcome {
    Continue,
    RemoveSelf,
}

/// Invoked on the loop task for every update, in registration order.
///
/// Must not block: anything that talks to the API belongs in a sandboxed task.
/// An `Err` means "this update is not for me" and is logged at debug level.
pub trait MessageListener: Send + Sync + 'static {
    fn on_update(&self, update: &Update) -> Result<ListenerOutcome>;
}

impl<F> MessageListener for F
where
    F: Fn(&Update) -> Result<ListenerOutcome> + Send + Sync + 'static,
{
    fn on_update(&self, update: &Update) -> Result<ListenerOutcome> {
        self(update)
    }
}

/// Handler for `/command`: receives the chat and the sender.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, chat_id: ChatId, sender: UserId);
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(ChatId, UserId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, chat_id: ChatId, sender: UserId) {
        self(chat_id, sender).await
    }
}

/// Handler for an inline-button press: receives the chat and the callback data.
#[async_trait]
pub trait InlineHandler: Send + Sync + 'static {
    async fn handle(&self, chat_id: ChatId, data: String);
}

#[async_trait]
impl<F, Fut> InlineHandler for F
where
    F: Fn(ChatId, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, chat_id: ChatId, data: String) {
        self(chat_id, data).await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inline handlers are keyed by the message that carries the keyboard.
pub type InlineKey = (ChatId, MessageId);

#[derive(Clone)]
pub struct CommandEntry {
    pub handler: Arc<dyn CommandHandler>,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct InlineEntry {
    pub handler: Arc<dyn InlineHandler>,
    pub timeout: Duration,
}

pub type ListenerSnapshot = Vec<(ListenerId, Arc<dyn MessageListener>)>;

/// An inline handler plus the filter listener that routes to it.
struct InlineSlot {
    entry: InlineEntry,
    filter: ListenerId,
}

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    message: Mutex<Vec<(ListenerId, Arc<dyn MessageListener>)>>,
    commands: Mutex<HashMap<String, CommandEntry>>,
    inline: Mutex<HashMap<InlineKey, InlineSlot>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.message).push((id, listener));
        id
    }

    /// Remove listeners by id; unknown ids are ignored.
    pub fn remove_listeners(&self, ids: &[ListenerId]) {
        if ids.is_empty() {
            return;
        }
        lock(&self.message).retain(|(id, _)| !ids.contains(id));
    }

    pub fn snapshot(&self) -> ListenerSnapshot {
        lock(&self.message).clone()
    }

    pub fn message_listener_count(&self) -> usize {
        lock(&self.message).len()
    }

    /// Install or replace the handler for `command`.
    ///
    /// Returns `true` when the command was not registered before, i.e. when the
    /// caller still needs to install its filter listener.
    pub fn set_command(&self, command: &str, entry: CommandEntry) -> bool {
        lock(&self.commands)
            .insert(command.to_string(), entry)
            .is_none()
    }

    pub fn command(&self, command: &str) -> Option<CommandEntry> {
        lock(&self.commands).get(command).cloned()
    }

    /// Install or replace the inline handler for `key`.
    ///
    /// On first registration `filter` is called and its listener added; a
    /// replacement keeps the existing filter. Returns `true` for a new key.
    pub fn set_inline(
        &self,
        key: InlineKey,
        entry: InlineEntry,
        filter: impl FnOnce() -> Arc<dyn MessageListener>,
    ) -> bool {
        let mut inline = lock(&self.inline);
        if let Some(slot) = inline.get_mut(&key) {
            slot.entry = entry;
            return false;
        }
        let filter = self.add_message_listener(filter());
        inline.insert(key, InlineSlot { entry, filter });
        true
    }

    pub fn inline(&self, key: &InlineKey) -> Option<InlineEntry> {
        lock(&self.inline).get(key).map(|slot| slot.entry.clone())
    }

    /// Drop the handler for `key` together with its filter listener.
    ///
    /// Returns `false` if `key` was not registered.
    pub fn remove_inline(&self, key: &InlineKey) -> bool {
        let slot = lock(&self.inline).remove(key);
        match slot {
            Some(slot) => {
                self.remove_listeners(&[slot.filter]);
                true
            }
            None => false,
        }
    }

    pub fn inline_count(&self) -> usize {
        lock(&self.inline).len()
    }
}
