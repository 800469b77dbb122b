//! The update loop and the `Dispatcher` handle shared by every handler.
//!
//! [`Dispatcher::new`] returns both halves: the cheap, clonable handle used to
//! register listeners and issue API calls, and the [`UpdateLoop`] that must be
//! driven on exactly one task. All API traffic, including calls made from
//! handlers, goes through the loop via the call bridge.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    api::{ApiRequest, ApiTransport, InlineKeyboard, SentMessage, SentPoll},
    bridge::{self, BridgeReceiver, CallBridge, QueuedCall},
    domain::{ChatId, MessageId, UserId},
    errors::Error,
    filters::{CommandFilter, InlineFilter},
    registry::{
        CommandEntry, CommandHandler, InlineEntry, InlineHandler, ListenerId, ListenerOutcome,
        ListenerRegistry, MessageListener,
    },
    sandbox::{COMMAND_TIMEOUT, INLINE_TIMEOUT},
    update::Update,
    utils::lock,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct LoopSettings {
    /// `timeout` passed to `getUpdates`.
    pub long_poll_timeout: Duration,
    /// How long each iteration waits for a queued outbound call.
    pub bridge_wait: Duration,
    /// Pause after a failed `getUpdates`.
    pub retry_backoff: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            long_poll_timeout: Duration::from_secs(30),
            bridge_wait: Duration::from_millis(100),
            retry_backoff: Duration::from_secs(3),
        }
    }
}

struct Inner {
    bridge: CallBridge,
    registry: Arc<ListenerRegistry>,
    bot_username: String,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        bot_username: impl Into<String>,
        settings: LoopSettings,
    ) -> (Self, UpdateLoop) {
        let (bridge, calls) = bridge::channel();
        let registry = Arc::new(ListenerRegistry::new());
        let dispatcher = Self {
            inner: Arc::new(Inner {
                bridge,
                registry: registry.clone(),
                bot_username: bot_username.into(),
            }),
        };
        let update_loop = UpdateLoop {
            transport,
            calls,
            registry,
            offset: 0,
            settings,
        };
        (dispatcher, update_loop)
    }

    pub fn bot_username(&self) -> &str {
        &self.inner.bot_username
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.inner.registry
    }

    /// Send a raw request through the loop task and wait for its `result`.
    pub async fn submit(&self, request: ApiRequest) -> Result<Value> {
        self.inner.bridge.submit(request).await
    }

    // ============== Registration ==============

    pub fn add_message_listener<L: MessageListener>(&self, listener: L) -> ListenerId {
        self.inner.registry.add_message_listener(Arc::new(listener))
    }

    pub fn remove_message_listener(&self, id: ListenerId) {
        self.inner.registry.remove_listeners(&[id]);
    }

    /// Route `/command` (optionally `@`-addressed to this bot) to `handler`.
    ///
    /// Registering the same command again replaces the handler.
    pub fn add_command_listener<H: CommandHandler>(
        &self,
        command: &str,
        handler: H,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let timeout = COMMAND_TIMEOUT.resolve(timeout)?;
        let registry = &self.inner.registry;
        let filter = CommandFilter::new(command, &self.inner.bot_username, Arc::downgrade(registry))?;

        let entry = CommandEntry {
            handler: Arc::new(handler),
            timeout,
        };
        if registry.set_command(command, entry) {
            registry.add_message_listener(Arc::new(filter));
        }
        tracing::debug!(command, timeout_secs = timeout.as_secs(), "command listener registered");
        Ok(())
    }

    /// Route presses on the keyboard of `(chat_id, message_id)` to `handler`.
    ///
    /// Registering the same key again replaces the handler.
    pub fn add_inline_listener<H: InlineHandler>(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        handler: H,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let timeout = INLINE_TIMEOUT.resolve(timeout)?;
        self.install_inline(chat_id, message_id, Arc::new(handler), timeout);
        Ok(())
    }

    fn install_inline(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        handler: Arc<dyn InlineHandler>,
        timeout: Duration,
    ) {
        let registry = &self.inner.registry;
        let key = (chat_id, message_id);
        registry.set_inline(key, InlineEntry { handler, timeout }, || {
            Arc::new(InlineFilter::new(
                key,
                Arc::downgrade(registry),
                self.inner.bridge.clone(),
            ))
        });
    }

    /// Stop routing presses on the keyboard of `(chat_id, message_id)`.
    ///
    /// Returns `false` if nothing was registered for that message.
    pub fn remove_inline_listener(&self, chat_id: ChatId, message_id: MessageId) -> bool {
        let removed = self.inner.registry.remove_inline(&(chat_id, message_id));
        if removed {
            tracing::debug!(chat_id = chat_id.0, message_id = message_id.0, "inline listener removed");
        }
        removed
    }

    // ============== Bot API ==============

    pub async fn send_message(&self, chat_id: ChatId, text: impl Into<String>) -> Result<SentMessage> {
        let result = self
            .submit(ApiRequest::SendMessage {
                chat_id,
                text: text.into(),
                reply_markup: None,
            })
            .await?;
        SentMessage::from_result(&result)
    }

    /// Send `text` with an inline keyboard and route its presses to `handler`.
    ///
    /// The timeout is checked before anything is sent.
    pub async fn send_inline_message<H: InlineHandler>(
        &self,
        chat_id: ChatId,
        text: impl Into<String>,
        keyboard: InlineKeyboard,
        handler: H,
        timeout: Option<Duration>,
    ) -> Result<SentMessage> {
        let timeout = INLINE_TIMEOUT.resolve(timeout)?;
        let result = self
            .submit(ApiRequest::SendMessage {
                chat_id,
                text: text.into(),
                reply_markup: Some(keyboard),
            })
            .await?;
        let sent = SentMessage::from_result(&result)?;
        self.install_inline(sent.chat_id, sent.message_id, Arc::new(handler), timeout);
        Ok(sent)
    }

    /// Start a two-option poll (anonymous, Telegram's default).
    pub async fn start_poll(
        &self,
        chat_id: ChatId,
        question: impl Into<String>,
        options: [String; 2],
    ) -> Result<SentPoll> {
        let result = self
            .submit(ApiRequest::SendPoll {
                chat_id,
                question: question.into(),
                options,
            })
            .await?;
        SentPoll::from_result(&result)
    }

    /// Remove `user_id` from the chat permanently (`until_date = 0`).
    pub async fn kick_chat_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.submit(ApiRequest::KickChatMember {
            chat_id,
            user_id,
            until_date: 0,
        })
        .await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_query_id: impl Into<String>) -> Result<()> {
        self.submit(ApiRequest::AnswerCallbackQuery {
            callback_query_id: callback_query_id.into(),
        })
        .await?;
        Ok(())
    }

    // ============== Conversations ==============

    /// Wait for the next text message `user_id` sends in `chat_id`.
    ///
    /// A companion listener delivers the text and removes itself. If the waiting
    /// task goes away first (e.g. its handler timed out), the listener removes
    /// itself on the next update it sees.
    pub async fn wait_for_reply(&self, chat_id: ChatId, user_id: UserId) -> Result<String> {
        let (tx, rx) = oneshot::channel::<String>();
        let slot = Mutex::new(Some(tx));

        self.add_message_listener(move |update: &Update| -> Result<ListenerOutcome> {
            let mut slot = lock(&slot);
            if slot.as_ref().map_or(true, |tx| tx.is_closed()) {
                slot.take();
                return Ok(ListenerOutcome::RemoveSelf);
            }

            let msg = update.text_message()?;
            if msg.chat_id != chat_id || msg.sender != user_id {
                return Ok(ListenerOutcome::Continue);
            }
            if let Some(tx) = slot.take() {
                let _ = tx.send(msg.text.to_string());
            }
            Ok(ListenerOutcome::RemoveSelf)
        });

        rx.await.map_err(|_| Error::Closed)
    }
}

// ============== Update loop ==============

/// The single task that owns the transport.
pub struct UpdateLoop {
    transport: Arc<dyn ApiTransport>,
    calls: BridgeReceiver,
    registry: Arc<ListenerRegistry>,
    offset: i64,
    settings: LoopSettings,
}

enum Woke {
    Batch(Result<Value>),
    Call(QueuedCall),
}

impl UpdateLoop {
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Run until `cancel` fires. Dropping the loop fails every pending call
    /// with [`Error::Closed`].
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("update loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.tick() => {}
            }
        }
        tracing::info!(offset = self.offset, "update loop stopped");
    }

    /// One iteration: execute a queued call if one arrives within the bridge
    /// wait, otherwise fetch and dispatch one batch of updates.
    pub async fn tick(&mut self) {
        if let Some(call) = self.calls.next_within(self.settings.bridge_wait).await {
            self.execute(call).await;
            return;
        }

        let request = ApiRequest::GetUpdates {
            offset: self.offset,
            timeout_secs: self.settings.long_poll_timeout.as_secs(),
        };
        // A call queued mid long-poll preempts it; the unconfirmed batch is
        // delivered again on the next fetch.
        let woke = {
            let fetch = self.transport.call(request.method(), request.params());
            tokio::select! {
                res = fetch => Woke::Batch(res),
                Some(call) = self.calls.recv() => Woke::Call(call),
            }
        };

        match woke {
            Woke::Call(call) => self.execute(call).await,
            Woke::Batch(Ok(batch)) => match into_updates(batch) {
                Ok(updates) => {
                    self.offset = advance_offset(self.offset, &updates);
                    for update in &updates {
                        self.dispatch(update);
                    }
                }
                Err(e) => self.back_off(e).await,
            },
            Woke::Batch(Err(e)) => self.back_off(e).await,
        }
    }

    async fn execute(&mut self, call: QueuedCall) {
        let method = call.request.method();
        let result = self.transport.call(method, call.request.params()).await;
        if let Err(e) = &result {
            tracing::warn!(id = call.id, method, "outbound call failed: {e}");
        }
        self.calls.complete(call.id, result);
    }

    async fn back_off(&self, e: Error) {
        tracing::warn!(
            offset = self.offset,
            backoff_ms = self.settings.retry_backoff.as_millis() as u64,
            "getUpdates failed: {e}"
        );
        tokio::time::sleep(self.settings.retry_backoff).await;
    }

    /// Fan `update` out to a snapshot of the message listeners.
    ///
    /// Listeners added during the pass see the next update, not this one;
    /// removals are applied once the pass is over.
    pub fn dispatch(&self, update: &Update) {
        let mut finished = Vec::new();
        for (id, listener) in self.registry.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| listener.on_update(update))) {
                Ok(Ok(ListenerOutcome::Continue)) => {}
                Ok(Ok(ListenerOutcome::RemoveSelf)) => finished.push(id),
                Ok(Err(e)) => tracing::debug!(listener = %id, "update skipped: {e}"),
                Err(_) => tracing::warn!(listener = %id, "listener panicked"),
            }
        }
        if !finished.is_empty() {
            tracing::debug!(count = finished.len(), "removing finished listeners");
            self.registry.remove_listeners(&finished);
        }
    }
}

/// Next `getUpdates` offset after receiving `updates`.
///
/// One past the highest update id seen; an empty batch (or one without ids)
/// leaves it unchanged, and it never moves backwards.
pub fn advance_offset(offset: i64, updates: &[Update]) -> i64 {
    updates
        .iter()
        .filter_map(|u| u.id().ok())
        .max()
        .map_or(offset, |max| offset.max(max + 1))
}

fn into_updates(batch: Value) -> Result<Vec<Update>> {
    match batch {
        Value::Array(items) => Ok(items.into_iter().map(Update::from_value).collect()),
        other => Err(Error::shape(format!(
            "getUpdates result is not an array: {other}"
        ))),
    }
}
