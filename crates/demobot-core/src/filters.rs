//! Message listeners that route commands and inline-button presses to their
//! registered handlers.
//!
//! One filter is installed per command name and per inline key. The filter
//! looks its handler up in the registry on every match, so re-registering
//! swaps the handler without adding a second filter.

use std::sync::Weak;

use regex::Regex;

use crate::{
    api::ApiRequest,
    bridge::CallBridge,
    errors::Error,
    registry::{InlineKey, ListenerOutcome, ListenerRegistry, MessageListener},
    sandbox::run_bounded,
    update::Update,
    Result,
};

/// Reject command names Telegram would never deliver.
pub fn validate_command(command: &str) -> Result<()> {
    let ok = !command.is_empty()
        && command.len() <= 32
        && command
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "invalid command name {command:?} (expected 1-32 of a-z, 0-9, _)"
        )))
    }
}

// ============== Command filter ==============

pub struct CommandFilter {
    command: String,
    pattern: Regex,
    bot_username: String,
    registry: Weak<ListenerRegistry>,
}

impl CommandFilter {
    /// `bot_username` may be given with or without the leading `@`.
    pub fn new(command: &str, bot_username: &str, registry: Weak<ListenerRegistry>) -> Result<Self> {
        validate_command(command)?;
        let pattern = Regex::new(&format!(
            r"^/{}(?:@([A-Za-z0-9_]+))?(?:\s|$)",
            regex::escape(command)
        ))
        .map_err(|e| Error::Config(format!("command pattern for /{command}: {e}")))?;

        Ok(Self {
            command: command.to_string(),
            pattern,
            bot_username: bot_username.trim_start_matches('@').to_string(),
            registry,
        })
    }

    /// `/cmd` or `/cmd@<this bot>` as the first token of `text`.
    pub fn matches(&self, text: &str) -> bool {
        let Some(caps) = self.pattern.captures(text) else {
            return false;
        };
        match caps.get(1) {
            None => true,
            Some(addressee) => addressee.as_str().eq_ignore_ascii_case(&self.bot_username),
        }
    }
}

impl MessageListener for CommandFilter {
    fn on_update(&self, update: &Update) -> Result<ListenerOutcome> {
        let msg = update.text_message()?;
        if !self.matches(msg.text) {
            return Ok(ListenerOutcome::Continue);
        }
        let Some(registry) = self.registry.upgrade() else {
            return Ok(ListenerOutcome::RemoveSelf);
        };
        let Some(entry) = registry.command(&self.command) else {
            return Ok(ListenerOutcome::Continue);
        };

        let (chat_id, sender) = (msg.chat_id, msg.sender);
        tracing::info!(command = %self.command, chat_id = chat_id.0, user_id = sender.0, "command received");
        let handler = entry.handler;
        run_bounded(format!("/{}", self.command), entry.timeout, async move {
            handler.handle(chat_id, sender).await;
        });
        Ok(ListenerOutcome::Continue)
    }
}

// ============== Inline filter ==============

pub struct InlineFilter {
    key: InlineKey,
    registry: Weak<ListenerRegistry>,
    bridge: CallBridge,
}

impl InlineFilter {
    pub fn new(key: InlineKey, registry: Weak<ListenerRegistry>, bridge: CallBridge) -> Self {
        Self {
            key,
            registry,
            bridge,
        }
    }
}

impl MessageListener for InlineFilter {
    fn on_update(&self, update: &Update) -> Result<ListenerOutcome> {
        let query = update.callback_query()?;
        if (query.chat_id, query.message_id) != self.key {
            return Ok(ListenerOutcome::Continue);
        }
        let Some(registry) = self.registry.upgrade() else {
            return Ok(ListenerOutcome::RemoveSelf);
        };
        // Key retired while this pass was running.
        let Some(entry) = registry.inline(&self.key) else {
            return Ok(ListenerOutcome::RemoveSelf);
        };

        // Acknowledge the press; the result is irrelevant to the handler.
        let bridge = self.bridge.clone();
        let callback_query_id = query.id.to_string();
        tokio::spawn(async move {
            if let Err(e) = bridge
                .submit(ApiRequest::AnswerCallbackQuery { callback_query_id })
                .await
            {
                tracing::debug!("answerCallbackQuery failed: {e}");
            }
        });

        let chat_id = query.chat_id;
        let data = query.data.to_string();
        let handler = entry.handler;
        let label = format!("inline {}:{}", self.key.0 .0, self.key.1 .0);
        run_bounded(label, entry.timeout, async move {
            handler.handle(chat_id, data).await;
        });
        Ok(ListenerOutcome::Continue)
    }
}
