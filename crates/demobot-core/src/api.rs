//! Bot API requests and the transport port.
//!
//! The core never talks HTTP itself. It builds [`ApiRequest`]s, hands them to an
//! [`ApiTransport`] on the loop task, and reads results as raw JSON.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    domain::{ChatId, MessageId, PollId, PollOption, UserId},
    errors::Error,
    update::lookup,
    Result,
};

/// Hexagonal port for the remote Bot API.
///
/// Implementations return the `result` payload of a successful envelope, or an
/// [`Error::Api`] / [`Error::Transport`] describing the failure.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum ApiRequest {
    GetUpdates {
        offset: i64,
        timeout_secs: u64,
    },
    SendMessage {
        chat_id: ChatId,
        text: String,
        reply_markup: Option<InlineKeyboard>,
    },
    SendPoll {
        chat_id: ChatId,
        question: String,
        options: [String; 2],
    },
    KickChatMember {
        chat_id: ChatId,
        user_id: UserId,
        until_date: i64,
    },
    AnswerCallbackQuery {
        callback_query_id: String,
    },
}

impl ApiRequest {
    pub fn method(&self) -> &'static str {
        match self {
            ApiRequest::GetUpdates { .. } => "getUpdates",
            ApiRequest::SendMessage { .. } => "sendMessage",
            ApiRequest::SendPoll { .. } => "sendPoll",
            ApiRequest::KickChatMember { .. } => "kickChatMember",
            ApiRequest::AnswerCallbackQuery { .. } => "answerCallbackQuery",
        }
    }

    pub fn params(&self) -> Value {
        match self {
            ApiRequest::GetUpdates {
                offset,
                timeout_secs,
            } => json!({ "offset": offset, "timeout": timeout_secs }),
            ApiRequest::SendMessage {
                chat_id,
                text,
                reply_markup,
            } => {
                let mut params = json!({ "chat_id": chat_id.0, "text": text });
                if let Some(kb) = reply_markup {
                    params["reply_markup"] = kb.to_markup();
                }
                params
            }
            ApiRequest::SendPoll {
                chat_id,
                question,
                options,
            } => json!({
                "chat_id": chat_id.0,
                "question": question,
                "options": options,
            }),
            ApiRequest::KickChatMember {
                chat_id,
                user_id,
                until_date,
            } => json!({
                "chat_id": chat_id.0,
                "user_id": user_id.0,
                "until_date": until_date,
            }),
            ApiRequest::AnswerCallbackQuery { callback_query_id } => {
                json!({ "callback_query_id": callback_query_id })
            }
        }
    }
}

/// Inline keyboard rendered as a single row of callback buttons.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineKeyboard {
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    /// Build from `(label, callback_data)` pairs.
    pub fn from_pairs<L, D>(pairs: impl IntoIterator<Item = (L, D)>) -> Self
    where
        L: Into<String>,
        D: Into<String>,
    {
        let buttons = pairs
            .into_iter()
            .map(|(label, data)| InlineButton {
                label: label.into(),
                callback_data: data.into(),
            })
            .collect();
        Self { buttons }
    }

    fn to_markup(&self) -> Value {
        let row: Vec<Value> = self
            .buttons
            .iter()
            .map(|b| json!({ "text": b.label, "callback_data": b.callback_data }))
            .collect();
        json!({ "inline_keyboard": [row] })
    }
}

// ============== Envelope ==============

#[derive(Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Normalize a Bot API response body into the `result` payload or an error.
///
/// `status` is the HTTP status code; a 2xx status with `ok: false` is still a
/// failure, and a non-2xx status without a readable envelope becomes a
/// transport error.
pub fn parse_envelope(status: u16, body: &str) -> Result<Value> {
    let env: Envelope = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            let preview: String = body.chars().take(200).collect();
            return Err(Error::Transport(format!(
                "malformed envelope (status {status}): {e}: {preview}"
            )));
        }
    };

    if env.ok && (200..300).contains(&status) {
        return env
            .result
            .ok_or_else(|| Error::Transport("envelope without result".to_string()));
    }

    Err(Error::Api {
        code: env.error_code.unwrap_or(i64::from(status)),
        description: env.description.unwrap_or_default(),
        retry_after: env.parameters.and_then(|p| p.retry_after),
    })
}

// ============== Typed results ==============

/// What `sendMessage` hands back that we care about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl SentMessage {
    pub fn from_result(v: &Value) -> Result<Self> {
        Ok(Self {
            chat_id: ChatId(as_i64(lookup(v, &["chat", "id"])?, "chat.id")?),
            message_id: MessageId(as_i64(lookup(v, &["message_id"])?, "message_id")?),
        })
    }
}

/// What `sendPoll` hands back: the poll's id, send date and initial tallies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentPoll {
    pub poll_id: PollId,
    pub date: i64,
    pub options: Vec<PollOption>,
}

impl SentPoll {
    pub fn from_result(v: &Value) -> Result<Self> {
        let poll_id = lookup(v, &["poll", "id"])?
            .as_str()
            .ok_or_else(|| Error::shape("poll.id is not a string"))?
            .to_string();
        let date = as_i64(lookup(v, &["date"])?, "date")?;
        let options = serde_json::from_value(lookup(v, &["poll", "options"])?.clone())
            .map_err(|e| Error::shape(format!("poll.options: {e}")))?;
        Ok(Self {
            poll_id: PollId(poll_id),
            date,
            options,
        })
    }
}

fn as_i64(v: &Value, what: &str) -> Result<i64> {
    v.as_i64()
        .ok_or_else(|| Error::shape(format!("{what} is not an integer")))
}
