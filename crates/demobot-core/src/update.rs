//! Opaque Telegram updates.
//!
//! Updates are kept as raw JSON and inspected through accessors that fail with
//! [`Error::Shape`] when a key is missing or has the wrong type. A listener
//! that does not care about an update simply gets a shape error back and the
//! dispatcher moves on.

use serde_json::Value;

use crate::{
    domain::{ChatId, MessageId, PollId, PollOption, UserId},
    errors::Error,
    Result,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    raw: Value,
}

/// A plain text message: who wrote what, where.
#[derive(Clone, Copy, Debug)]
pub struct TextMessage<'a> {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender: UserId,
    pub text: &'a str,
}

/// An inline-button press.
#[derive(Clone, Debug)]
pub struct CallbackQuery<'a> {
    pub id: &'a str,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub data: &'a str,
}

/// A vote-count change of a poll the bot sent.
#[derive(Clone, Debug)]
pub struct PollState {
    pub id: PollId,
    pub options: Vec<PollOption>,
}

impl Update {
    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn id(&self) -> Result<i64> {
        self.i64_at(&["update_id"])
    }

    pub fn get(&self, path: &[&str]) -> Result<&Value> {
        lookup(&self.raw, path)
    }

    pub fn str_at(&self, path: &[&str]) -> Result<&str> {
        self.get(path)?
            .as_str()
            .ok_or_else(|| Error::shape(format!("{} is not a string", path.join("."))))
    }

    pub fn i64_at(&self, path: &[&str]) -> Result<i64> {
        self.get(path)?
            .as_i64()
            .ok_or_else(|| Error::shape(format!("{} is not an integer", path.join("."))))
    }

    pub fn text_message(&self) -> Result<TextMessage<'_>> {
        Ok(TextMessage {
            chat_id: ChatId(self.i64_at(&["message", "chat", "id"])?),
            message_id: MessageId(self.i64_at(&["message", "message_id"])?),
            sender: UserId(self.i64_at(&["message", "from", "id"])?),
            text: self.str_at(&["message", "text"])?,
        })
    }

    pub fn callback_query(&self) -> Result<CallbackQuery<'_>> {
        Ok(CallbackQuery {
            id: self.str_at(&["callback_query", "id"])?,
            chat_id: ChatId(self.i64_at(&["callback_query", "message", "chat", "id"])?),
            message_id: MessageId(self.i64_at(&["callback_query", "message", "message_id"])?),
            data: self.str_at(&["callback_query", "data"])?,
        })
    }

    pub fn poll(&self) -> Result<PollState> {
        let id = PollId(self.str_at(&["poll", "id"])?.to_string());
        let options = serde_json::from_value(self.get(&["poll", "options"])?.clone())
            .map_err(|e| Error::shape(format!("poll.options: {e}")))?;
        Ok(PollState { id, options })
    }

    /// Chat ids of every top-level object in the update that carries `chat.id`.
    pub fn chat_ids(&self) -> Vec<ChatId> {
        let Some(obj) = self.raw.as_object() else {
            return Vec::new();
        };
        obj.values()
            .filter_map(|v| lookup(v, &["chat", "id"]).ok())
            .filter_map(Value::as_i64)
            .map(ChatId)
            .collect()
    }
}

impl From<Value> for Update {
    fn from(raw: Value) -> Self {
        Self::from_value(raw)
    }
}

pub fn lookup<'a>(root: &'a Value, path: &[&str]) -> Result<&'a Value> {
    let mut cur = root;
    for (depth, key) in path.iter().enumerate() {
        cur = cur
            .get(key)
            .ok_or_else(|| Error::shape(format!("missing key {}", path[..=depth].join("."))))?;
    }
    Ok(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_message_reads_nested_fields() {
        let u = Update::from_value(json!({
          "update_id": 7,
          "message": {
            "message_id": 11,
            "chat": {"id": -100},
            "from": {"id": 42, "first_name": "Ann"},
            "text": "/ping"
          }
        }));
        let m = u.text_message().unwrap();
        assert_eq!(u.id().unwrap(), 7);
        assert_eq!(m.chat_id, ChatId(-100));
        assert_eq!(m.message_id, MessageId(11));
        assert_eq!(m.sender, UserId(42));
        assert_eq!(m.text, "/ping");
    }

    #[test]
    fn missing_key_is_a_shape_error_naming_the_path() {
        let u = Update::from_value(json!({"update_id": 1, "message": {"chat": {"id": 1}}}));
        let err = u.text_message().unwrap_err();
        assert!(err.is_shape());
        assert!(err.to_string().contains("message.message_id"), "{err}");
    }

    #[test]
    fn wrong_type_is_a_shape_error() {
        let u = Update::from_value(json!({"update_id": "nope"}));
        assert!(u.id().unwrap_err().is_shape());
    }

    #[test]
    fn poll_state_parses_options() {
        let u = Update::from_value(json!({
          "update_id": 3,
          "poll": {
            "id": "5001",
            "options": [
              {"text": "Yes", "voter_count": 2},
              {"text": "No", "voter_count": 1}
            ]
          }
        }));
        let p = u.poll().unwrap();
        assert_eq!(p.id, PollId("5001".to_string()));
        assert_eq!(p.options[0].voter_count, 2);
        assert_eq!(p.options[1].text, "No");
    }

    #[test]
    fn chat_ids_scans_top_level_objects() {
        let u = Update::from_value(json!({
          "update_id": 4,
          "edited_message": {"chat": {"id": 5}},
          "poll": {"id": "1"}
        }));
        assert_eq!(u.chat_ids(), vec![ChatId(5)]);
    }
}
