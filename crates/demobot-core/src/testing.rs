//! Scripted transport fake for tests.
//!
//! Unscripted calls get plausible canned answers: `getUpdates` returns an empty
//! batch, `sendMessage`/`sendPoll` return freshly numbered messages (and
//! polls), everything else returns `true`.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicI64, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{api::ApiTransport, utils::lock, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
}

pub struct FakeTransport {
    calls: Mutex<Vec<RecordedCall>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<Value>>>>,
    next_id: AtomicI64,
    poll_date: AtomicI64,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(100),
            poll_date: AtomicI64::new(1_700_000_000),
        }
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer for the next call to `method`.
    pub fn push_response(&self, method: &str, result: Result<Value>) {
        lock(&self.scripted)
            .entry(method.to_string())
            .or_default()
            .push_back(result);
    }

    /// Queue one `getUpdates` batch.
    pub fn push_updates(&self, updates: Vec<Value>) {
        self.push_response("getUpdates", Ok(Value::Array(updates)));
    }

    /// `date` reported by unscripted `sendPoll` answers.
    pub fn set_poll_date(&self, date: i64) {
        self.poll_date.store(date, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Params of every call made to `method`, oldest first.
    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == method)
            .map(|c| c.params.clone())
            .collect()
    }

    fn canned(&self, method: &str, params: &Value) -> Value {
        match method {
            "getUpdates" => json!([]),
            "sendMessage" => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                json!({ "message_id": id, "chat": { "id": params["chat_id"] }, "text": params["text"] })
            }
            "sendPoll" => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let options: Vec<Value> = params["options"]
                    .as_array()
                    .map(|opts| {
                        opts.iter()
                            .map(|text| json!({ "text": text, "voter_count": 0 }))
                            .collect()
                    })
                    .unwrap_or_default();
                json!({
                    "message_id": id,
                    "date": self.poll_date.load(Ordering::SeqCst),
                    "chat": { "id": params["chat_id"] },
                    "poll": { "id": format!("poll-{id}"), "question": params["question"], "options": options }
                })
            }
            _ => json!(true),
        }
    }
}

#[async_trait]
impl ApiTransport for FakeTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        lock(&self.calls).push(RecordedCall {
            method: method.to_string(),
            params: params.clone(),
        });
        let scripted = lock(&self.scripted)
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(result) => result,
            None => Ok(self.canned(method, &params)),
        }
    }
}
