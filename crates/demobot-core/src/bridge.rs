//! Request/response correlation between arbitrary tasks and the loop task.
//!
//! A caller registers a [`RequestId`] in [`PendingCalls`], queues the request on
//! the bridge and awaits a single-shot slot. The update loop drains the queue,
//! executes each request against the transport and fills the matching slot.

use std::{collections::HashMap, sync::Arc, sync::Mutex, time::Duration};

use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::{api::ApiRequest, errors::Error, utils::lock, Result};

pub type RequestId = u32;

/// Ids are drawn uniformly from `0..=REQUEST_ID_MAX`.
pub const REQUEST_ID_MAX: RequestId = 1 << 16;

type Slot = oneshot::Sender<Result<Value>>;

/// Outstanding calls keyed by request id.
///
/// An entry exists from registration until the loop fulfils it; an id is never
/// handed out twice while its entry is present.
#[derive(Default)]
pub struct PendingCalls {
    slots: Mutex<HashMap<RequestId, Slot>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (RequestId, oneshot::Receiver<Result<Value>>) {
        let mut rng = rand::thread_rng();
        self.register_with(|| rng.gen_range(0..=REQUEST_ID_MAX))
    }

    /// Register using `next_id` as the id source, redrawing on collision.
    pub fn register_with(
        &self,
        mut next_id: impl FnMut() -> RequestId,
    ) -> (RequestId, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        let mut slots = lock(&self.slots);
        let id = loop {
            let id = next_id();
            if !slots.contains_key(&id) {
                break id;
            }
        };
        slots.insert(id, tx);
        (id, rx)
    }

    /// Hand `result` to the caller waiting on `id`.
    ///
    /// Returns `false` if `id` is unknown or its caller stopped waiting.
    pub fn fulfil(&self, id: RequestId, result: Result<Value>) -> bool {
        let slot = lock(&self.slots).remove(&id);
        match slot {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    pub fn discard(&self, id: RequestId) {
        lock(&self.slots).remove(&id);
    }

    pub fn outstanding(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Drop every slot; their callers observe [`Error::Closed`].
    pub fn close_all(&self) {
        lock(&self.slots).clear();
    }
}

#[derive(Debug)]
pub struct QueuedCall {
    pub id: RequestId,
    pub request: ApiRequest,
}

/// Sending half of the bridge, cheap to clone into any task.
#[derive(Clone)]
pub struct CallBridge {
    calls: Arc<PendingCalls>,
    queue: mpsc::UnboundedSender<QueuedCall>,
}

/// Receiving half, owned by the update loop.
pub struct BridgeReceiver {
    calls: Arc<PendingCalls>,
    queue: mpsc::UnboundedReceiver<QueuedCall>,
}

pub fn channel() -> (CallBridge, BridgeReceiver) {
    let calls = Arc::new(PendingCalls::new());
    let (tx, rx) = mpsc::unbounded_channel();
    (
        CallBridge {
            calls: calls.clone(),
            queue: tx,
        },
        BridgeReceiver { calls, queue: rx },
    )
}

impl CallBridge {
    /// Queue `request` for the loop task and wait for its result.
    pub async fn submit(&self, request: ApiRequest) -> Result<Value> {
        let (id, rx) = self.calls.register();
        let method = request.method();
        if self.queue.send(QueuedCall { id, request }).is_err() {
            self.calls.discard(id);
            return Err(Error::Closed);
        }
        tracing::trace!(id, method, "queued outbound call");
        rx.await.map_err(|_| Error::Closed)?
    }

    pub fn outstanding(&self) -> usize {
        self.calls.outstanding()
    }
}

impl BridgeReceiver {
    /// Pop one queued call, waiting at most `wait`.
    pub async fn next_within(&mut self, wait: Duration) -> Option<QueuedCall> {
        match tokio::time::timeout(wait, self.queue.recv()).await {
            Ok(call) => call,
            Err(_) => None,
        }
    }

    /// Wait for the next queued call; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<QueuedCall> {
        self.queue.recv().await
    }

    pub fn complete(&self, id: RequestId, result: Result<Value>) {
        if !self.calls.fulfil(id, result) {
            tracing::debug!(id, "caller stopped waiting before its result arrived");
        }
    }
}

impl Drop for BridgeReceiver {
    fn drop(&mut self) {
        self.queue.close();
        self.calls.close_all();
    }
}
