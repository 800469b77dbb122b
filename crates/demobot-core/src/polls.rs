//! Kick polls: creation, tally updates and the time-gated decision.
//!
//! Option 0 is always "kick", option 1 always "keep". A record is removed the
//! moment it is decided, so every poll is acted on at most once.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::{
    dispatcher::Dispatcher,
    domain::{ChatId, PollId, PollOption, UserId},
    errors::Error,
    i18n::{Msg, Texts},
    utils::{lock, read_json_or_default, write_json_snapshot},
    Result,
};

/// A poll may kick once it is this old (seconds).
pub const KICK_AFTER: i64 = 12 * 3600;
/// A poll that has not kicked is dropped once it is this old (seconds).
pub const EXPIRE_AFTER: i64 = 24 * 3600;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRecord {
    pub chat_id: ChatId,
    /// Unix seconds, as reported by Telegram for the poll message.
    pub date: i64,
    pub user_id: UserId,
    pub name: String,
    pub options: [PollOption; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Active,
    Kick,
    Expire,
}

impl PollRecord {
    pub fn decide(&self, now: i64) -> Verdict {
        let elapsed = now - self.date;
        let [kick, keep] = &self.options;
        if elapsed >= KICK_AFTER && kick.voter_count > keep.voter_count {
            Verdict::Kick
        } else if elapsed >= EXPIRE_AFTER {
            Verdict::Expire
        } else {
            Verdict::Active
        }
    }
}

fn option_pair(options: Vec<PollOption>) -> Result<[PollOption; 2]> {
    <[PollOption; 2]>::try_from(options)
        .map_err(|v| Error::shape(format!("expected 2 poll options, got {}", v.len())))
}

/// What one sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub kicked: Vec<PollId>,
    pub expired: Vec<PollId>,
}

pub struct PollBook {
    records: Mutex<HashMap<PollId, PollRecord>>,
    store: Option<PathBuf>,
    write: Mutex<()>,
}

impl PollBook {
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            store: None,
            write: Mutex::new(()),
        }
    }

    /// Load active polls from `path` (missing file = none) and persist there.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let saved: BTreeMap<String, PollRecord> = read_json_or_default(&path)?;
        let records = saved
            .into_iter()
            .map(|(id, record)| (PollId(id), record))
            .collect::<HashMap<_, _>>();
        tracing::info!(active = records.len(), path = %path.display(), "poll records loaded");
        Ok(Self {
            records: Mutex::new(records),
            store: Some(path),
            write: Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &PollId) -> Option<PollRecord> {
        lock(&self.records).get(id).cloned()
    }

    pub fn insert(&self, id: PollId, record: PollRecord) -> Result<()> {
        lock(&self.records).insert(id, record);
        self.persist()
    }

    /// Overwrite the tallies of an active poll in memory only.
    ///
    /// Returns `false` for polls this book does not track.
    pub fn record_tallies(&self, id: &PollId, options: Vec<PollOption>) -> Result<bool> {
        let options = option_pair(options)?;
        let mut records = lock(&self.records);
        let Some(record) = records.get_mut(id) else {
            return Ok(false);
        };
        record.options = options;
        Ok(true)
    }

    /// [`record_tallies`](Self::record_tallies), then save the active set.
    pub fn update_tallies(&self, id: &PollId, options: Vec<PollOption>) -> Result<bool> {
        if !self.record_tallies(id, options)? {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Remove and return every record that is no longer active at `now`.
    pub fn take_decided(&self, now: i64) -> Vec<(PollId, PollRecord, Verdict)> {
        let mut records = lock(&self.records);
        let decided: Vec<(PollId, Verdict)> = records
            .iter()
            .map(|(id, r)| (id.clone(), r.decide(now)))
            .filter(|(_, v)| *v != Verdict::Active)
            .collect();
        decided
            .into_iter()
            .filter_map(|(id, verdict)| {
                let record = records.remove(&id)?;
                Some((id, record, verdict))
            })
            .collect()
    }

    /// Send the kick poll for `user_id` and start tracking it.
    pub async fn create(
        &self,
        dispatcher: &Dispatcher,
        texts: &Texts,
        chat_id: ChatId,
        name: &str,
        user_id: UserId,
    ) -> Result<PollId> {
        let question = texts.named(chat_id, Msg::KickQuestion, name);
        let answers = [
            texts.get(chat_id, Msg::KickYes).to_string(),
            texts.get(chat_id, Msg::KickNo).to_string(),
        ];
        let sent = dispatcher.start_poll(chat_id, question, answers).await?;

        let record = PollRecord {
            chat_id,
            date: sent.date,
            user_id,
            name: name.to_string(),
            options: option_pair(sent.options)?,
        };
        tracing::info!(poll = %sent.poll_id, chat_id = chat_id.0, user_id = user_id.0, "kick poll started");
        lock(&self.records).insert(sent.poll_id.clone(), record);
        if let Err(e) = self.persist() {
            tracing::error!("failed to save poll records: {e}");
        }
        Ok(sent.poll_id)
    }

    /// Apply the decision rule to every record at `now`.
    ///
    /// Kicks announce the result, then remove the member. API failures are
    /// logged; the record is gone either way.
    pub async fn sweep(&self, dispatcher: &Dispatcher, texts: &Texts, now: i64) -> SweepReport {
        let decided = self.take_decided(now);
        if decided.is_empty() {
            return SweepReport::default();
        }

        let mut report = SweepReport::default();
        for (id, record, verdict) in decided {
            match verdict {
                Verdict::Kick => {
                    tracing::info!(
                        poll = %id,
                        chat_id = record.chat_id.0,
                        user_id = record.user_id.0,
                        "vote passed, kicking {}",
                        record.name
                    );
                    let notice = texts.named(record.chat_id, Msg::KickResult, &record.name);
                    if let Err(e) = dispatcher.send_message(record.chat_id, notice).await {
                        tracing::warn!(poll = %id, "kick notice failed: {e}");
                    }
                    if let Err(e) = dispatcher.kick_chat_member(record.chat_id, record.user_id).await {
                        tracing::warn!(poll = %id, "kick failed: {e}");
                    }
                    report.kicked.push(id);
                }
                Verdict::Expire => {
                    tracing::info!(poll = %id, chat_id = record.chat_id.0, "poll closed after 24 hours");
                    report.expired.push(id);
                }
                Verdict::Active => {}
            }
        }

        if let Err(e) = self.persist() {
            tracing::error!("failed to save poll records: {e}");
        }
        report
    }

    /// Write the active set to the backing file, if any.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.store else {
            return Ok(());
        };
        let _write = lock(&self.write);
        let snapshot: BTreeMap<String, PollRecord> = lock(&self.records)
            .iter()
            .map(|(id, r)| (id.0.clone(), r.clone()))
            .collect();
        write_json_snapshot(path, &snapshot)
    }
}
