use std::sync::Arc;

use demobot_core::{
    registry::{ListenerOutcome, MessageListener},
    update::Update,
    Result,
};

use crate::{handlers::persist_in_background, router::AppState};

/// Feeds vote-count changes into the poll book.
pub struct PollUpdates {
    state: Arc<AppState>,
}

impl PollUpdates {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl MessageListener for PollUpdates {
    fn on_update(&self, update: &Update) -> Result<ListenerOutcome> {
        let poll = update.poll()?;
        if self.state.polls.record_tallies(&poll.id, poll.options)? {
            tracing::debug!(poll = %poll.id, "tallies updated");
            let state = self.state.clone();
            persist_in_background("poll records", move || state.polls.persist());
        }
        Ok(ListenerOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testkit::Harness;
    use demobot_core::{
        domain::{ChatId, PollId, PollOption, UserId},
        polls::PollRecord,
    };
    use serde_json::json;

    fn poll_update(update_id: i64, id: &str, yes: u32, no: u32) -> Update {
        Update::from_value(json!({
          "update_id": update_id,
          "poll": {
            "id": id,
            "question": "Kick Bob from this chat?",
            "options": [
              {"text": "Yes, kick", "voter_count": yes},
              {"text": "No, keep", "voter_count": no}
            ],
            "is_closed": false
          }
        }))
    }

    #[tokio::test]
    async fn tallies_of_tracked_polls_follow_updates() {
        let h = Harness::start();
        let id = PollId("777".into());
        h.state
            .polls
            .insert(
                id.clone(),
                PollRecord {
                    chat_id: ChatId(-1),
                    date: 0,
                    user_id: UserId(9),
                    name: "Bob".into(),
                    options: [
                        PollOption { text: "Yes, kick".into(), voter_count: 0 },
                        PollOption { text: "No, keep".into(), voter_count: 0 },
                    ],
                },
            )
            .unwrap();
        let listener = PollUpdates::new(h.state.clone());

        listener.on_update(&poll_update(1, "777", 3, 1)).unwrap();
        listener.on_update(&poll_update(2, "other", 9, 9)).unwrap();

        let record = h.state.polls.get(&id).unwrap();
        assert_eq!(record.options[0].voter_count, 3);
        assert_eq!(record.options[1].voter_count, 1);
        assert!(h.state.polls.get(&PollId("other".into())).is_none());
    }

    #[tokio::test]
    async fn tallies_from_the_loop_are_saved() {
        let dir = std::env::temp_dir().join(format!("demobot-tallies-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("pollsinfo.json");
        let h = Harness::start_in(&dir);
        h.state
            .polls
            .insert(
                PollId("778".into()),
                PollRecord {
                    chat_id: ChatId(-1),
                    date: 0,
                    user_id: UserId(9),
                    name: "Bob".into(),
                    options: [
                        PollOption { text: "Yes, kick".into(), voter_count: 0 },
                        PollOption { text: "No, keep".into(), voter_count: 0 },
                    ],
                },
            )
            .unwrap();

        h.push(vec![poll_update(1, "778", 4, 2).raw().clone()]);
        h.until(|| {
            std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
                .map_or(false, |v| v["778"]["options"][0]["voter_count"] == 4)
        })
        .await;

        drop(h);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn non_poll_updates_are_skipped() {
        let h = Harness::start();
        let listener = PollUpdates::new(h.state.clone());
        let err = listener
            .on_update(&Update::from_value(json!({"update_id": 1, "message": {}})))
            .unwrap_err();
        assert!(err.is_shape());
    }
}
