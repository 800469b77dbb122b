use std::{sync::Arc, time::Duration};

use demobot_core::{
    domain::{ChatId, UserId},
    registry::{ListenerOutcome, MessageListener},
    sandbox::run_bounded,
    update::Update,
    Result,
};

use crate::router::AppState;

/// Poll creation talks to the API twice at most; a minute is plenty.
const START_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// The member a kick vote is about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub name: String,
}

/// A message that mentions the bot while replying to someone nominates the
/// author of the replied-to message. Commands never nominate.
pub fn find_candidate(update: &Update, bot_username: &str) -> Result<Option<Candidate>> {
    let text = update.str_at(&["message", "text"])?;
    if text.starts_with('/') || !text.to_lowercase().contains(&bot_username.to_lowercase()) {
        return Ok(None);
    }
    if update.get(&["message", "reply_to_message"]).is_err() {
        return Ok(None);
    }

    let chat_id = ChatId(update.i64_at(&["message", "reply_to_message", "chat", "id"])?);
    let user_id = UserId(update.i64_at(&["message", "reply_to_message", "from", "id"])?);
    let mut name = update
        .str_at(&["message", "reply_to_message", "from", "first_name"])?
        .to_string();
    if let Ok(last) = update.str_at(&["message", "reply_to_message", "from", "last_name"]) {
        name.push(' ');
        name.push_str(last);
    }

    Ok(Some(Candidate {
        chat_id,
        user_id,
        name,
    }))
}

pub struct KickCandidates {
    state: Arc<AppState>,
}

impl KickCandidates {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl MessageListener for KickCandidates {
    fn on_update(&self, update: &Update) -> Result<ListenerOutcome> {
        let Some(candidate) = find_candidate(update, &self.state.cfg.bot_username)? else {
            return Ok(ListenerOutcome::Continue);
        };
        tracing::info!(
            chat_id = candidate.chat_id.0,
            user_id = candidate.user_id.0,
            "kick candidate {}",
            candidate.name
        );

        let state = self.state.clone();
        run_bounded("start kick poll", START_POLL_TIMEOUT, async move {
            let created = state
                .polls
                .create(
                    &state.dispatcher,
                    &state.texts,
                    candidate.chat_id,
                    &candidate.name,
                    candidate.user_id,
                )
                .await;
            if let Err(e) = created {
                tracing::warn!(chat_id = candidate.chat_id.0, "could not start kick poll: {e}");
            }
        });
        Ok(ListenerOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testkit::{message, Harness};
    use demobot_core::domain::PollId;
    use serde_json::{json, Value};

    fn nomination(text: &str, last_name: Option<&str>) -> Value {
        let mut from = json!({"id": 9, "first_name": "Bob"});
        if let Some(last) = last_name {
            from["last_name"] = json!(last);
        }
        json!({
          "update_id": 5,
          "message": {
            "message_id": 51,
            "chat": {"id": -1},
            "from": {"id": 2, "first_name": "Ann"},
            "text": text,
            "reply_to_message": {
              "message_id": 40,
              "chat": {"id": -1},
              "from": from,
              "text": "spam spam"
            }
          }
        })
    }

    #[test]
    fn mention_plus_reply_nominates_the_replied_author() {
        let u = Update::from_value(nomination("@DemoBot kick him", Some("Smith")));
        let c = find_candidate(&u, "@DemoBot").unwrap().unwrap();
        assert_eq!(
            c,
            Candidate {
                chat_id: ChatId(-1),
                user_id: UserId(9),
                name: "Bob Smith".to_string(),
            }
        );

        let no_last = Update::from_value(nomination("hey @demobot", None));
        assert_eq!(find_candidate(&no_last, "@DemoBot").unwrap().unwrap().name, "Bob");
    }

    #[test]
    fn no_mention_or_no_reply_is_not_a_nomination() {
        let plain = Update::from_value(nomination("just chatting", None));
        assert_eq!(find_candidate(&plain, "@DemoBot").unwrap(), None);

        let command = Update::from_value(nomination("/report@DemoBot", None));
        assert_eq!(find_candidate(&command, "@DemoBot").unwrap(), None);

        let mention_only = Update::from_value(message(1, -1, 2, "@DemoBot hello"));
        assert_eq!(find_candidate(&mention_only, "@DemoBot").unwrap(), None);

        let not_text = Update::from_value(json!({"update_id": 1, "poll": {"id": "1"}}));
        assert!(find_candidate(&not_text, "@DemoBot").unwrap_err().is_shape());
    }

    #[tokio::test(start_paused = true)]
    async fn nomination_starts_a_tracked_poll() {
        let h = Harness::start();
        h.push(vec![nomination("@DemoBot", None)]);

        h.until(|| h.state.polls.len() == 1).await;
        let polls = h.transport.calls_to("sendPoll");
        assert_eq!(polls.len(), 1);
        assert_eq!(polls[0]["chat_id"], -1);
        assert_eq!(polls[0]["question"], "Kick Bob from this chat?");

        let record = h.state.polls.get(&PollId("poll-100".into())).unwrap();
        assert_eq!(record.user_id, UserId(9));
        assert_eq!(record.name, "Bob");
    }
}
