use std::{collections::HashSet, path::PathBuf, sync::Mutex};

use crate::{
    domain::ChatId,
    utils::{lock, read_json_or_default, write_json_snapshot},
    Result,
};

#[derive(Default)]
struct Seen {
    order: Vec<ChatId>,
    known: HashSet<ChatId>,
}

/// Every chat the bot has seen, persisted as a JSON array of ids in the order
/// they first appeared.
pub struct ChatRegistry {
    seen: Mutex<Seen>,
    store: Option<PathBuf>,
    write: Mutex<()>,
}

impl ChatRegistry {
    pub fn in_memory() -> Self {
        Self {
            seen: Mutex::new(Seen::default()),
            store: None,
            write: Mutex::new(()),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ids: Vec<ChatId> = read_json_or_default(&path)?;
        let mut seen = Seen::default();
        for id in ids {
            if seen.known.insert(id) {
                seen.order.push(id);
            }
        }
        Ok(Self {
            seen: Mutex::new(seen),
            store: Some(path),
            write: Mutex::new(()),
        })
    }

    /// Remember `chat_id` in memory. Returns `true` when it is new; the caller
    /// decides when to [`persist`](Self::persist).
    pub fn insert(&self, chat_id: ChatId) -> bool {
        let mut seen = lock(&self.seen);
        if !seen.known.insert(chat_id) {
            return false;
        }
        seen.order.push(chat_id);
        true
    }

    /// Remember `chat_id`, saving right away when it is new.
    pub fn register(&self, chat_id: ChatId) -> Result<bool> {
        if !self.insert(chat_id) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Write the current list to the backing file, if any.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.store else {
            return Ok(());
        };
        let _write = lock(&self.write);
        let snapshot = lock(&self.seen).order.clone();
        write_json_snapshot(path, &snapshot)
    }

    pub fn contains(&self, chat_id: ChatId) -> bool {
        lock(&self.seen).known.contains(&chat_id)
    }

    pub fn all(&self) -> Vec<ChatId> {
        lock(&self.seen).order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp_path(tag: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("demobot-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("chats.json");
        (dir, path)
    }

    #[test]
    fn register_reports_new_chats_once() {
        let reg = ChatRegistry::in_memory();
        assert!(reg.register(ChatId(3)).unwrap());
        assert!(!reg.register(ChatId(3)).unwrap());
        assert!(reg.register(ChatId(-1)).unwrap());
        assert_eq!(reg.all(), vec![ChatId(3), ChatId(-1)]);
    }

    #[test]
    fn persisted_chats_keep_first_seen_order() {
        let (dir, path) = temp_path("chats");

        let reg = ChatRegistry::load(&path).unwrap();
        reg.register(ChatId(-100)).unwrap();
        reg.register(ChatId(-200)).unwrap();
        reg.register(ChatId(-100)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<i64> = serde_json::from_str(&raw).unwrap();
        assert_eq!(ids, vec![-100, -200]);

        let again = ChatRegistry::load(&path).unwrap();
        assert!(again.contains(ChatId(-100)));
        assert!(!again.contains(ChatId(1)));
        assert!(again.register(ChatId(5)).unwrap());
        assert_eq!(again.all(), vec![ChatId(-100), ChatId(-200), ChatId(5)]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn insert_alone_does_not_touch_the_file() {
        let (dir, path) = temp_path("chats-lazy");

        let reg = ChatRegistry::load(&path).unwrap();
        assert!(reg.insert(ChatId(7)));
        assert!(!path.exists());
        reg.persist().unwrap();
        let ids: Vec<i64> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(ids, vec![7]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn concurrent_registrations_are_all_saved() {
        let (dir, path) = temp_path("chats-mt");

        let reg = Arc::new(ChatRegistry::load(&path).unwrap());
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.register(ChatId(i)).unwrap())
            })
            .collect();
        for w in writers {
            assert!(w.join().unwrap());
        }

        let again = ChatRegistry::load(&path).unwrap();
        assert_eq!(again.all().len(), 8);
        for i in 0..8 {
            assert!(again.contains(ChatId(i)), "chat {i}");
        }

        let _ = std::fs::remove_dir_all(&dir);
    }
}
