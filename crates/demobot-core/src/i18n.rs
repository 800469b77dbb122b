//! User-visible texts and the per-chat language choice.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    str::FromStr,
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::{
    api::InlineKeyboard,
    domain::ChatId,
    errors::Error,
    utils::{lock, read_json_or_default, write_json_snapshot},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    En,
    Ru,
}

impl Lang {
    pub const ALL: [Lang; 2] = [Lang::En, Lang::Ru];

    pub fn code(self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Ru => "ru",
        }
    }

    /// Button label, written in the language itself.
    pub fn native_name(self) -> &'static str {
        match self {
            Lang::En => "English",
            Lang::Ru => "Русский",
        }
    }
}

impl FromStr for Lang {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Lang::En),
            "ru" => Ok(Lang::Ru),
            other => Err(Error::Config(format!("unsupported language {other:?}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Msg {
    /// Poll question; `%NAME%` is the candidate.
    KickQuestion,
    KickYes,
    KickNo,
    /// Announcement before the kick; `%NAME%` is the candidate.
    KickResult,
    DescribeProblem,
    ContactInfo,
    ReportSent,
    LangChoose,
    LangChanged,
}

fn template(lang: Lang, msg: Msg) -> &'static str {
    match (lang, msg) {
        (Lang::En, Msg::KickQuestion) => "Kick %NAME% from this chat?",
        (Lang::En, Msg::KickYes) => "Yes, kick",
        (Lang::En, Msg::KickNo) => "No, keep",
        (Lang::En, Msg::KickResult) => "The chat has decided: %NAME% is kicked.",
        (Lang::En, Msg::DescribeProblem) => "Please describe the problem in your next message.",
        (Lang::En, Msg::ContactInfo) => {
            "How can we contact you about it? (e-mail, username, anything)"
        }
        (Lang::En, Msg::ReportSent) => "Thanks! Your bug report has been filed.",
        (Lang::En, Msg::LangChoose) => "Choose the bot language for this chat:",
        (Lang::En, Msg::LangChanged) => "The bot now speaks English in this chat.",

        (Lang::Ru, Msg::KickQuestion) => "Исключить %NAME% из чата?",
        (Lang::Ru, Msg::KickYes) => "Да, исключить",
        (Lang::Ru, Msg::KickNo) => "Нет, оставить",
        (Lang::Ru, Msg::KickResult) => "Чат решил: %NAME% исключён.",
        (Lang::Ru, Msg::DescribeProblem) => "Опишите проблему следующим сообщением.",
        (Lang::Ru, Msg::ContactInfo) => {
            "Как с вами связаться? (e-mail, имя пользователя, что угодно)"
        }
        (Lang::Ru, Msg::ReportSent) => "Спасибо! Сообщение об ошибке отправлено.",
        (Lang::Ru, Msg::LangChoose) => "Выберите язык бота для этого чата:",
        (Lang::Ru, Msg::LangChanged) => "Теперь бот говорит в этом чате по-русски.",
    }
}

/// Texts for every chat, in that chat's language.
pub struct Texts {
    default: Lang,
    chats: Mutex<HashMap<ChatId, Lang>>,
    store: Option<PathBuf>,
    write: Mutex<()>,
}

impl Texts {
    /// In-memory only; choices are lost on restart.
    pub fn new(default: Lang) -> Self {
        Self {
            default,
            chats: Mutex::new(HashMap::new()),
            store: None,
            write: Mutex::new(()),
        }
    }

    /// Load saved choices from `path` and keep persisting there.
    pub fn load(path: impl Into<PathBuf>, default: Lang) -> Result<Self> {
        let path = path.into();
        let saved: BTreeMap<i64, Lang> = read_json_or_default(&path)?;
        let chats = saved.into_iter().map(|(id, lang)| (ChatId(id), lang)).collect();
        Ok(Self {
            default,
            chats: Mutex::new(chats),
            store: Some(path),
            write: Mutex::new(()),
        })
    }

    pub fn lang_for(&self, chat_id: ChatId) -> Lang {
        lock(&self.chats).get(&chat_id).copied().unwrap_or(self.default)
    }

    pub fn set_lang(&self, chat_id: ChatId, lang: Lang) -> Result<()> {
        lock(&self.chats).insert(chat_id, lang);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.store else {
            return Ok(());
        };
        let _write = lock(&self.write);
        let snapshot: BTreeMap<i64, Lang> = lock(&self.chats)
            .iter()
            .map(|(id, lang)| (id.0, *lang))
            .collect();
        write_json_snapshot(path, &snapshot)
    }

    pub fn get(&self, chat_id: ChatId, msg: Msg) -> &'static str {
        template(self.lang_for(chat_id), msg)
    }

    /// `msg` with `%NAME%` replaced by `name`.
    pub fn named(&self, chat_id: ChatId, msg: Msg, name: &str) -> String {
        self.get(chat_id, msg).replace("%NAME%", name)
    }

    /// One button per language, carrying its code as callback data.
    pub fn language_keyboard() -> InlineKeyboard {
        InlineKeyboard::from_pairs(Lang::ALL.iter().map(|l| (l.native_name(), l.code())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_message_has_a_text_in_every_language() {
        let all = [
            Msg::KickQuestion,
            Msg::KickYes,
            Msg::KickNo,
            Msg::KickResult,
            Msg::DescribeProblem,
            Msg::ContactInfo,
            Msg::ReportSent,
            Msg::LangChoose,
            Msg::LangChanged,
        ];
        for lang in Lang::ALL {
            for msg in all {
                assert!(!template(lang, msg).is_empty());
            }
            assert!(template(lang, Msg::KickQuestion).contains("%NAME%"));
            assert!(template(lang, Msg::KickResult).contains("%NAME%"));
        }
    }

    #[test]
    fn chats_fall_back_to_the_default_language() {
        let texts = Texts::new(Lang::En);
        texts.set_lang(ChatId(-2), Lang::Ru).unwrap();
        assert_eq!(texts.lang_for(ChatId(-1)), Lang::En);
        assert_eq!(texts.named(ChatId(-2), Msg::KickQuestion, "Bob"), "Исключить Bob из чата?");
        assert_eq!(texts.named(ChatId(-1), Msg::KickQuestion, "Bob"), "Kick Bob from this chat?");
    }

    #[test]
    fn language_codes_parse_case_insensitively() {
        assert_eq!("RU".parse::<Lang>().unwrap(), Lang::Ru);
        assert_eq!(" en ".parse::<Lang>().unwrap(), Lang::En);
        assert!("de".parse::<Lang>().is_err());
    }

    #[test]
    fn choices_survive_a_reload() {
        let dir = std::env::temp_dir().join(format!("demobot-langs-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("langs.json");

        let texts = Texts::load(&path, Lang::En).unwrap();
        texts.set_lang(ChatId(-100), Lang::Ru).unwrap();

        let again = Texts::load(&path, Lang::En).unwrap();
        assert_eq!(again.lang_for(ChatId(-100)), Lang::Ru);
        assert_eq!(again.lang_for(ChatId(-101)), Lang::En);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn concurrent_choices_are_all_saved() {
        let dir = std::env::temp_dir().join(format!("demobot-langs-mt-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("langs.json");

        let texts = std::sync::Arc::new(Texts::load(&path, Lang::En).unwrap());
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let texts = texts.clone();
                std::thread::spawn(move || texts.set_lang(ChatId(i), Lang::Ru).unwrap())
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        let again = Texts::load(&path, Lang::En).unwrap();
        for i in 0..8 {
            assert_eq!(again.lang_for(ChatId(i)), Lang::Ru, "chat {i}");
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn keyboard_lists_every_language() {
        let kb = Texts::language_keyboard();
        let data: Vec<_> = kb.buttons.iter().map(|b| b.callback_data.as_str()).collect();
        assert_eq!(data, vec!["en", "ru"]);
    }
}
