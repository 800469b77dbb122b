use std::sync::Arc;

use demobot_core::{
    domain::{ChatId, UserId},
    i18n::{Lang, Msg, Texts},
    reports::BugReport,
    utils::lock,
    Result,
};

use crate::router::AppState;

// ============== /report ==============

/// Ask for a description and a contact, then file the report.
pub async fn report(state: Arc<AppState>, chat_id: ChatId, user_id: UserId) {
    tracing::info!(chat_id = chat_id.0, user_id = user_id.0, "report conversation started");
    match report_conversation(&state, chat_id, user_id).await {
        Ok(()) => tracing::info!(chat_id = chat_id.0, "bug report filed"),
        Err(e) => tracing::warn!(chat_id = chat_id.0, "report conversation failed: {e}"),
    }
}

async fn report_conversation(state: &AppState, chat_id: ChatId, user_id: UserId) -> Result<()> {
    let dispatcher = &state.dispatcher;
    let texts = &state.texts;

    dispatcher
        .send_message(chat_id, texts.get(chat_id, Msg::DescribeProblem))
        .await?;
    let description = dispatcher.wait_for_reply(chat_id, user_id).await?;

    dispatcher
        .send_message(chat_id, texts.get(chat_id, Msg::ContactInfo))
        .await?;
    let contact = dispatcher.wait_for_reply(chat_id, user_id).await?;

    state
        .reports
        .file(&BugReport::new(chat_id, user_id, description, contact))
        .await?;
    dispatcher
        .send_message(chat_id, texts.get(chat_id, Msg::ReportSent))
        .await?;
    Ok(())
}

// ============== /lang ==============

/// Offer the available languages as inline buttons.
pub async fn choose_lang(state: Arc<AppState>, chat_id: ChatId, _user_id: UserId) {
    let on_choice = {
        let state = state.clone();
        move |chat_id: ChatId, code: String| apply_lang(state.clone(), chat_id, code)
    };
    let sent = state
        .dispatcher
        .send_inline_message(
            chat_id,
            state.texts.get(chat_id, Msg::LangChoose),
            Texts::language_keyboard(),
            on_choice,
            None,
        )
        .await;
    let sent = match sent {
        Ok(sent) => sent,
        Err(e) => {
            tracing::warn!(chat_id = chat_id.0, "language chooser failed: {e}");
            return;
        }
    };

    let older = lock(&state.lang_choosers).insert(chat_id, sent.message_id);
    if let Some(older) = older {
        state.dispatcher.remove_inline_listener(chat_id, older);
    }
}

/// Stop listening to the chat's open chooser, if any.
fn retire_chooser(state: &AppState, chat_id: ChatId) {
    let open = lock(&state.lang_choosers).remove(&chat_id);
    if let Some(message_id) = open {
        state.dispatcher.remove_inline_listener(chat_id, message_id);
    }
}

async fn apply_lang(state: Arc<AppState>, chat_id: ChatId, code: String) {
    let lang: Lang = match code.parse() {
        Ok(lang) => lang,
        Err(e) => {
            tracing::warn!(chat_id = chat_id.0, "ignoring language button: {e}");
            return;
        }
    };
    retire_chooser(&state, chat_id);
    if let Err(e) = state.texts.set_lang(chat_id, lang) {
        tracing::error!(chat_id = chat_id.0, "failed to save language choice: {e}");
    }
    tracing::info!(chat_id = chat_id.0, lang = lang.code(), "chat language changed");
    if let Err(e) = state
        .dispatcher
        .send_message(chat_id, state.texts.get(chat_id, Msg::LangChanged))
        .await
    {
        tracing::warn!(chat_id = chat_id.0, "language confirmation failed: {e}");
    }
}
