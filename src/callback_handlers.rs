use super::*;
use crate::pagination::{navigation_keyboard, render_page, NavReply, Navigation};

const EXPIRED_NOTICE: &str = "This listing has expired. Run /uploads again.";
const NOT_OWNER_NOTICE: &str = "Only the person who ran /uploads can page through this listing.";

pub(super) async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> Result<()> {
    let Some(data) = q.data.clone() else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    if data.starts_with("up:") {
        let query_id = q.id.clone();
        if let Err(err) = handle_upload_nav_callback(&bot, q, &state).await {
            error!("upload navigation failed: {:#}", err);
            relay_alert(&state, &format!("upload navigation failed: {:#}", err)).await;
            let _ = bot
                .answer_callback_query(query_id)
                .text("Something went wrong.")
                .await;
        }
    } else {
        bot.answer_callback_query(q.id).await?;
    }
    Ok(())
}

pub(super) fn parse_nav_data(data: &str) -> Option<(&str, Navigation)> {
    let mut parts = data.split(':');
    if parts.next()? != "up" {
        return None;
    }
    let session_id = parts.next().filter(|id| !id.is_empty())?;
    let nav = Navigation::parse(parts.next()?)?;
    Some((session_id, nav))
}

async fn handle_upload_nav_callback(bot: &Bot, q: CallbackQuery, state: &Arc<AppState>) -> Result<()> {
    let data = q.data.as_deref().unwrap_or_default();
    let Some((session_id, nav)) = parse_nav_data(data) else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    let reply = state
        .sessions
        .lock()
        .await
        .navigate(session_id, q.from.id.0, nav, now_ts());

    match reply {
        NavReply::Unknown => {
            bot.answer_callback_query(q.id).text(EXPIRED_NOTICE).await?;
        }
        NavReply::NotOwner => {
            bot.answer_callback_query(q.id)
                .text(NOT_OWNER_NOTICE)
                .show_alert(true)
                .await?;
        }
        NavReply::Unchanged => {
            bot.answer_callback_query(q.id).await?;
        }
        NavReply::Expired(session) => {
            strip_controls(bot, &session).await;
            bot.answer_callback_query(q.id).text(EXPIRED_NOTICE).await?;
        }
        NavReply::Moved(session) => {
            let answer = bot.answer_callback_query(q.id).await;
            if let Some(message_id) = session.message_id {
                let text = render_page(&session, state.client.base_url(), chrono::Utc::now());
                let edit = bot
                    .edit_message_text(ChatId(session.chat_id), message_id, text)
                    .reply_markup(navigation_keyboard(&session.id))
                    .disable_web_page_preview(true)
                    .await;
                if let Err(err) = edit {
                    if !is_message_not_modified_error(&err) {
                        return Err(err.into());
                    }
                }
            }
            answer?;
        }
    }
    Ok(())
}
