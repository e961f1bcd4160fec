use super::*;
use crate::pagination::{absolute_url, format_size, navigation_keyboard, render_page};
use crate::remote::{ListQuery, Quota, ServiceStats, UploadResponse};
use crate::stores::{SettingsField, UserSettings};

const HELP_TEXT: &str = "Link your file host account with /token <token> (private chat only).\n\
/uploads [filter] - browse your uploads\n\
/upload - send a file with this as its caption (or just send the file in a private chat)\n\
/settings - show upload settings\n\
/settings expiry <value> - e.g. 7d, or leave empty to unset\n\
/settings compression <value> - image compression percent\n\
/settings clear - reset upload settings\n\
/profile - show your account\n\
/stats - bot and service statistics\n\
/logout - forget your token";

#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum SettingsAction {
    Show,
    Set(SettingsField, Option<String>),
    Clear,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum Command {
    Help,
    SetToken(String),
    Logout,
    Settings(SettingsAction),
    Uploads { filter: Option<String> },
    Upload,
    Profile,
    Stats,
    Unknown(String),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::SetToken(_) => "token",
            Command::Logout => "logout",
            Command::Settings(_) => "settings",
            Command::Uploads { .. } => "uploads",
            Command::Upload => "upload",
            Command::Profile => "profile",
            Command::Stats => "stats",
            Command::Unknown(_) => "unknown",
        }
    }
}

// Commands addressed to another bot (`/cmd@otherbot`) are not ours.
pub(super) fn parse_command(text: &str, bot_username: &str) -> Option<Command> {
    let trimmed = text.trim();
    let first = trimmed.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    let name = first.trim_start_matches('/');
    let name = match name.split_once('@') {
        Some((name, mention)) => {
            if !bot_username.is_empty() && !mention.eq_ignore_ascii_case(bot_username) {
                return None;
            }
            name
        }
        None => name,
    };
    let name = name.to_ascii_lowercase();
    let rest = trimmed[first.len()..].trim();
    let command = match name.as_str() {
        "start" | "help" => Command::Help,
        "token" => Command::SetToken(rest.to_string()),
        "logout" => Command::Logout,
        "settings" => match parse_settings_action(rest) {
            Some(action) => Command::Settings(action),
            None => Command::Unknown(format!("settings {}", rest)),
        },
        "uploads" | "list" => Command::Uploads {
            filter: Some(rest).filter(|r| !r.is_empty()).map(|r| r.to_string()),
        },
        "upload" => Command::Upload,
        "profile" | "me" => Command::Profile,
        "stats" => Command::Stats,
        _ => Command::Unknown(name),
    };
    Some(command)
}

fn parse_settings_action(rest: &str) -> Option<SettingsAction> {
    let mut parts = rest.splitn(2, char::is_whitespace);
    let sub = parts.next().unwrap_or("").to_ascii_lowercase();
    let value = parts
        .next()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string());
    match sub.as_str() {
        "" | "show" => Some(SettingsAction::Show),
        "expiry" => Some(SettingsAction::Set(SettingsField::Expiry, value)),
        "compression" => Some(SettingsAction::Set(SettingsField::Compression, value)),
        "clear" | "reset" => Some(SettingsAction::Clear),
        _ => None,
    }
}

pub(super) async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    let user_id = match msg.from() {
        Some(user) => user.id.0,
        None => return Ok(()),
    };

    let text = msg.text().or_else(|| msg.caption()).unwrap_or("");
    let command = match parse_command(text, &state.bot_username) {
        Some(command) => command,
        None if implicit_upload(msg.chat.is_private(), attachment_of(&msg).is_some()) => {
            Command::Upload
        }
        None => return Ok(()),
    };

    let action = command.name();
    if let Err(err) = dispatch_command(&bot, &msg, &state, user_id, command).await {
        report_failure(&bot, msg.chat.id, &state, action, err).await?;
    }
    Ok(())
}

// Groups only upload on an explicit /upload caption.
pub(super) fn implicit_upload(is_private: bool, has_attachment: bool) -> bool {
    is_private && has_attachment
}

async fn dispatch_command(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    user_id: u64,
    command: Command,
) -> Result<()> {
    match command {
        Command::Help => {
            bot.send_message(msg.chat.id, HELP_TEXT).await?;
            Ok(())
        }
        Command::SetToken(token) => handle_token_command(bot, msg, state, user_id, &token).await,
        Command::Logout => handle_logout_command(bot, msg, state, user_id).await,
        Command::Settings(action) => handle_settings_command(bot, msg, state, user_id, action).await,
        Command::Uploads { filter } => {
            handle_uploads_command(bot, msg, state, user_id, filter.as_deref()).await
        }
        Command::Upload => handle_upload_command(bot, msg, state, user_id).await,
        Command::Profile => handle_profile_command(bot, msg, state, user_id).await,
        Command::Stats => handle_stats_command(bot, msg, state).await,
        Command::Unknown(name) => {
            send_error(
                bot,
                msg.chat.id,
                &format!("Unknown command /{}. Send /help for usage.", name.trim()),
            )
            .await
        }
    }
}

async fn handle_token_command(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    user_id: u64,
    token: &str,
) -> Result<()> {
    // The token must not linger in the chat history.
    let removed = match bot.delete_message(msg.chat.id, msg.id).await {
        Ok(_) => true,
        Err(err) => {
            warn!("could not delete /token message in chat {}: {}", msg.chat.id.0, err);
            false
        }
    };

    if !msg.chat.is_private() {
        return Err(BotError::validation(group_token_notice(removed)).into());
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(BotError::validation("Usage: /token <your API token>").into());
    }

    state.credentials.set(user_id, token).await?;
    info!("linked token for user {}", user_id);
    bot.send_message(
        msg.chat.id,
        format!("Token {} linked. Try /uploads or send a file.", mask_token(token)),
    )
    .await?;
    Ok(())
}

pub(super) fn group_token_notice(removed: bool) -> &'static str {
    if removed {
        "Tokens can only be linked in a private chat with the bot. Your message was removed."
    } else {
        "Tokens can only be linked in a private chat with the bot. Your message could not be \
         removed, so revoke that token on the file host and link a new one in private."
    }
}

async fn handle_logout_command(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    user_id: u64,
) -> Result<()> {
    let removed = state.credentials.delete(user_id).await?;
    let reply = if removed {
        info!("removed token for user {}", user_id);
        "Token removed."
    } else {
        "No token was linked."
    };
    send_ephemeral(bot, msg.chat.id, reply, ACK_TTL_SECS).await
}

async fn handle_settings_command(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    user_id: u64,
    action: SettingsAction,
) -> Result<()> {
    let settings = match action {
        SettingsAction::Show => state.settings.get(user_id).await,
        SettingsAction::Set(field, value) => {
            state
                .settings
                .update(user_id, field, value.as_deref())
                .await?
        }
        SettingsAction::Clear => {
            state.settings.clear(user_id).await?;
            UserSettings::default()
        }
    };
    bot.send_message(msg.chat.id, format_settings(&settings))
        .await?;
    Ok(())
}

pub(super) fn format_settings(settings: &UserSettings) -> String {
    format!(
        "Upload settings\nExpiry: {}\nCompression: {}",
        settings.expiry.as_deref().unwrap_or("not set"),
        settings.compression.as_deref().unwrap_or("not set"),
    )
}

async fn handle_uploads_command(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    user_id: u64,
    filter: Option<&str>,
) -> Result<()> {
    let token = require_token(state, user_id).await?;
    let query = ListQuery::with_filter(filter);
    let items = state.client.fetch_all(&token, &query).await?;

    let session_id = short_id();
    let Some(mut session) = PaginationSession::new(
        session_id.clone(),
        user_id,
        msg.chat.id.0,
        items,
        now_ts(),
        state.config.session_timeout_secs,
    ) else {
        bot.send_message(msg.chat.id, "You have no uploads yet.").await?;
        return Ok(());
    };

    let text = render_page(&session, state.client.base_url(), chrono::Utc::now());
    let sent = bot
        .send_message(msg.chat.id, text)
        .reply_markup(navigation_keyboard(&session_id))
        .disable_web_page_preview(true)
        .await?;
    session.message_id = Some(sent.id);
    log::debug!(
        "listing {} for user {}: {} pages, open until {}",
        session.id,
        user_id,
        session.total_pages(),
        session.expires_at()
    );
    state.sessions.lock().await.insert(session);
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct Attachment {
    pub(super) file_id: String,
    pub(super) filename: String,
}

pub(super) fn attachment_of(msg: &Message) -> Option<Attachment> {
    if let Some(document) = msg.document() {
        let fallback = format!("file-{}", short_id());
        return Some(Attachment {
            file_id: document.file.id.clone(),
            filename: sanitize_filename(document.file_name.as_deref().unwrap_or(""), &fallback),
        });
    }
    if let Some(video) = msg.video() {
        let fallback = format!("video-{}.mp4", short_id());
        return Some(Attachment {
            file_id: video.file.id.clone(),
            filename: sanitize_filename(video.file_name.as_deref().unwrap_or(""), &fallback),
        });
    }
    if let Some(audio) = msg.audio() {
        let fallback = format!("audio-{}.mp3", short_id());
        return Some(Attachment {
            file_id: audio.file.id.clone(),
            filename: sanitize_filename(audio.file_name.as_deref().unwrap_or(""), &fallback),
        });
    }
    if let Some(photos) = msg.photo() {
        let photo = photos
            .iter()
            .max_by_key(|photo| u64::from(photo.width) * u64::from(photo.height))?;
        return Some(Attachment {
            file_id: photo.file.id.clone(),
            filename: format!("photo-{}.jpg", short_id()),
        });
    }
    None
}

async fn handle_upload_command(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    user_id: u64,
) -> Result<()> {
    let token = require_token(state, user_id).await?;
    let Some(attachment) = attachment_of(msg) else {
        return Err(BotError::validation(
            "Attach a document, photo, video or audio file and use /upload as its caption.",
        )
        .into());
    };

    let file = bot.get_file(attachment.file_id.as_str()).await?;
    let source_url = telegram_file_url(bot.api_url().as_str(), bot.token(), &file.path);
    let settings = state.settings.get(user_id).await;

    let progress = bot
        .send_message(msg.chat.id, format!("Uploading {}...", attachment.filename))
        .await?;
    let result = state
        .client
        .upload_from_remote_source(&token, &source_url, &attachment.filename, &settings)
        .await;
    let _ = bot.delete_message(msg.chat.id, progress.id).await;
    let response = result?;

    info!("user {} uploaded {}", user_id, attachment.filename);
    bot.send_message(
        msg.chat.id,
        format_upload_result(&response, state.client.base_url()),
    )
    .disable_web_page_preview(true)
    .await?;
    Ok(())
}

pub(super) fn format_upload_result(response: &UploadResponse, base_url: &str) -> String {
    if response.files.is_empty() {
        return "Upload finished, but the host returned no links.".to_string();
    }
    let mut text = String::from("Uploaded:");
    for file in &response.files {
        text.push('\n');
        text.push_str(&absolute_url(file.url.as_deref(), file.id.as_deref(), base_url));
    }
    if let Some(deletes_at) = response.deletes_at.as_deref() {
        text.push_str(&format!("\nExpires: {}", deletes_at));
    }
    text
}

async fn handle_profile_command(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    user_id: u64,
) -> Result<()> {
    let token = require_token(state, user_id).await?;
    let profile = state.client.get_user_profile(&token).await?;
    let text = format!(
        "Username: {}\nRole: {}\nQuota: {}",
        profile.username,
        profile.role.as_deref().unwrap_or("unknown"),
        format_quota(profile.quota.as_ref()),
    );
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub(super) fn format_quota(quota: Option<&Quota>) -> String {
    match quota {
        None => "not reported".to_string(),
        Some(Quota { used, max: None }) => format!("{} used, unlimited", used.unwrap_or(0)),
        Some(Quota { used, max: Some(max) }) => format!("{} / {}", used.unwrap_or(0), max),
    }
}

async fn handle_stats_command(bot: &Bot, msg: &Message, state: &Arc<AppState>) -> Result<()> {
    let uptime = format_uptime(now_ts().saturating_sub(state.started_at));
    let active_sessions = state.sessions.lock().await.len();
    let service = render_stats(state.client.get_service_stats().await);
    let text = format!(
        "Bot uptime: {}\nActive listings: {}\n\n{}",
        uptime, active_sessions, service
    );
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub(super) fn render_stats(stats: Result<ServiceStats, BotError>) -> String {
    match stats {
        Ok(stats) => format_service_stats(&stats),
        Err(err) => {
            warn!("service stats unavailable: {}", err);
            "Service stats unavailable.".to_string()
        }
    }
}

pub(super) fn format_service_stats(stats: &ServiceStats) -> String {
    let count = |value: Option<u64>| value.map_or_else(|| "unknown".to_string(), |v| v.to_string());
    format!(
        "Service stats\nUsers: {}\nFiles: {}\nStorage: {}",
        count(stats.users),
        count(stats.files),
        format_size(stats.size),
    )
}
