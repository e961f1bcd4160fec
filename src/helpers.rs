use super::*;
use std::fs;
use std::io::Write;

pub(super) fn load_config(path: &Path) -> Result<Config> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let config_file: ConfigFile = toml::from_str(&contents).context("parse config")?;
    let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
    resolve_config(config_file, config_dir)
}

pub(super) fn resolve_config(config_file: ConfigFile, config_dir: &Path) -> Result<Config> {
    let token = match (config_file.token, config_file.token_file) {
        (Some(token), _) if !token.trim().is_empty() => token.trim().to_string(),
        (_, Some(file)) => read_token_file(&resolve_config_path(&file, config_dir))?,
        _ => return Err(anyhow!("config needs either token or token_file")),
    };
    let base_url = config_file.base_url.trim().trim_end_matches('/').to_string();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(anyhow!("base_url must be an http(s) URL: {}", base_url));
    }
    let data_dir = resolve_config_path(&config_file.data_dir, config_dir);
    let staging_dir = config_file
        .staging_dir
        .map(|dir| resolve_config_path(&dir, config_dir))
        .unwrap_or_else(|| data_dir.join("staging"));
    let alert_webhook = config_file
        .alert_webhook
        .map(|hook| hook.trim().to_string())
        .filter(|hook| !hook.is_empty());
    Ok(Config {
        token,
        base_url,
        data_dir,
        staging_dir,
        alert_webhook,
        session_timeout_secs: config_file
            .session_timeout_secs
            .unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS),
        http_timeout_secs: config_file
            .http_timeout_secs
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
    })
}

pub(super) fn resolve_config_path(path: &Path, config_dir: &Path) -> PathBuf {
    if path.is_relative() {
        config_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

pub(super) fn read_token_file(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read token file {}", path.display()))?;
    let token = contents.trim().to_string();
    if token.is_empty() {
        return Err(anyhow!("token file is empty: {}", path.display()));
    }
    Ok(token)
}

pub(super) fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("no parent dir for {}", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(data).context("write temp file")?;
    tmp.flush().context("flush temp file")?;
    tmp.as_file_mut().sync_all().context("sync temp file")?;
    tmp.persist(path)
        .map_err(|e| anyhow!("persist temp file: {}", e))?;
    Ok(())
}

pub(super) fn mask_token(token: &str) -> String {
    if token.chars().count() <= 8 {
        return "…".to_string();
    }
    let visible: String = token.chars().take(4).collect();
    format!("{}…", visible)
}

pub(super) fn telegram_file_url(api_url: &str, bot_token: &str, file_path: &str) -> String {
    format!(
        "{}/file/bot{}/{}",
        api_url.trim_end_matches('/'),
        bot_token,
        file_path.trim_start_matches('/')
    )
}

pub(super) fn sanitize_filename(input: &str, fallback: &str) -> String {
    let cleaned: String = input
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim().to_string();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

pub(super) async fn send_ephemeral(bot: &Bot, chat_id: ChatId, text: &str, ttl_secs: u64) -> Result<()> {
    let sent = bot.send_message(chat_id, text).await?;
    let bot = bot.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(ttl_secs)).await;
        let _ = bot.delete_message(chat_id, sent.id).await;
    });
    Ok(())
}

pub(super) async fn send_error(bot: &Bot, chat_id: ChatId, text: &str) -> Result<()> {
    bot.send_message(chat_id, text).await?;
    Ok(())
}

pub(super) async fn relay_alert(state: &AppState, text: &str) {
    let Some(webhook) = state.config.alert_webhook.as_deref() else {
        return;
    };
    let payload = serde_json::json!({ "content": truncate_chars(text, 1900) });
    match state.alert_http.post(webhook).json(&payload).send().await {
        Ok(response) if !response.status().is_success() => {
            warn!("alert webhook responded with {}", response.status());
        }
        Ok(_) => {}
        Err(err) => warn!("alert webhook failed: {}", err.without_url()),
    }
}

pub(super) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

pub(super) async fn report_failure(
    bot: &Bot,
    chat_id: ChatId,
    state: &AppState,
    action: &str,
    err: anyhow::Error,
) -> Result<()> {
    if let Some(message) = err.downcast_ref::<BotError>().and_then(BotError::user_message) {
        send_error(bot, chat_id, message).await?;
        return Ok(());
    }
    error!("{} failed: {:#}", action, err);
    relay_alert(state, &format!("{} failed: {:#}", action, err)).await;
    send_error(bot, chat_id, GENERIC_FAILURE).await
}

pub(super) async fn require_token(state: &AppState, user_id: u64) -> Result<String> {
    match state.credentials.get(user_id).await {
        Some(token) => Ok(token),
        None => Err(BotError::validation(
            "No API token linked yet. Send /token <your token> first.",
        )
        .into()),
    }
}

pub(super) fn is_message_not_modified_error(err: &teloxide::RequestError) -> bool {
    err.to_string()
        .to_ascii_lowercase()
        .contains("message is not modified")
}

pub(super) async fn strip_controls(bot: &Bot, session: &PaginationSession) {
    let Some(message_id) = session.message_id else {
        return;
    };
    if let Err(err) = bot
        .edit_message_reply_markup(ChatId(session.chat_id), message_id)
        .await
    {
        if !is_message_not_modified_error(&err) {
            warn!("failed to strip controls from session {}: {}", session.id, err);
        }
    }
}

pub(super) fn start_session_sweeper(bot: Bot, state: Arc<AppState>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            let expired = state.sessions.lock().await.take_expired(now_ts());
            for session in expired {
                log::debug!("session {} expired", session.id);
                strip_controls(&bot, &session).await;
            }
        }
    });
}

pub(super) fn short_id() -> String {
    let id = Uuid::new_v4().to_string();
    id.split('-').next().unwrap_or(&id).to_string()
}

pub(super) fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

pub(super) fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
