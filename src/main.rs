use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use serde::Deserialize;
use teloxide::prelude::*;
use teloxide::types::Message;
use tokio::sync::Mutex;
use uuid::Uuid;

mod callback_handlers;
mod error;
mod helpers;
mod message_handlers;
mod pagination;
mod remote;
mod stores;

use callback_handlers::handle_callback;
use error::BotError;
use helpers::*;
use message_handlers::handle_message;
use pagination::{PaginationSession, SessionRegistry};
use remote::FileHostClient;
use stores::{CredentialStore, SettingsStore};

const ACK_TTL_SECS: u64 = 5;
const SWEEP_INTERVAL_SECS: u64 = 5;
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const GENERIC_FAILURE: &str = "Something went wrong while talking to the file host. Please try again later.";

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    token_file: Option<PathBuf>,
    base_url: String,
    data_dir: PathBuf,
    #[serde(default)]
    staging_dir: Option<PathBuf>,
    #[serde(default)]
    alert_webhook: Option<String>,
    #[serde(default)]
    session_timeout_secs: Option<u64>,
    #[serde(default)]
    http_timeout_secs: Option<u64>,
}

#[derive(Clone)]
struct Config {
    token: String,
    base_url: String,
    data_dir: PathBuf,
    staging_dir: PathBuf,
    alert_webhook: Option<String>,
    session_timeout_secs: u64,
    http_timeout_secs: u64,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    config: PathBuf,
}

struct AppState {
    config: Config,
    credentials: CredentialStore,
    settings: SettingsStore,
    client: FileHostClient,
    alert_http: reqwest::Client,
    sessions: Mutex<SessionRegistry>,
    bot_username: String,
    started_at: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    std::fs::create_dir_all(&config.data_dir).context("create data_dir")?;

    let credentials = CredentialStore::open(&config.data_dir.join("credentials.json"))?;
    let settings = SettingsStore::open(&config.data_dir.join("settings.json"))?;
    let client = FileHostClient::new(
        &config.base_url,
        config.staging_dir.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )
    .context("build file host client")?;

    let bot = Bot::new(config.token.clone());
    let me = bot.get_me().await.context("fetch bot identity")?;
    let bot_username = me.user.username.clone().unwrap_or_default();

    let state = Arc::new(AppState {
        config: config.clone(),
        credentials,
        settings,
        client,
        alert_http: reqwest::Client::new(),
        sessions: Mutex::new(SessionRegistry::default()),
        bot_username: bot_username.clone(),
        started_at: now_ts(),
    });

    start_session_sweeper(bot.clone(), state.clone(), SWEEP_INTERVAL_SECS);
    info!("starting @{} against {}", bot_username, config.base_url);

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
