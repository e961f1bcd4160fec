use std::collections::HashMap;

use chrono::{DateTime, Utc};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId};

use crate::remote::UploadRecord;

pub(super) const PAGE_SIZE: usize = 5;
const NAME_MAX_CHARS: usize = 15;
const MIB: u64 = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Navigation {
    Prev,
    Next,
}

impl Navigation {
    pub(super) fn parse(action: &str) -> Option<Self> {
        match action {
            "prev" => Some(Navigation::Prev),
            "next" => Some(Navigation::Next),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Navigation::Prev => "prev",
            Navigation::Next => "next",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum NavOutcome {
    Moved,
    Unchanged,
    NotOwner,
    Expired,
}

#[derive(Clone, Debug)]
pub(super) struct PaginationSession {
    pub(super) id: String,
    pub(super) owner_id: u64,
    pub(super) chat_id: i64,
    pub(super) message_id: Option<MessageId>,
    items: Vec<UploadRecord>,
    current_page: usize,
    total_pages: usize,
    idle_timeout_secs: u64,
    expires_at: u64,
}

impl PaginationSession {
    pub(super) fn new(
        id: String,
        owner_id: u64,
        chat_id: i64,
        items: Vec<UploadRecord>,
        now: u64,
        idle_timeout_secs: u64,
    ) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        let total_pages = items.len().div_ceil(PAGE_SIZE);
        Some(PaginationSession {
            id,
            owner_id,
            chat_id,
            message_id: None,
            items,
            current_page: 0,
            total_pages,
            idle_timeout_secs,
            expires_at: now + idle_timeout_secs,
        })
    }

    pub(super) fn current_page(&self) -> usize {
        self.current_page
    }

    pub(super) fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub(super) fn total_items(&self) -> usize {
        self.items.len()
    }

    pub(super) fn expires_at(&self) -> u64 {
        self.expires_at
    }

    pub(super) fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub(super) fn page_items(&self) -> &[UploadRecord] {
        let start = self.current_page * PAGE_SIZE;
        let end = (start + PAGE_SIZE).min(self.items.len());
        &self.items[start..end]
    }

    pub(super) fn navigate(&mut self, actor_id: u64, nav: Navigation, now: u64) -> NavOutcome {
        if self.is_expired(now) {
            return NavOutcome::Expired;
        }
        if actor_id != self.owner_id {
            return NavOutcome::NotOwner;
        }
        let moved = match nav {
            Navigation::Prev if self.current_page > 0 => {
                self.current_page -= 1;
                true
            }
            Navigation::Next if self.current_page + 1 < self.total_pages => {
                self.current_page += 1;
                true
            }
            _ => false,
        };
        if moved {
            self.expires_at = now + self.idle_timeout_secs;
            NavOutcome::Moved
        } else {
            NavOutcome::Unchanged
        }
    }
}

#[derive(Debug)]
pub(super) enum NavReply {
    Unknown,
    NotOwner,
    Unchanged,
    Moved(PaginationSession),
    Expired(PaginationSession),
}

#[derive(Debug, Default)]
pub(super) struct SessionRegistry {
    sessions: HashMap<String, PaginationSession>,
}

impl SessionRegistry {
    pub(super) fn insert(&mut self, session: PaginationSession) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub(super) fn len(&self) -> usize {
        self.sessions.len()
    }

    pub(super) fn navigate(&mut self, id: &str, actor_id: u64, nav: Navigation, now: u64) -> NavReply {
        let Some(session) = self.sessions.get_mut(id) else {
            return NavReply::Unknown;
        };
        match session.navigate(actor_id, nav, now) {
            NavOutcome::Moved => NavReply::Moved(session.clone()),
            NavOutcome::Unchanged => NavReply::Unchanged,
            NavOutcome::NotOwner => NavReply::NotOwner,
            NavOutcome::Expired => match self.sessions.remove(id) {
                Some(session) => NavReply::Expired(session),
                None => NavReply::Unknown,
            },
        }
    }

    /// Removes and returns every session past its deadline. A session is
    /// handed out at most once.
    pub(super) fn take_expired(&mut self, now: u64) -> Vec<PaginationSession> {
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .collect()
    }
}

pub(super) fn render_page(session: &PaginationSession, base_url: &str, now: DateTime<Utc>) -> String {
    let mut text = format!("Your uploads ({})\n\n", session.total_items());
    let offset = session.current_page() * PAGE_SIZE;
    for (i, record) in session.page_items().iter().enumerate() {
        text.push_str(&format!(
            "{}. {} | {} | {}\n   {}\n",
            offset + i + 1,
            truncate_name(record.display_name()),
            format_size(record.size),
            record
                .created_at
                .as_deref()
                .map(|ts| relative_time(ts, now))
                .unwrap_or_else(|| "unknown".to_string()),
            resolve_link(record, base_url),
        ));
    }
    text.push_str(&format!(
        "\nPage {} of {}",
        session.current_page() + 1,
        session.total_pages()
    ));
    text
}

pub(super) fn navigation_keyboard(session_id: &str) -> InlineKeyboardMarkup {
    let button = |label: &str, nav: Navigation| {
        InlineKeyboardButton::callback(label, format!("up:{}:{}", session_id, nav.as_str()))
    };
    InlineKeyboardMarkup::new(vec![vec![
        button("Prev", Navigation::Prev),
        button("Next", Navigation::Next),
    ]])
}

pub(super) fn truncate_name(name: &str) -> String {
    if name.chars().count() <= NAME_MAX_CHARS {
        return name.to_string();
    }
    let mut out: String = name.chars().take(NAME_MAX_CHARS - 1).collect();
    out.push('…');
    out
}

pub(super) fn resolve_link(record: &UploadRecord, base_url: &str) -> String {
    absolute_url(record.url.as_deref(), record.id.as_deref(), base_url)
}

pub(super) fn absolute_url(url: Option<&str>, id: Option<&str>, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    match url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => url.to_string(),
        Some(url) => format!("{}/{}", base, url.trim_start_matches('/')),
        None => match id {
            Some(id) => format!("{}/view/{}", base, id),
            None => base.to_string(),
        },
    }
}

pub(super) fn format_size(bytes: Option<u64>) -> String {
    match bytes {
        None | Some(0) => "unknown".to_string(),
        Some(b) if b < MIB => format!("{:.1} KB", b as f64 / 1024.0),
        Some(b) => format!("{:.2} MB", b as f64 / MIB as f64),
    }
}

pub(super) fn relative_time(timestamp: &str, now: DateTime<Utc>) -> String {
    let Ok(created) = DateTime::parse_from_rfc3339(timestamp) else {
        return "unknown".to_string();
    };
    let secs = (now - created.with_timezone(&Utc)).num_seconds();
    if secs < 60 {
        return "just now".to_string();
    }
    let (value, unit) = match secs {
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s if s < 30 * 86_400 => (s / 86_400, "day"),
        s if s < 365 * 86_400 => (s / (30 * 86_400), "month"),
        s => (s / (365 * 86_400), "year"),
    };
    if value == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", value, unit)
    }
}
