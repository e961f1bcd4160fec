use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Deserializer};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::BotError;
use crate::stores::UserSettings;

pub(super) const EXPIRY_HEADER: &str = "x-zipline-deletes-at";
pub(super) const COMPRESSION_HEADER: &str = "x-zipline-image-compression-percent";
const FETCH_PAGE_SIZE: u32 = 50;
pub(super) const MAX_FETCH_PAGES: u32 = 1000;

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(super) struct UploadRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub(super) id: Option<String>,
    #[serde(default)]
    pub(super) original_name: Option<String>,
    #[serde(default)]
    pub(super) name: Option<String>,
    #[serde(default)]
    pub(super) url: Option<String>,
    #[serde(default)]
    pub(super) size: Option<u64>,
    #[serde(default)]
    pub(super) created_at: Option<String>,
}

impl UploadRecord {
    pub(super) fn display_name(&self) -> &str {
        self.original_name
            .as_deref()
            .or(self.name.as_deref())
            .or(self.id.as_deref())
            .unwrap_or("unnamed")
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(super) struct Page {
    pub(super) items: Vec<UploadRecord>,
    pub(super) current_page: u32,
    pub(super) total_pages: Option<u32>,
}

#[derive(Deserialize)]
struct FilesResponse {
    #[serde(default, alias = "files")]
    page: Vec<UploadRecord>,
    #[serde(default, alias = "totalPages")]
    pages: Option<u32>,
    #[serde(default, alias = "currentPage")]
    current: Option<u32>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub(super) struct Quota {
    #[serde(default)]
    pub(super) used: Option<u64>,
    #[serde(default)]
    pub(super) max: Option<u64>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub(super) struct UserProfile {
    pub(super) username: String,
    #[serde(default)]
    pub(super) role: Option<String>,
    #[serde(default)]
    pub(super) quota: Option<Quota>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileResponse {
    Wrapped { user: UserProfile },
    Bare(UserProfile),
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub(super) struct ServiceStats {
    #[serde(default, alias = "usersCount")]
    pub(super) users: Option<u64>,
    #[serde(default, alias = "filesUploaded")]
    pub(super) files: Option<u64>,
    #[serde(default, alias = "storageUsed")]
    pub(super) size: Option<u64>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub(super) struct UploadedFile {
    #[serde(default, deserialize_with = "string_or_number")]
    pub(super) id: Option<String>,
    #[serde(default)]
    pub(super) url: Option<String>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(super) struct UploadResponse {
    #[serde(default)]
    pub(super) files: Vec<UploadedFile>,
    #[serde(default)]
    pub(super) deletes_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct ListQuery {
    pub(super) sort_by: String,
    pub(super) order: String,
    pub(super) filter: String,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            sort_by: "createdAt".to_string(),
            order: "desc".to_string(),
            filter: "all".to_string(),
        }
    }
}

impl ListQuery {
    pub(super) fn with_filter(filter: Option<&str>) -> Self {
        let mut query = ListQuery::default();
        if let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) {
            query.filter = filter.to_string();
        }
        query
    }
}

pub(super) trait PageSource {
    async fn page(&self, number: u32) -> Result<Page, BotError>;
}

/// Walks pages from 1 until an empty page or the reported last page.
///
/// An empty page always ends the walk, whatever the host claims the total is.
pub(super) async fn fetch_all_pages<S: PageSource>(source: &S) -> Result<Vec<UploadRecord>, BotError> {
    let mut items = Vec::new();
    let mut number = 1;
    loop {
        let page = source.page(number).await?;
        if page.items.is_empty() {
            if let Some(total) = page.total_pages {
                if page.current_page < total {
                    warn!(
                        "listing page {} was empty but host reported {} pages",
                        page.current_page, total
                    );
                }
            }
            break;
        }
        items.extend(page.items);
        if page.total_pages.is_some_and(|total| page.current_page >= total) {
            break;
        }
        if number >= MAX_FETCH_PAGES {
            warn!("stopping listing after {} pages", number);
            break;
        }
        number += 1;
    }
    Ok(items)
}

pub(super) struct FileHostClient {
    http: Client,
    base_url: String,
    staging_dir: PathBuf,
}

struct Listing<'a> {
    client: &'a FileHostClient,
    token: &'a str,
    query: &'a ListQuery,
}

impl PageSource for Listing<'_> {
    async fn page(&self, number: u32) -> Result<Page, BotError> {
        self.client
            .fetch_page(self.token, number, FETCH_PAGE_SIZE, self.query)
            .await
    }
}

impl FileHostClient {
    pub(super) fn new(base_url: &str, staging_dir: PathBuf, timeout: Duration) -> Result<Self, BotError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(FileHostClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            staging_dir,
        })
    }

    pub(super) fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(super) async fn fetch_page(
        &self,
        token: &str,
        page: u32,
        per_page: u32,
        query: &ListQuery,
    ) -> Result<Page, BotError> {
        let page_param = page.to_string();
        let per_page_param = per_page.to_string();
        let response = self
            .http
            .get(self.endpoint("/api/user/files"))
            .header(AUTHORIZATION, token)
            .query(&[
                ("page", page_param.as_str()),
                ("perpage", per_page_param.as_str()),
                ("sortBy", query.sort_by.as_str()),
                ("order", query.order.as_str()),
                ("filter", query.filter.as_str()),
            ])
            .send()
            .await?;
        let body: FilesResponse = decode(ensure_success(response).await?).await?;
        Ok(Page {
            items: body.page,
            current_page: body.current.unwrap_or(page),
            total_pages: body.pages,
        })
    }

    pub(super) async fn fetch_all(&self, token: &str, query: &ListQuery) -> Result<Vec<UploadRecord>, BotError> {
        let listing = Listing {
            client: self,
            token,
            query,
        };
        fetch_all_pages(&listing).await
    }

    /// Relays `source_url` to the host through a staging file that is removed
    /// before this returns, whichever way it returns.
    pub(super) async fn upload_from_remote_source(
        &self,
        token: &str,
        source_url: &str,
        filename: &str,
        settings: &UserSettings,
    ) -> Result<UploadResponse, BotError> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let staging = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&self.staging_dir)?;
        let size = download_to(&self.http, source_url, staging.path()).await?;
        debug!("staged {} bytes for {}", size, filename);
        let result = self
            .upload_staged(token, staging.path(), filename, size, settings)
            .await;
        if let Err(err) = staging.close() {
            warn!("failed to remove staging file: {}", err);
        }
        result
    }

    async fn upload_staged(
        &self,
        token: &str,
        path: &Path,
        filename: &str,
        size: u64,
        settings: &UserSettings,
    ) -> Result<UploadResponse, BotError> {
        let file = tokio::fs::File::open(path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, size).file_name(filename.to_string());
        let form = Form::new().part("file", part);

        let mut request = self
            .http
            .post(self.endpoint("/api/upload"))
            .header(AUTHORIZATION, token)
            .multipart(form);
        if let Some(expiry) = settings.expiry.as_deref() {
            request = request.header(EXPIRY_HEADER, expiry);
        }
        if let Some(compression) = settings.compression.as_deref() {
            request = request.header(COMPRESSION_HEADER, compression);
        }
        let response = request.send().await?;
        decode(ensure_success(response).await?).await
    }

    pub(super) async fn get_user_profile(&self, token: &str) -> Result<UserProfile, BotError> {
        let response = self
            .http
            .get(self.endpoint("/api/user"))
            .header(AUTHORIZATION, token)
            .send()
            .await?;
        let profile: ProfileResponse = decode(ensure_success(response).await?).await?;
        Ok(match profile {
            ProfileResponse::Wrapped { user } => user,
            ProfileResponse::Bare(user) => user,
        })
    }

    pub(super) async fn get_service_stats(&self) -> Result<ServiceStats, BotError> {
        let response = self.http.get(self.endpoint("/api/stats")).send().await?;
        decode(ensure_success(response).await?).await
    }
}

// Source URLs can embed the bot token, so errors carry no URL.
async fn download_to(http: &Client, source_url: &str, dest: &Path) -> Result<u64, BotError> {
    let response = http
        .get(source_url)
        .send()
        .await
        .map_err(|err| BotError::Transfer(err.without_url().to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(BotError::Transfer(format!("source responded with {}", status)));
    }

    let mut out = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| BotError::Transfer(err.without_url().to_string()))?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

async fn ensure_success(response: Response) -> Result<Response, BotError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BotError::Remote {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, BotError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| BotError::Decode(err.to_string()))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    }))
}
