use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::config::RegistrySettings;
use crate::domain::{DescriptorId, DescriptorRecord};
use crate::error::SyncError;
use crate::store::write_bytes_atomic;

const PAGE_SIZE: usize = 100;
const TRUNCATED_DESCRIPTION: usize = 40;

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: usize,
    pub no_trunc: bool,
}

pub trait DescriptorRegistry: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<Vec<DescriptorRecord>, SyncError>;

    fn pull(
        &self,
        ids: &[DescriptorId],
        destination: &Utf8Path,
        force: bool,
    ) -> Result<Vec<Utf8PathBuf>, SyncError>;
}

#[derive(Clone)]
pub struct ZenodoHttpClient {
    client: Client,
    base_url: String,
}

impl ZenodoHttpClient {
    pub fn new(settings: &RegistrySettings) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("portal-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::RegistryHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| SyncError::RegistryHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn records_url(&self) -> String {
        format!("{}/api/records/", self.base_url)
    }

    fn record_url(&self, record: u64) -> String {
        format!("{}/api/records/{record}", self.base_url)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, SyncError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "registry request failed".to_string());
        Err(SyncError::RegistryStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, SyncError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        tracing::debug!(status, attempt, "retrying registry request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Self::handle_status(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        tracing::debug!(error = %err, attempt, "retrying registry request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::RegistryHttp(err.to_string()));
                }
            }
        }
    }

    fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value, SyncError> {
        let response = self.send_with_retries(|| self.client.get(url).query(params))?;
        response
            .json()
            .map_err(|err| SyncError::RegistryResponse(err.to_string()))
    }

    fn pull_one(&self, id: &DescriptorId, target: &Utf8Path) -> Result<(), SyncError> {
        let record = id
            .zenodo_record()
            .ok_or_else(|| SyncError::InvalidDescriptorId(id.to_string()))?;
        let metadata = self.get_json(&self.record_url(record), &[])?;
        let file_url = descriptor_file_url(&metadata)
            .ok_or_else(|| SyncError::MissingDescriptorFile(id.to_string()))?;
        let response = self.send_with_retries(|| self.client.get(&file_url))?;
        let bytes = response
            .bytes()
            .map_err(|err| SyncError::RegistryHttp(err.to_string()))?;
        write_bytes_atomic(target, &bytes)
    }
}

impl DescriptorRegistry for ZenodoHttpClient {
    fn search(&self, query: &SearchQuery) -> Result<Vec<DescriptorRecord>, SyncError> {
        let url = self.records_url();
        let size = query.max_results.min(PAGE_SIZE).max(1);
        let mut records = Vec::new();
        let mut page = 1usize;
        while records.len() < query.max_results {
            let params = [
                ("q", search_terms(&query.query)),
                ("file_type", "json".to_string()),
                ("type", "software".to_string()),
                ("page", page.to_string()),
                ("size", size.to_string()),
            ];
            let body = self.get_json(&url, &params)?;
            let hits = records_from_search(&body, query.no_trunc)?;
            let exhausted = hits.len() < size;
            records.extend(hits);
            if exhausted {
                break;
            }
            page += 1;
        }
        records.truncate(query.max_results);
        tracing::info!(count = records.len(), "registry search finished");
        Ok(records)
    }

    fn pull(
        &self,
        ids: &[DescriptorId],
        destination: &Utf8Path,
        force: bool,
    ) -> Result<Vec<Utf8PathBuf>, SyncError> {
        let mut paths = Vec::with_capacity(ids.len());
        for id in ids {
            let target = destination.join(id.file_name());
            if !force && target.as_std_path().exists() {
                tracing::debug!(id = %id, "descriptor already cached");
            } else {
                tracing::debug!(id = %id, "pulling descriptor");
                self.pull_one(id, &target)?;
            }
            paths.push(target);
        }
        Ok(paths)
    }
}

pub fn search_terms(query: &str) -> String {
    let base = r#"keywords:"schema-version:0.5" AND keywords:boutiques"#;
    let query = query.trim();
    if query.is_empty() {
        base.to_string()
    } else {
        format!("{base} AND {query}")
    }
}

pub fn records_from_search(body: &Value, no_trunc: bool) -> Result<Vec<DescriptorRecord>, SyncError> {
    let hits = body
        .get("hits")
        .and_then(|value| value.get("hits"))
        .and_then(|value| value.as_array())
        .ok_or_else(|| SyncError::RegistryResponse("missing hits.hits array".to_string()))?;

    hits.iter().map(|hit| record_from_hit(hit, no_trunc)).collect()
}

fn record_from_hit(hit: &Value, no_trunc: bool) -> Result<DescriptorRecord, SyncError> {
    let number = hit
        .get("id")
        .and_then(|value| value.as_u64().or_else(|| value.as_str()?.parse().ok()))
        .ok_or_else(|| SyncError::RegistryResponse("search hit without id".to_string()))?;
    let id: DescriptorId = format!("zenodo.{number}").parse()?;

    let metadata = hit.get("metadata").cloned().unwrap_or(Value::Null);
    let title = metadata
        .get("title")
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string();
    let mut description = metadata
        .get("description")
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string();
    if !no_trunc {
        description = truncate(&description, TRUNCATED_DESCRIPTION);
    }
    let downloads = hit
        .get("stats")
        .and_then(|value| value.get("version_downloads").or_else(|| value.get("downloads")))
        .and_then(|value| value.as_u64())
        .unwrap_or(0);
    let author = metadata
        .get("creators")
        .and_then(|value| value.as_array())
        .and_then(|array| array.first())
        .and_then(|value| value.get("name"))
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string();
    let version = metadata
        .get("version")
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string();
    let doi = hit
        .get("doi")
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string();

    let keywords = metadata
        .get("keywords")
        .and_then(|value| value.as_array())
        .map(|array| {
            array
                .iter()
                .filter_map(|value| value.as_str())
                .map(|value| value.to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let schema_version = keywords
        .iter()
        .find_map(|keyword| keyword.strip_prefix("schema-version:"))
        .unwrap_or_default()
        .to_string();
    let container = keywords
        .iter()
        .find(|keyword| matches!(keyword.as_str(), "docker" | "singularity"))
        .cloned()
        .unwrap_or_default();
    let tags = keywords
        .iter()
        .filter(|keyword| {
            !keyword.starts_with("schema-version:")
                && !matches!(keyword.as_str(), "boutiques" | "docker" | "singularity")
        })
        .cloned()
        .collect::<Vec<_>>();

    Ok(DescriptorRecord::new(id)
        .with_field("TITLE", title)
        .with_field("DESCRIPTION", description)
        .with_field("DOWNLOADS", downloads)
        .with_field("AUTHOR", author)
        .with_field("VERSION", version)
        .with_field("DOI", doi)
        .with_field("SCHEMA VERSION", schema_version)
        .with_field("CONTAINER", container)
        .with_field("TAGS", tags))
}

pub fn descriptor_file_url(record: &Value) -> Option<String> {
    record
        .get("files")
        .and_then(|value| value.as_array())?
        .iter()
        .find(|file| {
            file.get("key")
                .and_then(|value| value.as_str())
                .map(|key| key.ends_with(".json"))
                .unwrap_or(false)
        })
        .and_then(|file| file.get("links"))
        .and_then(|links| links.get("self").or_else(|| links.get("download")))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{head}...")
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
