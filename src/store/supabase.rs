//! Supabase-backed record and object stores
//!
//! Records live in a PostgREST table, files in a storage bucket. One blocking
//! HTTP client is shared by every worker.

use std::time::Duration;
use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use crate::error::{Error, Result};
use crate::record::DocumentRecord;
use crate::store::{CandidateFilter, ObjectStore, RecordStore};

const RECORD_COLUMNS: &str = "id,title,file_path,file_name,file_type,pages";

/// Connection settings for a Supabase project
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://<ref>.supabase.co`
    pub url: String,
    /// Service role key
    pub service_key: String,
    /// Table holding the document records
    pub table: String,
    /// Per-request transport timeout
    pub request_timeout: Duration,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            service_key: String::new(),
            table: "outlines".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Row shape returned by the records table
#[derive(Debug, Deserialize)]
struct RecordRow {
    id: String,
    title: Option<String>,
    file_path: Option<String>,
    file_name: Option<String>,
    file_type: Option<String>,
    pages: Option<i64>,
}

impl From<RecordRow> for DocumentRecord {
    fn from(row: RecordRow) -> Self {
        let file_path = row
            .file_path
            .filter(|p| !p.trim().is_empty())
            .or(row.file_name.filter(|p| !p.trim().is_empty()));

        DocumentRecord {
            id: row.id,
            title: row.title.unwrap_or_else(|| "Unknown".to_string()),
            file_path,
            file_type: row.file_type.unwrap_or_default(),
            pages: row.pages,
        }
    }
}

/// Client for a Supabase project's REST and storage APIs
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    http: Client,
    base: Url,
    table: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Result<Self> {
        let base = Url::parse(&config.url)
            .map_err(|e| Error::Config(format!("invalid store URL {:?}: {}", config.url, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!("store URL cannot be a base: {}", config.url)));
        }
        if config.service_key.is_empty() {
            return Err(Error::Config("service key is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.service_key)
            .map_err(|_| Error::Config("service key is not a valid header value".to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.service_key))
            .map_err(|_| Error::Config("service key is not a valid header value".to_string()))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base,
            table: config.table.clone(),
        })
    }

    /// Base URL extended with path segments, each percent-encoded
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn table_url(&self) -> Url {
        self.endpoint(["rest", "v1", self.table.as_str()])
    }
}

impl RecordStore for SupabaseClient {
    fn fetch_page(&self, filter: &CandidateFilter, offset: usize, limit: usize) -> Result<Vec<DocumentRecord>> {
        debug!("fetching records {}..{}", offset, offset + limit);

        let rows: Vec<RecordRow> = self
            .http
            .get(self.table_url())
            .query(&[
                ("select", RECORD_COLUMNS.to_string()),
                ("pages", format!("eq.{}", filter.pages)),
                ("order", "id".to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()?
            .error_for_status()?
            .json()?;

        Ok(rows.into_iter().map(DocumentRecord::from).collect())
    }

    fn update_pages(&self, id: &str, pages: Option<u32>) -> Result<()> {
        let response = self
            .http
            .patch(self.table_url())
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "pages": pages }))
            .send()?;

        if !response.status().is_success() {
            return Err(Error::Persist {
                id: id.to_string(),
                reason: format!("store answered {}", response.status()),
            });
        }
        Ok(())
    }
}

impl ObjectStore for SupabaseClient {
    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let segments = ["storage", "v1", "object", bucket]
            .into_iter()
            .chain(path.split('/').filter(|s| !s.is_empty()));
        let response = self.http.get(self.endpoint(segments)).send()?;

        if !response.status().is_success() {
            return Err(Error::Download(format!("{}/{}: {}", bucket, path, response.status())));
        }

        let bytes = response.bytes()?;
        if bytes.is_empty() {
            return Err(Error::Download(format!("{}/{}: empty body", bucket, path)));
        }
        Ok(bytes.to_vec())
    }
}
