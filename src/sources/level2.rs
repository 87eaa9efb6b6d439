//! Level II object-store fetcher
//!
//! Lists `YYYY/MM/DD/SITE/` under the public NEXRAD Level II bucket, picks
//! the most recently modified volume and downloads it once into the local
//! data directory. A volume already materialised locally (same size) is
//! not downloaded again.

use crate::config::Level2Config;
use crate::sources::{error_for_status, FetchError, FetchResponse, RetryPolicy, SourceFetcher};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Suffix of the per-volume metadata objects stored next to each volume.
const METADATA_SUFFIX: &str = "_MDM";

/// A downloaded Level II moment file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MomentFile {
    /// Object key in the bucket
    pub key: String,
    /// Local path of the downloaded file
    pub path: PathBuf,
    pub site: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

/// One object from a bucket listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListedObject {
    pub key: String,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: u64,
}

/// `ListObjectsV2` response body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

/// Parse one page of a bucket listing.
fn parse_listing(xml: &str) -> Result<ListBucketResult, FetchError> {
    quick_xml::de::from_str(xml).map_err(|e| FetchError::Decode(format!("bucket listing: {e}")))
}

/// Newest volume in a listing, ignoring metadata objects.
pub fn newest_volume(objects: &[ListedObject]) -> Option<&ListedObject> {
    objects
        .iter()
        .filter(|o| !o.key.ends_with(METADATA_SUFFIX) && !o.key.ends_with('/'))
        .max_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.key.cmp(&b.key))
        })
}

/// Fetches the latest Level II volume for one site.
pub struct ObjectStoreFetcher {
    http: reqwest::Client,
    endpoint: String,
    site: String,
    lookback_days: u32,
    fixed_date: Option<NaiveDate>,
    data_dir: PathBuf,
    retry: RetryPolicy,
}

impl ObjectStoreFetcher {
    /// `http` should carry the per-call timeout.
    pub fn new(http: reqwest::Client, cfg: &Level2Config, retry: RetryPolicy) -> Self {
        Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            site: cfg.site.trim().to_ascii_uppercase(),
            lookback_days: cfg.lookback_days.max(1),
            fixed_date: cfg
                .fixed_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y/%m/%d").ok()),
            data_dir: cfg.data_dir.clone(),
            retry,
        }
    }

    /// Day prefixes to search, newest first.
    pub fn prefixes(&self, today: NaiveDate) -> Vec<String> {
        let days: Vec<NaiveDate> = match self.fixed_date {
            Some(date) => vec![date],
            None => (0..self.lookback_days)
                .map(|offset| today - ChronoDuration::days(i64::from(offset)))
                .collect(),
        };
        days.into_iter()
            .map(|d| format!("{}/{}/", d.format("%Y/%m/%d"), self.site))
            .collect()
    }

    /// Local path a key is materialised at.
    pub fn local_path(&self, key: &str) -> PathBuf {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        self.data_dir.join(file_name)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListedObject>, FetchError> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self
                .retry
                .run("level2", |_| self.list_page(prefix, token.as_deref()))
                .await?;
            objects.extend(page.contents);
            match page.next_continuation_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }
        Ok(objects)
    }

    async fn list_page(
        &self,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ListBucketResult, FetchError> {
        let mut query = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(token) = token {
            query.push(("continuation-token", token));
        }
        let response = self
            .http
            .get(format!("{}/", self.endpoint))
            .query(&query)
            .send()
            .await?;
        let body = error_for_status(response)?.text().await?;
        parse_listing(&body)
    }

    /// Download `object` unless an identical copy already exists locally.
    async fn materialise(&self, object: &ListedObject) -> Result<PathBuf, FetchError> {
        let path = self.local_path(&object.key);
        if already_materialised(&path, object.size).await {
            debug!(path = %path.display(), "Level II volume already on disk, skipping download");
            return Ok(path);
        }

        let url = format!("{}/{}", self.endpoint, object.key);
        let bytes = self
            .retry
            .run("level2", |_| {
                let request = self.http.get(url.as_str());
                async move {
                    let response = request.send().await?;
                    Ok::<_, FetchError>(error_for_status(response)?.bytes().await?)
                }
            })
            .await?;

        write_atomically(&path, &bytes)
            .await
            .map_err(|e| FetchError::Unavailable(format!("write {}: {e}", path.display())))?;
        info!(key = %object.key, bytes = bytes.len(), "Downloaded Level II volume");
        Ok(path)
    }
}

async fn already_materialised(path: &Path, expected_size: u64) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && (expected_size == 0 || meta.len() == expected_size),
        Err(_) => false,
    }
}

/// Temp file + rename so a crash never leaves a truncated volume behind.
async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("part");
    let written = tokio::fs::write(&tmp_path, bytes).await;
    let renamed = match written {
        Ok(()) => tokio::fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };
    if renamed.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    renamed
}

#[async_trait]
impl SourceFetcher for ObjectStoreFetcher {
    type Payload = MomentFile;

    async fn fetch(&self) -> Result<FetchResponse<MomentFile>, FetchError> {
        let prefixes = self.prefixes(Utc::now().date_naive());

        for prefix in &prefixes {
            let objects = self.list(prefix).await?;
            let Some(latest) = newest_volume(&objects) else {
                debug!(prefix = %prefix, "No Level II volumes under prefix");
                continue;
            };

            let path = self.materialise(latest).await?;
            return Ok(FetchResponse::ok(MomentFile {
                key: latest.key.clone(),
                path,
                site: self.site.clone(),
                last_modified: latest.last_modified,
                size: latest.size,
            }));
        }

        Err(FetchError::Unavailable(format!(
            "no Level II volume for {} within {} day(s)",
            self.site,
            prefixes.len()
        )))
    }

    fn source_name(&self) -> &str {
        "level2"
    }
}
