use super::{DirEntry, RemoteError, RemoteFile, RemoteStorage};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, LAST_MODIFIED, SERVER};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// How directory listings are read from the remote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStyle {
    /// S3 when the remote answers like an S3 bucket, HTML index pages otherwise.
    #[default]
    Auto,
    Html,
    /// `ListBucketResult` listings of a virtual-hosted S3 bucket.
    S3,
}

/// Settings of the HTTP client talking to a remote repository.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteClientConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub listing: ListingStyle,
}

impl Default for RemoteClientConfig {
    fn default() -> Self {
        RemoteClientConfig {
            timeout_secs: 30,
            user_agent: concat!("autorouting/", env!("CARGO_PKG_VERSION")).to_string(),
            listing: ListingStyle::Auto,
        }
    }
}

struct S3Patterns {
    key: Regex,
    common_prefix: Regex,
    truncated: Regex,
    next_marker: Regex,
}

impl S3Patterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(S3Patterns {
            key: Regex::new(r"(?s)<Contents>.*?<Key>([^<]*)</Key>")?,
            common_prefix: Regex::new(r"(?s)<CommonPrefixes>\s*<Prefix>([^<]*)</Prefix>")?,
            truncated: Regex::new(r"<IsTruncated>\s*true\s*</IsTruncated>")?,
            next_marker: Regex::new(r"<NextMarker>([^<]*)</NextMarker>")?,
        })
    }
}

/// One page of an S3 bucket listing below a key prefix.
#[derive(Debug, Default, PartialEq)]
struct S3Page {
    keys: Vec<String>,
    prefixes: Vec<String>,
    next_marker: Option<String>,
}

/// Remote storage reached over HTTP. Directory listings are scraped from the
/// HTML index pages the remote serves for directory URLs, or read from S3
/// bucket listings.
pub struct HttpRemoteStorage {
    client: reqwest::Client,
    base_url: Url,
    listing: ListingStyle,
    href_pattern: Regex,
    s3: S3Patterns,
}

impl HttpRemoteStorage {
    /// Bucket listings are paged; this bounds a single directory.
    const MAX_S3_PAGES: usize = 100;

    pub fn new(base_url: &str, config: &RemoteClientConfig) -> Result<Self, RemoteError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| RemoteError::Transport(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let href_pattern = Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#)
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let s3 = S3Patterns::new().map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(HttpRemoteStorage {
            client,
            base_url,
            listing: config.listing,
            href_pattern,
            s3,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }

    async fn get(&self, url: Url, path: &str) -> Result<reqwest::Response, RemoteError> {
        let response = self.client.get(url).send().await.map_err(from_reqwest)?;
        check_status(response, path)
    }

    async fn list_html(
        &self,
        path: &str,
        dir_url: &Url,
        response: reqwest::Response,
    ) -> Result<Vec<DirEntry>, RemoteError> {
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("html"));
        if !is_html {
            return Err(RemoteError::ListingUnsupported(path.to_string()));
        }
        let html = response.text().await.map_err(from_reqwest)?;
        Ok(self.parse_listing(dir_url, &html))
    }

    /// Direct children of `dir_url` linked from an index page.
    fn parse_listing(&self, dir_url: &Url, html: &str) -> Vec<DirEntry> {
        let mut children = BTreeMap::new();
        for capture in self.href_pattern.captures_iter(html) {
            let Ok(target) = dir_url.join(&capture[1]) else {
                continue;
            };
            if target.query().is_some() || target.fragment().is_some() {
                continue;
            }
            let Some(rest) = target.as_str().strip_prefix(dir_url.as_str()) else {
                continue;
            };
            let is_dir = rest.ends_with('/');
            let name = rest.trim_end_matches('/');
            if name.is_empty() || name.contains('/') || name.starts_with('.') {
                continue;
            }
            children.insert(name.to_string(), is_dir);
        }
        children
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect()
    }

    /// Lists a directory through the bucket's `prefix`/`delimiter` query. The
    /// bucket is the host of the base URL, the base URL path is the key prefix
    /// of the repository root.
    async fn list_s3(&self, path: &str) -> Result<Vec<DirEntry>, RemoteError> {
        let mut prefix = self.url_for(path)?.path().trim_start_matches('/').to_string();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        let mut bucket_url = self.base_url.clone();
        bucket_url.set_path("/");

        let mut children = BTreeMap::new();
        let mut marker: Option<String> = None;
        for _ in 0..Self::MAX_S3_PAGES {
            let mut url = bucket_url.clone();
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("prefix", &prefix).append_pair("delimiter", "/");
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }
            let body = self.get(url, path).await?.text().await.map_err(from_reqwest)?;
            if !body.contains("<ListBucketResult") {
                return Err(RemoteError::ListingUnsupported(path.to_string()));
            }
            let page = self.parse_s3_page(&body);
            for key in &page.keys {
                if let Some(name) = child_name(&prefix, key) {
                    children.entry(name).or_insert(false);
                }
            }
            for dir in &page.prefixes {
                if let Some(name) = child_name(&prefix, dir) {
                    children.insert(name, true);
                }
            }
            match page.next_marker {
                Some(next) if marker.as_ref() != Some(&next) => marker = Some(next),
                _ => break,
            }
        }

        if children.is_empty() && path.trim_matches('/') != "" {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        Ok(children
            .into_iter()
            .filter(|(name, _)| !name.starts_with('.'))
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }

    fn parse_s3_page(&self, body: &str) -> S3Page {
        let keys: Vec<String> = self
            .s3
            .key
            .captures_iter(body)
            .map(|c| xml_unescape(&c[1]))
            .collect();
        let prefixes: Vec<String> = self
            .s3
            .common_prefix
            .captures_iter(body)
            .map(|c| xml_unescape(&c[1]))
            .collect();
        let next_marker = if self.s3.truncated.is_match(body) {
            self.s3
                .next_marker
                .captures(body)
                .map(|c| xml_unescape(&c[1]))
                .or_else(|| keys.iter().chain(prefixes.iter()).max().cloned())
        } else {
            None
        };
        S3Page {
            keys,
            prefixes,
            next_marker,
        }
    }
}

fn check_status(response: reqwest::Response, path: &str) -> Result<reqwest::Response, RemoteError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(RemoteError::NotFound(path.to_string())),
        status => Err(RemoteError::Status(status.as_u16())),
    }
}

fn is_s3(headers: &HeaderMap) -> bool {
    headers.contains_key("x-amz-request-id")
        || headers
            .get(SERVER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("AmazonS3"))
}

/// The first path segment of `key` below `prefix`.
fn child_name(prefix: &str, key: &str) -> Option<String> {
    let rest = key.strip_prefix(prefix)?;
    let name = rest.split('/').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn from_reqwest(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(e.to_string())
    }
}

#[async_trait]
impl RemoteStorage for HttpRemoteStorage {
    async fn fetch(&self, path: &str) -> Result<RemoteFile, RemoteError> {
        let response = self.get(self.url_for(path)?, path).await?;
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        let body = response.bytes().await.map_err(from_reqwest)?;
        Ok(RemoteFile {
            body,
            last_modified,
        })
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, RemoteError> {
        if self.listing == ListingStyle::S3 {
            return self.list_s3(path).await;
        }
        let mut dir_path = path.trim_start_matches('/').to_string();
        if !dir_path.is_empty() && !dir_path.ends_with('/') {
            dir_path.push('/');
        }
        let dir_url = self.url_for(&dir_path)?;
        let response = self
            .client
            .get(dir_url.clone())
            .send()
            .await
            .map_err(from_reqwest)?;
        if self.listing == ListingStyle::Auto && is_s3(response.headers()) {
            tracing::trace!(path, "Remote looks like an S3 bucket");
            return self.list_s3(path).await;
        }
        let response = check_status(response, path)?;
        self.list_html(path, &dir_url, response).await
    }
}

/// Parses an HTTP date into millis since the epoch. Besides the IMF-fixdate
/// form, the obsolete RFC 850 and asctime forms are accepted.
fn parse_http_date(value: &str) -> Option<i64> {
    const OBSOLETE_FORMATS: [&str; 2] = ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"];

    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.timestamp_millis());
    }
    OBSOLETE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|date| date.and_utc().timestamp_millis())
}
