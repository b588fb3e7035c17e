//! S3-compatible object store
//!
//! Path-style requests (`<endpoint>/<bucket>/<key>`) signed with AWS
//! Signature Version 4, which works against AWS and S3-compatible servers
//! alike.

use super::{ObjectEntry, ObjectInfo, ObjectStore};
use crate::config::StorageConfig;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// SHA-256 of an empty payload
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// S3 store over reqwest
pub struct S3Store {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
}

impl S3Store {
    /// Create a store from credentials; AWS regional endpoint when none given
    pub fn new(config: &StorageConfig, timeout: Duration) -> Result<Self, StorageError> {
        let endpoint = match &config.endpoint {
            Some(url) => url.clone(),
            None => Url::parse(&format!("https://s3.{}.amazonaws.com", config.region))
                .map_err(|e| StorageError::Listing(format!("invalid region: {e}")))?,
        };
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
        })
    }

    /// `/<bucket>/<key>` with every key segment URI-encoded
    fn object_path(&self, key: &str) -> String {
        let base = self.endpoint.path().trim_end_matches('/');
        format!("{base}/{}/{}", uri_encode(&self.bucket, true), uri_encode(key, false))
    }

    fn bucket_path(&self) -> String {
        let base = self.endpoint.path().trim_end_matches('/');
        format!("{base}/{}", uri_encode(&self.bucket, true))
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Build and sign a request; `query` pairs must already be sorted by name
    fn signed_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        payload_sha256: &str,
        now: DateTime<Utc>,
    ) -> Result<reqwest::RequestBuilder, StorageError> {
        let canonical_query = query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
            .collect::<Vec<_>>()
            .join("&");

        let mut url = format!(
            "{}://{}{}",
            self.endpoint.scheme(),
            self.host(),
            path
        );
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query);
        }
        let url = Url::parse(&url).map_err(|e| StorageError::Listing(format!("invalid URL: {e}")))?;

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let authorization = authorization_header(
            &SigningParams {
                access_key_id: &self.access_key_id,
                secret_access_key: &self.secret_access_key,
                region: &self.region,
                service: "s3",
            },
            method.as_str(),
            path,
            &canonical_query,
            &self.host(),
            payload_sha256,
            now,
        )?;

        Ok(self
            .client
            .request(method, url)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_sha256)
            .header(AUTHORIZATION, authorization))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn exists(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError> {
        let request = self.signed_request(
            Method::HEAD,
            &self.object_path(key),
            &[],
            EMPTY_PAYLOAD_SHA256,
            Utc::now(),
        )?;
        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(key, "object absent");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StorageError::Status {
                status: status.as_u16(),
                key: key.to_string(),
            });
        }
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(Some(ObjectInfo { size }))
    }

    async fn upload(&self, path: &Path, key: &str) -> Result<String, StorageError> {
        let body = tokio::fs::read(path).await?;
        let payload_sha256 = hex::encode(Sha256::digest(&body));
        let request = self.signed_request(
            Method::PUT,
            &self.object_path(key),
            &[],
            &payload_sha256,
            Utc::now(),
        )?;
        let response = request
            .header(CONTENT_TYPE, "application/pdf")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Status {
                status: status.as_u16(),
                key: key.to_string(),
            });
        }
        let url = self.url_for(key);
        info!(url = %url, "PDF uploaded");
        Ok(url)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query: Vec<(&str, &str)> = Vec::new();
            if let Some(token) = token.as_deref() {
                query.push(("continuation-token", token));
            }
            query.push(("list-type", "2"));
            query.push(("prefix", prefix));

            let request = self.signed_request(
                Method::GET,
                &self.bucket_path(),
                &query,
                EMPTY_PAYLOAD_SHA256,
                Utc::now(),
            )?;
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(StorageError::Status {
                    status: status.as_u16(),
                    key: prefix.to_string(),
                });
            }
            let page = parse_listing(&response.text().await?)?;
            entries.extend(page.contents.into_iter().map(|c| ObjectEntry {
                key: c.key,
                size: c.size,
            }));
            match page.next_continuation_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }
        debug!(prefix, count = entries.len(), "objects listed");
        Ok(entries)
    }

    fn url_for(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// ListObjectsV2 response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
    #[serde(default)]
    size: u64,
}

fn parse_listing(xml: &str) -> Result<ListBucketResult, StorageError> {
    quick_xml::de::from_str(xml).map_err(|e| StorageError::Listing(e.to_string()))
}

// ---------------------------------------------------------------------------
// Signature V4
// ---------------------------------------------------------------------------

struct SigningParams<'a> {
    access_key_id: &'a str,
    secret_access_key: &'a str,
    region: &'a str,
    service: &'a str,
}

/// Percent-encode everything but unreserved characters (and `/` in paths)
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| StorageError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, StorageError> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn authorization_header(
    params: &SigningParams<'_>,
    method: &str,
    canonical_path: &str,
    canonical_query: &str,
    host: &str,
    payload_sha256: &str,
    now: DateTime<Utc>,
) -> Result<String, StorageError> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{date}/{}/{}/aws4_request", params.region, params.service);

    let canonical_request = format!(
        "{method}\n{canonical_path}\n{canonical_query}\nhost:{host}\nx-amz-content-sha256:{payload_sha256}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{payload_sha256}"
    );
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );
    let key = signing_key(
        params.secret_access_key,
        &date,
        params.region,
        params.service,
    )?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        params.access_key_id
    ))
}
