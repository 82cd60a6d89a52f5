//! S3-compatible blob backend (AWS S3, Cloudflare R2, MinIO)
//!
//! Requests use path-style addressing (`{endpoint}/{bucket}/{key}`) and are
//! signed with AWS Signature Version 4.
//!
//! # Configuration
//!
//! - `MAILROOM_S3_BUCKET` - bucket name
//! - `MAILROOM_S3_ENDPOINT` - endpoint URL (e.g., https://<account_id>.r2.cloudflarestorage.com)
//! - `MAILROOM_S3_REGION` - signing region (default `auto`)
//! - `MAILROOM_S3_ACCESS_KEY_ID` - access key ID
//! - `MAILROOM_S3_SECRET_ACCESS_KEY` - secret access key

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use sha2::{Digest, Sha256};

use super::BlobBackend;
use crate::error::{Error, Result};

/// Environment variable names for S3 configuration
pub const S3_BUCKET_ENV: &str = "MAILROOM_S3_BUCKET";
pub const S3_ENDPOINT_ENV: &str = "MAILROOM_S3_ENDPOINT";
pub const S3_REGION_ENV: &str = "MAILROOM_S3_REGION";
pub const S3_ACCESS_KEY_ID_ENV: &str = "MAILROOM_S3_ACCESS_KEY_ID";
pub const S3_SECRET_ACCESS_KEY_ENV: &str = "MAILROOM_S3_SECRET_ACCESS_KEY";

type HmacSha256 = Hmac<Sha256>;

/// S3 configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Config {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let require = |name: &str| {
            std::env::var(name)
                .map_err(|_| Error::Config(format!("{} environment variable not set", name)))
        };

        Ok(Self {
            bucket: require(S3_BUCKET_ENV)?,
            endpoint: require(S3_ENDPOINT_ENV)?.trim_end_matches('/').to_string(),
            region: std::env::var(S3_REGION_ENV).unwrap_or_else(|_| "auto".to_string()),
            access_key_id: require(S3_ACCESS_KEY_ID_ENV)?,
            secret_access_key: require(S3_SECRET_ACCESS_KEY_ENV)?,
        })
    }

    /// Check if S3 is configured (all required env vars are set)
    pub fn is_configured() -> bool {
        std::env::var(S3_BUCKET_ENV).is_ok()
            && std::env::var(S3_ENDPOINT_ENV).is_ok()
            && std::env::var(S3_ACCESS_KEY_ID_ENV).is_ok()
            && std::env::var(S3_SECRET_ACCESS_KEY_ENV).is_ok()
    }
}

pub struct S3Backend {
    client: Client,
    config: S3Config,
}

impl S3Backend {
    pub fn new(config: S3Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn object_path(&self, key: &str) -> String {
        format!("/{}/{}", self.config.bucket, key)
    }

    async fn send(&self, method: Method, key: &str, body: Option<&[u8]>) -> Result<reqwest::Response> {
        let path = self.object_path(key);
        let url = format!("{}{}", self.config.endpoint, path);
        let host = reqwest::Url::parse(&url)
            .map_err(|e| Error::Config(format!("Invalid S3 endpoint: {}", e)))
            .and_then(|u| {
                let host = u
                    .host_str()
                    .ok_or_else(|| Error::Config("S3 endpoint has no host".to_string()))?
                    .to_string();
                Ok(match u.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host,
                })
            })?;

        let payload_hash = hex::encode(Sha256::digest(body.unwrap_or_default()));
        let now = Utc::now();
        let headers = sign_request(
            &self.config,
            method.as_str(),
            &path,
            &host,
            &payload_hash,
            now,
        )?;

        let mut request = self
            .client
            .request(method, &url)
            .header("x-amz-date", headers.amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header("authorization", headers.authorization);
        if let Some(bytes) = body {
            request = request.body(bytes.to_vec());
        }

        request
            .send()
            .await
            .map_err(|e| Error::Blob(format!("S3 request failed: {}", e)))
    }
}

#[async_trait]
impl BlobBackend for S3Backend {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let response = self.send(Method::PUT, key, Some(bytes)).await?;
        if !response.status().is_success() {
            return Err(Error::Blob(format!(
                "S3 PUT {} returned {}",
                key,
                response.status()
            )));
        }
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<bool> {
        let response = self.send(Method::HEAD, key, None).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(Error::Blob(format!("S3 HEAD {} returned {}", key, s))),
        }
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self.send(Method::GET, key, None).await?;
        match response.status() {
            s if s.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| Error::Blob(format!("S3 GET {} body: {}", key, e)))?;
                Ok(Some(bytes.to_vec()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            s => Err(Error::Blob(format!("S3 GET {} returned {}", key, s))),
        }
    }
}

/// Headers produced by SigV4 signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignedHeaders {
    pub amz_date: String,
    pub authorization: String,
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Blob(format!("Invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the SigV4 signing key for a date/region/service scope
pub(crate) fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Sign a request with no query string, covering host, payload hash, and date
pub(crate) fn sign_request(
    config: &S3Config,
    method: &str,
    path: &str,
    host: &str,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Result<SignedHeaders> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let signed_headers = "host;x-amz-content-sha256;x-amz-date";

    let canonical_request = format!(
        "{}\n{}\n\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{}\n{}",
        method, path, host, payload_hash, amz_date, signed_headers, payload_hash
    );

    let scope = format!("{}/{}/s3/aws4_request", date, config.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(&config.secret_access_key, &date, &config.region, "s3")?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(SignedHeaders {
        amz_date,
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            config.access_key_id, scope, signed_headers, signature
        ),
    })
}
