//! S3 blob store.
//!
//! Stores file content in an S3 bucket (or an S3-compatible service such
//! as MinIO or LocalStack) using signed `PutObject` and `DeleteObject`
//! requests. Signing is AWS Signature Version 4 implemented with the
//! `hmac` and `sha2` crates; no AWS SDK is involved.
//!
//! # Configuration
//!
//! ```toml
//! [blob]
//! backend = "s3"
//!
//! [blob.s3]
//! bucket = "my-vault"
//! region = "us-east-1"
//! prefix = "prod/"
//! # endpoint_url = "http://localhost:9000"
//! ```
//!
//! # Authentication
//!
//! Credentials come from the environment:
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)
//!
//! With the default endpoint, objects are addressed virtual-hosted style
//! (`<bucket>.s3.<region>.amazonaws.com/<key>`). A custom `endpoint_url`
//! switches to path style (`<endpoint>/<bucket>/<key>`).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

use cloudvault_core::store::BlobStore;

use crate::config::S3BlobConfig;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3BlobStore {
    config: S3BlobConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3BlobStore {
    pub fn new(config: S3BlobConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            bail!("blob.s3.bucket must not be empty");
        }
        Ok(Self {
            config,
            creds: AwsCredentials::from_env()?,
            client: reqwest::Client::new(),
        })
    }

    fn object_key(&self, path: &str) -> String {
        format!("{}{}", self.config.prefix, path)
    }

    /// Scheme, host and canonical URI of an object.
    fn locate(&self, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match self.config.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let uri = format!("/{}/{}", uri_encode(&self.config.bucket), encoded_key);
                (scheme.to_string(), host, uri)
            }
            None => (
                "https".to_string(),
                format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                ),
                format!("/{}", encoded_key),
            ),
        }
    }

    fn public_url(&self, key: &str) -> String {
        let (scheme, host, uri) = self.locate(key);
        match self.config.public_base_url {
            Some(ref base) => format!("{}{}", base.trim_end_matches('/'), uri),
            None => format!("{}://{}{}", scheme, host, uri),
        }
    }

    async fn send_signed(
        &self,
        method: reqwest::Method,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let (scheme, host, uri) = self.locate(key);
        let payload_hash = hex_sha256(&body);
        let headers = sign_request(
            &self.creds,
            &self.config.region,
            method.as_str(),
            &host,
            &uri,
            &payload_hash,
            Utc::now(),
        );

        let mut req = self
            .client
            .request(method, format!("{}://{}{}", scheme, host, uri))
            .body(body);
        for (name, value) in headers {
            if name != "host" {
                req = req.header(name, value);
            }
        }
        if let Some(content_type) = content_type {
            req = req.header("Content-Type", content_type);
        }

        req.send().await.with_context(|| {
            format!("Failed to reach s3://{}/{}", self.config.bucket, key)
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, path: &str, bytes: &[u8], mime_type: &str) -> Result<String> {
        let key = self.object_key(path);
        let resp = self
            .send_signed(reqwest::Method::PUT, &key, bytes.to_vec(), Some(mime_type))
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }

        debug!(key = %key, size = bytes.len(), "Stored object");
        Ok(self.public_url(&key))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let key = self.object_key(path);
        let resp = self
            .send_signed(reqwest::Method::DELETE, &key, Vec::new(), None)
            .await?;

        // S3 answers 204 for missing keys too; only a real failure is reported.
        if !resp.status().is_success() {
            bail!("S3 DeleteObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }

        debug!(key = %key, "Deleted object");
        Ok(())
    }
}

// ============ AWS SigV4 Helpers ============

/// Build the signed header set for one request. The `host` entry is part of
/// the signature but is set by the HTTP client itself.
fn sign_request(
    creds: &AwsCredentials,
    region: &str,
    method: &str,
    host: &str,
    canonical_uri: &str,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, canonical_uri, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    headers.push((
        "Authorization".to_string(),
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        ),
    ));
    headers
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding: everything but `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store(endpoint_url: Option<&str>) -> S3BlobStore {
        S3BlobStore {
            config: S3BlobConfig {
                bucket: "vault".to_string(),
                region: "eu-west-1".to_string(),
                prefix: "prod/".to_string(),
                endpoint_url: endpoint_url.map(str::to_string),
                public_base_url: None,
            },
            creds: AwsCredentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            },
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_signing_key_matches_aws_example() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("a b+c"), "a%20b%2Bc");
        assert_eq!(uri_encode("1700000000000_report.pdf"), "1700000000000_report.pdf");
    }

    #[test]
    fn test_virtual_hosted_url() {
        let s3 = store(None);
        let key = s3.object_key("files/u1/1_a b.txt");
        assert_eq!(
            s3.public_url(&key),
            "https://vault.s3.eu-west-1.amazonaws.com/prod/files/u1/1_a%20b.txt"
        );
    }

    #[test]
    fn test_custom_endpoint_is_path_style() {
        let s3 = store(Some("http://localhost:9000/"));
        let (scheme, host, uri) = s3.locate("files/u1/1_a.txt");
        assert_eq!(scheme, "http");
        assert_eq!(host, "localhost:9000");
        assert_eq!(uri, "/vault/files/u1/1_a.txt");
    }

    #[test]
    fn test_signed_headers_include_authorization() {
        let s3 = store(None);
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let headers = sign_request(
            &s3.creds,
            "eu-west-1",
            "PUT",
            "vault.s3.eu-west-1.amazonaws.com",
            "/prod/x",
            &hex_sha256(b"x"),
            now,
        );
        let auth = headers
            .iter()
            .find(|(k, _)| k == "Authorization")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240102/eu-west-1/s3/aws4_request"
        ));
        assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
        assert!(headers
            .iter()
            .any(|(k, v)| k == "x-amz-date" && v == "20240102T030405Z"));
    }
}
