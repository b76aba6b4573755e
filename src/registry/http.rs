//! OCI distribution v2 client
//!
//! Blocking `ureq` calls run on the blocking pool. Uploads are monolithic:
//! `POST /v2/<repo>/blobs/uploads/` followed by `PUT <location>?digest=`.
//!
//! Connection failures, timeouts, I/O errors, 429 and 5xx map to
//! `RegistryTransient`; malformed URIs, TLS and protocol errors and other
//! 4xx map to `RegistryPermanent` (404 to the not-found variants).

use crate::error::{XplatError, XplatResult};
use crate::registry::manifest::{sha256_digest, verify_digest, MANIFEST_ACCEPT, MEDIA_TYPE_MANIFEST};
use crate::registry::{ImageRef, PulledManifest, Registry};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use ureq::http::Response;
use ureq::Body;

/// Largest manifest or error body accepted from a registry
const MANIFEST_LIMIT: u64 = 4 * 1024 * 1024;

/// Largest blob accepted from a registry
const BLOB_LIMIT: u64 = 8 * 1024 * 1024 * 1024;

/// Classify a failure that produced no HTTP status
fn transport_error(operation: &str, error: ureq::Error) -> XplatError {
    match error {
        ureq::Error::Io(_)
        | ureq::Error::Timeout(_)
        | ureq::Error::HostNotFound
        | ureq::Error::ConnectionFailed => XplatError::RegistryTransient {
            operation: operation.to_string(),
            reason: error.to_string(),
        },
        // Bad URIs, TLS, protocol violations, oversized bodies
        other => XplatError::RegistryPermanent {
            operation: operation.to_string(),
            status: 0,
            reason: other.to_string(),
        },
    }
}

/// Unauthenticated registry client
pub struct HttpRegistry {
    agent: ureq::Agent,
    scheme: &'static str,
}

/// Classified HTTP response
struct Reply {
    status: u16,
    location: Option<String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl HttpRegistry {
    /// Create a client; `insecure` selects plain HTTP
    pub fn new(insecure: bool, timeout_secs: u64) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_secs.max(1))))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            scheme: if insecure { "http" } else { "https" },
        }
    }

    fn base_url(&self, image: &ImageRef) -> XplatResult<String> {
        let host = image.registry.as_deref().ok_or_else(|| XplatError::InvalidReference {
            reference: image.to_string(),
            reason: "a registry host is required (e.g. localhost:5000/repo)".to_string(),
        })?;
        Ok(format!("{}://{}/v2/{}", self.scheme, host, image.repository))
    }

    fn origin(&self, image: &ImageRef) -> String {
        format!(
            "{}://{}",
            self.scheme,
            image.registry.as_deref().unwrap_or_default()
        )
    }

    /// Run a blocking request on the blocking pool, reading at most `limit` body bytes
    async fn send<F>(&self, operation: &str, limit: u64, request: F) -> XplatResult<Reply>
    where
        F: FnOnce(&ureq::Agent) -> Result<Response<Body>, ureq::Error> + Send + 'static,
    {
        let agent = self.agent.clone();
        let op = operation.to_string();
        debug!("Registry request: {}", op);

        tokio::task::spawn_blocking(move || -> XplatResult<Reply> {
            let mut response = request(&agent).map_err(|e| transport_error(&op, e))?;
            let header = |name: &str| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let location = header("location");
            let content_type = header("content-type");
            let status = response.status().as_u16();
            let body = response
                .body_mut()
                .with_config()
                .limit(limit)
                .read_to_vec()
                .map_err(|e| transport_error(&op, e))?;
            Ok(Reply {
                status,
                location,
                content_type,
                body,
            })
        })
        .await
        .map_err(|e| XplatError::Internal(format!("registry task failed: {}", e)))?
    }

    /// Map a non-success status to an error
    fn status_error(operation: &str, reply: &Reply) -> XplatError {
        let reason = String::from_utf8_lossy(&reply.body).trim().to_string();
        if reply.status == 429 || reply.status >= 500 {
            XplatError::RegistryTransient {
                operation: operation.to_string(),
                reason: format!("status {}: {}", reply.status, reason),
            }
        } else {
            XplatError::RegistryPermanent {
                operation: operation.to_string(),
                status: reply.status,
                reason,
            }
        }
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn has_blob(&self, image: &ImageRef, digest: &str) -> XplatResult<bool> {
        let url = format!("{}/blobs/{}", self.base_url(image)?, digest);
        let reply = self
            .send("HEAD blob", MANIFEST_LIMIT, move |a| a.head(&url).call())
            .await?;
        match reply.status {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(Self::status_error("HEAD blob", &reply)),
        }
    }

    async fn push_blob(&self, image: &ImageRef, digest: &str, data: Vec<u8>) -> XplatResult<()> {
        verify_digest(digest, &data)?;
        if self.has_blob(image, digest).await? {
            debug!("Blob {} already present in {}", digest, image.repository);
            return Ok(());
        }

        let url = format!("{}/blobs/uploads/", self.base_url(image)?);
        let reply = self
            .send("start upload", MANIFEST_LIMIT, move |a| a.post(&url).send_empty())
            .await?;
        if reply.status != 202 {
            return Err(Self::status_error("start upload", &reply));
        }
        let location = reply.location.ok_or_else(|| XplatError::RegistryPermanent {
            operation: "start upload".to_string(),
            status: reply.status,
            reason: "missing Location header".to_string(),
        })?;
        let location = if location.starts_with('/') {
            format!("{}{}", self.origin(image), location)
        } else {
            location
        };
        let separator = if location.contains('?') { '&' } else { '?' };
        let url = format!("{}{}digest={}", location, separator, digest);

        let reply = self
            .send("upload blob", MANIFEST_LIMIT, move |a| {
                a.put(&url)
                    .header("Content-Type", "application/octet-stream")
                    .send(&data[..])
            })
            .await?;
        if reply.status != 201 {
            return Err(Self::status_error("upload blob", &reply));
        }
        Ok(())
    }

    async fn pull_blob(&self, image: &ImageRef, digest: &str) -> XplatResult<Vec<u8>> {
        let url = format!("{}/blobs/{}", self.base_url(image)?, digest);
        let reply = self.send("GET blob", BLOB_LIMIT, move |a| a.get(&url).call()).await?;
        match reply.status {
            200 => {
                verify_digest(digest, &reply.body)?;
                Ok(reply.body)
            }
            404 => Err(XplatError::BlobNotFound(digest.to_string())),
            _ => Err(Self::status_error("GET blob", &reply)),
        }
    }

    async fn push_manifest(
        &self,
        image: &ImageRef,
        reference: &str,
        media_type: &str,
        data: Vec<u8>,
    ) -> XplatResult<String> {
        let digest = sha256_digest(&data);
        let url = format!("{}/manifests/{}", self.base_url(image)?, reference);
        let content_type = media_type.to_string();
        let reply = self
            .send("PUT manifest", MANIFEST_LIMIT, move |a| {
                a.put(&url).header("Content-Type", &content_type).send(&data[..])
            })
            .await?;
        if !(200..300).contains(&reply.status) {
            return Err(Self::status_error("PUT manifest", &reply));
        }
        Ok(digest)
    }

    async fn pull_manifest(&self, image: &ImageRef, reference: &str) -> XplatResult<PulledManifest> {
        let url = format!("{}/manifests/{}", self.base_url(image)?, reference);
        let accept = MANIFEST_ACCEPT.join(", ");
        let reply = self
            .send("GET manifest", MANIFEST_LIMIT, move |a| {
                a.get(&url).header("Accept", &accept).call()
            })
            .await?;
        match reply.status {
            200 => {
                let digest = sha256_digest(&reply.body);
                if reference.starts_with("sha256:") {
                    verify_digest(reference, &reply.body)?;
                }
                let media_type = reply
                    .content_type
                    .map(|c| c.split(';').next().unwrap_or_default().trim().to_string())
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| MEDIA_TYPE_MANIFEST.to_string());
                Ok(PulledManifest {
                    media_type,
                    data: reply.body,
                    digest,
                })
            }
            404 => Err(XplatError::ManifestNotFound(format!("{}:{}", image, reference))),
            _ => Err(Self::status_error("GET manifest", &reply)),
        }
    }
}
