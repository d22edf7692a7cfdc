//! Image acquisition: inline base64 payloads or remote URLs.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ReceiptError;
use crate::protocol::ProcessRequest;

/// Where the image bytes for a request come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Inline(String),
    Remote(String),
}

impl ImageSource {
    /// Pick the usable source of a request. Inline data wins over a URL;
    /// blank strings count as absent.
    pub fn from_request(request: &ProcessRequest) -> Result<Self, ReceiptError> {
        let usable = |field: &Option<String>| {
            field
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        if let Some(data) = usable(&request.image) {
            Ok(Self::Inline(data))
        } else if let Some(url) = usable(&request.url) {
            Ok(Self::Remote(url))
        } else {
            Err(ReceiptError::NoImageProvided)
        }
    }
}

/// Decode an inline image, stripping any header up to the first comma.
pub fn decode_inline(data: &str) -> Result<Vec<u8>, ReceiptError> {
    let encoded = match data.split_once(',') {
        Some((_header, body)) => body,
        None => data,
    };

    BASE64
        .decode(encoded.trim())
        .map_err(|e| ReceiptError::InvalidImageData(e.to_string()))
}

/// Resolve a root-relative URL against the frontend base address.
///
/// Protocol-relative URLs (`//host/path`) keep their host and borrow the
/// base's scheme.
pub fn resolve_url(base: &str, url: &str) -> String {
    if url.starts_with("//") {
        match base.split_once("://") {
            Some((scheme, _)) => format!("{}:{}", scheme, url),
            None => format!("http:{}", url),
        }
    } else if url.starts_with('/') {
        format!("{}{}", base.trim_end_matches('/'), url)
    } else {
        url.to_string()
    }
}

/// Turns a [`ImageSource`] into raw image bytes.
#[derive(Clone)]
pub struct Acquirer {
    client: Client,
    base_url: String,
    max_bytes: usize,
    fetch_timeout: Duration,
}

impl Acquirer {
    pub fn new(
        base_url: impl Into<String>,
        fetch_timeout: Duration,
        max_bytes: usize,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(fetch_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            max_bytes,
            fetch_timeout,
        })
    }

    /// Absolute URL a remote source will be fetched from.
    pub fn resolve(&self, url: &str) -> String {
        resolve_url(&self.base_url, url)
    }

    pub async fn acquire(&self, source: &ImageSource) -> Result<Vec<u8>, ReceiptError> {
        match source {
            ImageSource::Inline(data) => {
                let bytes = decode_inline(data)?;
                if bytes.len() > self.max_bytes {
                    return Err(ReceiptError::InvalidImageData(format!(
                        "image too large: {} bytes, limit is {}",
                        bytes.len(),
                        self.max_bytes
                    )));
                }
                debug!("Decoded inline image ({} bytes)", bytes.len());
                Ok(bytes)
            }
            ImageSource::Remote(url) => self.fetch(&self.resolve(url)).await,
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ReceiptError> {
        info!("Fetching receipt image from {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReceiptError::FetchStatus(status));
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(self.too_large(len as usize));
            }
        }

        // Chunked responses carry no length; stop reading once over the limit.
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.transport_error(e))?
        {
            bytes.extend_from_slice(&chunk);
            if bytes.len() > self.max_bytes {
                return Err(self.too_large(bytes.len()));
            }
        }

        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }

    fn transport_error(&self, err: reqwest::Error) -> ReceiptError {
        if err.is_timeout() {
            ReceiptError::Timeout {
                stage: "image download",
                after: self.fetch_timeout,
            }
        } else {
            ReceiptError::FetchTransport(err.to_string())
        }
    }

    fn too_large(&self, len: usize) -> ReceiptError {
        ReceiptError::FetchTransport(format!(
            "image exceeds the {} byte limit (got at least {} bytes)",
            self.max_bytes, len
        ))
    }
}
