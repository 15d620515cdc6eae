//! Downloading user supplied files.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, Url};
use tracing::debug;

use crate::common::{EmoteError, EmoteResult};

/// Content types accepted for a single emote image.
pub const IMAGE_MIMETYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Content types accepted for an archive of emotes.
pub const ARCHIVE_MIMETYPES: &[&str] = &[
    "application/x-tar",
    "application/zip",
    "application/octet-stream",
    "application/x-zip-compressed",
    "multipart/x-zip",
];

#[derive(Debug, Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    head_timeout: Duration,
    read_timeout: Duration,
}

impl Fetcher {
    pub fn new(http: reqwest::Client, head_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            http,
            head_timeout,
            read_timeout,
        }
    }

    /// Download `url`, rejecting responses whose content type is not in `allowed`.
    ///
    /// With `validate_headers` a HEAD request is made first so that obviously
    /// wrong files are never downloaded.
    pub async fn fetch(&self, url: &str, allowed: &[&str], validate_headers: bool) -> EmoteResult<Bytes> {
        let url = Url::parse(url).map_err(|_| EmoteError::InvalidUrl)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(EmoteError::InvalidUrl);
        }

        if validate_headers {
            let response = self
                .http
                .head(url.clone())
                .timeout(self.head_timeout)
                .send()
                .await
                .map_err(request_error)?;
            check_response(&response, allowed)?;
        }

        let response = self
            .http
            .get(url)
            .timeout(self.read_timeout)
            .send()
            .await
            .map_err(request_error)?;
        check_response(&response, allowed)?;
        response.bytes().await.map_err(request_error)
    }
}

fn check_response(response: &Response, allowed: &[&str]) -> EmoteResult<()> {
    let status = response.status();
    if !status.is_success() {
        return Err(EmoteError::FetchStatus(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let mimetype = essence(content_type);
    if !allowed.iter().any(|allowed| allowed.eq_ignore_ascii_case(&mimetype)) {
        debug!("rejecting {} with content type '{}'", response.url(), content_type);
        return Err(EmoteError::InvalidFile);
    }
    Ok(())
}

/// `image/png; charset=UTF-8` -> `image/png`
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn request_error(e: reqwest::Error) -> EmoteError {
    if e.is_timeout() {
        EmoteError::FetchTimeout
    } else if e.is_builder() {
        EmoteError::InvalidUrl
    } else {
        EmoteError::Fetch(e.to_string())
    }
}
