use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use reqwest::blocking::Client as HttpClient;
use tracing::info;
use vidjob_contracts::{JobError, JobRequest};

use crate::scratch::ScratchFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOrigin {
    Inline,
    Remote,
}

impl AssetOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Remote => "remote",
        }
    }
}

/// A conditioning image on local disk, deleted when dropped.
#[derive(Debug)]
pub struct ResolvedAsset {
    file: ScratchFile,
    origin: AssetOrigin,
    size_bytes: u64,
}

impl ResolvedAsset {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn origin(&self) -> AssetOrigin {
        self.origin
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

pub struct AssetResolver {
    http: HttpClient,
    work_dir: PathBuf,
}

impl AssetResolver {
    pub fn new(work_dir: impl Into<PathBuf>, fetch_timeout: Duration) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(fetch_timeout)
            .build()
            .context("failed building image download client")?;
        Ok(Self::with_client(work_dir, http))
    }

    pub fn with_client(work_dir: impl Into<PathBuf>, http: HttpClient) -> Self {
        Self {
            http,
            work_dir: work_dir.into(),
        }
    }

    /// Inline data wins over a URL. Returns `None` when the request names no
    /// image; no file is created in that case.
    pub fn resolve(&self, request: &JobRequest) -> Result<Option<ResolvedAsset>, JobError> {
        if let Some(data) = request.image_base64.as_deref() {
            let bytes = decode_inline_image(data)?;
            return self.store(bytes, AssetOrigin::Inline).map(Some);
        }
        if let Some(url) = request.image_url.as_deref() {
            let bytes = self.download(url)?;
            return self.store(bytes, AssetOrigin::Remote).map(Some);
        }
        Ok(None)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, JobError> {
        let fetch_error = |reason: String| JobError::FetchError {
            url: url.to_string(),
            reason,
        };
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|err| fetch_error(format!("{:#}", anyhow::Error::from(err))))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {}", status.as_u16())));
        }
        let bytes = response
            .bytes()
            .map_err(|err| fetch_error(format!("{:#}", anyhow::Error::from(err))))?;
        Ok(bytes.to_vec())
    }

    fn store(&self, bytes: Vec<u8>, origin: AssetOrigin) -> Result<ResolvedAsset, JobError> {
        let file = ScratchFile::reserve(&self.work_dir, image_suffix(&bytes));
        file.prepare_dir()?;
        fs::write(file.path(), &bytes).map_err(|err| {
            JobError::io(format!("failed writing {}", file.path().display()), err)
        })?;
        info!(
            path = %file.path().display(),
            origin = origin.as_str(),
            bytes = bytes.len(),
            "resolved conditioning image"
        );
        Ok(ResolvedAsset {
            file,
            origin,
            size_bytes: bytes.len() as u64,
        })
    }
}

/// Decodes standard base64, tolerating a `data:<mime>;base64,` prefix and
/// embedded whitespace.
pub fn decode_inline_image(raw: &str) -> Result<Vec<u8>, JobError> {
    let trimmed = raw.trim();
    let encoded = if trimmed.starts_with("data:") {
        trimmed
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| JobError::DecodeError("data URL has no payload".to_string()))?
    } else {
        trimmed
    };
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(JobError::DecodeError("payload is empty".to_string()));
    }
    BASE64
        .decode(compact.as_bytes())
        .map_err(|err| JobError::DecodeError(err.to_string()))
}

fn image_suffix(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => ".png",
        Ok(ImageFormat::WebP) => ".webp",
        _ => ".jpg",
    }
}
