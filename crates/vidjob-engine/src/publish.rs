use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use tracing::{info, warn};
use url::Url;
use vidjob_contracts::{JobError, JobRequest, JobResult};

pub const ARTIFACT_CONTENT_TYPE: &str = "video/mp4";

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub status_code: u16,
    pub uploaded_bytes: u64,
    pub output_url: String,
}

/// Delivers a verified artifact by presigned upload and/or inline base64.
pub struct Publisher {
    http: HttpClient,
}

impl Publisher {
    pub fn new(upload_timeout: Duration) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(upload_timeout)
            .build()
            .context("failed building upload client")?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: HttpClient) -> Self {
        Self { http }
    }

    /// Upload failures are recorded on `result`. Only a failure to read the
    /// artifact for inline delivery is returned as an error.
    pub fn publish(
        &self,
        artifact: &Path,
        request: &JobRequest,
        result: &mut JobResult,
    ) -> Result<(), JobError> {
        if let Some(upload_url) = request.upload_url.as_deref() {
            let outcome = self.upload(artifact, upload_url);
            match &outcome {
                Ok(receipt) => info!(
                    status = receipt.status_code,
                    bytes = receipt.uploaded_bytes,
                    url = %receipt.output_url,
                    "uploaded artifact"
                ),
                Err(err) => warn!(error = %err, "artifact upload failed"),
            }
            result.record_upload(outcome.map(|receipt| receipt.output_url));
        }
        if request.return_base64 {
            result.output_base64 = Some(encode_artifact(artifact)?);
        }
        Ok(())
    }

    /// One PUT of the whole file. Success is status 200 or 201.
    pub fn upload(&self, artifact: &Path, upload_url: &str) -> Result<UploadReceipt, JobError> {
        let bytes = fs::read(artifact).map_err(|err| {
            JobError::UploadFailure(format!(
                "Upload failed: could not read {}: {err}",
                artifact.display()
            ))
        })?;
        let uploaded_bytes = bytes.len() as u64;
        let response = self
            .http
            .put(upload_url)
            .header(CONTENT_TYPE, ARTIFACT_CONTENT_TYPE)
            .body(bytes)
            .send()
            .map_err(|err| {
                JobError::UploadFailure(format!("Upload failed: {:#}", anyhow::Error::from(err)))
            })?;
        let status_code = response.status().as_u16();
        if !matches!(status_code, 200 | 201) {
            let body = response.text().unwrap_or_default();
            return Err(JobError::UploadFailure(format!(
                "Upload failed with status {status_code}: {}",
                truncate_text(&body, 512)
            )));
        }
        Ok(UploadReceipt {
            status_code,
            uploaded_bytes,
            output_url: public_url(upload_url),
        })
    }
}

pub fn encode_artifact(artifact: &Path) -> Result<String, JobError> {
    let bytes = fs::read(artifact)
        .map_err(|err| JobError::io(format!("failed reading {}", artifact.display()), err))?;
    Ok(BASE64.encode(bytes))
}

/// The upload destination without its signing query string.
pub fn public_url(upload_url: &str) -> String {
    match Url::parse(upload_url) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => upload_url
            .split('?')
            .next()
            .unwrap_or(upload_url)
            .to_string(),
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::fs;

    use base64::Engine as _;
    use serde_json::{json, Map, Value};
    use vidjob_contracts::{JobRequest, JobResult, UploadStatus};

    use super::{public_url, Publisher, BASE64};
    use crate::test_support::{local_client, CannedServer};

    fn request(value: Value) -> JobRequest {
        let payload: Map<String, Value> = value.as_object().cloned().unwrap_or_default();
        JobRequest::from_payload(&payload).unwrap_or_default()
    }

    fn result(path: &str) -> JobResult {
        JobResult {
            output_path: path.to_string(),
            file_size_bytes: 5,
            duration_seconds: 0.0,
            frame_num: 81,
            size: "480*832".to_string(),
            upload_status: None,
            output_url: None,
            upload_error: None,
            output_base64: None,
        }
    }

    #[test]
    fn public_url_strips_signature() {
        assert_eq!(
            public_url("https://blob.example.com/videos/a.mp4?sig=abc&exp=1"),
            "https://blob.example.com/videos/a.mp4"
        );
        assert_eq!(public_url("not a url?x=1"), "not a url");
    }

    #[test]
    fn upload_puts_bytes_with_video_content_type() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let artifact = temp.path().join("a.mp4");
        fs::write(&artifact, b"video")?;
        let server = CannedServer::start(201, b"")?;
        let publisher = Publisher::with_client(local_client());

        let receipt = publisher.upload(&artifact, &server.url("/blob/a.mp4?token=secret"))?;
        assert_eq!(receipt.status_code, 201);
        assert_eq!(receipt.uploaded_bytes, 5);
        assert_eq!(receipt.output_url, server.url("/blob/a.mp4"));

        let captured = server.finish();
        assert_eq!(captured.method, "PUT");
        assert_eq!(captured.path, "/blob/a.mp4?token=secret");
        assert_eq!(captured.header("content-type"), Some("video/mp4"));
        assert_eq!(captured.body, b"video");
        Ok(())
    }

    #[test]
    fn server_error_is_recorded_not_raised() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let artifact = temp.path().join("a.mp4");
        fs::write(&artifact, b"video")?;
        let server = CannedServer::start(500, b"internal boom")?;
        let publisher = Publisher::with_client(local_client());

        let mut result = result(&artifact.to_string_lossy());
        publisher.publish(
            &artifact,
            &request(json!({"prompt": "x", "upload_url": server.url("/blob/a.mp4")})),
            &mut result,
        )?;
        server.finish();

        assert_eq!(result.upload_status, Some(UploadStatus::Failed));
        assert_eq!(
            result.upload_error.as_deref(),
            Some("Upload failed with status 500: internal boom")
        );
        assert!(result.output_url.is_none());
        Ok(())
    }

    #[test]
    fn transport_failure_is_recorded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let artifact = temp.path().join("a.mp4");
        fs::write(&artifact, b"video")?;
        // bind then drop to get a port with nothing listening
        let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let publisher = Publisher::with_client(local_client());

        let mut result = result(&artifact.to_string_lossy());
        publisher.publish(
            &artifact,
            &request(json!({
                "prompt": "x",
                "upload_url": format!("http://127.0.0.1:{port}/a.mp4"),
            })),
            &mut result,
        )?;
        assert_eq!(result.upload_status, Some(UploadStatus::Failed));
        assert!(result
            .upload_error
            .as_deref()
            .is_some_and(|message| message.starts_with("Upload failed")));
        Ok(())
    }

    #[test]
    fn inline_and_upload_can_be_combined() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let artifact = temp.path().join("a.mp4");
        fs::write(&artifact, b"video")?;
        let server = CannedServer::start(200, b"")?;
        let expected_url = server.url("/a.mp4");
        let publisher = Publisher::with_client(local_client());

        let mut result = result(&artifact.to_string_lossy());
        publisher.publish(
            &artifact,
            &request(json!({
                "prompt": "x",
                "upload_url": server.url("/a.mp4?sig=1"),
                "return_base64": true,
            })),
            &mut result,
        )?;
        server.finish();

        assert_eq!(result.upload_status, Some(UploadStatus::Success));
        assert_eq!(result.output_url, Some(expected_url));
        assert_eq!(
            result.output_base64.as_deref().map(|data| BASE64.decode(data)).transpose()?,
            Some(b"video".to_vec())
        );
        Ok(())
    }

    #[test]
    fn no_delivery_requested_leaves_result_untouched() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let artifact = temp.path().join("a.mp4");
        fs::write(&artifact, b"video")?;
        let publisher = Publisher::with_client(local_client());
        let mut result = result(&artifact.to_string_lossy());
        publisher.publish(&artifact, &request(json!({"prompt": "x"})), &mut result)?;
        assert_eq!(result.upload_status, None);
        assert_eq!(result.output_base64, None);
        Ok(())
    }
}
