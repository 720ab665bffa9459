//! Host callback for delivering a card to one destination.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::DeliveryConfig;
use crate::error::{BridgeError, Result};

/// Sends a text plus an attached image to a destination.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_image(&self, destination: &str, text: &str, image: &Path) -> Result<()>;
}

/// Records deliveries in the log only. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_image(&self, destination: &str, text: &str, image: &Path) -> Result<()> {
        info!(
            destination = destination,
            image = %image.display(),
            "Card delivered (log only): {}",
            text
        );
        Ok(())
    }
}

/// Posts each delivery as a multipart form to a webhook.
///
/// Fields: `destination`, `text` and `image` (the file, as `image/png` when
/// the extension says so).
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Delivery(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_image(&self, destination: &str, text: &str, image: &Path) -> Result<()> {
        let bytes = tokio::fs::read(image).await.map_err(|e| {
            BridgeError::Filesystem(format!("cannot read {}: {}", image.display(), e))
        })?;
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "card.png".to_string());
        let mime = match image.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("png") => "image/png",
            Some(ext) if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") => {
                "image/jpeg"
            }
            _ => "application/octet-stream",
        };

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| BridgeError::Delivery(format!("invalid mime type: {}", e)))?;
        let form = reqwest::multipart::Form::new()
            .text("destination", destination.to_string())
            .text("text", text.to_string())
            .part("image", part);

        let resp = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BridgeError::Delivery(format!("{}: {}", destination, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Delivery(format!(
                "{}: webhook returned {} {}",
                destination,
                status,
                body.trim()
            )));
        }
        Ok(())
    }
}

/// Pick the notifier for a delivery config.
pub fn notifier_from_config(cfg: &DeliveryConfig) -> Result<Arc<dyn Notifier>> {
    match cfg.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            info!(url = url, "Delivering cards via webhook");
            Ok(Arc::new(WebhookNotifier::new(
                url,
                Duration::from_secs(cfg.timeout_secs),
            )?))
        }
        _ => {
            info!("No webhook configured, deliveries are logged only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one request, record it, answer with `status_line`.
    async fn one_shot_server(status_line: &'static str) -> (String, Arc<Mutex<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            *sink.lock().unwrap() = request;
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status_line
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
        (format!("http://{}/hook", addr), captured)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..header_end]
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + length
    }

    #[tokio::test]
    async fn test_webhook_posts_multipart() {
        let (url, captured) = one_shot_server("200 OK").await;
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("card.png");
        std::fs::write(&image, b"PNGDATA").unwrap();

        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();
        notifier
            .send_image("qq:GroupMessage:1", "New commit card", &image)
            .await
            .unwrap();

        let request = String::from_utf8_lossy(&captured.lock().unwrap()).into_owned();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("qq:GroupMessage:1"));
        assert!(request.contains("New commit card"));
        assert!(request.contains("filename=\"card.png\""));
        assert!(request.contains("PNGDATA"));
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_delivery_error() {
        let (url, _captured) = one_shot_server("500 Internal Server Error").await;
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("card.png");
        std::fs::write(&image, b"x").unwrap();

        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();
        let err = notifier.send_image("d", "t", &image).await.unwrap_err();
        assert!(matches!(err, BridgeError::Delivery(_)));
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        LogNotifier
            .send_image("d", "t", Path::new("/tmp/none.png"))
            .await
            .unwrap();
    }

    #[test]
    fn test_notifier_selection() {
        let mut cfg = DeliveryConfig::default();
        assert!(notifier_from_config(&cfg).is_ok());
        cfg.webhook_url = Some("http://127.0.0.1:1/hook".to_string());
        assert!(notifier_from_config(&cfg).is_ok());
    }
}
