//! Content fetch stage: one GET, one JSON envelope, one base64 payload.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use tracing::debug;

use crate::model::{ContentEnvelope, FileRef};
use crate::traits::{ContentFetcher, FetchError, IngestError};

/// Fetches file contents from a contents-API style endpoint.
///
/// The wrapped [`reqwest::Client`] carries whatever default headers the
/// caller configured (user agent, authorization).
#[derive(Debug, Clone)]
pub struct HttpContentFetcher {
    http: reqwest::Client,
}

impl HttpContentFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>, IngestError> {
        let response = self
            .http
            .get(&file.url)
            .send()
            .await
            .map_err(FetchError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: file.url.clone(),
            }
            .into());
        }

        let body = response.bytes().await.map_err(FetchError::from)?;
        debug!(path = %file.path, bytes = body.len(), "Fetched content envelope");

        decode_envelope(&body)
    }
}

/// Extracts and base64-decodes the `content` field of a contents envelope.
///
/// Line breaks and other ASCII whitespace inside the payload are ignored;
/// the GitHub contents API wraps base64 at 60 columns.
///
/// # Errors
///
/// [`FetchError::Envelope`] when the body is not a JSON object with a string
/// `content` field, [`IngestError::Encoding`] when the payload is not base64.
pub fn decode_envelope(body: &[u8]) -> Result<Vec<u8>, IngestError> {
    let envelope: ContentEnvelope =
        serde_json::from_slice(body).map_err(|e| FetchError::Envelope(e.to_string()))?;

    let compact: Vec<u8> = envelope
        .content
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    Ok(BASE64_STANDARD.decode(compact)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_decode_envelope_ignores_line_breaks() {
        let encoded = BASE64_STANDARD.encode(b"[{\"scanResults\":{}}]");
        let (head, tail) = encoded.split_at(8);
        let body = json!({ "content": format!("{}\n{}\n", head, tail) }).to_string();

        let decoded = decode_envelope(body.as_bytes()).unwrap();
        assert_eq!(decoded, b"[{\"scanResults\":{}}]");
    }

    #[test]
    fn test_decode_envelope_rejects_invalid_base64() {
        let body = json!({ "content": "!!not base64!!" }).to_string();
        let err = decode_envelope(body.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), "encoding");
    }

    #[test]
    fn test_decode_envelope_rejects_missing_content() {
        let err = decode_envelope(br#"{"message": "Not Found"}"#).unwrap_err();
        assert!(matches!(err, IngestError::Fetch(FetchError::Envelope(_))));
    }

    #[tokio::test]
    async fn test_fetch_decodes_remote_payload() {
        let payload = BASE64_STANDARD.encode(b"[]");
        let router = Router::new().route(
            "/contents/scan.json",
            get(move || {
                let payload = payload.clone();
                async move { Json(json!({ "content": payload })) }
            }),
        );
        let base = serve(router).await;

        let fetcher = HttpContentFetcher::new(reqwest::Client::new());
        let file = FileRef::new("scan.json", format!("{}/contents/scan.json", base));

        assert_eq!(fetcher.fetch(&file).await.unwrap(), b"[]");
    }

    #[tokio::test]
    async fn test_fetch_reports_http_status() {
        let router = Router::new().route(
            "/contents/missing.json",
            get(|| async { (StatusCode::NOT_FOUND, "gone") }),
        );
        let base = serve(router).await;

        let fetcher = HttpContentFetcher::new(reqwest::Client::new());
        let file = FileRef::new("missing.json", format!("{}/contents/missing.json", base));

        match fetcher.fetch(&file).await {
            Err(IngestError::Fetch(FetchError::Status { status, .. })) => assert_eq!(status, 404),
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_reports_unreachable_host() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = HttpContentFetcher::new(reqwest::Client::new());
        let file = FileRef::new("scan.json", format!("http://{}/scan.json", addr));

        let err = fetcher.fetch(&file).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(FetchError::Network(_))));
    }
}
