//! Where chunk-streams of artifact records come from.

use crate::error::ScanError;
use crate::http::check_response;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vulnfix_types::alert::ArtifactRecord;

/// One chunk's worth of artifact records, produced incrementally.
pub type ChunkStream = BoxStream<'static, Result<ArtifactRecord, ScanError>>;

/// Opens a stream of alert records for up to one batch of purls.
///
/// Implementations must stop producing records once `cancel` fires.
#[async_trait]
pub trait AlertSource: Send + Sync {
    async fn open_chunk(
        &self,
        purls: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ScanError>;
}

#[derive(Serialize)]
struct ComponentsRequest<'a> {
    components: Vec<Component<'a>>,
}

#[derive(Serialize)]
struct Component<'a> {
    purl: &'a str,
}

/// Batch alert API over HTTP, reading the response as NDJSON.
#[derive(Debug, Clone)]
pub struct HttpAlertSource {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpAlertSource {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Result<Self, ScanError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("vulnfix/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_token,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/purl?alerts=true&compact=true",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl AlertSource for HttpAlertSource {
    async fn open_chunk(
        &self,
        purls: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ScanError> {
        let body = ComponentsRequest {
            components: purls.iter().map(|purl| Component { purl }).collect(),
        };
        let mut req = self.http.post(self.endpoint()).json(&body);
        if let Some(token) = &self.api_token {
            req = req.basic_auth(token, None::<&str>);
        }

        debug!(count = purls.len(), "requesting alert chunk");
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            resp = req.send() => resp?,
        };
        let resp = check_response(resp).await?;

        let bytes = resp.bytes_stream().map_err(std::io::Error::other);
        let lines = FramedRead::new(StreamReader::new(bytes), LinesCodec::new());

        let records = lines
            .take_until(cancel.cancelled_owned())
            .filter_map(|line| async move { decode_line(line) })
            .boxed();
        Ok(records)
    }
}

fn decode_line(
    line: Result<String, tokio_util::codec::LinesCodecError>,
) -> Option<Result<ArtifactRecord, ScanError>> {
    match line {
        Ok(text) if text.trim().is_empty() => None,
        Ok(text) => Some(serde_json::from_str(&text).map_err(ScanError::from)),
        Err(e) => Some(Err(ScanError::Decode(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trims_trailing_slash() {
        let source = HttpAlertSource::new("https://api.example.test/v0/", None).unwrap();
        assert_eq!(
            source.endpoint(),
            "https://api.example.test/v0/purl?alerts=true&compact=true"
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(decode_line(Ok("   ".to_string())).is_none());
    }

    #[test]
    fn record_line_decodes() {
        let line = r#"{"type":"npm","name":"lodash","version":"4.17.20","alerts":[]}"#;
        let record = decode_line(Ok(line.to_string())).unwrap().unwrap();
        assert_eq!(record.name, "lodash");
    }

    #[test]
    fn malformed_line_is_an_error() {
        let out = decode_line(Ok("{not json".to_string())).unwrap();
        assert!(matches!(out, Err(ScanError::Json(_))));
    }

    #[test]
    fn request_body_shape() {
        let purls = ["pkg:npm/a@1.0.0".to_string()];
        let body = ComponentsRequest {
            components: purls.iter().map(|purl| Component { purl }).collect(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"components": [{"purl": "pkg:npm/a@1.0.0"}]})
        );
    }
}
