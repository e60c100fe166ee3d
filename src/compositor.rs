//! Remote compositor: turns the captured raster into a finished document.

use crate::rendering::RasterImage;
use crate::Result;
use async_trait::async_trait;

/// Content type assumed when the compositor does not send one.
pub const DEFAULT_ARTIFACT_TYPE: &str = "application/pdf";

/// Opaque document bytes returned by the compositor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl ExportArtifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[async_trait]
pub trait Compositor: Send + Sync {
    async fn compose(&self, image: &RasterImage) -> Result<ExportArtifact>;
}

#[cfg(feature = "http")]
pub use http::HttpCompositor;

#[cfg(feature = "http")]
mod http {
    use super::{Compositor, ExportArtifact, DEFAULT_ARTIFACT_TYPE};
    use crate::rendering::RasterImage;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use log::debug;
    use reqwest::Client;
    use std::time::Duration;

    /// POSTs `{"screenshot": "<data URI>"}` and returns the response body.
    #[derive(Debug, Clone)]
    pub struct HttpCompositor {
        client: Client,
        endpoint: url::Url,
    }

    impl HttpCompositor {
        pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
            let endpoint = url::Url::parse(endpoint)
                .map_err(|e| Error::ConfigError(format!("invalid compositor url `{}`: {}", endpoint, e)))?;
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
            Ok(Self { client, endpoint })
        }

        pub fn endpoint(&self) -> &url::Url {
            &self.endpoint
        }
    }

    #[async_trait]
    impl Compositor for HttpCompositor {
        async fn compose(&self, image: &RasterImage) -> Result<ExportArtifact> {
            let body = serde_json::json!({ "screenshot": image.to_data_uri() });
            let resp = self
                .client
                .post(self.endpoint.clone())
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::TransmissionError(format!("request to {} failed: {}", self.endpoint, e)))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(Error::TransmissionError(format!("compositor responded with {}", status)));
            }
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| DEFAULT_ARTIFACT_TYPE.to_string());
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| Error::TransmissionError(format!("failed to read compositor response: {}", e)))?;
            if bytes.is_empty() {
                return Err(Error::TransmissionError("compositor returned an empty body".into()));
            }
            debug!("compositor returned {} bytes ({})", bytes.len(), content_type);
            Ok(ExportArtifact { bytes: bytes.to_vec(), content_type })
        }
    }

}
