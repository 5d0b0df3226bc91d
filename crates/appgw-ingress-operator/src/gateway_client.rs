//! Application Gateway management API seam
//!
//! The controller only needs to read the deployed configuration and write
//! a new one. [`FileGatewayClient`] keeps the configuration in a JSON
//! document in the ARM shape, which is what local runs and tests use.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::appgw::ApplicationGateway;

/// Read and replace the gateway configuration
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Currently deployed configuration
    async fn get(&self) -> Result<ApplicationGateway, GatewayClientError>;

    /// Replace the deployed configuration with `gateway`
    async fn update(&self, gateway: &ApplicationGateway) -> Result<(), GatewayClientError>;
}

#[derive(Debug, Error)]
pub enum GatewayClientError {
    #[error("failed to access gateway configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("gateway configuration at {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("gateway configuration could not be serialized: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl GatewayClientError {
    /// True when retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayClientError::Io { .. })
    }
}

/// [`GatewayClient`] over a JSON document on disk
pub struct FileGatewayClient {
    path: PathBuf,
}

impl FileGatewayClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> GatewayClientError {
        GatewayClientError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl GatewayClient for FileGatewayClient {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn get(&self) -> Result<ApplicationGateway, GatewayClientError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        let gateway = serde_json::from_slice(&raw).map_err(|source| GatewayClientError::Parse {
            path: self.path.clone(),
            source,
        })?;
        debug!(bytes = raw.len(), "Read gateway configuration");
        Ok(gateway)
    }

    #[instrument(skip(self, gateway), fields(path = %self.path.display()))]
    async fn update(&self, gateway: &ApplicationGateway) -> Result<(), GatewayClientError> {
        let raw = serde_json::to_vec_pretty(gateway).map_err(GatewayClientError::Serialize)?;

        // Write beside the target and rename so readers never see a partial document
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &raw)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        debug!(bytes = raw.len(), "Wrote gateway configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn test_update_then_get() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = FileGatewayClient::new(dir.path().join("appgw.json"));
        let gateway = fixtures::app_gateway();

        client.update(&gateway).await.expect("update succeeds");
        let read = client.get().await.expect("get succeeds");
        assert_eq!(read, gateway);
    }

    #[tokio::test]
    async fn test_unknown_fields_survive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("appgw.json");
        let document = serde_json::json!({
            "name": "gw",
            "location": "westeurope",
            "properties": {
                "sku": {"name": "Standard_v2", "tier": "Standard_v2"},
                "probes": [],
                "httpListeners": [{
                    "name": "fl-80",
                    "properties": {"protocol": "Http", "customErrorConfigurations": []}
                }]
            }
        });
        tokio::fs::write(&path, serde_json::to_vec(&document).expect("serializes"))
            .await
            .expect("write fixture");

        let client = FileGatewayClient::new(&path);
        let gateway = client.get().await.expect("get succeeds");
        assert!(gateway.properties.extra.contains_key("sku"));
        assert!(gateway.properties.http_listeners[0]
            .properties
            .extra
            .contains_key("customErrorConfigurations"));

        client.update(&gateway).await.expect("update succeeds");
        let written: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.expect("read back")).expect("valid json");
        assert_eq!(written["properties"]["sku"]["tier"], "Standard_v2");
    }

    #[tokio::test]
    async fn test_missing_file_is_transient() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = FileGatewayClient::new(dir.path().join("missing.json"));

        let err = client.get().await.expect_err("missing file");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_invalid_document_is_permanent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("appgw.json");
        tokio::fs::write(&path, b"not json").await.expect("write fixture");

        let err = FileGatewayClient::new(&path).get().await.expect_err("invalid json");
        assert!(matches!(err, GatewayClientError::Parse { .. }));
        assert!(!err.is_transient());
    }
}
