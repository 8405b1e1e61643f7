//! Overlay builds through an external kustomize binary

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use feature_common::config::DEFAULT_KUSTOMIZE_BIN;
use feature_common::{Error, Result};

/// Builds an overlay directory into a multi-document YAML stream
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OverlayEngine: Send + Sync {
    /// Build the overlay rooted at `dir`
    async fn build(&self, dir: &Path) -> Result<String>;
}

/// Runs `kustomize build <dir>`
#[derive(Clone, Debug)]
pub struct KustomizeCli {
    binary: String,
}

impl Default for KustomizeCli {
    fn default() -> Self {
        Self::new(DEFAULT_KUSTOMIZE_BIN)
    }
}

impl KustomizeCli {
    /// Use the given kustomize binary
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl OverlayEngine for KustomizeCli {
    async fn build(&self, dir: &Path) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("build").arg(dir);

        debug!(command = ?cmd, "Executing kustomize build");

        let output = cmd.output().await.map_err(|e| {
            Error::overlay(
                dir.display().to_string(),
                format!("failed to execute {}: {}", self.binary, e),
            )
        })?;

        if !output.status.success() {
            return Err(Error::overlay(
                dir.display().to_string(),
                format!(
                    "{} build exited with {}: {}",
                    self.binary,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        String::from_utf8(output.stdout).map_err(|e| {
            Error::overlay(
                dir.display().to_string(),
                format!("build output is not UTF-8: {}", e),
            )
        })
    }
}
