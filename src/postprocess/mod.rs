//! Post-processing of generated images: background removal followed by icon
//! packaging.

pub mod command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::{OutputConfig, ProcessingConfig};

pub use command::CommandProcessor;

/// A batch stage over image files.
///
/// Implementations skip inputs they do not support and tolerate per-file
/// failures: the returned list only holds the outputs that were produced.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, path: &Path) -> bool;

    async fn process_batch(&self, paths: &[PathBuf], out_dir: &Path) -> Vec<PathBuf>;
}

/// Files produced by a post-processing pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOutput {
    pub processed: Vec<PathBuf>,
    pub icons: Vec<PathBuf>,
}

/// Drives the two post-processing stages
pub struct PostProcessor {
    background: Option<Arc<dyn BatchProcessor>>,
    icons: Option<Arc<dyn BatchProcessor>>,
    processed_dir: PathBuf,
    icons_dir: PathBuf,
}

impl PostProcessor {
    pub fn new(
        background: Option<Arc<dyn BatchProcessor>>,
        icons: Option<Arc<dyn BatchProcessor>>,
        processed_dir: impl Into<PathBuf>,
        icons_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            background,
            icons,
            processed_dir: processed_dir.into(),
            icons_dir: icons_dir.into(),
        }
    }

    /// Both stages backed by the configured external commands
    pub fn from_config(processing: &ProcessingConfig, output: &OutputConfig) -> Self {
        Self::new(
            Some(Arc::new(CommandProcessor::background_remover(processing))),
            Some(Arc::new(CommandProcessor::icon_converter(processing))),
            output.processed_dir.clone(),
            output.icons_dir.clone(),
        )
    }

    /// Run background removal and/or icon packaging over `paths`.
    ///
    /// When background removal runs, its outputs feed the icon stage along
    /// with any inputs it did not support (for example `svg`). The icon stage
    /// then drops whatever it cannot convert.
    pub async fn run(&self, paths: &[PathBuf], remove_bg: bool, create_ico: bool) -> ProcessingOutput {
        let mut output = ProcessingOutput::default();
        if paths.is_empty() {
            return output;
        }

        let icon_sources = match (&self.background, remove_bg) {
            (Some(stage), true) => {
                let (supported, passthrough): (Vec<PathBuf>, Vec<PathBuf>) =
                    paths.iter().cloned().partition(|p| stage.supports(p));
                info!(
                    stage = stage.name(),
                    files = supported.len(),
                    skipped = passthrough.len(),
                    "Removing backgrounds"
                );
                if !supported.is_empty() {
                    output.processed = stage.process_batch(&supported, &self.processed_dir).await;
                }
                output.processed.iter().cloned().chain(passthrough).collect()
            }
            _ => paths.to_vec(),
        };

        if let (Some(stage), true) = (&self.icons, create_ico) {
            let supported: Vec<PathBuf> = icon_sources
                .into_iter()
                .filter(|p| stage.supports(p))
                .collect();
            info!(stage = stage.name(), files = supported.len(), "Creating icons");
            if !supported.is_empty() {
                output.icons = stage.process_batch(&supported, &self.icons_dir).await;
            }
        }

        info!(
            processed = output.processed.len(),
            icons = output.icons.len(),
            "Processing complete"
        );
        output
    }
}

/// Lowercased file extension
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
