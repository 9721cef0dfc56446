//! Batch stage backed by an external program

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ProcessingConfig;
use crate::error::{AppError, Result};
use crate::postprocess::{extension_of, BatchProcessor};

const RASTER_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];
const ICON_SOURCE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Runs one external command per file.
///
/// The argv template may contain `{input}`, `{output}` and `{sizes}`
/// placeholders. The output file is `{out_dir}/{stem}{suffix}`.
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    name: String,
    template: Vec<String>,
    extensions: Vec<String>,
    output_suffix: String,
    sizes: String,
}

impl CommandProcessor {
    pub fn new(
        name: impl Into<String>,
        template: Vec<String>,
        extensions: &[&str],
        output_suffix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
            output_suffix: output_suffix.into(),
            sizes: String::new(),
        }
    }

    pub fn with_sizes(mut self, sizes: &[u32]) -> Self {
        self.sizes = sizes
            .iter()
            .map(|size| size.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self
    }

    pub fn background_remover(config: &ProcessingConfig) -> Self {
        Self::new(
            "background_removal",
            config.background_command.clone(),
            &RASTER_EXTENSIONS,
            "_nobg.png",
        )
    }

    pub fn icon_converter(config: &ProcessingConfig) -> Self {
        Self::new(
            "ico_conversion",
            config.icon_command.clone(),
            &ICON_SOURCE_EXTENSIONS,
            ".ico",
        )
        .with_sizes(&config.ico_sizes)
    }

    pub fn output_path(&self, input: &Path, out_dir: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        out_dir.join(format!("{}{}", stem, self.output_suffix))
    }

    fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.template
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{sizes}", &self.sizes)
            })
            .collect()
    }

    async fn process_one(&self, input: &Path, out_dir: &Path) -> Result<PathBuf> {
        let output = self.output_path(input, out_dir);
        let args = self.render_args(input, &output);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| AppError::Processing(format!("{}: empty command", self.name)))?;

        debug!(stage = %self.name, program = %program, input = %input.display(), "Running command");

        let result = Command::new(program)
            .args(rest)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Processing(format!("{}: failed to run {}: {}", self.name, program, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(AppError::Processing(format!(
                "{}: {} exited with {}: {}",
                self.name,
                program,
                result.status,
                stderr.trim()
            )));
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(AppError::Processing(format!(
                "{}: no output written to {}",
                self.name,
                output.display()
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl BatchProcessor for CommandProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    async fn process_batch(&self, paths: &[PathBuf], out_dir: &Path) -> Vec<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(out_dir).await {
            warn!(stage = %self.name, dir = %out_dir.display(), error = %e, "Cannot create output directory");
            return Vec::new();
        }

        let mut outputs = Vec::with_capacity(paths.len());
        for path in paths {
            if !self.supports(path) {
                debug!(stage = %self.name, file = %path.display(), "Skipping unsupported file");
                continue;
            }
            match self.process_one(path, out_dir).await {
                Ok(output) => outputs.push(output),
                Err(e) => warn!(stage = %self.name, file = %path.display(), error = %e, "File failed"),
            }
        }

        info!(
            stage = %self.name,
            inputs = paths.len(),
            outputs = outputs.len(),
            "Batch finished"
        );
        outputs
    }
}
