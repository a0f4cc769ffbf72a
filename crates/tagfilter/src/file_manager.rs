use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::DEFAULT_MAX_INPUT_BYTES;

/// Reads markup to filter and writes the cleaned result.
pub struct FileManager {
    max_input_bytes: u64,
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INPUT_BYTES)
    }
}

impl FileManager {
    pub fn new(max_input_bytes: u64) -> Self {
        Self { max_input_bytes }
    }

    pub fn max_input_bytes(&self) -> u64 {
        self.max_input_bytes
    }

    pub async fn read_input(&self, path: &Path) -> Result<String> {
        // Validate file path
        if !path.exists() {
            return Err(anyhow::anyhow!("File not found: {}", path.display()));
        }

        if !path.is_file() {
            return Err(anyhow::anyhow!("Path is not a file: {}", path.display()));
        }

        match fs::metadata(path).await {
            Ok(metadata) if metadata.len() > self.max_input_bytes => {
                return Err(anyhow::anyhow!(
                    "Input is too large ({} bytes, limit {}): {}",
                    metadata.len(),
                    self.max_input_bytes,
                    path.display()
                ));
            }
            Ok(_) => {}
            Err(e) => log::warn!("Failed to get file metadata: {}", e),
        }

        match fs::read_to_string(path).await {
            Ok(content) => {
                self.check_content(&content, &path.display().to_string())?;
                log::info!("Successfully read input: {}", path.display());
                Ok(content)
            }
            Err(e) => {
                let error_msg = match e.kind() {
                    std::io::ErrorKind::PermissionDenied => {
                        format!("Permission denied: {}", path.display())
                    }
                    std::io::ErrorKind::NotFound => {
                        format!("File not found: {}", path.display())
                    }
                    std::io::ErrorKind::InvalidData => {
                        format!("Input is not valid UTF-8: {}", path.display())
                    }
                    _ => format!("Failed to read {}: {}", path.display(), e),
                };
                Err(anyhow::anyhow!(error_msg))
            }
        }
    }

    pub async fn read_stdin(&self) -> Result<String> {
        let mut content = String::new();
        tokio::io::stdin()
            .take(self.max_input_bytes + 1)
            .read_to_string(&mut content)
            .await?;

        if content.len() as u64 > self.max_input_bytes {
            return Err(anyhow::anyhow!(
                "Input is too large (limit {} bytes): <stdin>",
                self.max_input_bytes
            ));
        }
        self.check_content(&content, "<stdin>")?;
        Ok(content)
    }

    fn check_content(&self, content: &str, source: &str) -> Result<()> {
        if content.contains('\0') {
            return Err(anyhow::anyhow!("Input looks like binary data: {}", source));
        }
        Ok(())
    }

    /// Writes to `path`, or to stdout when no path is given.
    pub async fn write_output(&self, path: Option<&PathBuf>, content: &str) -> Result<()> {
        match path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(path, content).await.map_err(|e| {
                    anyhow::anyhow!("Failed to write output {}: {}", path.display(), e)
                })?;
                log::info!("Wrote {} bytes to {}", content.len(), path.display());
            }
            None => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(content.as_bytes()).await?;
                stdout.flush().await?;
            }
        }
        Ok(())
    }
}
