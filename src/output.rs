use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// One line per worker plus a summary
    #[default]
    Text,
    /// One record per worker
    Csv,
    /// Single document with workers and summary
    Json,
}

pub enum OutputWriter {
    File { writer: BufWriter<File>, path: PathBuf },
    Stdout,
}

impl OutputWriter {
    pub async fn new_file(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let file = File::create(path)
            .await
            .with_context(|| format!("creating report file {}", path.display()))?;
        tracing::info!(path = %path.display(), "writing report to file");
        Ok(Self::File { writer: BufWriter::new(file), path: path.to_path_buf() })
    }

    pub fn new_stdout() -> Self {
        Self::Stdout
    }

    pub async fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::new_file(p).await,
            None => Ok(Self::new_stdout()),
        }
    }

    pub async fn write_report(&mut self, body: &str) -> Result<()> {
        match self {
            Self::File { writer, path } => {
                writer
                    .write_all(body.as_bytes())
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                writer.flush().await?;
            }
            Self::Stdout => {
                print!("{body}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_output_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run.csv");
        let mut out = OutputWriter::open(Some(path.as_path())).await.unwrap();
        out.write_report("a,b\n1,2\n").await.unwrap();
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "a,b\n1,2\n");
    }
}
