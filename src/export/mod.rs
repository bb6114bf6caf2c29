pub mod csv;
pub mod jsonl;
pub mod types;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::PullRequest;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to create output file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write PR {number}: {source}")]
    Write {
        number: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize PR {number}: {source}")]
    Serialize {
        number: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write CSV: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("Failed to flush output file: {0}")]
    Flush(#[source] std::io::Error),

    #[error("Failed to read size of {path}: {source}")]
    FileSize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Output format, doubling as the file extension.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Jsonl,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub path: PathBuf,
    pub include_diffs: bool,
}

/// A serialization strategy writing hydrated PRs to a single file.
pub trait Exporter {
    fn export(&self, prs: &[PullRequest]) -> Result<(), ExportError>;

    fn path(&self) -> &Path;

    /// Size of the written file in bytes.
    fn file_size(&self) -> Result<u64, ExportError> {
        let path = self.path();
        std::fs::metadata(path)
            .map(|meta| meta.len())
            .map_err(|source| ExportError::FileSize {
                path: path.to_path_buf(),
                source,
            })
    }
}

pub fn new_exporter(options: ExportOptions) -> Box<dyn Exporter> {
    match options.format {
        ExportFormat::Jsonl => Box::new(jsonl::JsonlExporter::new(
            options.path,
            options.include_diffs,
        )),
        ExportFormat::Csv => Box::new(csv::CsvExporter::new(options.path, options.include_diffs)),
    }
}

fn create_file(path: &Path) -> Result<std::fs::File, ExportError> {
    std::fs::File::create(path).map_err(|source| ExportError::Create {
        path: path.to_path_buf(),
        source,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_format_extension_and_display() {
        assert_eq!(ExportFormat::Jsonl.extension(), "jsonl");
        assert_eq!(ExportFormat::Csv.to_string(), "csv");
        assert_eq!(ExportFormat::default(), ExportFormat::Jsonl);
    }

    #[test]
    fn test_new_exporter_reports_file_size() {
        let dir = tempfile::tempdir().unwrap();
        for format in [ExportFormat::Jsonl, ExportFormat::Csv] {
            let path = dir.path().join(format!("out.{format}"));
            let exporter = new_exporter(ExportOptions {
                format,
                path: path.clone(),
                include_diffs: false,
            });
            exporter
                .export(&[pull_request(1, "2024-01-02T00:00:00Z")])
                .unwrap();
            let size = exporter.file_size().unwrap();
            assert_eq!(size, std::fs::metadata(&path).unwrap().len());
            assert!(size > 0);
        }
    }

    #[test]
    fn test_file_size_of_missing_file_is_distinct_error() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = new_exporter(ExportOptions {
            format: ExportFormat::Jsonl,
            path: dir.path().join("never-written.jsonl"),
            include_diffs: false,
        });
        assert!(matches!(
            exporter.file_size().unwrap_err(),
            ExportError::FileSize { .. }
        ));
    }

    #[test]
    fn test_unwritable_path_is_create_error() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = new_exporter(ExportOptions {
            format: ExportFormat::Csv,
            path: dir.path().join("missing").join("out.csv"),
            include_diffs: false,
        });
        assert!(matches!(
            exporter.export(&[]).unwrap_err(),
            ExportError::Create { .. }
        ));
    }
}
