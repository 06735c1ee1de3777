use crate::error::PipelineError;
use crate::models::Namespace;
use crate::retry::RetryStats;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const DOCUMENT_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

/// Every ingestible file under `folder`, sorted by path.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                DOCUMENT_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStage {
    Pending,
    Chunking,
    Embedding,
    Upserting,
    Completed,
    Failed,
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IngestionStage::Pending => "pending",
            IngestionStage::Chunking => "chunking",
            IngestionStage::Embedding => "embedding",
            IngestionStage::Upserting => "upserting",
            IngestionStage::Completed => "completed",
            IngestionStage::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub namespace: Namespace,
    pub chunk_count: usize,
    pub batch_count: usize,
    pub elapsed_seconds: f64,
    pub rate_per_second: f64,
    pub retry: RetryStats,
}

/// Result of one file in a multi-file ingestion.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub namespace: Namespace,
    pub result: Result<IngestionReport, PipelineError>,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("b.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        fs::write(base.join("a.TXT"), "notes")?;
        fs::write(nested.join("c.md"), "# heading")?;
        fs::write(base.join("image.png"), [0u8, 1, 2])?;

        let files = discover_documents(base);
        let names: Vec<_> = files
            .iter()
            .map(|path| path.strip_prefix(base).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.TXT", "b.pdf", "nested/c.md"]);
        Ok(())
    }

    #[test]
    fn empty_folder_has_no_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(discover_documents(dir.path()).is_empty());
        Ok(())
    }

    #[test]
    fn stages_render_in_snake_case() {
        assert_eq!(IngestionStage::Upserting.to_string(), "upserting");
        assert_eq!(
            serde_json::to_string(&IngestionStage::Completed).unwrap(),
            "\"completed\""
        );
    }
}
