use crate::chunking::normalize_text;
use crate::error::{ErrorKind, PipelineError};
use crate::models::{Document, Page};
use crate::traits::DocumentLoader;
use async_trait::async_trait;
use lopdf::Document as PdfDocument;
use std::path::Path;
use tracing::debug;

/// Rejects missing, non-regular and empty files before any parsing.
pub async fn validate_source_file(path: &Path) -> Result<u64, PipelineError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|_| {
        PipelineError::new(
            ErrorKind::FileNotFound,
            format!("file not found: {}", path.display()),
        )
    })?;

    if !metadata.is_file() {
        return Err(PipelineError::new(
            ErrorKind::NotFile,
            format!("path is not a file: {}", path.display()),
        ));
    }
    if metadata.len() == 0 {
        return Err(PipelineError::new(
            ErrorKind::EmptyFile,
            format!("file is empty: {}", path.display()),
        ));
    }

    debug!(path = %path.display(), bytes = metadata.len(), "source file validated");
    Ok(metadata.len())
}

fn into_document(path: &Path, pages: Vec<Page>) -> Result<Document, PipelineError> {
    let pages = pages
        .into_iter()
        .map(|page| Page {
            number: page.number,
            text: normalize_text(&page.text),
        })
        .filter(|page| !page.text.is_empty())
        .collect::<Vec<_>>();

    if pages.is_empty() {
        return Err(PipelineError::new(
            ErrorKind::EmptyDocument,
            format!("no readable page text in {}", path.display()),
        ));
    }

    Ok(Document {
        source: path.to_string_lossy().to_string(),
        pages,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfLoader;

impl PdfLoader {
    fn extract_pages(path: &Path) -> Result<Vec<Page>, PipelineError> {
        let parse_error =
            |error: lopdf::Error| PipelineError::new(ErrorKind::DocumentParse, error.to_string());

        let document = PdfDocument::load(path).map_err(parse_error)?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document.extract_text(&[page_no]).map_err(parse_error)?;
            pages.push(Page {
                number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

#[async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self, source: &Path) -> Result<Document, PipelineError> {
        validate_source_file(source).await?;

        let path = source.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || Self::extract_pages(&path))
            .await
            .map_err(|error| {
                PipelineError::new(
                    ErrorKind::DocumentParse,
                    format!("pdf extraction task failed: {error}"),
                )
            })??;

        into_document(source, pages)
    }
}

/// Plain UTF-8 text; form feeds separate pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLoader;

pub fn split_form_feed_pages(raw: &str) -> Vec<Page> {
    raw.split('\u{000c}')
        .enumerate()
        .map(|(index, text)| Page {
            number: (index + 1) as u32,
            text: text.to_string(),
        })
        .collect()
}

#[async_trait]
impl DocumentLoader for TextLoader {
    async fn load(&self, source: &Path) -> Result<Document, PipelineError> {
        validate_source_file(source).await?;

        let bytes = tokio::fs::read(source).await.map_err(|error| {
            PipelineError::new(
                ErrorKind::FileNotFound,
                format!("cannot read {}: {error}", source.display()),
            )
        })?;
        let raw = String::from_utf8(bytes).map_err(|_| {
            PipelineError::new(
                ErrorKind::DocumentParse,
                format!("{} is not valid UTF-8 text", source.display()),
            )
        })?;

        into_document(source, split_form_feed_pages(&raw))
    }
}

/// Picks the loader from the file extension: `.pdf` or plain text.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoLoader;

pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

pub fn loader_for_path(path: &Path) -> &'static dyn DocumentLoader {
    if is_pdf(path) {
        &PdfLoader
    } else {
        &TextLoader
    }
}

#[async_trait]
impl DocumentLoader for AutoLoader {
    async fn load(&self, source: &Path) -> Result<Document, PipelineError> {
        loader_for_path(source).load(source).await
    }
}
