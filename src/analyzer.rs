//! Per-upload analysis pipeline: extract -> normalize -> render.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::dictionary::ParameterDictionary;
use crate::normalize::Normalizer;
use crate::ocr::{ExtractionError, ImageUpload, TextExtractor};
use crate::pdf::{self, RenderError};
use crate::report::Report;

/// A completed analysis: the structured report plus its PDF rendition.
#[derive(Debug)]
pub struct Analysis {
    pub report: Report,
    pub pdf: Vec<u8>,
}

/// Any component failure aborts the whole request; no partial results.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Pipeline orchestrator. Stateless across requests; the dictionary is
/// read-only and shared.
pub struct Analyzer {
    extractor: Arc<dyn TextExtractor>,
    normalizer: Normalizer,
}

impl Analyzer {
    pub fn new(extractor: Arc<dyn TextExtractor>, dictionary: Arc<ParameterDictionary>) -> Self {
        Self {
            extractor,
            normalizer: Normalizer::new(dictionary),
        }
    }

    /// Run the full pipeline for one uploaded image.
    pub async fn analyze(
        &self,
        filename: &str,
        image: Vec<u8>,
    ) -> Result<Analysis, AnalyzeError> {
        let upload = ImageUpload {
            filename: filename.to_string(),
            data: image,
        };

        info!(
            "Analyzing {} ({} bytes) via {}",
            upload.filename,
            upload.data.len(),
            self.extractor.name()
        );

        let raw_text = self.extractor.extract(&upload).await?;
        let report = self.normalizer.normalize(filename, &raw_text);

        info!(
            "Normalized {}: {} results, {} abnormal",
            report.id,
            report.results.len(),
            report.abnormal_count
        );

        let pdf = pdf::render(&report)?;

        Ok(Analysis { report, pdf })
    }
}
