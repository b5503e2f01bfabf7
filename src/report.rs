//! Report types produced by the normalizer and consumed by the renderer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Threshold flag for a recognized parameter, or Unrecognized when the
/// label did not match the dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Low,
    Normal,
    High,
    Unrecognized,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Low => "LOW",
            Status::Normal => "NORMAL",
            Status::High => "HIGH",
            Status::Unrecognized => "UNRECOGNIZED",
        }
    }

    pub fn is_abnormal(&self) -> bool {
        matches!(self, Status::Low | Status::High)
    }
}

/// One extracted parameter line after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterResult {
    /// Canonical dictionary name when recognized, otherwise the raw label.
    pub name: String,
    pub value: f64,
    /// Canonical unit after normalization; empty if none was printed.
    pub unit: String,
    /// [low, high] from the matched spec; absent when unrecognized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<[f64; 2]>,
    pub status: Status,
    /// Original OCR line, kept for visibility on unrecognized results.
    pub raw_line: String,
}

/// Patient header fields transcribed from the report, when printed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl PatientDetails {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.age.is_none() && self.gender.is_none() && self.id.is_none()
    }
}

/// The ordered set of parameter results for one uploaded image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub source_file: String,
    pub analyzed_at: String, // RFC3339
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<PatientDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_date: Option<String>,
    pub results: Vec<ParameterResult>,
    pub abnormal_count: usize,
}

impl Report {
    pub fn new(source_file: &str, results: Vec<ParameterResult>) -> Self {
        let abnormal_count = results.iter().filter(|r| r.status.is_abnormal()).count();
        Self {
            id: format!("rep_{}", Uuid::new_v4().simple()),
            source_file: source_file.to_string(),
            analyzed_at: chrono::Utc::now().to_rfc3339(),
            patient: None,
            test_date: None,
            results,
            abnormal_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
