//! Blood Report Analyzer - upload a blood-test report image, get a
//! structured summary and a PDF rendition back.

mod analyzer;
mod dictionary;
mod normalize;
mod ocr;
mod pdf;
mod report;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use analyzer::{AnalyzeError, Analyzer};
use dictionary::{ParameterDictionary, ParameterSpec};
use ocr::gemini::GeminiExtractor;
use ocr::ExtractionError;
use pdf::RenderError;
use report::Report;

const DEFAULT_PARAMETERS_FILE: &str = "configs/parameters.json";
const MAX_STORED_ANALYSES: usize = 128;

/// A finished analysis kept in memory so the PDF artifact can be fetched
/// after the JSON response. Nothing survives a restart.
struct StoredAnalysis {
    report: Report,
    pdf: Vec<u8>,
}

/// Bounded store of recent analyses; the oldest entry is evicted once the
/// capacity is reached, so sustained traffic cannot grow the map without
/// limit.
struct AnalysisStore {
    entries: HashMap<String, StoredAnalysis>,
    order: VecDeque<String>,
    capacity: usize,
}

impl AnalysisStore {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn insert(&mut self, id: String, analysis: StoredAnalysis) {
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(id.clone());
        self.entries.insert(id, analysis);
    }

    fn get(&self, id: &str) -> Option<&StoredAnalysis> {
        self.entries.get(id)
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    analyzer: Arc<Analyzer>,
    dictionary: Arc<ParameterDictionary>,
    analyses: Arc<RwLock<AnalysisStore>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "blood_report_analyzer=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load the parameter dictionary
    let parameters_file = std::env::var("PARAMETERS_FILE")
        .unwrap_or_else(|_| DEFAULT_PARAMETERS_FILE.to_string());
    let parameters_path = std::path::Path::new(&parameters_file);
    let dictionary = if parameters_path.exists() {
        ParameterDictionary::load_from_file(parameters_path)?
    } else {
        info!("No parameter file at {}, using built-in panel", parameters_file);
        ParameterDictionary::builtin()
    };
    let dictionary = Arc::new(dictionary);
    info!("Parameter dictionary ready: {} parameters", dictionary.len());

    // Initialize the extraction client
    let extractor = GeminiExtractor::from_env(reqwest::Client::new())?;
    info!("Gemini extractor initialized");

    // Build application state
    let state = AppState {
        analyzer: Arc::new(Analyzer::new(Arc::new(extractor), dictionary.clone())),
        dictionary,
        analyses: Arc::new(RwLock::new(AnalysisStore::new(MAX_STORED_ANALYSES))),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/parameters", get(list_parameters))
        .route("/analyze", post(analyze_image))
        .route("/reports/:id", get(get_report))
        .route("/reports/:id/pdf", get(get_report_pdf))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    info!("Server listening on http://0.0.0.0:3000");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// List the loaded parameter specs.
async fn list_parameters(State(state): State<AppState>) -> Json<Vec<ParameterSpec>> {
    Json(state.dictionary.specs().to_vec())
}

#[derive(serde::Serialize)]
struct AnalyzeResponse {
    report: Report,
    pdf_url: String,
}

/// Upload a report image and run the analysis pipeline.
async fn analyze_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, (StatusCode, String)> {
    // Read the uploaded file
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("report").to_string();
            file_data = field.bytes().await.map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?.to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }

    info!("Received file: {} ({} bytes)", filename, file_data.len());

    let analysis = state
        .analyzer
        .analyze(&filename, file_data)
        .await
        .map_err(|e| {
            error!("Analysis failed: {}", e);
            (error_status(&e), e.to_string())
        })?;

    let report = analysis.report.clone();
    let pdf_url = format!("/reports/{}/pdf", report.id);

    // Keep the artifact around for download
    {
        let mut analyses = state.analyses.write().unwrap();
        analyses.insert(
            report.id.clone(),
            StoredAnalysis {
                report: analysis.report,
                pdf: analysis.pdf,
            },
        );
    }

    info!("Analysis complete: {}", report.id);
    Ok(Json(AnalyzeResponse { report, pdf_url }))
}

/// Get a report by ID.
async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Report>, StatusCode> {
    let analyses = state.analyses.read().unwrap();
    analyses
        .get(&id)
        .map(|a| Json(a.report.clone()))
        .ok_or(StatusCode::NOT_FOUND)
}

/// Download the PDF artifact for a report.
async fn get_report_pdf(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<([(header::HeaderName, &'static str); 2], Vec<u8>), StatusCode> {
    let analyses = state.analyses.read().unwrap();
    let stored = analyses.get(&id).ok_or(StatusCode::NOT_FOUND)?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"blood-report-analysis.pdf\"",
            ),
        ],
        stored.pdf.clone(),
    ))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Map pipeline failures to user-facing status codes.
fn error_status(err: &AnalyzeError) -> StatusCode {
    match err {
        AnalyzeError::Extraction(ExtractionError::UnsupportedFormat(_)) => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        AnalyzeError::Extraction(ExtractionError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        AnalyzeError::Extraction(_) => StatusCode::BAD_GATEWAY,
        AnalyzeError::Render(RenderError::EmptyReport) => StatusCode::UNPROCESSABLE_ENTITY,
        AnalyzeError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(report: Report) -> StoredAnalysis {
        StoredAnalysis {
            report,
            pdf: vec![0u8; 4],
        }
    }

    #[test]
    fn test_analysis_store_evicts_oldest() {
        let mut store = AnalysisStore::new(2);
        store.insert("a".to_string(), stored(Report::new("a.jpg", vec![])));
        store.insert("b".to_string(), stored(Report::new("b.jpg", vec![])));
        store.insert("c".to_string(), stored(Report::new("c.jpg", vec![])));

        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        assert!(store.get("c").is_some());
        assert_eq!(store.entries.len(), 2);
        assert_eq!(store.order.len(), 2);
    }

    #[test]
    fn test_error_status_mapping() {
        let unsupported = AnalyzeError::Extraction(ExtractionError::UnsupportedFormat(
            "Gif".to_string(),
        ));
        assert_eq!(error_status(&unsupported), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let timeout = AnalyzeError::Extraction(ExtractionError::Timeout(30));
        assert_eq!(error_status(&timeout), StatusCode::GATEWAY_TIMEOUT);

        let empty = AnalyzeError::Render(RenderError::EmptyReport);
        assert_eq!(error_status(&empty), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
