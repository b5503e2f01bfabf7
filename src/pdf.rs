//! PDF rendering of a normalized report via `printpdf`.
//!
//! One table row per parameter result; Low/High rows are drawn in red,
//! Normal in green, Unrecognized in gray. Always appends the fixed
//! disclaimer block.

use printpdf::{BuiltinFont, Color, IndirectFontRef, Mm, PdfDocument, PdfLayerReference, Rgb};
use std::io::BufWriter;
use thiserror::Error;
use tracing::debug;

use crate::report::{Report, Status};

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const TOP_Y: Mm = Mm(280.0);
const BOTTOM_MARGIN: Mm = Mm(20.0);

// Table column x positions.
const COL_NAME: Mm = Mm(20.0);
const COL_VALUE: Mm = Mm(80.0);
const COL_UNIT: Mm = Mm(105.0);
const COL_RANGE: Mm = Mm(130.0);
const COL_STATUS: Mm = Mm(168.0);

const DISCLAIMER: [&str; 4] = [
    "This analysis is for informational purposes only and does not constitute medical advice.",
    "Please consult a healthcare professional for diagnosis and treatment.",
    "Values may be extracted inaccurately if the image quality is poor.",
    "Always verify results against the original laboratory report.",
];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("nothing to render: report contains no results")]
    EmptyReport,
    #[error("PDF generation failed: {0}")]
    Pdf(String),
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    italic: IndirectFontRef,
}

/// Render the report to PDF bytes. Fails on an empty report so the caller
/// can surface the problem instead of serving a blank document.
pub fn render(report: &Report) -> Result<Vec<u8>, RenderError> {
    if report.is_empty() {
        return Err(RenderError::EmptyReport);
    }

    let (doc, page, layer_idx) = PdfDocument::new(
        "Blood Test Report Analysis",
        PAGE_WIDTH,
        PAGE_HEIGHT,
        "Layer 1",
    );
    let mut layer = doc.get_page(page).get_layer(layer_idx);

    let fonts = Fonts {
        regular: doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| RenderError::Pdf(format!("font error: {e}")))?,
        bold: doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| RenderError::Pdf(format!("font error: {e}")))?,
        italic: doc
            .add_builtin_font(BuiltinFont::HelveticaOblique)
            .map_err(|e| RenderError::Pdf(format!("font error: {e}")))?,
    };

    let mut y = TOP_Y;

    // Header
    layer.use_text("Blood Test Report Analysis", 16.0, Mm(20.0), y, &fonts.bold);
    y -= Mm(8.0);
    layer.use_text(
        format!("Generated: {}", report.analyzed_at),
        9.0,
        Mm(20.0),
        y,
        &fonts.regular,
    );
    y -= Mm(4.5);
    layer.use_text(
        format!("Source: {}", report.source_file),
        9.0,
        Mm(20.0),
        y,
        &fonts.regular,
    );
    y -= Mm(4.5);

    // Patient details, when the report carried them
    if let Some(patient) = &report.patient {
        if let Some(name) = &patient.name {
            layer.use_text(format!("Patient: {}", name), 9.0, Mm(20.0), y, &fonts.regular);
            y -= Mm(4.5);
        }
        if patient.age.is_some() || patient.gender.is_some() {
            let age_gender = format!(
                "Age/Gender: {} / {}",
                patient.age.as_deref().unwrap_or("-"),
                patient.gender.as_deref().unwrap_or("-")
            );
            layer.use_text(age_gender, 9.0, Mm(20.0), y, &fonts.regular);
            y -= Mm(4.5);
        }
        if let Some(id) = &patient.id {
            layer.use_text(format!("Patient ID: {}", id), 9.0, Mm(20.0), y, &fonts.regular);
            y -= Mm(4.5);
        }
    }
    if let Some(test_date) = &report.test_date {
        layer.use_text(
            format!("Test Date: {}", test_date),
            9.0,
            Mm(20.0),
            y,
            &fonts.regular,
        );
        y -= Mm(4.5);
    }

    layer.use_text(
        format!(
            "{} parameters, {} out of range",
            report.results.len(),
            report.abnormal_count
        ),
        9.0,
        Mm(20.0),
        y,
        &fonts.regular,
    );
    y -= Mm(10.0);

    // Table header
    table_header(&layer, &fonts, y);
    y -= Mm(6.0);

    // Rows
    for result in &report.results {
        if y.0 < BOTTOM_MARGIN.0 {
            let (next_page, next_layer) = doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
            layer = doc.get_page(next_page).get_layer(next_layer);
            y = TOP_Y;
            table_header(&layer, &fonts, y);
            y -= Mm(6.0);
        }

        let range = result
            .reference_range
            .map(|[low, high]| format!("{} - {}", trim_float(low), trim_float(high)))
            .unwrap_or_else(|| "-".to_string());

        set_text_color(&layer, status_color(result.status));
        layer.use_text(truncate(&result.name, 34), 9.0, COL_NAME, y, &fonts.regular);
        layer.use_text(trim_float(result.value), 9.0, COL_VALUE, y, &fonts.regular);
        layer.use_text(truncate(&result.unit, 12), 9.0, COL_UNIT, y, &fonts.regular);
        layer.use_text(range, 9.0, COL_RANGE, y, &fonts.regular);
        layer.use_text(result.status.label(), 9.0, COL_STATUS, y, &fonts.bold);
        set_text_color(&layer, black());

        y -= Mm(5.5);
    }

    // Disclaimer
    y -= Mm(8.0);
    if y.0 < BOTTOM_MARGIN.0 + 30.0 {
        let (next_page, next_layer) = doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
        layer = doc.get_page(next_page).get_layer(next_layer);
        y = TOP_Y;
    }
    layer.use_text("Disclaimer", 11.0, Mm(20.0), y, &fonts.bold);
    y -= Mm(6.0);
    set_text_color(&layer, gray());
    for (i, line) in DISCLAIMER.iter().enumerate() {
        layer.use_text(
            format!("{}. {}", i + 1, line),
            8.0,
            Mm(20.0),
            y,
            &fonts.italic,
        );
        y -= Mm(4.0);
    }
    set_text_color(&layer, black());

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf)
        .map_err(|e| RenderError::Pdf(format!("save error: {e}")))?;
    let bytes = buf
        .into_inner()
        .map_err(|e| RenderError::Pdf(format!("buffer error: {e}")))?;

    debug!("Rendered PDF: {} bytes for report {}", bytes.len(), report.id);
    Ok(bytes)
}

fn table_header(layer: &PdfLayerReference, fonts: &Fonts, y: Mm) {
    layer.use_text("Parameter", 10.0, COL_NAME, y, &fonts.bold);
    layer.use_text("Value", 10.0, COL_VALUE, y, &fonts.bold);
    layer.use_text("Unit", 10.0, COL_UNIT, y, &fonts.bold);
    layer.use_text("Normal Range", 10.0, COL_RANGE, y, &fonts.bold);
    layer.use_text("Status", 10.0, COL_STATUS, y, &fonts.bold);
}

fn set_text_color(layer: &PdfLayerReference, color: Color) {
    layer.set_fill_color(color);
}

fn black() -> Color {
    Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None))
}

fn gray() -> Color {
    Color::Rgb(Rgb::new(0.45, 0.45, 0.45, None))
}

fn status_color(status: Status) -> Color {
    match status {
        Status::Low | Status::High => Color::Rgb(Rgb::new(0.8, 0.0, 0.0, None)),
        Status::Normal => Color::Rgb(Rgb::new(0.0, 0.5, 0.0, None)),
        Status::Unrecognized => gray(),
    }
}

/// Format a value without trailing ".0" noise for whole numbers.
fn trim_float(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
