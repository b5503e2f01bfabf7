//! Report normalization: raw OCR text -> [`Report`].
//!
//! Pure functions plus a struct holding pre-compiled regexes — no async,
//! easily testable. Each line is matched against a `name [:] value [unit]`
//! pattern, looked up in the parameter dictionary, and flagged against the
//! spec's normal range. Lines with no parsable numeric value are dropped.

use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::dictionary::ParameterDictionary;
use crate::report::{ParameterResult, PatientDetails, Report, Status};

/// Line and number parsers compiled once, shared per request.
pub struct Normalizer {
    dictionary: Arc<ParameterDictionary>,
    line_re: Regex,
    comma_thousands_re: Regex,
    dot_thousands_re: Regex,
}

impl Normalizer {
    pub fn new(dictionary: Arc<ParameterDictionary>) -> Self {
        // Label starting with a letter, optional colon/equals, numeric value
        // (possibly with grouping separators), optional trailing unit.
        let line_re = Regex::new(
            r"(?P<name>[A-Za-z][A-Za-z0-9 .()%/^*-]*?)(?:\s*[:=]\s*|\s+)(?P<value>[-+]?\d+(?:[.,]\d+)*)\s*(?P<unit>\S.*?)?\s*$",
        )
        .expect("line pattern is valid");

        // "11,000", "1,234,567", or lakh grouping "1,50,000" — comma
        // grouping always ends in a three-digit group, which keeps the
        // decimal comma ("4,25") unambiguous.
        let comma_thousands_re =
            Regex::new(r"^[-+]?\d{1,3}(,\d{2,3})*(,\d{3})$").expect("valid pattern");
        // "1.234.567" — dot grouping only when repeated, so "11.000" stays a decimal.
        let dot_thousands_re = Regex::new(r"^[-+]?\d{1,3}(\.\d{3}){2,}$").expect("valid pattern");

        Self {
            dictionary,
            line_re,
            comma_thousands_re,
            dot_thousands_re,
        }
    }

    /// Match raw OCR lines against the dictionary and assemble a report.
    /// Never fails: unmatched labels surface as Unrecognized, unparsable
    /// lines are dropped with a debug log.
    pub fn normalize(&self, source_file: &str, raw_text: &str) -> Report {
        let mut results = Vec::new();
        let mut patient = PatientDetails::default();
        let mut test_date: Option<String> = None;

        for raw_line in raw_text.lines() {
            let line = clean_line(raw_line);
            if line.is_empty() {
                continue;
            }

            // Header fields first, so "Patient Age: 42" or "Test Date:
            // 2026-01-15" never reads as a numeric parameter.
            if let Some((field, value)) = parse_metadata_line(&line) {
                match field {
                    MetaField::Name => {
                        patient.name.get_or_insert(value);
                    }
                    MetaField::Age => {
                        patient.age.get_or_insert(value);
                    }
                    MetaField::Gender => {
                        patient.gender.get_or_insert(value);
                    }
                    MetaField::Id => {
                        patient.id.get_or_insert(value);
                    }
                    MetaField::TestDate => {
                        test_date.get_or_insert(value);
                    }
                }
                continue;
            }

            let Some(result) = self.parse_line(&line, raw_line) else {
                debug!("Dropping line with no parsable value: {:?}", raw_line);
                continue;
            };

            results.push(result);
        }

        let mut report = Report::new(source_file, results);
        if !patient.is_empty() {
            report.patient = Some(patient);
        }
        report.test_date = test_date;
        report
    }

    fn parse_line(&self, line: &str, raw_line: &str) -> Option<ParameterResult> {
        let caps = self.line_re.captures(line)?;

        let name = caps.name("name")?.as_str().trim();
        let value = self.parse_number(caps.name("value")?.as_str())?;
        let raw_unit = caps.name("unit").map(|m| m.as_str().trim()).unwrap_or("");
        let (unit, factor) = normalize_unit(raw_unit);

        let result = match self.dictionary.lookup(name) {
            Some(spec) => {
                // Only scale when the normalized unit landed on the spec's
                // canonical unit; an unknown unit compares at face value.
                let compared = if unit == spec.unit || unit.is_empty() {
                    value * factor
                } else {
                    value
                };

                let status = if compared < spec.low {
                    Status::Low
                } else if compared > spec.high {
                    Status::High
                } else {
                    Status::Normal
                };

                ParameterResult {
                    name: spec.name.clone(),
                    value: compared,
                    unit: if unit.is_empty() { spec.unit.clone() } else { unit },
                    reference_range: Some([spec.low, spec.high]),
                    status,
                    raw_line: raw_line.trim().to_string(),
                }
            }
            None => ParameterResult {
                name: name.to_string(),
                value,
                unit,
                reference_range: None,
                status: Status::Unrecognized,
                raw_line: raw_line.trim().to_string(),
            },
        };

        Some(result)
    }

    /// Parse a numeric token, tolerating both decimal separators and
    /// thousands grouping. When both separators appear, the rightmost one
    /// is the decimal point.
    fn parse_number(&self, raw: &str) -> Option<f64> {
        let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let has_dot = s.contains('.');
        let has_comma = s.contains(',');

        let normalized = if has_dot && has_comma {
            if s.rfind('.') > s.rfind(',') {
                s.replace(',', "")
            } else {
                s.replace('.', "").replace(',', ".")
            }
        } else if has_comma {
            if self.comma_thousands_re.is_match(&s) {
                s.replace(',', "")
            } else {
                s.replace(',', ".")
            }
        } else if has_dot {
            if self.dot_thousands_re.is_match(&s) {
                s.replace('.', "")
            } else {
                s
            }
        } else {
            s
        };

        normalized.parse().ok()
    }
}

enum MetaField {
    Name,
    Age,
    Gender,
    Id,
    TestDate,
}

/// Recognize patient-header lines (`Label: value`). Label spellings cover
/// the transcription prompt's output plus common printed variants.
fn parse_metadata_line(line: &str) -> Option<(MetaField, String)> {
    let (label, value) = line.split_once(':')?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let field = match label.trim().to_lowercase().as_str() {
        "patient name" | "name" => MetaField::Name,
        "patient age" | "age" => MetaField::Age,
        "patient gender" | "patient sex" | "gender" | "sex" => MetaField::Gender,
        "patient id" | "id" | "lab no" | "lab no." => MetaField::Id,
        "test date" | "date" | "collection date" | "reported on" => MetaField::TestDate,
        _ => return None,
    };

    Some((field, value.to_string()))
}

/// Strip OCR/markdown artifacts: table pipes, bullets, emphasis markers.
fn clean_line(line: &str) -> String {
    line.replace('|', " ")
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '#' | '•' | '-'))
        .to_string()
}

/// Map a printed unit to its canonical spelling plus a scale factor into
/// that canonical unit (e.g. counts in 10^9/L become counts per uL).
fn normalize_unit(raw: &str) -> (String, f64) {
    if raw.is_empty() {
        return (String::new(), 1.0);
    }

    let cleaned: String = raw
        .to_lowercase()
        .replace('µ', "u")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    match cleaned.as_str() {
        "g/dl" => ("g/dL".to_string(), 1.0),
        "g/l" => ("g/dL".to_string(), 0.1),
        "%" => ("%".to_string(), 1.0),
        "fl" => ("fL".to_string(), 1.0),
        "pg" => ("pg".to_string(), 1.0),
        "/ul" | "cells/ul" | "/cumm" | "/cu.mm" | "/mm3" | "/mm^3" => ("/uL".to_string(), 1.0),
        "10^3/ul" | "x10^3/ul" | "10*3/ul" | "k/ul" | "thou/ul" | "10^9/l" | "x10^9/l"
        | "10*9/l" => ("/uL".to_string(), 1000.0),
        "10^6/ul" | "x10^6/ul" | "10*6/ul" | "m/ul" | "mill/ul" | "mill/cumm" | "million/ul"
        | "10^12/l" | "x10^12/l" => ("10^6/uL".to_string(), 1.0),
        _ => (raw.to_string(), 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{ParameterDictionary, ParameterSpec};

    fn make_normalizer() -> Normalizer {
        Normalizer::new(Arc::new(ParameterDictionary::builtin()))
    }

    #[test]
    fn test_end_to_end_fixture() {
        let normalizer = make_normalizer();
        let raw = "Hemoglobin: 10.2 g/dL\nWBC: 11000 /uL\nFoo: 5";
        let report = normalizer.normalize("scan.jpg", raw);

        assert_eq!(report.results.len(), 3);

        assert_eq!(report.results[0].name, "Hemoglobin");
        assert_eq!(report.results[0].value, 10.2);
        assert_eq!(report.results[0].status, Status::Low);

        assert_eq!(report.results[1].name, "WBC");
        assert_eq!(report.results[1].value, 11000.0);
        assert_eq!(report.results[1].status, Status::Normal);

        assert_eq!(report.results[2].name, "Foo");
        assert_eq!(report.results[2].value, 5.0);
        assert_eq!(report.results[2].status, Status::Unrecognized);

        assert_eq!(report.abnormal_count, 1);
    }

    #[test]
    fn test_high_value_flagged() {
        let normalizer = make_normalizer();
        let report = normalizer.normalize("scan.jpg", "WBC: 15200 /uL");
        assert_eq!(report.results[0].status, Status::High);
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let normalizer = make_normalizer();
        let report = normalizer.normalize("scan.jpg", "WBC: 4000 /uL\nWBC: 11000 /uL");
        assert_eq!(report.results[0].status, Status::Normal);
        assert_eq!(report.results[1].status, Status::Normal);
    }

    #[test]
    fn test_alias_resolves_to_canonical_name() {
        let normalizer = make_normalizer();
        let report = normalizer.normalize("scan.jpg", "Hb: 14.1 g/dL");
        assert_eq!(report.results[0].name, "Hemoglobin");
        assert_eq!(report.results[0].status, Status::Normal);
    }

    #[test]
    fn test_unit_conversion_giga_per_liter() {
        let normalizer = make_normalizer();
        // 11 x10^9/L == 11000 /uL, the top of the WBC range.
        let report = normalizer.normalize("scan.jpg", "WBC: 11 x10^9/L");
        assert_eq!(report.results[0].value, 11000.0);
        assert_eq!(report.results[0].unit, "/uL");
        assert_eq!(report.results[0].status, Status::Normal);
    }

    #[test]
    fn test_decimal_comma() {
        let normalizer = make_normalizer();
        let report = normalizer.normalize("scan.jpg", "Hemoglobin 10,2 g/dl");
        assert_eq!(report.results[0].value, 10.2);
        assert_eq!(report.results[0].unit, "g/dL");
        assert_eq!(report.results[0].status, Status::Low);
    }

    #[test]
    fn test_thousands_separator() {
        let normalizer = make_normalizer();
        let report = normalizer.normalize("scan.jpg", "Platelets: 250,000 /uL");
        assert_eq!(report.results[0].value, 250000.0);
        assert_eq!(report.results[0].status, Status::Normal);
    }

    #[test]
    fn test_missing_unit_assumes_spec_unit() {
        let normalizer = make_normalizer();
        let report = normalizer.normalize("scan.jpg", "Hemoglobin: 14.5");
        assert_eq!(report.results[0].unit, "g/dL");
        assert_eq!(report.results[0].status, Status::Normal);
    }

    #[test]
    fn test_lines_without_value_dropped() {
        let normalizer = make_normalizer();
        let raw = "COMPLETE BLOOD COUNT\n\nHemoglobin: 14.0 g/dL\nResults reviewed by lab";
        let report = normalizer.normalize("scan.jpg", raw);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].name, "Hemoglobin");
    }

    #[test]
    fn test_markdown_table_row() {
        let normalizer = make_normalizer();
        let report = normalizer.normalize("scan.jpg", "| Hemoglobin | 13.5 | g/dL |");
        assert_eq!(report.results[0].name, "Hemoglobin");
        assert_eq!(report.results[0].status, Status::Normal);
    }

    #[test]
    fn test_unknown_unit_compares_at_face_value() {
        let specs = vec![ParameterSpec {
            name: "Glucose".to_string(),
            unit: "mg/dL".to_string(),
            low: 70.0,
            high: 100.0,
            aliases: vec![],
        }];
        let normalizer = Normalizer::new(Arc::new(ParameterDictionary::from_specs(specs)));
        let report = normalizer.normalize("scan.jpg", "Glucose: 95 mg/dL");
        assert_eq!(report.results[0].status, Status::Normal);
        assert_eq!(report.results[0].unit, "mg/dL");
    }

    #[test]
    fn test_parse_number_formats() {
        let normalizer = make_normalizer();
        assert_eq!(normalizer.parse_number("10.2"), Some(10.2));
        assert_eq!(normalizer.parse_number("10,2"), Some(10.2));
        assert_eq!(normalizer.parse_number("11,000"), Some(11000.0));
        assert_eq!(normalizer.parse_number("1,234.56"), Some(1234.56));
        assert_eq!(normalizer.parse_number("1.234,56"), Some(1234.56));
        assert_eq!(normalizer.parse_number("1.234.567"), Some(1234567.0));
        assert_eq!(normalizer.parse_number("abc"), None);
    }

    #[test]
    fn test_lakh_grouping() {
        let normalizer = make_normalizer();
        assert_eq!(normalizer.parse_number("1,50,000"), Some(150000.0));
        // Two-digit group in any position other than the last never reads
        // as a decimal comma.
        assert_eq!(normalizer.parse_number("4,25"), Some(4.25));

        let report = normalizer.normalize("scan.jpg", "Platelets: 1,50,000 /uL");
        assert_eq!(report.results[0].value, 150000.0);
        assert_eq!(report.results[0].status, Status::Normal);
    }

    #[test]
    fn test_patient_metadata_extracted() {
        let normalizer = make_normalizer();
        let raw = "Patient Name: Jane Doe\nPatient Age: 42\nPatient Gender: F\n\
                   Patient ID: LAB-99\nTest Date: 2026-01-15\nHemoglobin: 14.0 g/dL";
        let report = normalizer.normalize("scan.jpg", raw);

        let patient = report.patient.as_ref().unwrap();
        assert_eq!(patient.name.as_deref(), Some("Jane Doe"));
        assert_eq!(patient.age.as_deref(), Some("42"));
        assert_eq!(patient.gender.as_deref(), Some("F"));
        assert_eq!(patient.id.as_deref(), Some("LAB-99"));
        assert_eq!(report.test_date.as_deref(), Some("2026-01-15"));

        // Header lines never leak into the parameter table.
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].name, "Hemoglobin");
    }

    #[test]
    fn test_no_metadata_leaves_report_bare() {
        let normalizer = make_normalizer();
        let report = normalizer.normalize("scan.jpg", "Hemoglobin: 14.0 g/dL");
        assert!(report.patient.is_none());
        assert!(report.test_date.is_none());
    }

    #[test]
    fn test_empty_text_yields_empty_report() {
        let normalizer = make_normalizer();
        let report = normalizer.normalize("scan.jpg", "");
        assert!(report.is_empty());
    }
}
