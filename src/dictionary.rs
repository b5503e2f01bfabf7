//! Blood parameter dictionary.
//!
//! A static mapping of known parameter names (plus aliases) to expected
//! units and normal ranges. Loaded once at startup from `configs/` (falls
//! back to a built-in CBC panel) and immutable afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Static definition of a blood parameter's expected unit and normal range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    /// Canonical unit the normal range is expressed in (e.g. "g/dL").
    pub unit: String,
    pub low: f64,
    pub high: f64,
    /// Known alternate spellings (e.g. "Hb" for "Hemoglobin").
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// On-disk dictionary file layout.
#[derive(Debug, Deserialize)]
struct ParameterFile {
    parameters: Vec<ParameterSpec>,
}

/// Case-insensitive lookup table over all loaded parameter specs.
///
/// Read-only after construction; share via `Arc` rather than locking.
#[derive(Debug)]
pub struct ParameterDictionary {
    specs: Vec<ParameterSpec>,
    // lowercase name/alias -> index into `specs`
    index: HashMap<String, usize>,
}

impl ParameterDictionary {
    pub fn from_specs(specs: Vec<ParameterSpec>) -> Self {
        let mut index = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            index.insert(spec.name.to_lowercase(), i);
            for alias in &spec.aliases {
                index.insert(alias.to_lowercase(), i);
            }
        }
        Self { specs, index }
    }

    /// Load the dictionary from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameter file: {:?}", path))?;

        let file: ParameterFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse parameter file: {:?}", path))?;

        if file.parameters.is_empty() {
            anyhow::bail!("No parameters defined in {:?}", path);
        }

        info!("Loaded {} parameters from {:?}", file.parameters.len(), path);
        Ok(Self::from_specs(file.parameters))
    }

    /// Look up a spec by name or alias. Case-insensitive exact match only.
    pub fn lookup(&self, name: &str) -> Option<&ParameterSpec> {
        self.index
            .get(&name.trim().to_lowercase())
            .map(|&i| &self.specs[i])
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Built-in CBC panel used when no parameter file is present.
    pub fn builtin() -> Self {
        fn spec(name: &str, unit: &str, low: f64, high: f64, aliases: &[&str]) -> ParameterSpec {
            ParameterSpec {
                name: name.to_string(),
                unit: unit.to_string(),
                low,
                high,
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
            }
        }

        Self::from_specs(vec![
            spec("Hemoglobin", "g/dL", 13.0, 17.0, &["Hb", "HGB", "Haemoglobin"]),
            spec("RBC", "10^6/uL", 4.5, 5.9, &["RBC Count", "Red Blood Cell Count", "Erythrocytes"]),
            spec("WBC", "/uL", 4000.0, 11000.0, &[
                "WBC Count",
                "White Blood Cell Count",
                "Total Leukocyte Count",
                "Leukocytes",
                "TLC",
            ]),
            spec("Platelets", "/uL", 150000.0, 450000.0, &["Platelet Count", "PLT"]),
            spec("Hematocrit", "%", 40.0, 52.0, &["HCT", "PCV", "Packed Cell Volume"]),
            spec("MCV", "fL", 80.0, 100.0, &["Mean Corpuscular Volume"]),
            spec("MCH", "pg", 27.0, 33.0, &["Mean Corpuscular Hemoglobin"]),
            spec("MCHC", "g/dL", 32.0, 36.0, &["Mean Corpuscular Hemoglobin Concentration"]),
            spec("Neutrophils", "%", 40.0, 70.0, &["Neutrophil", "Polymorphs"]),
            spec("Lymphocytes", "%", 20.0, 40.0, &["Lymphocyte"]),
            spec("Monocytes", "%", 2.0, 10.0, &["Monocyte"]),
            spec("Eosinophils", "%", 1.0, 6.0, &["Eosinophil"]),
            spec("Basophils", "%", 0.0, 2.0, &["Basophil"]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_case_insensitive() {
        let dict = ParameterDictionary::builtin();
        assert_eq!(dict.lookup("hemoglobin").unwrap().name, "Hemoglobin");
        assert_eq!(dict.lookup("HEMOGLOBIN").unwrap().name, "Hemoglobin");
        assert_eq!(dict.lookup("  Hemoglobin  ").unwrap().name, "Hemoglobin");
    }

    #[test]
    fn test_lookup_alias() {
        let dict = ParameterDictionary::builtin();
        assert_eq!(dict.lookup("Hb").unwrap().name, "Hemoglobin");
        assert_eq!(dict.lookup("tlc").unwrap().name, "WBC");
        assert_eq!(dict.lookup("packed cell volume").unwrap().name, "Hematocrit");
    }

    #[test]
    fn test_lookup_not_found() {
        let dict = ParameterDictionary::builtin();
        assert!(dict.lookup("Foo").is_none());
        // No fuzzy matching
        assert!(dict.lookup("Hemoglobn").is_none());
    }

    #[test]
    fn test_parse_parameter_file() {
        let json = r#"{
            "parameters": [
                {"name": "Hemoglobin", "unit": "g/dL", "low": 13.0, "high": 17.0, "aliases": ["Hb"]},
                {"name": "WBC", "unit": "/uL", "low": 4000, "high": 11000}
            ]
        }"#;
        let file: ParameterFile = serde_json::from_str(json).unwrap();
        let dict = ParameterDictionary::from_specs(file.parameters);
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.lookup("hb").unwrap().unit, "g/dL");
        assert!(dict.lookup("WBC").unwrap().aliases.is_empty());
    }
}
