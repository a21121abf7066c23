//! Named, typed parameter bag validated against a kernel's declared specs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Value type a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Integer,
    Real,
}

impl std::fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Real => write!(f, "real"),
        }
    }
}

/// Declaration of one parameter a kernel accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParameterKind,
    /// Required parameters without a default must be supplied.
    pub required: bool,
    pub default: Option<f64>,
    pub min: f64,
    pub max: f64,
    /// Fractional digits used when the value is echoed into a report.
    pub precision: usize,
}

impl ParameterSpec {
    /// Integer parameter with a default and an inclusive range.
    pub const fn integer(
        name: &'static str,
        description: &'static str,
        default: u64,
        min: u64,
        max: u64,
    ) -> Self {
        Self {
            name,
            description,
            kind: ParameterKind::Integer,
            required: false,
            default: Some(default as f64),
            min: min as f64,
            max: max as f64,
            precision: 0,
        }
    }

    fn parse(&self, raw: &str) -> Result<f64, HarnessError> {
        let raw = raw.trim();
        let value = match self.kind {
            ParameterKind::Integer => raw.parse::<i64>().map(|v| v as f64).map_err(|_| {
                HarnessError::validation(format!("{}: '{raw}' is not an integer", self.name))
            })?,
            ParameterKind::Real => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    let detail = format!("{}: '{raw}' is not a finite number", self.name);
                    HarnessError::validation(detail)
                })?,
        };
        self.check_range(value)?;
        Ok(value)
    }

    fn check_range(&self, value: f64) -> Result<(), HarnessError> {
        if value < self.min || value > self.max {
            return Err(HarnessError::validation(format!(
                "{} = {value} outside [{}, {}]",
                self.name, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Unvalidated `name → text` assignments, as supplied on the command line or
/// in a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Parameters {
    values: BTreeMap<String, String>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) {
        self.values.insert(name.into(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse `name=value` assignments. Later assignments win.
    pub fn parse_assignments<S: AsRef<str>>(assignments: &[S]) -> Result<Self, HarnessError> {
        let mut params = Self::new();
        for assignment in assignments {
            let assignment = assignment.as_ref();
            let (name, value) = assignment.split_once('=').ok_or_else(|| {
                HarnessError::validation(format!("expected name=value, got '{assignment}'"))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(HarnessError::validation(format!(
                    "empty parameter name in '{assignment}'"
                )));
            }
            params.set(name, value.trim());
        }
        Ok(params)
    }

    /// Build from a JSON object; numbers and strings are accepted as values.
    pub fn from_json(
        object: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, HarnessError> {
        let mut params = Self::new();
        for (name, value) in object {
            match value {
                serde_json::Value::Number(n) => params.set(name.clone(), n),
                serde_json::Value::String(s) => params.set(name.clone(), s),
                other => {
                    return Err(HarnessError::validation(format!(
                        "parameter '{name}' must be a number or string, got {other}"
                    )));
                }
            }
        }
        Ok(params)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// The subset of assignments whose names appear in `specs`.
    pub fn declared(&self, specs: &[ParameterSpec]) -> Parameters {
        let values = self
            .values
            .iter()
            .filter(|(name, _)| specs.iter().any(|s| s.name == name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Parameters { values }
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: &Parameters) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    /// Validate against `specs`: fill defaults, reject unknown names,
    /// missing required values and out-of-range values.
    pub fn resolve(&self, specs: &[ParameterSpec]) -> Result<ResolvedParameters, HarnessError> {
        if let Some(unknown) = self
            .values
            .keys()
            .find(|name| !specs.iter().any(|s| s.name == name.as_str()))
        {
            let known: Vec<&str> = specs.iter().map(|s| s.name).collect();
            return Err(HarnessError::validation(format!(
                "unknown parameter '{unknown}' (accepted: {})",
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            )));
        }

        let mut values = Vec::with_capacity(specs.len());
        for spec in specs {
            let value = match (self.values.get(spec.name), spec.default) {
                (Some(raw), _) => spec.parse(raw)?,
                (None, Some(default)) => {
                    spec.check_range(default)?;
                    default
                }
                (None, None) if spec.required => {
                    return Err(HarnessError::validation(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
                (None, None) => continue,
            };
            values.push((*spec, value));
        }
        Ok(ResolvedParameters { values })
    }
}

/// Parameters after validation, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParameters {
    values: Vec<(ParameterSpec, f64)>,
}

impl ResolvedParameters {
    fn lookup(&self, name: &str) -> Result<f64, HarnessError> {
        self.values
            .iter()
            .find(|(spec, _)| spec.name == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| HarnessError::validation(format!("parameter '{name}' not set")))
    }

    pub fn usize(&self, name: &str) -> Result<usize, HarnessError> {
        let value = self.lookup(name)?;
        if value < 0.0 {
            return Err(HarnessError::validation(format!("{name} = {value} is negative")));
        }
        Ok(value as usize)
    }

    pub fn real(&self, name: &str) -> Result<f64, HarnessError> {
        self.lookup(name)
    }

    /// `(name, value formatted at the declared precision)` pairs.
    pub fn formatted(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(spec, v)| (spec.name.to_string(), format!("{:.*}", spec.precision, v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[ParameterSpec] = &[
        ParameterSpec::integer("block_length", "bits per block", 128, 20, 100_000),
        ParameterSpec {
            name: "ratio",
            description: "a real parameter",
            kind: ParameterKind::Real,
            required: true,
            default: None,
            min: 0.0,
            max: 1.0,
            precision: 3,
        },
    ];

    #[test]
    fn defaults_fill_missing_values() {
        let params = Parameters::parse_assignments(&["ratio=0.25"]).unwrap();
        let resolved = params.resolve(SPECS).unwrap();
        assert_eq!(resolved.usize("block_length").unwrap(), 128);
        assert_eq!(resolved.real("ratio").unwrap(), 0.25);
        assert_eq!(
            resolved.formatted(),
            vec![
                ("block_length".to_string(), "128".to_string()),
                ("ratio".to_string(), "0.250".to_string()),
            ]
        );
    }

    #[test]
    fn missing_required_is_rejected() {
        let err = Parameters::new().resolve(SPECS).unwrap_err();
        assert!(err.to_string().contains("missing required parameter 'ratio'"));
    }

    #[test]
    fn unknown_and_malformed_are_rejected() {
        let unknown = Parameters::parse_assignments(&["ratio=0.5", "bogus=1"]).unwrap();
        assert!(unknown.resolve(SPECS).is_err());
        assert!(Parameters::parse_assignments(&["no_equals"]).is_err());
        assert!(Parameters::parse_assignments(&["=3"]).is_err());
        let not_int = Parameters::parse_assignments(&["ratio=0.5", "block_length=1.5"]).unwrap();
        assert!(not_int.resolve(SPECS).is_err());
    }

    #[test]
    fn range_is_enforced() {
        let low = Parameters::parse_assignments(&["ratio=0.5", "block_length=10"]).unwrap();
        assert!(low.resolve(SPECS).is_err());
        let nan = Parameters::parse_assignments(&["ratio=NaN"]).unwrap();
        assert!(nan.resolve(SPECS).is_err());
    }

    #[test]
    fn json_objects_accept_numbers_and_strings() {
        let json = serde_json::json!({ "block_length": 256, "ratio": "0.5" });
        let params = Parameters::from_json(json.as_object().unwrap()).unwrap();
        let resolved = params.resolve(SPECS).unwrap();
        assert_eq!(resolved.usize("block_length").unwrap(), 256);

        let bad = serde_json::json!({ "ratio": [1, 2] });
        assert!(Parameters::from_json(bad.as_object().unwrap()).is_err());
    }

    #[test]
    fn merge_overrides_earlier_values() {
        let mut base = Parameters::parse_assignments(&["ratio=0.1"]).unwrap();
        base.merge(&Parameters::parse_assignments(&["ratio=0.9"]).unwrap());
        assert_eq!(base.get("ratio"), Some("0.9"));
    }

    #[test]
    fn declared_keeps_only_known_names() {
        let params = Parameters::parse_assignments(&["ratio=0.2", "other=7"]).unwrap();
        let subset = params.declared(SPECS);
        assert_eq!(subset.names().collect::<Vec<_>>(), vec!["ratio"]);
        assert_eq!(params.names().count(), 2);
    }
}
