use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use heck::ToSnakeCase;
use serde::Serialize;

/// Default artifact path of a model card inside an MLflow run.
pub const DEFAULT_ARTIFACT_PATH: &str = "model/model.json";

/// Where a trained classifier comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    Local { path: PathBuf },
    Remote { url: String },
    Git { repo: String, path: PathBuf },
    Mlflow(MlflowSelection),
    /// Raw model bytes supplied on stdin.
    Upload,
}

impl ModelSource {
    /// Short origin label used in logs and rendered output.
    pub fn describe(&self) -> String {
        match self {
            ModelSource::Local { path } => format!("file:{}", path.display()),
            ModelSource::Remote { url } => format!("remote:{url}"),
            ModelSource::Git { repo, path } => format!("git:{}:{}", repo, path.display()),
            ModelSource::Mlflow(sel) => match &sel.run_id {
                Some(run) => format!("mlflow:{run}"),
                None => format!("mlflow:{}", sel.tracking_uri),
            },
            ModelSource::Upload => "upload:stdin".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MlflowSelection {
    pub tracking_uri: String,
    /// Experiment name; first listed experiment when unset.
    pub experiment: Option<String>,
    /// Run id; most recent run when unset.
    pub run_id: Option<String>,
    pub artifact_path: String,
}

#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// A single typed cell of a form record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl FieldValue {
    /// Numeric view of the value; text has none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            FieldValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Single-row tabular record; column order is insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a column, keeping its original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl<S: Into<String>> FromIterator<(S, FieldValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (S, FieldValue)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

/// Outcome of one prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    /// Probability of the predicted class, when the estimator exposes one.
    pub score: Option<f64>,
}

/// Normalize a field name so `genetic-risk`, `GeneticRisk` and `Genetic_Risk` compare equal.
pub fn normalize_key(name: &str) -> String {
    name.trim().to_snake_case()
}
