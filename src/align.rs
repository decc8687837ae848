//! Feature alignment: reshape a raw form record into the exact column
//! layout a trained model expects.
//!
//! The steps mirror a `get_dummies` + reindex pass:
//! 1. numeric and boolean fields pass through (`true` → 1.0),
//! 2. ordinal fields become the index of their level,
//! 3. remaining text fields expand into `<field>_<level>` indicator columns,
//! 4. target columns missing after expansion are filled with 0,
//! 5. columns are selected and ordered to match the target list exactly.

use std::collections::{BTreeMap, HashMap, HashSet};

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::utils::{FieldValue, Record};

/// Categorical encoding hints, usually carried by the model card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodingOptions {
    /// Drop the first level of every one-hot expanded field.
    #[serde(default)]
    pub drop_first: bool,
    /// Declared levels per one-hot field. Fields not listed expand over the observed value only.
    #[serde(default)]
    pub one_hot: BTreeMap<String, Vec<String>>,
    /// Fields encoded as the index of their value in the level list.
    #[serde(default)]
    pub ordinal: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Error, PartialEq)]
pub enum AlignError {
    #[error("model does not supply a target column list")]
    EmptyTarget,
    #[error("duplicate target column `{0}`")]
    DuplicateTarget(String),
    #[error("field `{field}` has value `{value}` outside its known levels [{levels}]")]
    UnknownLevel {
        field: String,
        value: String,
        levels: String,
    },
}

/// A record aligned to a model's feature layout.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    columns: Vec<String>,
    values: Array1<f64>,
}

impl FeatureRow {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.values[i])
    }
}

fn unknown_level(field: &str, value: &str, levels: &[String]) -> AlignError {
    AlignError::UnknownLevel {
        field: field.to_string(),
        value: value.to_string(),
        levels: levels.join(", "),
    }
}

/// Expand a record into numeric columns, in record order.
///
/// A later column with the same name overwrites an earlier one.
pub fn one_hot_expand(
    record: &Record,
    options: &EncodingOptions,
) -> Result<Vec<(String, f64)>, AlignError> {
    let mut out: Vec<(String, f64)> = Vec::with_capacity(record.len());
    let mut push = |name: String, value: f64| match out.iter_mut().find(|(n, _)| *n == name) {
        Some(slot) => slot.1 = value,
        None => out.push((name, value)),
    };

    for (field, value) in record.iter() {
        let text = match value {
            FieldValue::Text(text) => text,
            other => {
                // as_f64 is total for non-text values
                push(field.to_string(), other.as_f64().unwrap_or_default());
                continue;
            }
        };

        if let Some(levels) = options.ordinal.get(field) {
            let index = levels
                .iter()
                .position(|l| l == text)
                .ok_or_else(|| unknown_level(field, text, levels))?;
            push(field.to_string(), index as f64);
            continue;
        }

        let observed = [text.clone()];
        let levels: &[String] = match options.one_hot.get(field) {
            Some(levels) => {
                if !levels.iter().any(|l| l == text) {
                    return Err(unknown_level(field, text, levels));
                }
                levels.as_slice()
            }
            None => &observed[..],
        };
        let skip = usize::from(options.drop_first);
        for level in levels.iter().skip(skip) {
            let indicator = if level == text { 1.0 } else { 0.0 };
            push(format!("{field}_{level}"), indicator);
        }
    }

    Ok(out)
}

/// Align a record to `target`, the model's expected columns in order.
pub fn align(
    record: &Record,
    target: &[String],
    options: &EncodingOptions,
) -> Result<FeatureRow, AlignError> {
    if target.is_empty() {
        return Err(AlignError::EmptyTarget);
    }
    let mut seen = HashSet::with_capacity(target.len());
    for column in target {
        if !seen.insert(column.as_str()) {
            return Err(AlignError::DuplicateTarget(column.clone()));
        }
    }

    let expanded = one_hot_expand(record, options)?;
    let lookup: HashMap<&str, f64> = expanded.iter().map(|(n, v)| (n.as_str(), *v)).collect();

    let mut filled = Vec::new();
    let values: Array1<f64> = target
        .iter()
        .map(|column| match lookup.get(column.as_str()) {
            Some(v) => *v,
            None => {
                filled.push(column.as_str());
                0.0
            }
        })
        .collect();

    let discarded: Vec<&str> = expanded
        .iter()
        .map(|(n, _)| n.as_str())
        .filter(|n| !seen.contains(n))
        .collect();

    debug!(
        columns = target.len(),
        filled = filled.len(),
        ?discarded,
        "aligned record to model columns"
    );

    Ok(FeatureRow {
        columns: target.to_vec(),
        values,
    })
}
