//! Trained classifier artifacts ("model cards") and their prediction.
//!
//! A model card is a JSON document naming the columns the estimator was
//! trained on, optional categorical encoding hints, and the estimator
//! parameters themselves. Parsing validates shapes up front so that a
//! loaded [`Model`] can only fail at predict time on a width mismatch.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::align::{EncodingOptions, FeatureRow};
use crate::utils::Prediction;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid model artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid model: {0}")]
    Invalid(String),
    #[error("model does not expose its expected feature columns")]
    MissingFeatureNames,
    #[error("feature width mismatch: model expects {expected} columns, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },
}

/// On-disk model card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub feature_names_in: Option<Vec<String>>,
    #[serde(default)]
    pub encoding: EncodingOptions,
    pub estimator: EstimatorSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EstimatorSpec {
    LogisticRegression {
        classes: Vec<String>,
        coef: Vec<Vec<f64>>,
        intercept: Vec<f64>,
    },
    LinearSvc {
        classes: Vec<String>,
        coef: Vec<Vec<f64>>,
        intercept: Vec<f64>,
    },
    DecisionTree {
        classes: Vec<String>,
        nodes: Vec<TreeNode>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f64>,
    },
}

/// Prediction seam shared by every estimator kind.
pub trait Classifier: Send + Sync {
    fn kind(&self) -> &'static str;
    fn classes(&self) -> &[String];
    /// Minimum row width the estimator reads.
    fn n_features(&self) -> usize;
    fn predict_row(&self, x: ArrayView1<'_, f64>) -> Result<Prediction, ModelError>;
}

/// Linear decision function `W·x + b`, optionally calibrated into probabilities.
#[derive(Debug)]
pub struct LinearClassifier {
    classes: Vec<String>,
    weights: Array2<f64>,
    intercept: Array1<f64>,
    probabilistic: bool,
}

impl LinearClassifier {
    fn new(
        classes: Vec<String>,
        coef: Vec<Vec<f64>>,
        intercept: Vec<f64>,
        probabilistic: bool,
    ) -> Result<Self, ModelError> {
        if classes.len() < 2 {
            return Err(ModelError::Invalid("estimator needs at least two classes".into()));
        }
        let rows = coef.len();
        let binary = rows == 1 && classes.len() == 2;
        if !binary && rows != classes.len() {
            return Err(ModelError::Invalid(format!(
                "coef has {rows} rows for {} classes",
                classes.len()
            )));
        }
        if intercept.len() != rows {
            return Err(ModelError::Invalid(format!(
                "intercept has {} entries for {rows} coef rows",
                intercept.len()
            )));
        }
        let width = coef.first().map(Vec::len).unwrap_or_default();
        if width == 0 || coef.iter().any(|row| row.len() != width) {
            return Err(ModelError::Invalid("coef rows must be non-empty and equal width".into()));
        }
        let flat: Vec<f64> = coef.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((rows, width), flat)
            .map_err(|e| ModelError::Invalid(e.to_string()))?;
        Ok(Self {
            classes,
            weights,
            intercept: Array1::from(intercept),
            probabilistic,
        })
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Numerically stable softmax.
pub fn softmax(z: &Array1<f64>) -> Array1<f64> {
    let max = z.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let exp = z.mapv(|v| (v - max).exp());
    let total = exp.sum();
    exp / total
}

fn argmax(values: &Array1<f64>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv { (i, v) } else { (bi, bv) }
        })
        .0
}

impl Classifier for LinearClassifier {
    fn kind(&self) -> &'static str {
        if self.probabilistic {
            "logistic_regression"
        } else {
            "linear_svc"
        }
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.weights.ncols()
    }

    fn predict_row(&self, x: ArrayView1<'_, f64>) -> Result<Prediction, ModelError> {
        if x.len() != self.n_features() {
            return Err(ModelError::WidthMismatch {
                expected: self.n_features(),
                actual: x.len(),
            });
        }
        let decision = self.weights.dot(&x) + &self.intercept;

        if decision.len() == 1 {
            let z = decision[0];
            let positive = z > 0.0;
            let label = self.classes[usize::from(positive)].clone();
            let score = self.probabilistic.then(|| {
                let p = sigmoid(z);
                if positive { p } else { 1.0 - p }
            });
            return Ok(Prediction { label, score });
        }

        let best = argmax(&decision);
        let score = self.probabilistic.then(|| softmax(&decision)[best]);
        Ok(Prediction {
            label: self.classes[best].clone(),
            score,
        })
    }
}

/// Flat binary decision tree; children always sit after their parent.
#[derive(Debug)]
pub struct DecisionTree {
    classes: Vec<String>,
    nodes: Vec<TreeNode>,
    n_features: usize,
}

impl DecisionTree {
    fn new(classes: Vec<String>, nodes: Vec<TreeNode>) -> Result<Self, ModelError> {
        if classes.len() < 2 {
            return Err(ModelError::Invalid("estimator needs at least two classes".into()));
        }
        if nodes.is_empty() {
            return Err(ModelError::Invalid("decision tree has no nodes".into()));
        }
        let mut n_features = 0;
        for (i, node) in nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *left <= i || *right <= i || *left >= nodes.len() || *right >= nodes.len() {
                        return Err(ModelError::Invalid(format!(
                            "node {i} has out-of-order children ({left}, {right})"
                        )));
                    }
                    n_features = n_features.max(feature + 1);
                }
                TreeNode::Leaf { value } => {
                    if value.len() != classes.len() {
                        return Err(ModelError::Invalid(format!(
                            "leaf {i} has {} weights for {} classes",
                            value.len(),
                            classes.len()
                        )));
                    }
                    if value.iter().any(|w| !w.is_finite() || *w < 0.0) {
                        return Err(ModelError::Invalid(format!(
                            "leaf {i} has a negative or non-finite weight"
                        )));
                    }
                    if value.iter().sum::<f64>() <= 0.0 {
                        return Err(ModelError::Invalid(format!("leaf {i} has no weight")));
                    }
                }
            }
        }
        Ok(Self {
            classes,
            nodes,
            n_features,
        })
    }
}

impl Classifier for DecisionTree {
    fn kind(&self) -> &'static str {
        "decision_tree"
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_row(&self, x: ArrayView1<'_, f64>) -> Result<Prediction, ModelError> {
        if x.len() < self.n_features {
            return Err(ModelError::WidthMismatch {
                expected: self.n_features,
                actual: x.len(),
            });
        }
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
                TreeNode::Leaf { value } => {
                    let weights = Array1::from(value.clone());
                    let best = argmax(&weights);
                    debug!(leaf = idx, "decision tree reached leaf");
                    return Ok(Prediction {
                        label: self.classes[best].clone(),
                        score: Some(weights[best] / weights.sum()),
                    });
                }
            }
        }
    }
}

/// A loaded, validated classifier handle.
pub struct Model {
    name: String,
    feature_names: Option<Vec<String>>,
    encoding: EncodingOptions,
    classifier: Box<dyn Classifier>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("kind", &self.classifier.kind())
            .field("features", &self.feature_names.as_ref().map(Vec::len))
            .finish()
    }
}

impl Model {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ModelError> {
        let card: ModelCard = serde_json::from_slice(bytes)?;
        Self::from_card(card)
    }

    pub fn from_card(card: ModelCard) -> Result<Self, ModelError> {
        let classifier: Box<dyn Classifier> = match card.estimator {
            EstimatorSpec::LogisticRegression {
                classes,
                coef,
                intercept,
            } => Box::new(LinearClassifier::new(classes, coef, intercept, true)?),
            EstimatorSpec::LinearSvc {
                classes,
                coef,
                intercept,
            } => Box::new(LinearClassifier::new(classes, coef, intercept, false)?),
            EstimatorSpec::DecisionTree { classes, nodes } => {
                Box::new(DecisionTree::new(classes, nodes)?)
            }
        };

        if let Some(names) = &card.feature_names_in {
            let fits = match classifier.kind() {
                "decision_tree" => classifier.n_features() <= names.len(),
                _ => classifier.n_features() == names.len(),
            };
            if !fits {
                return Err(ModelError::Invalid(format!(
                    "estimator reads {} features but feature_names_in lists {}",
                    classifier.n_features(),
                    names.len()
                )));
            }
        }

        let name = card.name.unwrap_or_else(|| "unnamed".to_string());
        info!(
            name = %name,
            kind = classifier.kind(),
            classes = classifier.classes().len(),
            features = classifier.n_features(),
            "model card validated"
        );
        Ok(Self {
            name,
            feature_names: card.feature_names_in,
            encoding: card.encoding,
            classifier,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.classifier.kind()
    }

    pub fn classes(&self) -> &[String] {
        self.classifier.classes()
    }

    pub fn encoding(&self) -> &EncodingOptions {
        &self.encoding
    }

    /// Columns the model was trained on, in order.
    pub fn feature_names(&self) -> Result<&[String], ModelError> {
        self.feature_names
            .as_deref()
            .ok_or(ModelError::MissingFeatureNames)
    }

    pub fn predict(&self, row: &FeatureRow) -> Result<Prediction, ModelError> {
        self.classifier.predict_row(row.values().view())
    }
}
