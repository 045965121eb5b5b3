// Copyright (c) Facebook, Inc. and its affiliates.
//! Throughput regression models.
//!
//! Models are trained offline and exported as json. Two shapes are
//! understood:
//!
//! * `linear`: `intercept + coefs . x`
//! * `tree_ensemble`: `base + scale * sum(tree(x))` where each tree is given
//!   as flat node arrays. A node is a leaf iff its `children_left` is
//!   negative. Internal nodes send `x` left iff `x[feature] <= threshold`.
//!   Gradient boosted regressors map to `base = init, scale = learning
//!   rate`, random forests to `base = 0, scale = 1 / nr_trees`.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use quota_util::*;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("model takes {expected} inputs but {got} were given")]
    ShapeMismatch { expected: usize, got: usize },
    #[error("tree {tree}: {msg}")]
    InvalidTree { tree: usize, msg: String },
    #[error("invalid model: {0}")]
    Invalid(String),
    #[error("prediction is not finite ({0})")]
    NonFinite(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<f64>,
}

impl Tree {
    fn validate(&self, idx: usize, nr_features: usize) -> Result<(), ModelError> {
        let invalid = |msg: String| ModelError::InvalidTree { tree: idx, msg };
        let nr_nodes = self.children_left.len();

        if nr_nodes == 0 {
            return Err(invalid("no nodes".into()));
        }
        if self.children_right.len() != nr_nodes
            || self.feature.len() != nr_nodes
            || self.threshold.len() != nr_nodes
            || self.value.len() != nr_nodes
        {
            return Err(invalid(format!(
                "node array lengths differ (left={} right={} feature={} threshold={} value={})",
                nr_nodes,
                self.children_right.len(),
                self.feature.len(),
                self.threshold.len(),
                self.value.len()
            )));
        }

        for node in 0..nr_nodes {
            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left < 0 {
                if right >= 0 {
                    return Err(invalid(format!("node {} has only a right child", node)));
                }
                if !self.value[node].is_finite() {
                    return Err(invalid(format!("leaf {} value is not finite", node)));
                }
                continue;
            }
            // Children always come after their parent which also rules out
            // cycles.
            for child in &[left, right] {
                if *child <= node as i64 || *child >= nr_nodes as i64 {
                    return Err(invalid(format!(
                        "node {} has out-of-order child {}",
                        node, child
                    )));
                }
            }
            let feat = self.feature[node];
            if feat < 0 || feat >= nr_features as i64 {
                return Err(invalid(format!(
                    "node {} splits on feature {} out of {}",
                    node, feat, nr_features
                )));
            }
        }
        Ok(())
    }

    fn eval(&self, x: &[f64]) -> f64 {
        let mut node = 0;
        loop {
            let left = self.children_left[node];
            if left < 0 {
                return self.value[node];
            }
            node = if x[self.feature[node] as usize] <= self.threshold[node] {
                left as usize
            } else {
                self.children_right[node] as usize
            };
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Model {
    Linear {
        intercept: f64,
        coefs: Vec<f64>,
    },
    TreeEnsemble {
        nr_features: usize,
        base: f64,
        scale: f64,
        trees: Vec<Tree>,
    },
}

impl Model {
    pub fn nr_features(&self) -> usize {
        match self {
            Self::Linear { coefs, .. } => coefs.len(),
            Self::TreeEnsemble { nr_features, .. } => *nr_features,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            Self::Linear { intercept, coefs } => {
                if coefs.is_empty() {
                    return Err(ModelError::Invalid("linear model without coefs".into()));
                }
                if !intercept.is_finite() || coefs.iter().any(|c| !c.is_finite()) {
                    return Err(ModelError::Invalid(
                        "linear model has non-finite terms".into(),
                    ));
                }
            }
            Self::TreeEnsemble {
                nr_features,
                base,
                scale,
                trees,
            } => {
                if *nr_features == 0 {
                    return Err(ModelError::Invalid("nr_features is zero".into()));
                }
                if trees.is_empty() {
                    return Err(ModelError::Invalid("tree ensemble without trees".into()));
                }
                if !base.is_finite() || !scale.is_finite() {
                    return Err(ModelError::Invalid("base or scale is not finite".into()));
                }
                for (idx, tree) in trees.iter().enumerate() {
                    tree.validate(idx, *nr_features)?;
                }
            }
        }
        Ok(())
    }

    pub fn predict(&self, x: &[f64]) -> Result<f64, ModelError> {
        if x.len() != self.nr_features() {
            return Err(ModelError::ShapeMismatch {
                expected: self.nr_features(),
                got: x.len(),
            });
        }

        let y = match self {
            Self::Linear { intercept, coefs } => {
                intercept + coefs.iter().zip(x.iter()).map(|(c, v)| c * v).sum::<f64>()
            }
            Self::TreeEnsemble {
                base, scale, trees, ..
            } => base + scale * trees.iter().map(|t| t.eval(x)).sum::<f64>(),
        };

        if y.is_finite() {
            Ok(y)
        } else {
            Err(ModelError::NonFinite(y))
        }
    }
}

impl JsonLoad for Model {
    fn loaded(&mut self) -> Result<()> {
        Ok(self.validate()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two stumps on cpu and llc.
    const ENSEMBLE: &str = r#"{
        "kind": "tree_ensemble",
        "nr_features": 4,
        "base": 1000.0,
        "scale": 0.5,
        "trees": [
            {
                "children_left": [1, -1, -1],
                "children_right": [2, -1, -1],
                "feature": [0, -2, -2],
                "threshold": [1.0, -2.0, -2.0],
                "value": [0.0, 100.0, 2000.0]
            },
            {
                "children_left": [1, -1, -1],
                "children_right": [2, -1, -1],
                "feature": [2, -2, -2],
                "threshold": [4096.0, -2.0, -2.0],
                "value": [0.0, 0.0, 400.0]
            }
        ]
    }"#;

    fn ensemble() -> Model {
        let mut model: Model = serde_json::from_str(ENSEMBLE).unwrap();
        model.loaded().unwrap();
        model
    }

    #[test]
    fn test_tree_ensemble_predict() {
        let model = ensemble();
        assert_eq!(model.nr_features(), 4);
        assert_eq!(model.predict(&[0.8, 0.0, 1024.0, 10.0]).unwrap(), 1050.0);
        assert_eq!(model.predict(&[1.0, 0.0, 4096.0, 10.0]).unwrap(), 1050.0);
        assert_eq!(model.predict(&[1.2, 0.0, 4096.0, 10.0]).unwrap(), 2000.0);
        assert_eq!(model.predict(&[1.2, 0.0, 8192.0, 10.0]).unwrap(), 2200.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let model = ensemble();
        assert_eq!(
            model.predict(&[1.0, 2.0, 3.0, 4.0, 130.0]),
            Err(ModelError::ShapeMismatch {
                expected: 4,
                got: 5
            })
        );
    }

    #[test]
    fn test_linear() {
        let mut model: Model = serde_json::from_str(
            r#"{"kind": "linear", "intercept": 0.1, "coefs": [0.2, 0.0, 0.0, 0.001]}"#,
        )
        .unwrap();
        model.loaded().unwrap();
        let y = model.predict(&[2.0, 60000.0, 11264.0, 100.0]).unwrap();
        assert!((y - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_trees() {
        let mut bad: Model = serde_json::from_str(ENSEMBLE).unwrap();
        if let Model::TreeEnsemble { trees, .. } = &mut bad {
            trees[0].children_left[0] = 0;
        }
        assert!(matches!(
            bad.validate(),
            Err(ModelError::InvalidTree { tree: 0, .. })
        ));

        let mut bad: Model = serde_json::from_str(ENSEMBLE).unwrap();
        if let Model::TreeEnsemble { trees, .. } = &mut bad {
            trees[1].feature[0] = 4;
        }
        assert!(matches!(
            bad.validate(),
            Err(ModelError::InvalidTree { tree: 1, .. })
        ));

        let mut bad: Model = serde_json::from_str(ENSEMBLE).unwrap();
        if let Model::TreeEnsemble { trees, .. } = &mut bad {
            trees[1].value.pop();
        }
        assert!(bad.loaded().is_err());
    }
}
