// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{bail, Context, Result};
use log::debug;
use std::path::Path;

use super::model::Model;
use quota_search_intf::ResourceVector;
use quota_util::*;

/// Predicts the throughput of a workload confined to a quota. Predictors
/// are shared read-only across search threads.
pub trait QuotaPredictor: Sync {
    fn predict(&self, quota: &ResourceVector) -> Result<f64>;
}

impl<F> QuotaPredictor for F
where
    F: Fn(&ResourceVector) -> f64 + Sync,
{
    fn predict(&self, quota: &ResourceVector) -> Result<f64> {
        Ok(self(quota))
    }
}

/// Model trained on `(cpu, mem, llc, mba)`.
#[derive(Debug)]
pub struct ResourceModel {
    model: Model,
}

impl ResourceModel {
    pub fn new(model: Model) -> Self {
        Self { model }
    }
}

impl QuotaPredictor for ResourceModel {
    fn predict(&self, quota: &ResourceVector) -> Result<f64> {
        Ok(self.model.predict(&quota.features())?)
    }
}

/// Model trained on `(cpu, mem, llc, mba, tasks)` with the task count fixed
/// for the lifetime of the predictor.
#[derive(Debug)]
pub struct TaskAwareModel {
    model: Model,
    tasks: u32,
}

impl TaskAwareModel {
    pub fn new(model: Model, tasks: u32) -> Self {
        Self { model, tasks }
    }
}

impl QuotaPredictor for TaskAwareModel {
    fn predict(&self, quota: &ResourceVector) -> Result<f64> {
        let f = quota.features();
        Ok(self
            .model
            .predict(&[f[0], f[1], f[2], f[3], self.tasks as f64])?)
    }
}

/// Wrap `model` in the predictor matching the workload's input shape.
/// Fails if the model was trained on a different number of inputs.
pub fn predictor_for(model: Model, tasks: Option<u32>) -> Result<Box<dyn QuotaPredictor>> {
    let want = match tasks {
        Some(_) => 5,
        None => 4,
    };
    if model.nr_features() != want {
        bail!(
            "model takes {} inputs but the workload provides {}",
            model.nr_features(),
            want
        );
    }
    let pred: Box<dyn QuotaPredictor> = match tasks {
        Some(tasks) => Box::new(TaskAwareModel::new(model, tasks)),
        None => Box::new(ResourceModel::new(model)),
    };
    Ok(pred)
}

pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Model> {
    let path = path.as_ref();
    let mut model = Model::load(path).with_context(|| format!("Loading model {:?}", path))?;
    model
        .loaded()
        .with_context(|| format!("Validating model {:?}", path))?;
    debug!(
        "model: loaded {:?} ({} inputs)",
        path,
        model.nr_features()
    );
    Ok(model)
}
