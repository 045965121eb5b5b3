// Copyright (c) Facebook, Inc. and its affiliates.
use quota_util::*;

pub mod args;
pub mod params;
pub mod quota;
pub mod report;

pub use args::Args;
pub use params::{CachePrune, CostKind, Params, TargetCalibration, Workload, WorkloadParams};
pub use quota::{DimBounds, Improvement, ResourceVector};
pub use report::{AllocPlan, Report};

lazy_static::lazy_static! {
    pub static ref VERSION: &'static str = env!("CARGO_PKG_VERSION");
    pub static ref FULL_VERSION: String = full_version(*VERSION);
}
