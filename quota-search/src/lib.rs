// Copyright (c) Facebook, Inc. and its affiliates.
pub mod alloc;
pub mod cost;
pub mod grid;
pub mod model;
pub mod predictor;
pub mod search;
pub mod trigger;
pub mod workload;

pub use alloc::{alloc_plan, pqos_commands};
pub use cost::CostFunction;
pub use model::{Model, ModelError};
pub use predictor::{load_model, predictor_for, QuotaPredictor, ResourceModel, TaskAwareModel};
pub use search::{search, search_parallel, search_with_progress, QuotaResult, SearchConfig};
pub use trigger::TaskTrigger;
pub use workload::{init, Setup};
