// Copyright (c) Facebook, Inc. and its affiliates.
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::UNIX_EPOCH;

use super::{Improvement, ResourceVector, Workload};
use quota_util::*;

/// How a quota maps onto a two class online/offline partition of the
/// machine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocPlan {
    pub online_cpus: Vec<usize>,
    pub offline_cpus: Vec<usize>,
    pub online_llc_ways: u32,
    pub offline_llc_ways: u32,
    pub offline_llc_mask: u64,
    pub offline_mba_pct: u32,
}

const REPORT_DOC: &str = "\
//
// quota-search result report
//
//  timestamp: The time this report was created at
//  workload: Workload type
//  tasks: Task count fed to the target derivation and the model
//  target: Throughput target
//  feasible: Whether quota was verified to satisfy the target
//  quota: Cheapest feasible quota, the unverified maximal quota if !feasible
//  cost: Cost of quota
//  nr_queries: Number of model predictions
//  nr_candidates: Number of fully specified quotas evaluated
//  nr_feasible: Number of those which met the target, non-zero with
//               !feasible if they all cost more than the maximal quota
//  elapsed: Search duration in seconds
//  trail: Every improvement in the order found
//  alloc: Online/offline allocation plan derived from quota
//
";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub timestamp: DateTime<Local>,
    pub workload: Workload,
    pub tasks: Option<u32>,
    pub target: f64,
    pub feasible: bool,
    pub quota: ResourceVector,
    pub cost: f64,
    pub nr_queries: u64,
    pub nr_candidates: u64,
    pub nr_feasible: u64,
    pub elapsed: f64,
    pub trail: Vec<Improvement>,
    pub alloc: Option<AllocPlan>,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            timestamp: DateTime::from(UNIX_EPOCH),
            workload: Default::default(),
            tasks: None,
            target: 0.0,
            feasible: false,
            quota: Default::default(),
            cost: 0.0,
            nr_queries: 0,
            nr_candidates: 0,
            nr_feasible: 0,
            elapsed: 0.0,
            trail: vec![],
            alloc: None,
        }
    }
}

impl JsonLoad for Report {}

impl JsonSave for Report {
    fn preamble() -> Option<String> {
        Some(REPORT_DOC.to_string())
    }
}
