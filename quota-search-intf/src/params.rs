// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DimBounds;
use quota_util::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workload {
    Generic,
    Mysql,
    Kafka,
}

impl Workload {
    pub const ALL: [Workload; 3] = [Workload::Generic, Workload::Mysql, Workload::Kafka];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Mysql => "mysql",
            Self::Kafka => "kafka",
        }
    }
}

impl Default for Workload {
    fn default() -> Self {
        Self::Generic
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Workload {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        for wl in Self::ALL.iter() {
            if wl.name() == input {
                return Ok(*wl);
            }
        }
        bail!(
            "unknown workload {:?}, should be one of {}",
            input,
            Self::ALL
                .iter()
                .map(|x| x.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

/// Piecewise-linear resource weightings used to rank feasible quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostKind {
    Generic,
    Mysql,
    Kafka,
}

/// What to do with the rest of the LLC range once the LLC probe at full
/// bandwidth falls below the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePrune {
    /// Skip the infeasible LLC value and keep scanning smaller ones.
    Skip,
    /// Stop scanning LLC values for the current (cpu, mem) pair.
    Break,
}

impl Default for CachePrune {
    fn default() -> Self {
        Self::Skip
    }
}

impl FromStr for CachePrune {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        match input {
            "skip" => Ok(Self::Skip),
            "break" => Ok(Self::Break),
            v => bail!("unknown cache prune mode {:?}, should be skip or break", v),
        }
    }
}

/// Throughput target calibration from two measured (tasks, max throughput)
/// points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCalibration {
    pub anchors: [(f64, f64); 2],
    pub margin: f64,
    pub dfl_throughput: f64,
}

impl TargetCalibration {
    pub fn validate(&self) -> Result<()> {
        if self.anchors[0].0 == self.anchors[1].0 {
            bail!(
                "calibration anchors must have distinct task counts, got {:?}",
                &self.anchors
            );
        }
        if !(self.margin > 0.0) {
            bail!("calibration margin must be positive, got {}", self.margin);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadParams {
    pub cpu: DimBounds,
    pub mem: DimBounds,
    pub llc: DimBounds,
    pub mba: DimBounds,
    pub target: f64,
    pub calib: Option<TargetCalibration>,
    pub tasks_feature: bool,
    pub dfl_tasks: u32,
    pub cost: CostKind,
    pub prune_outer: bool,
    pub cache_prune: CachePrune,
    pub model: String,
}

impl WorkloadParams {
    const LLC: DimBounds = DimBounds::new(11264.0, 1024.0, 1024.0);
    const MBA: DimBounds = DimBounds::new(100.0, 10.0, 10.0);

    fn dfl_generic() -> Self {
        Self {
            cpu: DimBounds::new(4.0, 0.6, 0.2),
            mem: DimBounds::new(60000.0, 16384.0, 2048.0),
            llc: Self::LLC,
            mba: Self::MBA,
            target: 0.4,
            calib: None,
            tasks_feature: false,
            dfl_tasks: 0,
            cost: CostKind::Generic,
            prune_outer: true,
            cache_prune: CachePrune::Skip,
            model: "generic.model.json".into(),
        }
    }

    fn dfl_mysql() -> Self {
        Self {
            cpu: DimBounds::new(6.0, 0.6, 0.1),
            mem: DimBounds::new(512000.0, 10240.0, 1024.0),
            llc: Self::LLC,
            mba: Self::MBA,
            target: 4150.0 * 90.0 * PCT,
            calib: Some(TargetCalibration {
                anchors: [(52.0, 3500.0), (127.0, 4150.0)],
                margin: 90.0 * PCT,
                dfl_throughput: 4150.0,
            }),
            tasks_feature: true,
            dfl_tasks: 0,
            cost: CostKind::Mysql,
            prune_outer: false,
            cache_prune: CachePrune::Skip,
            model: "mysql.model.json".into(),
        }
    }

    fn dfl_kafka() -> Self {
        Self {
            cpu: DimBounds::new(2.0, 0.6, 0.1),
            mem: DimBounds::new(102400.0, 10240.0, 1024.0),
            llc: Self::LLC,
            mba: Self::MBA,
            target: 3500.0,
            calib: None,
            tasks_feature: true,
            dfl_tasks: 130,
            cost: CostKind::Kafka,
            prune_outer: false,
            cache_prune: CachePrune::Skip,
            model: "kafka.model.json".into(),
        }
    }

    pub fn validate(&self, wl: Workload) -> Result<()> {
        for (name, dim) in &[
            ("cpu", &self.cpu),
            ("mem", &self.mem),
            ("llc", &self.llc),
            ("mba", &self.mba),
        ] {
            dim.validate(&format!("{}.{}", wl, name))?;
        }
        if !self.target.is_finite() {
            bail!("{}.target is not finite", wl);
        }
        if let Some(calib) = self.calib.as_ref() {
            calib.validate()?;
        }
        Ok(())
    }
}

const PARAMS_DOC: &str = "\
//
// quota-search workload parameters
//
// Per-workload search domains, throughput targets and cost functions. Each
// dimension is scanned from max down to but excluding min in step
// decrements. Memory and LLC sizes are in KiB, mba in percent.
//
// If calib is set, the target is derived from the task count by linear
// interpolation between the two anchors scaled by margin. When the task
// count is zero, dfl_throughput * margin is used instead. An explicit
// --target always wins.
//
//  WORKLOAD.cpu/mem/llc/mba: Search domain {max, min, step}
//  WORKLOAD.target: Throughput target if calib is null
//  WORKLOAD.calib.anchors: Two [tasks, throughput] calibration points
//  WORKLOAD.calib.margin: Fraction of the interpolated throughput to target
//  WORKLOAD.calib.dfl_throughput: Throughput to use when there are no tasks
//  WORKLOAD.tasks_feature: The model takes the task count as the 5th input
//  WORKLOAD.dfl_tasks: Task count to use if not specified
//  WORKLOAD.cost: Cost function - generic, mysql or kafka
//  WORKLOAD.prune_outer: Probe and prune at cpu and mem levels too
//  WORKLOAD.cache_prune: skip or break on an infeasible LLC probe
//  WORKLOAD.model: Model file, relative to the params file if not absolute
//
";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub generic: WorkloadParams,
    pub mysql: WorkloadParams,
    pub kafka: WorkloadParams,
}

impl Params {
    pub fn workload(&self, wl: Workload) -> &WorkloadParams {
        match wl {
            Workload::Generic => &self.generic,
            Workload::Mysql => &self.mysql,
            Workload::Kafka => &self.kafka,
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            generic: WorkloadParams::dfl_generic(),
            mysql: WorkloadParams::dfl_mysql(),
            kafka: WorkloadParams::dfl_kafka(),
        }
    }
}

impl JsonLoad for Params {
    fn loaded(&mut self) -> Result<()> {
        for wl in Workload::ALL.iter() {
            self.workload(*wl).validate(*wl)?;
        }
        Ok(())
    }
}

impl JsonSave for Params {
    fn preamble() -> Option<String> {
        Some(PARAMS_DOC.to_string())
    }
}
