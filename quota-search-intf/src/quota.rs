// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A resource quota. Memory and LLC sizes are in KiB, memory bandwidth is
/// in percent of the socket's bandwidth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu: f64,
    pub mem: u64,
    pub llc: u64,
    pub mba: u32,
}

impl ResourceVector {
    pub fn new(cpu: f64, mem: u64, llc: u64, mba: u32) -> Self {
        Self { cpu, mem, llc, mba }
    }

    /// Model input columns in training order.
    pub fn features(&self) -> [f64; 4] {
        [self.cpu, self.mem as f64, self.llc as f64, self.mba as f64]
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.cpu, self.mem, self.llc, self.mba
        )
    }
}

/// Search domain of one dimension. Values are visited from `max` downwards
/// in `step` decrements while they stay strictly above `min`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimBounds {
    pub max: f64,
    pub min: f64,
    pub step: f64,
}

impl DimBounds {
    pub const fn new(max: f64, min: f64, step: f64) -> Self {
        Self { max, min, step }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if !self.max.is_finite() || !self.min.is_finite() || !self.step.is_finite() {
            bail!("{}: non-finite bounds {:?}", name, self);
        }
        if self.step <= 0.0 {
            bail!("{}: step must be positive, got {}", name, self.step);
        }
        if self.min < 0.0 {
            bail!("{}: min must not be negative, got {}", name, self.min);
        }
        Ok(())
    }
}

impl fmt::Display for DimBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}/{}", self.max, self.min, self.step)
    }
}

/// A strictly cheaper feasible quota found during a search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub cost: f64,
    pub quota: ResourceVector,
}
