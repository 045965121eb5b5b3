// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{anyhow, bail, Context, Result};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use quota_search_intf::DimBounds;

fn to_decimal(v: f64) -> Result<Decimal> {
    // Going through the shortest round-trip representation keeps 0.1 as
    // 0.1 instead of 0.1000000000000000055511151231257827.
    Decimal::from_str(&v.to_string()).with_context(|| format!("converting {} to decimal", v))
}

/// Descending walk over a dimension, `max, max - step, ...` while the value
/// stays strictly above `min`. Subtraction is done in decimal so that long
/// walks with steps like 0.1 don't drift.
#[derive(Debug, Clone)]
pub struct Descent {
    cur: Decimal,
    min: Decimal,
    step: Decimal,
}

impl Descent {
    pub fn new(bounds: &DimBounds) -> Result<Self> {
        let step = to_decimal(bounds.step)?;
        if step <= Decimal::ZERO {
            bail!("step must be positive, got {}", bounds.step);
        }
        Ok(Self {
            cur: to_decimal(bounds.max)?,
            min: to_decimal(bounds.min)?,
            step,
        })
    }
}

impl Iterator for Descent {
    type Item = Decimal;

    fn next(&mut self) -> Option<Decimal> {
        if self.cur > self.min {
            let v = self.cur;
            self.cur -= self.step;
            Some(v)
        } else {
            None
        }
    }
}

pub fn real_values(bounds: &DimBounds) -> Result<Vec<f64>> {
    Descent::new(bounds)?
        .map(|d| {
            d.to_string()
                .parse::<f64>()
                .with_context(|| format!("converting {} to f64", d))
        })
        .collect()
}

/// Values of a dimension which must stay integral, e.g. memory in KiB.
pub fn integral_values(bounds: &DimBounds) -> Result<Vec<u64>> {
    for v in &[bounds.max, bounds.min, bounds.step] {
        if v.fract() != 0.0 {
            bail!("{} is not integral in {}", v, bounds);
        }
    }
    Descent::new(bounds)?
        .map(|d| d.to_u64().ok_or_else(|| anyhow!("{} out of u64 range", d)))
        .collect()
}
