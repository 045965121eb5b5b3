// Copyright (c) Facebook, Inc. and its affiliates.
//! Maps a quota onto a two class partition of the machine. The workload
//! being sized runs in the online class (COS 1), everything else in the
//! offline class (COS 2) which gets whatever the online class doesn't need.
use anyhow::{bail, Result};

use quota_search_intf::{AllocPlan, ResourceVector};

const LLC_WAY_SIZE: u64 = 1024;

fn nr_bits(mask: u64) -> u32 {
    64 - mask.leading_zeros()
}

fn format_cpus(cpus: &[usize]) -> String {
    cpus.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Online cpus are spread over every other logical cpu so that they don't
/// share physical cores with each other on SMT machines.
pub fn alloc_plan(
    quota: &ResourceVector,
    nr_cores: usize,
    llc_ways_mask: u64,
) -> Result<AllocPlan> {
    if !(quota.cpu > 0.0) {
        bail!("cpu quota {} is not positive", quota.cpu);
    }
    if quota.mba > 100 {
        bail!("mba quota {}% is over 100%", quota.mba);
    }
    if llc_ways_mask == 0 {
        bail!("LLC way mask is empty");
    }

    let nr_online = quota.cpu.ceil() as usize;
    // online cpus land on 0, 2, ..., 2 * (nr_online - 1)
    if 2 * nr_online - 1 > nr_cores {
        bail!(
            "{} online cpus don't fit in every other cpu of {}",
            nr_online,
            nr_cores
        );
    }
    let (online_cpus, offline_cpus): (Vec<usize>, Vec<usize>) =
        (0..nr_cores).partition(|c| c % 2 == 0 && c / 2 < nr_online);

    let all_ways = nr_bits(llc_ways_mask);
    let online_llc_ways = ((quota.llc + LLC_WAY_SIZE - 1) / LLC_WAY_SIZE) as u32;
    let offline_llc_ways = all_ways.saturating_sub(online_llc_ways).max(1);
    let offline_llc_mask = match llc_ways_mask.checked_shr(online_llc_ways) {
        Some(mask) if mask != 0 => mask,
        _ => 1,
    };

    Ok(AllocPlan {
        online_cpus,
        offline_cpus,
        online_llc_ways,
        offline_llc_ways,
        offline_llc_mask,
        offline_mba_pct: 100 - quota.mba,
    })
}

/// pqos invocations which would apply `plan`. Nothing is executed.
pub fn pqos_commands(plan: &AllocPlan) -> Vec<String> {
    vec![
        format!("pqos -a \"llc:1={}\"", format_cpus(&plan.online_cpus)),
        format!("pqos -a \"llc:2={}\"", format_cpus(&plan.offline_cpus)),
        format!("pqos -e \"llc:2={:#x}\"", plan.offline_llc_mask),
        format!("pqos -e \"mba:2={}\"", plan.offline_mba_pct),
    ]
}
