// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{anyhow, Context, Result};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use super::cost::CostFunction;
use super::grid;
use super::predictor::QuotaPredictor;
use quota_search_intf::{CachePrune, CostKind, DimBounds, Improvement, ResourceVector};
use quota_util::*;

/// Everything a search needs besides the predictor. Immutable once built;
/// the grids are materialized up front.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    cpu: DimBounds,
    mem: DimBounds,
    llc: DimBounds,
    mba: DimBounds,
    target: f64,
    tasks: Option<u32>,
    cost: CostKind,
    prune_outer: bool,
    cache_prune: CachePrune,

    cpus: Vec<f64>,
    mems: Vec<u64>,
    llcs: Vec<u64>,
    mbas: Vec<u32>,
}

impl SearchConfig {
    pub fn new(
        cpu: DimBounds,
        mem: DimBounds,
        llc: DimBounds,
        mba: DimBounds,
        target: f64,
        cost: CostKind,
    ) -> Result<Self> {
        for (name, dim) in &[("cpu", &cpu), ("mem", &mem), ("llc", &llc), ("mba", &mba)] {
            dim.validate(name)?;
        }
        if !target.is_finite() {
            return Err(anyhow!("target {} is not finite", target));
        }
        let cpus = grid::real_values(&cpu).context("cpu")?;
        let mems = grid::integral_values(&mem).context("mem")?;
        let llcs = grid::integral_values(&llc).context("llc")?;
        let mbas = grid::integral_values(&mba)
            .context("mba")?
            .into_iter()
            .map(|v| u32::try_from(v).with_context(|| format!("mba {} out of range", v)))
            .collect::<Result<Vec<u32>>>()?;

        Ok(Self {
            cpu,
            mem,
            llc,
            mba,
            target,
            tasks: None,
            cost,
            prune_outer: false,
            cache_prune: CachePrune::Skip,
            cpus,
            mems,
            llcs,
            mbas,
        })
    }

    pub fn with_tasks(mut self, tasks: Option<u32>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_prune_outer(mut self, prune_outer: bool) -> Self {
        self.prune_outer = prune_outer;
        self
    }

    pub fn with_cache_prune(mut self, cache_prune: CachePrune) -> Self {
        self.cache_prune = cache_prune;
        self
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn tasks(&self) -> Option<u32> {
        self.tasks
    }

    pub fn cost_kind(&self) -> CostKind {
        self.cost
    }

    pub fn cache_prune(&self) -> CachePrune {
        self.cache_prune
    }

    pub fn prune_outer(&self) -> bool {
        self.prune_outer
    }

    pub fn max_vector(&self) -> ResourceVector {
        ResourceVector::new(
            self.cpu.max,
            self.mem.max as u64,
            self.llc.max as u64,
            self.mba.max as u32,
        )
    }

    /// Number of values in each dimension's grid, cpu first.
    pub fn grid_lens(&self) -> [usize; 4] {
        [
            self.cpus.len(),
            self.mems.len(),
            self.llcs.len(),
            self.mbas.len(),
        ]
    }

    pub fn nr_cpu_steps(&self) -> usize {
        self.cpus.len()
    }

    fn is_empty(&self) -> bool {
        self.grid_lens().iter().any(|len| *len == 0)
    }
}

impl std::fmt::Display for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cpu={} mem={} llc={} mba={} target={} tasks={:?} cost={:?} prune_outer={} cache_prune={:?}",
            self.cpu,
            self.mem,
            self.llc,
            self.mba,
            self.target,
            self.tasks,
            self.cost,
            self.prune_outer,
            self.cache_prune
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaResult {
    /// Cheapest feasible quota, or the unverified maximal quota if
    /// `!feasible`.
    pub quota: ResourceVector,
    pub cost: f64,
    /// Whether `quota` was verified to meet the target. When false, see
    /// `nr_feasible` for whether anything did.
    pub feasible: bool,
    pub nr_queries: u64,
    pub nr_candidates: u64,
    /// Candidates which met the target. Can be non-zero with `!feasible`
    /// when every one of them costs more than the maximal quota.
    pub nr_feasible: u64,
    pub trail: Vec<Improvement>,
}

impl QuotaResult {
    /// Some quota met the target but none was cheaper than the maximal one.
    pub fn all_above_max_cost(&self) -> bool {
        !self.feasible && self.nr_feasible > 0
    }
}

fn reported(mut quota: ResourceVector) -> ResourceVector {
    quota.cpu = round_to(quota.cpu, 2);
    quota
}

/// Running minimum. Starts from the unverified maximal quota; the first
/// feasible quota at or below its cost replaces it, later ones must be
/// strictly cheaper.
#[derive(Debug, Clone)]
struct Tracker {
    best: Improvement,
    feasible: bool,
    trail: Vec<Improvement>,
}

impl Tracker {
    fn new(sentinel: Improvement) -> Self {
        Self {
            best: sentinel,
            feasible: false,
            trail: vec![],
        }
    }

    fn offer(&mut self, cost: f64, quota: ResourceVector) -> bool {
        if cost < self.best.cost || (!self.feasible && cost <= self.best.cost) {
            let imp = Improvement {
                cost,
                quota: reported(quota),
            };
            self.best = imp;
            self.feasible = true;
            self.trail.push(imp);
            true
        } else {
            false
        }
    }
}

struct Probe<'a, P: QuotaPredictor + ?Sized> {
    pred: &'a P,
    target: f64,
    nr_queries: u64,
}

impl<'a, P: QuotaPredictor + ?Sized> Probe<'a, P> {
    fn feasible(&mut self, quota: ResourceVector) -> Result<bool> {
        self.nr_queries += 1;
        let tput = self
            .pred
            .predict(&quota)
            .with_context(|| format!("predicting {}", &quota))?;
        trace!("search: {} -> {:.3}", &quota, tput);
        Ok(tput >= self.target)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    nr_queries: u64,
    nr_candidates: u64,
    nr_feasible: u64,
}

impl std::ops::AddAssign for Counts {
    fn add_assign(&mut self, rhs: Self) {
        self.nr_queries += rhs.nr_queries;
        self.nr_candidates += rhs.nr_candidates;
        self.nr_feasible += rhs.nr_feasible;
    }
}

/// Outcome of scanning a contiguous slice of the cpu grid.
struct Partial {
    tracker: Tracker,
    counts: Counts,
    cpu_pruned: bool,
}

fn sentinel(cfg: &SearchConfig) -> Improvement {
    let max = cfg.max_vector();
    Improvement {
        cost: cfg.cost.cost(&max),
        quota: reported(max),
    }
}

fn scan<P: QuotaPredictor + ?Sized>(
    cfg: &SearchConfig,
    pred: &P,
    cpus: &[f64],
    progress: &(dyn Fn() + Sync),
) -> Result<Partial> {
    let max = cfg.max_vector();
    let mut probe = Probe {
        pred,
        target: cfg.target,
        nr_queries: 0,
    };
    let mut tracker = Tracker::new(sentinel(cfg));
    let mut nr_candidates = 0;
    let mut nr_feasible = 0;
    let mut cpu_pruned = false;

    for &cpu in cpus {
        if cfg.prune_outer
            && !probe.feasible(ResourceVector::new(cpu, max.mem, max.llc, max.mba))?
        {
            cpu_pruned = true;
            break;
        }
        for &mem in cfg.mems.iter() {
            if cfg.prune_outer
                && !probe.feasible(ResourceVector::new(cpu, mem, max.llc, max.mba))?
            {
                break;
            }
            for &llc in cfg.llcs.iter() {
                if !probe.feasible(ResourceVector::new(cpu, mem, llc, max.mba))? {
                    match cfg.cache_prune {
                        CachePrune::Skip => continue,
                        CachePrune::Break => break,
                    }
                }
                for &mba in cfg.mbas.iter() {
                    nr_candidates += 1;
                    let quota = ResourceVector::new(cpu, mem, llc, mba);
                    if !probe.feasible(quota)? {
                        break;
                    }
                    nr_feasible += 1;
                    let cost = cfg.cost.cost(&quota);
                    if tracker.offer(cost, quota) {
                        debug!(
                            "search: [{}] cost {:.3} at {}",
                            nr_candidates, cost, &tracker.best.quota
                        );
                    }
                }
            }
        }
        progress();
    }

    Ok(Partial {
        tracker,
        counts: Counts {
            nr_queries: probe.nr_queries,
            nr_candidates,
            nr_feasible,
        },
        cpu_pruned,
    })
}

fn finish(tracker: Tracker, counts: Counts) -> QuotaResult {
    QuotaResult {
        quota: tracker.best.quota,
        cost: tracker.best.cost,
        feasible: tracker.feasible,
        nr_queries: counts.nr_queries,
        nr_candidates: counts.nr_candidates,
        nr_feasible: counts.nr_feasible,
        trail: tracker.trail,
    }
}

fn empty_result(cfg: &SearchConfig) -> QuotaResult {
    warn!(
        "search: empty grid {:?}, nothing to evaluate",
        cfg.grid_lens()
    );
    finish(Tracker::new(sentinel(cfg)), Counts::default())
}

/// Find the cheapest quota whose predicted throughput meets the target.
pub fn search<P: QuotaPredictor + ?Sized>(cfg: &SearchConfig, pred: &P) -> Result<QuotaResult> {
    search_with_progress(cfg, pred, &|| {})
}

/// Same as `search` but `progress` is called after each cpu step.
pub fn search_with_progress<P: QuotaPredictor + ?Sized>(
    cfg: &SearchConfig,
    pred: &P,
    progress: &(dyn Fn() + Sync),
) -> Result<QuotaResult> {
    if cfg.is_empty() {
        return Ok(empty_result(cfg));
    }
    let part = scan(cfg, pred, &cfg.cpus, progress)?;
    Ok(finish(part.tracker, part.counts))
}

/// Partition the cpu grid into `jobs` contiguous slices and scan them
/// concurrently. The result is identical to `search`'s. Partitions past
/// one which hit the outer cpu prune are discarded as a sequential scan
/// would never have reached them.
pub fn search_parallel<P: QuotaPredictor + ?Sized>(
    cfg: &SearchConfig,
    pred: &P,
    jobs: usize,
    progress: &(dyn Fn() + Sync),
) -> Result<QuotaResult> {
    if jobs <= 1 || cfg.cpus.len() <= 1 {
        return search_with_progress(cfg, pred, progress);
    }
    if cfg.is_empty() {
        return Ok(empty_result(cfg));
    }

    let chunk = (cfg.cpus.len() + jobs - 1) / jobs;
    debug!(
        "search: {} cpu steps over {} partitions",
        cfg.cpus.len(),
        (cfg.cpus.len() + chunk - 1) / chunk
    );

    let parts: Vec<Result<Partial>> = crossbeam::thread::scope(|s| {
        let handles: Vec<_> = cfg
            .cpus
            .chunks(chunk)
            .map(|cpus| s.spawn(move |_| scan(cfg, pred, cpus, progress)))
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(anyhow!("search worker panicked")))
            })
            .collect()
    })
    .map_err(|_| anyhow!("search worker panicked"))?;

    let mut merged = Tracker::new(sentinel(cfg));
    let mut counts = Counts::default();
    for part in parts {
        let part = part?;
        counts += part.counts;
        // Replaying each partition's improvements in order reproduces the
        // sequential running minimum.
        for imp in part.tracker.trail.iter() {
            merged.offer(imp.cost, imp.quota);
        }
        if part.cpu_pruned {
            break;
        }
    }
    Ok(finish(merged, counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const CPU: DimBounds = DimBounds::new(2.0, 0.6, 0.1);
    const MEM: DimBounds = DimBounds::new(8192.0, 1024.0, 1024.0);
    const LLC: DimBounds = DimBounds::new(11264.0, 1024.0, 1024.0);
    const MBA: DimBounds = DimBounds::new(100.0, 10.0, 10.0);

    fn config(target: f64, cost: CostKind) -> SearchConfig {
        SearchConfig::new(CPU, MEM, LLC, MBA, target, cost).unwrap()
    }

    // Smooth and monotone in every dimension.
    fn smooth(q: &ResourceVector) -> f64 {
        q.cpu * 100.0 + q.mem as f64 / 256.0 + q.llc as f64 / 512.0 + q.mba as f64 / 2.0
    }

    // Not monotone in llc - only even LLC way counts do well.
    fn bumpy(q: &ResourceVector) -> f64 {
        let llc_bonus = if (q.llc / 1024) % 2 == 0 { 60.0 } else { 0.0 };
        q.cpu * 100.0 + llc_bonus + q.mba as f64 / 5.0
    }

    #[test]
    fn test_unreachable_target_is_infeasible() {
        let _ = ::env_logger::try_init();
        let cfg = config(250.0, CostKind::Generic);
        let res = search(&cfg, &|q: &ResourceVector| q.cpu * 100.0).unwrap();

        assert!(!res.feasible);
        assert_eq!(res.quota, cfg.max_vector());
        assert_eq!(res.cost, CostKind::Generic.cost(&cfg.max_vector()));
        assert!(res.trail.is_empty());
        assert_eq!(res.nr_feasible, 0);
    }

    #[test]
    fn test_cpu_only_predictor() {
        let _ = ::env_logger::try_init();
        let cfg = config(150.0, CostKind::Generic);
        let res = search(&cfg, &|q: &ResourceVector| q.cpu * 100.0).unwrap();

        assert!(res.feasible);
        // Smallest cpu meeting the target, everything else at the lowest
        // grid value above the minimum.
        assert_eq!(res.quota, ResourceVector::new(1.5, 2048, 2048, 20));
    }

    #[test]
    fn test_feasible_points_above_max_cost() {
        let _ = ::env_logger::try_init();
        // Only mem=50176 meets the target and kafka weighs memory under
        // 50MiB five times, so every such point costs more than the max.
        let mem = DimBounds::new(102400.0, 10240.0, 1024.0);
        let cfg = SearchConfig::new(CPU, mem, LLC, MBA, 1.0, CostKind::Kafka).unwrap();
        let pred = |q: &ResourceVector| if q.mem == 50176 { 2.0 } else { 0.0 };
        let res = search(&cfg, &pred).unwrap();

        assert!(!res.feasible);
        assert!(res.all_above_max_cost());
        assert_eq!(res.quota, cfg.max_vector());
        assert_eq!(res.cost, 123.0);
        assert!(res.trail.is_empty());
        // every cpu, every llc and every mba at mem=50176
        assert_eq!(res.nr_feasible, 14 * 10 * 9);
        assert_eq!(search_parallel(&cfg, &pred, 4, &|| {}).unwrap(), res);

        let res = search(&cfg, &|_: &ResourceVector| 0.0).unwrap();
        assert!(!res.feasible);
        assert!(!res.all_above_max_cost());
        assert_eq!(res.nr_feasible, 0);
    }

    #[test]
    fn test_max_vector_alone_feasible() {
        let cfg = config(0.0, CostKind::Generic);
        let pred = |q: &ResourceVector| {
            if *q == ResourceVector::new(2.0, 8192, 11264, 100) {
                1.0
            } else {
                -1.0
            }
        };
        let res = search(&cfg, &pred).unwrap();
        assert!(res.feasible);
        assert_eq!(res.quota, cfg.max_vector());
        assert_eq!(res.trail.len(), 1);
    }

    #[test]
    fn test_monotonic_and_feasible_trail() {
        let _ = ::env_logger::try_init();
        for &(target, cost) in &[
            (180.0, CostKind::Generic),
            (200.0, CostKind::Mysql),
            (230.0, CostKind::Kafka),
        ] {
            let cfg = config(target, cost);
            let res = search(&cfg, &smooth).unwrap();
            let max_cost = cost.cost(&cfg.max_vector());

            assert!(res.feasible);
            assert!(res.cost <= max_cost);
            let mut last = max_cost;
            for imp in res.trail.iter() {
                assert!(imp.cost <= last);
                assert!(smooth(&imp.quota) >= target);
                assert!((cost.cost(&imp.quota) - imp.cost).abs() < 1e-6);
                last = imp.cost;
            }
            assert_eq!(res.trail.last().unwrap().quota, res.quota);
        }
    }

    #[test]
    fn test_min_never_queried() {
        let seen = Mutex::new(vec![]);
        let pred = |q: &ResourceVector| {
            seen.lock().unwrap().push(*q);
            smooth(q)
        };
        let cfg = config(150.0, CostKind::Generic).with_prune_outer(true);
        let res = search(&cfg, &pred).unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len() as u64, res.nr_queries);
        for q in seen.iter() {
            assert!(q.cpu > CPU.min);
            assert!(q.mem as f64 > MEM.min);
            assert!(q.llc as f64 > LLC.min);
            assert!(q.mba as f64 > MBA.min);
        }
    }

    #[test]
    fn test_cache_prune_modes() {
        // Odd LLC way counts fail at full bandwidth unless cpu >= 1.8.
        let cfg = config(200.0, CostKind::Generic);
        let skip = search(&cfg, &bumpy).unwrap();
        let brk = search(&cfg.clone().with_cache_prune(CachePrune::Break), &bumpy).unwrap();

        assert!(skip.feasible && brk.feasible);
        // llc=11264 is 11 ways which is odd, so break gives up on low cpus
        // right away while skip finds the even way counts below.
        assert!(skip.cost < brk.cost);
        assert!(brk.nr_queries < skip.nr_queries);
        assert_eq!(skip.quota, ResourceVector::new(1.4, 2048, 2048, 20));
        assert_eq!(brk.quota, ResourceVector::new(1.8, 2048, 2048, 20));
    }

    #[test]
    fn test_deterministic() {
        let cfg = config(190.0, CostKind::Mysql);
        let a = search(&cfg, &bumpy).unwrap();
        let b = search(&cfg, &bumpy).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let _ = ::env_logger::try_init();
        for prune_outer in &[false, true] {
            for target in &[120.0, 160.0, 200.0, 1000.0] {
                let cfg = config(*target, CostKind::Kafka).with_prune_outer(*prune_outer);
                let seq = search(&cfg, &bumpy).unwrap();
                for jobs in &[2, 3, 5, 32] {
                    let par = search_parallel(&cfg, &bumpy, *jobs, &|| {}).unwrap();
                    assert_eq!(seq.quota, par.quota);
                    assert_eq!(seq.cost, par.cost);
                    assert_eq!(seq.feasible, par.feasible);
                    assert_eq!(seq.trail, par.trail);
                    assert_eq!(seq.nr_feasible, par.nr_feasible);
                    if *prune_outer {
                        assert_eq!(seq.nr_queries, par.nr_queries);
                    }
                }
            }
        }
    }

    #[test]
    fn test_outer_prune_stops_cpu_scan() {
        let seen = Mutex::new(vec![]);
        let pred = |q: &ResourceVector| {
            seen.lock().unwrap().push(*q);
            q.cpu * 100.0
        };
        let cfg = config(175.0, CostKind::Generic).with_prune_outer(true);
        let res = search(&cfg, &pred).unwrap();

        assert_eq!(res.quota.cpu, 1.8);
        // 1.7 is the first and only infeasible cpu probed
        let seen = seen.into_inner().unwrap();
        assert!(seen.iter().all(|q| q.cpu >= 1.7));
        assert_eq!(seen.iter().filter(|q| q.cpu == 1.7).count(), 1);
    }

    #[test]
    fn test_predictor_error_aborts() {
        struct Failing;
        impl QuotaPredictor for Failing {
            fn predict(&self, quota: &ResourceVector) -> Result<f64> {
                if quota.cpu < 1.0 {
                    Err(anyhow!("input shape mismatch"))
                } else {
                    Ok(1000.0)
                }
            }
        }
        let cfg = config(1.0, CostKind::Generic);
        let err = search(&cfg, &Failing).unwrap_err();
        assert!(format!("{:#}", err).contains("input shape mismatch"));
        assert!(search_parallel(&cfg, &Failing, 4, &|| {}).is_err());
    }

    #[test]
    fn test_progress_and_empty_grid() {
        let steps = Mutex::new(0usize);
        let cfg = config(150.0, CostKind::Generic);
        search_with_progress(&cfg, &smooth, &|| *steps.lock().unwrap() += 1).unwrap();
        assert_eq!(*steps.lock().unwrap(), cfg.nr_cpu_steps());

        let mem = DimBounds::new(1024.0, 1024.0, 1024.0);
        let cfg = SearchConfig::new(CPU, mem, LLC, MBA, 0.0, CostKind::Generic).unwrap();
        let res = search(&cfg, &smooth).unwrap();
        assert!(!res.feasible);
        assert_eq!(res.nr_queries, 0);
    }

    #[test]
    fn test_invalid_config() {
        assert!(SearchConfig::new(
            DimBounds::new(2.0, 0.6, 0.0),
            MEM,
            LLC,
            MBA,
            1.0,
            CostKind::Generic
        )
        .is_err());
        let mem = DimBounds::new(8192.5, 1024.0, 1024.0);
        assert!(SearchConfig::new(CPU, mem, LLC, MBA, 1.0, CostKind::Generic).is_err());
        assert!(SearchConfig::new(CPU, MEM, LLC, MBA, f64::NAN, CostKind::Generic).is_err());
        let mba = DimBounds::new(8589934592.0, 0.0, 4294967296.0);
        let err = SearchConfig::new(CPU, MEM, LLC, mba, 1.0, CostKind::Generic).unwrap_err();
        assert!(format!("{:#}", err).contains("out of range"));
    }
}
