// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};

use super::predictor::{load_model, predictor_for, QuotaPredictor};
use super::search::SearchConfig;
use quota_search_intf::{Params, TargetCalibration, Workload, WorkloadParams};

fn interpolate(calib: &TargetCalibration, tasks: u32) -> f64 {
    if tasks == 0 {
        return calib.dfl_throughput * calib.margin;
    }
    let [(x0, y0), (x1, y1)] = calib.anchors;
    let slope = (y1 - y0) / (x1 - x0);
    (y0 + (tasks as f64 - x0) * slope) * calib.margin
}

/// Throughput target for `tasks`. Workloads without calibration use their
/// fixed target regardless of the task count.
pub fn derive_target(wp: &WorkloadParams, tasks: u32) -> f64 {
    match wp.calib.as_ref() {
        Some(calib) => interpolate(calib, tasks),
        None => wp.target,
    }
}

/// Task count for `wp`. None if the workload's model doesn't take it.
pub fn resolve_tasks(wp: &WorkloadParams, tasks: Option<u32>) -> Option<u32> {
    if wp.tasks_feature || wp.calib.is_some() {
        Some(tasks.unwrap_or(wp.dfl_tasks))
    } else {
        None
    }
}

/// Build the search config for `wl`. An explicit `target` overrides the
/// derived one.
pub fn search_config(
    params: &Params,
    wl: Workload,
    tasks: Option<u32>,
    target: Option<f64>,
) -> Result<SearchConfig> {
    let wp = params.workload(wl);
    let tasks = resolve_tasks(wp, tasks);
    let target = match target {
        Some(v) => v,
        None => derive_target(wp, tasks.unwrap_or(0)),
    };

    let cfg = SearchConfig::new(wp.cpu, wp.mem, wp.llc, wp.mba, target, wp.cost)
        .with_context(|| format!("Building {} search config", wl))?
        .with_tasks(if wp.tasks_feature { tasks } else { None })
        .with_prune_outer(wp.prune_outer)
        .with_cache_prune(wp.cache_prune);
    debug!("workload: {} {}", wl, &cfg);
    Ok(cfg)
}

/// Model file for `wl`. `over` wins, otherwise the params entry which is
/// relative to the params file's directory unless absolute.
pub fn model_path(
    params: &Params,
    wl: Workload,
    params_path: Option<&Path>,
    over: Option<&str>,
) -> PathBuf {
    if let Some(path) = over {
        return PathBuf::from(path);
    }
    let path = PathBuf::from(&params.workload(wl).model);
    match params_path.and_then(|p| p.parent()) {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    }
}

pub struct Setup {
    pub workload: Workload,
    pub config: SearchConfig,
    pub predictor: Box<dyn QuotaPredictor>,
    pub model_path: PathBuf,
}

impl std::fmt::Debug for Setup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setup")
            .field("workload", &self.workload)
            .field("config", &self.config)
            .field("model_path", &self.model_path)
            .finish()
    }
}

/// Build the search config and load the model. Any failure is fatal for
/// the caller; there is nothing to search with.
pub fn init(
    wl: Workload,
    tasks: Option<u32>,
    target: Option<f64>,
    params: &Params,
    model_path: &Path,
) -> Result<Setup> {
    let config = search_config(params, wl, tasks, target)?;
    let model = load_model(model_path)?;
    let predictor = predictor_for(model, config.tasks())
        .with_context(|| format!("Model {:?} doesn't fit {}", model_path, wl))?;

    info!(
        "workload: {} target={:.3} tasks={} model={:?}",
        wl,
        config.target(),
        config
            .tasks()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".into()),
        model_path
    );

    Ok(Setup {
        workload: wl,
        config,
        predictor,
        model_path: model_path.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quota_search_intf::ResourceVector;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_mysql_target() {
        let params = Params::default();
        let wp = params.workload(Workload::Mysql);
        assert!(close(derive_target(wp, 0), 3735.0));
        assert!(close(derive_target(wp, 100), 3524.4));
        assert!(close(derive_target(wp, 52), 3150.0));
        assert!(close(derive_target(wp, 127), 3735.0));
    }

    #[test]
    fn test_fixed_targets() {
        let params = Params::default();
        assert_eq!(derive_target(params.workload(Workload::Kafka), 300), 3500.0);
        assert_eq!(derive_target(params.workload(Workload::Generic), 0), 0.4);
    }

    #[test]
    fn test_search_config() {
        let params = Params::default();

        let cfg = search_config(&params, Workload::Generic, Some(10), None).unwrap();
        assert_eq!(cfg.tasks(), None);
        assert_eq!(cfg.target(), 0.4);
        assert!(cfg.prune_outer());
        assert_eq!(cfg.max_vector(), ResourceVector::new(4.0, 60000, 11264, 100));

        let cfg = search_config(&params, Workload::Kafka, None, None).unwrap();
        assert_eq!(cfg.tasks(), Some(130));
        assert!(!cfg.prune_outer());

        let cfg = search_config(&params, Workload::Mysql, Some(100), Some(5000.0)).unwrap();
        assert_eq!(cfg.tasks(), Some(100));
        assert_eq!(cfg.target(), 5000.0);
    }

    #[test]
    fn test_model_path() {
        let params = Params::default();
        let pp = Path::new("/etc/quota/params.json");
        assert_eq!(
            model_path(&params, Workload::Kafka, Some(pp), None),
            PathBuf::from("/etc/quota/kafka.model.json")
        );
        assert_eq!(
            model_path(&params, Workload::Kafka, None, None),
            PathBuf::from("kafka.model.json")
        );
        assert_eq!(
            model_path(&params, Workload::Kafka, Some(pp), Some("m.json")),
            PathBuf::from("m.json")
        );
    }

    #[test]
    fn test_init() {
        let _ = ::env_logger::try_init();
        let dir = tempfile::tempdir().unwrap();
        let params = Params::default();

        assert!(init(
            Workload::Generic,
            None,
            None,
            &params,
            &dir.path().join("missing.json")
        )
        .is_err());

        let path = dir.path().join("generic.model.json");
        std::fs::write(
            &path,
            r#"{"kind": "linear", "intercept": 0.0, "coefs": [0.1, 0.0, 0.0, 0.0]}"#,
        )
        .unwrap();

        let setup = init(Workload::Generic, None, None, &params, &path).unwrap();
        let y = setup
            .predictor
            .predict(&ResourceVector::new(4.0, 0, 0, 0))
            .unwrap();
        assert!(close(y, 0.4));

        // mysql feeds the task count as the 5th input
        assert!(init(Workload::Mysql, Some(100), None, &params, &path).is_err());
    }
}
