// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{Context, Result};
use chrono::prelude::*;
use log::{debug, error, info, warn};
use std::path::Path;
use std::process::exit;
use std::time::{Duration, Instant};

use quota_search::{alloc, search, workload, TaskTrigger};
use quota_search_intf::{Args, Params, Report};
use quota_util::*;

mod progress;

use progress::SearchProgress;

fn search_once(
    args: &Args,
    params_file: &JsonConfigFile<Params>,
    tasks: Option<u32>,
) -> Result<Report> {
    let params = &params_file.data;
    let model_path = workload::model_path(
        params,
        args.workload,
        params_file.path.as_deref(),
        args.model.as_deref(),
    );
    let mut setup = workload::init(args.workload, tasks, args.target, params, &model_path)?;
    if let Some(cp) = args.cache_prune {
        setup.config = setup.config.with_cache_prune(cp);
    }
    debug!("search: {}", &setup.config);

    let bar = SearchProgress::new(setup.config.nr_cpu_steps(), args.verbosity > 1);
    let started_at = Instant::now();
    let res = search::search_parallel(
        &setup.config,
        setup.predictor.as_ref(),
        args.jobs,
        &|| bar.step(),
    );
    bar.finish();
    let res = res?;
    let elapsed = started_at.elapsed().as_secs_f64();

    info!(
        "search: {} queries, {} candidates, {} improvements in {}",
        format_count(res.nr_queries),
        format_count(res.nr_candidates),
        res.trail.len(),
        format_duration(elapsed)
    );
    if res.feasible {
        info!(
            "search: cpu={} mem={} llc={} mba={}% cost={:.3}",
            res.quota.cpu,
            format_size(res.quota.mem << 10),
            format_size(res.quota.llc << 10),
            res.quota.mba,
            res.cost
        );
    } else if res.all_above_max_cost() {
        warn!(
            "search: {} quotas meet target {:.3} but none costs less than the maximal quota",
            res.nr_feasible,
            setup.config.target()
        );
    } else {
        warn!(
            "search: no quota meets target {:.3}",
            setup.config.target()
        );
    }

    let alloc = match args.alloc {
        true => Some(
            alloc::alloc_plan(&res.quota, args.nr_cores, args.llc_ways_mask)
                .context("Building allocation plan")?,
        ),
        false => None,
    };

    Ok(Report {
        timestamp: DateTime::from(std::time::SystemTime::now()),
        workload: args.workload,
        tasks: setup.config.tasks(),
        target: setup.config.target(),
        feasible: res.feasible,
        quota: res.quota,
        cost: res.cost,
        nr_queries: res.nr_queries,
        nr_candidates: res.nr_candidates,
        nr_feasible: res.nr_feasible,
        elapsed,
        trail: res.trail,
        alloc,
    })
}

fn print_report(rep: &Report) {
    println!("{}", &rep.quota);
    println!(
        "cost={:.3} feasible={} queries={} candidates={} feasible_candidates={}",
        rep.cost, rep.feasible, rep.nr_queries, rep.nr_candidates, rep.nr_feasible
    );
    if let Some(plan) = rep.alloc.as_ref() {
        for cmd in alloc::pqos_commands(plan) {
            println!("{}", cmd);
        }
    }
}

fn run_and_report(
    args: &Args,
    params_file: &JsonConfigFile<Params>,
    tasks: Option<u32>,
    report_file: &mut JsonReportFile<Report>,
) -> Result<()> {
    report_file.data = search_once(args, params_file, tasks)?;
    print_report(&report_file.data);
    report_file.commit().with_context(|| {
        format!(
            "Committing report file {:?}",
            report_file.path.as_deref().unwrap_or(Path::new(""))
        )
    })
}

fn read_tasks(path: &str) -> Result<u32> {
    let line = read_one_line(path)?;
    line.trim()
        .parse::<u32>()
        .with_context(|| format!("Parsing task count {:?}", &line))
}

fn watch(
    args: &Args,
    path: &str,
    params_file: &mut JsonConfigFile<Params>,
    report_file: &mut JsonReportFile<Report>,
) {
    let mut trigger = TaskTrigger::default();
    info!("Watching task count in {:?} every {}s", path, args.interval);

    while !wait_prog_exiting(Duration::from_secs_f64(args.interval)) {
        match params_file.maybe_reload() {
            Ok(true) => info!("Reloaded params file {:?}", &params_file.path),
            Ok(false) => (),
            Err(e) => warn!("Failed to reload params file ({:#})", &e),
        }

        let cur = match read_tasks(path) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to read task count from {:?} ({:#})", path, &e);
                continue;
            }
        };
        if cur == 0 {
            warn!("No tasks in {:?}, is the workload running?", path);
        }

        if let Some(tasks) = trigger.update(cur) {
            info!("Re-running search for {} tasks", tasks);
            if let Err(e) = run_and_report(args, params_file, Some(tasks), report_file) {
                error!("Search failed ({:#})", &e);
            }
        }
    }
}

fn main() {
    let args_file = Args::init_args_and_logging().unwrap_or_else(|e| {
        error!("Failed to process args file ({:#})", &e);
        exit(1);
    });
    let args = &args_file.data;
    debug!("arguments: {:#?}", args);

    let mut params_file = JsonConfigFile::<Params>::load_or_create(args.params.as_ref())
        .unwrap_or_else(|e| {
            error!("Failed to process params file ({:#})", &e);
            exit(1);
        });

    debug_assert!({
        warn!("Built with debug profile, may be too slow");
        true
    });

    let mut report_file = JsonReportFile::<Report>::new(args.report.as_ref());

    // The first search uses the given task count, --watch takes over after.
    if let Err(e) = run_and_report(args, &params_file, args.tasks, &mut report_file) {
        error!("{:#}", &e);
        exit(1);
    }

    if let Some(path) = args.watch.as_ref() {
        if let Err(e) = setup_prog_state() {
            error!("{:#}", &e);
            exit(1);
        }
        watch(args, path, &mut params_file, &mut report_file);
    }
}
