// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{Context, Result};
use clap::{App, AppSettings, ArgMatches};
use serde::{Deserialize, Serialize};

use super::{CachePrune, Workload};
use quota_util::*;

const HELP_BODY: &str = "\
Minimum resource quota search.

quota-search looks for the cheapest (cpu, memory, llc, memory bandwidth)
quota which keeps the predicted throughput of a workload at or above the
target. The throughput is predicted by a pre-trained regression model loaded
from a json file. The four dimensions are scanned from their maximums
downwards with pruning once the prediction falls below the target.

Workload domains, targets and cost functions are configured through the
params file. If --watch is given, the task count is read from FILE every
--interval seconds and the search is repeated whenever the count settles
after a significant change.
";

lazy_static::lazy_static! {
    static ref ARGS_STR: String = {
        let dfl = Args::default();
        format!(
            "-w, --workload=[NAME]      'Workload type - generic, mysql or kafka (default: {dfl_wl})'
             -t, --tasks=[NR]           'Number of tasks, affects the target and model input'
             -T, --target=[TPUT]        'Override the throughput target'
             -m, --model=[FILE]         'Model file, overrides the one in params'
             -p, --params=[FILE]        'Workload parameters, will be created if non-existent'
             -r, --report=[FILE]        'Result report file, FILE.staging will be used for staging'
             -j, --jobs=[NR]            'Number of search threads (default: {dfl_jobs})'
                 --cache-prune=[MODE]   'Override LLC prune mode - skip or break'
                 --alloc                'Print the online/offline allocation plan for the result'
                 --nr-cores=[NR]        'Number of logical cpus for the allocation plan (default: {dfl_cores})'
                 --llc-ways-mask=[MASK] 'Full LLC way mask for the allocation plan (default: {dfl_mask:#x})'
                 --watch=[FILE]         'Re-run the search when the task count in FILE settles'
                 --interval=[SECS]      'Task count polling interval for --watch (default: {dfl_intv})'
             -a, --args=[FILE]          'Load base command line arguments from FILE'
             -v...                      'Sets the level of verbosity'",
            dfl_wl = dfl.workload,
            dfl_jobs = dfl.jobs,
            dfl_cores = dfl.nr_cores,
            dfl_mask = dfl.llc_ways_mask,
            dfl_intv = dfl.interval,
        )
    };
}

const ARGS_DOC: &str = "\
//
// quota-search command line arguments
//
// This file provides the base values for a subset of command line arguments.
// They can be overridden from command line.
//
";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Args {
    pub workload: Workload,
    pub tasks: Option<u32>,
    pub target: Option<f64>,
    pub model: Option<String>,
    pub params: Option<String>,
    pub report: Option<String>,
    pub jobs: usize,
    pub cache_prune: Option<CachePrune>,
    pub nr_cores: usize,
    pub llc_ways_mask: u64,
    pub interval: f64,

    #[serde(skip)]
    pub alloc: bool,
    #[serde(skip)]
    pub watch: Option<String>,
    #[serde(skip)]
    pub verbosity: u32,
}

impl Args {
    pub const DFL_NR_CORES: usize = 32;
    pub const DFL_LLC_WAYS_MASK: u64 = 0x7ff;
}

impl Default for Args {
    fn default() -> Self {
        Self {
            workload: Workload::Generic,
            tasks: None,
            target: None,
            model: None,
            params: None,
            report: None,
            jobs: 1,
            cache_prune: None,
            nr_cores: Self::DFL_NR_CORES,
            llc_ways_mask: Self::DFL_LLC_WAYS_MASK,
            interval: 2.0,
            alloc: false,
            watch: None,
            verbosity: 0,
        }
    }
}

impl JsonLoad for Args {}

impl JsonSave for Args {
    fn preamble() -> Option<String> {
        Some(ARGS_DOC.to_string())
    }
}

fn opt_string(v: &str) -> Option<String> {
    if v.len() > 0 {
        Some(v.to_string())
    } else {
        None
    }
}

impl JsonArgs for Args {
    fn match_cmdline() -> ArgMatches<'static> {
        App::new("quota-search")
            .version((*super::FULL_VERSION).as_str())
            .about(HELP_BODY)
            .args_from_usage(&ARGS_STR)
            .setting(AppSettings::UnifiedHelpMessage)
            .setting(AppSettings::DeriveDisplayOrder)
            .get_matches()
    }

    fn verbosity(matches: &ArgMatches) -> u32 {
        matches.occurrences_of("v") as u32
    }

    fn process_cmdline(&mut self, matches: &ArgMatches) -> Result<bool> {
        let dfl = Args::default();
        let mut updated_base = false;

        if let Some(v) = matches.value_of("workload") {
            self.workload = if v.len() > 0 {
                v.parse::<Workload>()?
            } else {
                dfl.workload
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("tasks") {
            self.tasks = if v.len() > 0 {
                Some(v.parse::<u32>().context("parsing --tasks")?)
            } else {
                None
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("target") {
            self.target = if v.len() > 0 {
                Some(v.parse::<f64>().context("parsing --target")?)
            } else {
                None
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("model") {
            self.model = opt_string(v);
            updated_base = true;
        }
        if let Some(v) = matches.value_of("params") {
            self.params = opt_string(v);
            updated_base = true;
        }
        if let Some(v) = matches.value_of("report") {
            self.report = opt_string(v);
            updated_base = true;
        }
        if let Some(v) = matches.value_of("jobs") {
            self.jobs = if v.len() > 0 {
                v.parse::<usize>().context("parsing --jobs")?.max(1)
            } else {
                dfl.jobs
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("cache-prune") {
            self.cache_prune = if v.len() > 0 {
                Some(v.parse::<CachePrune>()?)
            } else {
                None
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("nr-cores") {
            self.nr_cores = if v.len() > 0 {
                v.parse::<usize>().context("parsing --nr-cores")?
            } else {
                dfl.nr_cores
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("llc-ways-mask") {
            self.llc_ways_mask = if v.len() > 0 {
                parse_mask(v)?
            } else {
                dfl.llc_ways_mask
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("interval") {
            self.interval = if v.len() > 0 {
                parse_duration(v)?
            } else {
                dfl.interval
            };
            updated_base = true;
        }

        self.alloc = matches.is_present("alloc");
        self.watch = matches.value_of("watch").and_then(opt_string);
        self.verbosity = Self::verbosity(matches);

        Ok(updated_base)
    }
}
