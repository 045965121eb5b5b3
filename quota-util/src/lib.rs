// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{anyhow, Context, Result};
use log::info;
use simplelog as sl;
use std::fs;
use std::path::Path;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub mod json_file;

pub use json_file::{JsonArgs, JsonConfigFile, JsonLoad, JsonReportFile, JsonSave};

pub const PCT: f64 = 0.01;

pub fn full_version(semver: &str) -> String {
    let mut ver = semver.to_string();
    if let Some(sha) = option_env!("VERGEN_GIT_SHA") {
        if sha.len() >= 7 && sha.chars().all(|c| c.is_ascii_hexdigit()) {
            ver += &format!(" {}", &sha[0..7]);
        }
    }
    if let Some(triple) = option_env!("VERGEN_CARGO_TARGET_TRIPLE") {
        ver += &format!(" {}", triple);
    }
    ver
}

/// Round `v` to `places` decimal digits. Used on quota components which
/// are reported with a fixed precision.
pub fn round_to(v: f64, places: u32) -> f64 {
    let mult = 10_f64.powi(places as i32);
    (v * mult).round() / mult
}

const SIZE_UNITS: &[(f64, &str)] = &[
    (1024.0, "K"),
    (1048576.0, "M"),
    (1073741824.0, "G"),
    (1099511627776.0, "T"),
];
const COUNT_UNITS: &[(f64, &str)] = &[(1e3, "k"), (1e6, "m"), (1e9, "g"), (1e12, "t")];
const DURATION_UNITS: &[(f64, &str)] = &[
    (1e-9, "n"),
    (1e-6, "u"),
    (1e-3, "m"),
    (1.0, "s"),
    (60.0, "M"),
    (3600.0, "H"),
    (86400.0, "D"),
];

/// Scale `v` by the largest unit it reaches. One decimal is kept while the
/// scaled value stays under 100.
fn format_scaled(v: f64, units: &[(f64, &str)]) -> String {
    let &(unit, suffix) = units
        .iter()
        .rev()
        .find(|u| v >= u.0)
        .unwrap_or(&units[0]);
    let scaled = v / unit;
    if scaled < 99.95 {
        format!("{:.1}{}", scaled, suffix)
    } else {
        format!("{:.0}{}", scaled, suffix)
    }
}

/// Byte count with binary suffixes. Small sizes are printed as is.
pub fn format_size(size: u64) -> String {
    match size {
        0..=10239 => size.to_string(),
        _ => format_scaled(size as f64, SIZE_UNITS),
    }
}

pub fn format_count(count: u64) -> String {
    match count {
        0..=999 => count.to_string(),
        _ => format_scaled(count as f64, COUNT_UNITS),
    }
}

/// Seconds in the shortest unit which keeps the value readable.
pub fn format_duration(secs: f64) -> String {
    if secs <= 0.0 {
        return "0".into();
    }
    format_scaled(secs, DURATION_UNITS)
}

/// Parse durations such as `1.5`, `300m` or `1M30s`. Bare numbers are
/// seconds and unit suffixes follow `format_duration()`.
pub fn parse_duration(input: &str) -> Result<f64> {
    let input: String = input.chars().filter(|c| *c != '_').collect();
    let parse = |num: &str| {
        num.trim()
            .parse::<f64>()
            .with_context(|| format!("invalid duration {:?}", &input))
    };

    let mut sum = 0.0;
    let mut start = 0;
    for (i, ch) in input.char_indices() {
        let suffix = ch.to_string();
        if let Some(&(unit, _)) = DURATION_UNITS.iter().find(|u| u.1 == suffix) {
            sum += parse(&input[start..i])? * unit;
            start = i + ch.len_utf8();
        }
    }
    if !input[start..].trim().is_empty() {
        sum += parse(&input[start..])?;
    }
    Ok(sum)
}

/// Parse an unsigned integer which may be given in hex with a `0x` prefix.
pub fn parse_mask(input: &str) -> Result<u64> {
    let input = input.trim();
    let v = match input.strip_prefix("0x").or(input.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => input.parse::<u64>(),
    };
    v.with_context(|| format!("failed to parse mask \"{}\"", input))
}

/// First line of `path` without the newline.
pub fn read_one_line<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let buf = fs::read_to_string(path).with_context(|| format!("Reading {:?}", path))?;
    buf.lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{:?} is empty", path))
}

/// Hand logging to `env_logger` when `RUST_LOG` is set. Otherwise log to
/// stderr through `simplelog`, colored if a terminal is attached. Debug
/// messages need `-vv` and trace `-vvv`.
pub fn init_logging(verbosity: u32) {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = env_logger::try_init();
        return;
    }

    let level = match verbosity {
        0 | 1 => sl::LevelFilter::Info,
        2 => sl::LevelFilter::Debug,
        _ => sl::LevelFilter::Trace,
    };
    let cfg = sl::ConfigBuilder::new()
        .set_time_level(sl::LevelFilter::Off)
        .set_location_level(sl::LevelFilter::Off)
        .set_target_level(sl::LevelFilter::Off)
        .set_thread_level(sl::LevelFilter::Off)
        .build();

    let on_term = console::user_attended_stderr()
        && sl::TermLogger::init(
            level,
            cfg.clone(),
            sl::TerminalMode::Stderr,
            sl::ColorChoice::Auto,
        )
        .is_ok();
    if !on_term {
        let _ = sl::SimpleLogger::init(level, cfg);
    }
}

lazy_static::lazy_static! {
    static ref PROG_EXIT: (Mutex<bool>, Condvar) = Default::default();
}

/// SIGINT and SIGTERM request exit instead of killing the program.
pub fn setup_prog_state() -> Result<()> {
    ctrlc::set_handler(|| {
        info!("Exit requested by signal");
        set_prog_exiting();
    })
    .context("Installing signal handler")
}

pub fn set_prog_exiting() {
    let (lock, cvar) = &*PROG_EXIT;
    *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
    cvar.notify_all();
}

/// Sleep for `dur` or until exit is requested. Returns whether the program
/// is exiting.
pub fn wait_prog_exiting(dur: Duration) -> bool {
    let (lock, cvar) = &*PROG_EXIT;
    let exiting = lock.lock().unwrap_or_else(|e| e.into_inner());
    let (exiting, _) = cvar
        .wait_timeout_while(exiting, dur, |exiting| !*exiting)
        .unwrap_or_else(|e| e.into_inner());
    *exiting
}
