// SPDX-License-Identifier: GPL-2.0

//! cpuhog: saturate selected CPU cores with busy loops, optionally at
//! realtime priority.

mod cpulist;
mod hog;
mod rt;
mod topology;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cpulist::CoreSet;
use crate::hog::RunConfig;
use crate::rt::RtPolicy;

const TOOL_NAME: &str = "cpuhog";

#[derive(Debug, Parser)]
#[command(
    name = TOOL_NAME,
    about = "Saturate selected CPU cores with busy loops",
    after_help = "Examples:\n  cpuhog -c 0-3,7,11-13 -d 3600\n  cpuhog -f 30 -d 10 -y"
)]
struct Opts {
    /// List of cores where to run active loops, e.g. "0-3,7,11-13" (default: all).
    #[clap(short = 'c', long = "core")]
    core: Option<String>,

    /// Duration of the active loops, in seconds.
    #[clap(short = 'd', long, default_value_t = 60,
           value_parser = clap::value_parser!(u64).range(1..))]
    duration: u64,

    /// Run the loops with realtime FIFO priority (dangerous).
    #[clap(short = 'f', long, conflicts_with = "rr")]
    fifo: Option<i32>,

    /// Run the loops with realtime Round-Robin priority (dangerous).
    #[clap(short = 'r', long)]
    rr: Option<i32>,

    /// Print version and exit.
    #[clap(short = 'v', long, action = clap::ArgAction::SetTrue)]
    version: bool,

    /// Answer 'yes' to all questions.
    #[clap(short = 'y', long, action = clap::ArgAction::SetTrue)]
    yes: bool,
}

fn init_logger() -> Result<()> {
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    if opts.version {
        println!("{} {}", TOOL_NAME, env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_logger()?;

    let nr_cpus = topology::nr_cpus_online()?;
    let cores = match &opts.core {
        Some(pattern) => CoreSet::from_cpulist(pattern, nr_cpus)?,
        None => CoreSet::all(nr_cpus),
    };

    let cfg = RunConfig {
        duration: Duration::from_secs(opts.duration),
        policy: RtPolicy::from_opts(opts.fifo, opts.rr)?,
        assume_yes: opts.yes,
    };

    info!(
        "{} {}: {} of {} CPUs selected, {}s of load",
        TOOL_NAME,
        env!("CARGO_PKG_VERSION"),
        cores.weight(),
        nr_cpus,
        opts.duration
    );

    hog::run(&cores, &cfg)
}
