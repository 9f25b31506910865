use crate::device::UinputRegistrar;
use crate::mode::{self, ModeSelector, ReplayContext};
use crate::replay::SystemClock;
use crate::tune::{self, TuneConfig, DEFAULT_CPU, DEFAULT_PRIORITY};
use anyhow::{bail, Result};
use clap::{Args, Parser};
use evemu_parser::{Descriptor, EventReader, ParseError};
use simplelog::*;
use std::fs::File;
use std::io::{BufReader, Seek};
use std::path::{Path, PathBuf};

/// Options shared by both commands.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,

    /// Enable trace logging; implies --debug as well.
    #[arg(short, long)]
    pub trace: bool,

    /// Skip CPU pinning, real-time scheduling and memory locking.
    #[arg(long)]
    pub no_tune: bool,

    /// CPU core to pin the process to.
    #[arg(long, default_value_t = DEFAULT_CPU, verbatim_doc_comment)]
    pub cpu: usize,

    /// SCHED_FIFO priority to request. Needs root or CAP_SYS_NICE; without
    /// it the process keeps the default scheduler.
    #[arg(long, default_value_t = DEFAULT_PRIORITY, value_parser = clap::value_parser!(i32).range(1..=99), verbatim_doc_comment)]
    pub priority: i32,
}

impl CommonArgs {
    fn log_level(&self) -> LevelFilter {
        match (self.debug, self.trace) {
            (_, true) => LevelFilter::Trace,
            (true, false) => LevelFilter::Debug,
            (false, false) => LevelFilter::Info,
        }
    }

    fn tune_config(&self) -> Option<TuneConfig> {
        (!self.no_tune).then_some(TuneConfig {
            cpu: self.cpu,
            priority: self.priority,
        })
    }
}

#[derive(Parser, Debug)]
#[command(author, version, verbatim_doc_comment)]
/// evemu-play: replay recorded input events
///
/// If the target is an input event node, event data is read from standard
/// input and written to that device.
///
/// If the target is an evemu recording, a new device is created from the
/// description at the top of the file and the recorded events are replayed
/// onto it with their original timing.
pub struct PlayArgs {
    /// Input event node (e.g. /dev/input/event5) or evemu recording.
    pub target: PathBuf,

    /// Skip this many microseconds into the recording. Negative values delay
    /// the start instead.
    #[arg(allow_negative_numbers = true, verbatim_doc_comment)]
    pub start_offset_us: Option<i64>,

    /// Validate the recording and exit without touching any device.
    #[arg(long, verbatim_doc_comment)]
    pub check: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Parser, Debug)]
#[command(author, version, verbatim_doc_comment)]
/// evemu-device: create a virtual input device
///
/// Creates a device from an evemu description and keeps it alive until the
/// process is terminated. The device name and node are printed once the
/// device exists.
pub struct DeviceArgs {
    /// evemu description of the device (e.g. a file written by evemu-describe).
    pub description: PathBuf,

    /// Path for a symlink pointing to the newly-created device node. If blank,
    /// no symlink will be created.
    #[arg(short, long, verbatim_doc_comment)]
    pub symlink_path: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// What the process was asked to do. Chosen by the binary, not by the program name.
#[derive(Debug)]
pub enum Command {
    Play(PlayArgs),
    Device(DeviceArgs),
}

impl Command {
    fn common(&self) -> &CommonArgs {
        match self {
            Command::Play(args) => &args.common,
            Command::Device(args) => &args.common,
        }
    }

    fn program(&self) -> &'static str {
        match self {
            Command::Play(_) => "evemu-play",
            Command::Device(_) => "evemu-device",
        }
    }
}

fn log_init(log_lvl: LevelFilter) {
    let mut log_cfg = ConfigBuilder::new();
    if let Err(e) = log_cfg.set_time_offset_to_local() {
        eprintln!("WARNING: could not set log TZ to local: {e:?}");
    };
    log_cfg.set_time_format_rfc3339();
    CombinedLogger::init(vec![TermLogger::new(
        log_lvl,
        log_cfg.build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .expect("logger can init");
}

/// Parses the whole recording, reporting the first problem found.
fn check_recording(path: &Path) -> Result<()> {
    log::info!("validating {} only and exiting", path.display());
    let mut reader = BufReader::new(File::open(path)?);
    let report = |e: ParseError| {
        log::error!("{:?}", miette::Report::new(e));
        anyhow::anyhow!("{} is not a valid recording", path.display())
    };
    match Descriptor::load(&mut reader) {
        Ok(desc) => log::info!("description of {:?} is valid", desc.name()),
        Err(ParseError::MissingDescription) => {
            log::info!("no description, the events can only be replayed onto an existing device")
        }
        Err(e) => return Err(report(e)),
    }
    reader.rewind()?;
    let mut events = EventReader::new(&mut reader);
    let mut count = 0usize;
    for record in &mut events {
        record.map_err(report)?;
        count += 1;
    }
    log::info!("{count} events in {} lines are valid", events.line());
    Ok(())
}

fn main_impl(cmd: Command) -> Result<()> {
    let common = cmd.common().clone();
    log_init(common.log_level());
    log::info!("{} v{} starting", cmd.program(), env!("CARGO_PKG_VERSION"));

    if let Command::Play(PlayArgs {
        check: true,
        target,
        ..
    }) = &cmd
    {
        return check_recording(target);
    }

    // Scheduling first, so that everything after it already runs pinned and locked.
    match common.tune_config() {
        Some(config) => {
            let state = tune::tune(&config);
            log::debug!("scheduling state: {state:?}");
        }
        None => log::info!("scheduling tuning disabled"),
    }

    match cmd {
        Command::Play(args) => {
            let start_offset_us = args.start_offset_us.unwrap_or(0);
            if start_offset_us != 0 {
                log::info!("start offset: {start_offset_us} us");
            }
            let ctx = ReplayContext::new(args.target, start_offset_us);
            let mut selector = ModeSelector::new(UinputRegistrar, SystemClock);
            let stdin = std::io::stdin().lock();
            let mode = selector.select_and_run(&ctx, stdin)?;
            log::debug!("finished in {mode:?} mode");
        }
        Command::Device(args) => {
            if !args.description.exists() {
                bail!(
                    "Could not find the description file ({})\nFor more info, pass the `-h` or `--help` flags.",
                    args.description.display()
                )
            }
            mode::create_and_hold(&mut UinputRegistrar, &args.description, args.symlink_path)?;
        }
    }
    Ok(())
}

pub fn lib_main_cli(cmd: Command) -> Result<()> {
    let ret = main_impl(cmd);
    if let Err(ref e) = ret {
        log::error!("{e:#}\n");
    }
    ret
}
