//! Chooses between replaying onto an existing device and creating one from a recording.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use evemu_parser::Descriptor;

use crate::device::{self, Registrar};
use crate::error::{ResourceError, RunError};
use crate::hold::hold_open;
use crate::replay::{replay, Clock, ReplayStats};

/// How a replay target was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The target is a character device; events come from standard input.
    Live,
    /// The target is a recording; a new device is created from its description.
    File,
}

/// What to replay and how far to skip into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayContext {
    pub target: PathBuf,
    pub start_offset_us: i64,
}

impl ReplayContext {
    pub fn new(target: impl Into<PathBuf>, start_offset_us: i64) -> Self {
        Self {
            target: target.into(),
            start_offset_us,
        }
    }
}

pub struct ModeSelector<G, C> {
    registrar: G,
    clock: C,
}

impl<G: Registrar, C: Clock> ModeSelector<G, C> {
    pub fn new(registrar: G, clock: C) -> Self {
        Self { registrar, clock }
    }

    pub fn registrar(&self) -> &G {
        &self.registrar
    }

    pub fn registrar_mut(&mut self) -> &mut G {
        &mut self.registrar
    }

    /// Opens the target and replays onto it (live mode) or onto a device created from it
    /// (file mode). `live_input` is only read in live mode.
    pub fn select_and_run<L: BufRead>(
        &mut self,
        ctx: &ReplayContext,
        live_input: L,
    ) -> Result<Mode, RunError> {
        let target = open_rw(&ctx.target)?;
        let metadata = target.metadata().map_err(|source| ResourceError::Stat {
            path: ctx.target.clone(),
            source,
        })?;

        if metadata.file_type().is_char_device() {
            self.play_live(ctx, target, live_input)?;
            Ok(Mode::Live)
        } else {
            self.play_file(ctx, target)?;
            Ok(Mode::File)
        }
    }

    fn play_live<L: BufRead>(
        &mut self,
        ctx: &ReplayContext,
        target: File,
        live_input: L,
    ) -> Result<(), RunError> {
        if ctx.start_offset_us != 0 {
            log::warn!("start offset is ignored when replaying onto an existing device");
        }
        log::info!(
            "{} is a device node, reading events from standard input",
            ctx.target.display()
        );
        let stats = replay(live_input, &target, 0, &mut self.clock)?;
        log_stats(&ctx.target, &stats);
        Ok(())
    }

    fn play_file(&mut self, ctx: &ReplayContext, target: File) -> Result<(), RunError> {
        let mut recording = BufReader::new(target);
        let descriptor = Descriptor::load(&mut recording).map_err(ResourceError::Parse)?;

        // The device and its node are released when they go out of scope, whichever way this
        // function returns. The node is declared later so it is closed first.
        let device = device::create(&mut self.registrar, descriptor)?;
        let node = device.open_node()?;

        recording.rewind().map_err(|source| ResourceError::Rewind {
            path: ctx.target.clone(),
            source,
        })?;
        log::info!(
            "replaying {} onto {} at {} (start offset {} us)",
            ctx.target.display(),
            device.name(),
            device.devnode().display(),
            ctx.start_offset_us
        );
        let stats = replay(&mut recording, &node, ctx.start_offset_us, &mut self.clock)?;
        log_stats(&ctx.target, &stats);
        Ok(())
    }
}

fn open_rw(path: &Path) -> Result<File, ResourceError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| ResourceError::Open {
            path: path.to_owned(),
            source,
        })
}

fn log_stats(target: &Path, stats: &ReplayStats) {
    log::info!(
        "replayed {} events from {} in {:.3}s",
        stats.written,
        target.display(),
        stats.elapsed.as_secs_f64()
    );
}

/// Creates a device from the description in `path`, then keeps its node open and drained
/// until the device goes away or the process is terminated.
///
/// A read error ends the hold loop just like end of file does; only failing to bring the device
/// up is an error.
pub fn create_and_hold<G: Registrar>(
    registrar: &mut G,
    path: &Path,
    symlink: Option<PathBuf>,
) -> Result<(), ResourceError> {
    let file = File::open(path).map_err(|source| ResourceError::Open {
        path: path.to_owned(),
        source,
    })?;
    let descriptor = Descriptor::load(BufReader::new(file)).map_err(ResourceError::Parse)?;
    let mut device = device::create(registrar, descriptor)?;
    if let Some(dest) = symlink {
        device.link_to(dest)?;
    }
    let node = device.open_node()?;

    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        log::debug!("could not notify the service manager: {e}");
    }
    log::info!("holding {} open", device.name());
    match hold_open(node) {
        Ok(reads) => log::info!("{} closed after {reads} reads", device.name()),
        Err(e) => log::warn!("reading {} failed: {e}", device.devnode().display()),
    }
    device.destroy();
    Ok(())
}
