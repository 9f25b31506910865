use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};

use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;

/// A symlink to a device node, removed on drop.
#[derive(Clone, Debug)]
pub struct Symlink {
    dest: PathBuf,
}

impl Symlink {
    /// Links `dest` to `source`. An existing symlink at `dest` is replaced; any other existing
    /// file is left alone and reported as an error.
    pub fn new(source: PathBuf, dest: PathBuf) -> Result<Self, io::Error> {
        if let Ok(metadata) = fs::symlink_metadata(&dest) {
            if metadata.file_type().is_symlink() {
                fs::remove_file(&dest)?;
            } else {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!(
                        "Cannot create a symlink at \"{}\": path already exists.",
                        dest.to_string_lossy()
                    ),
                ));
            }
        }
        std::os::unix::fs::symlink(&source, &dest)?;
        log::info!("Created symlink {:#?} -> {:#?}", dest, source);
        Ok(Self { dest })
    }

    /// The hold loop only ends on device closure, so the usual way out is a signal. Remove the
    /// link before dying of it.
    pub fn clean_when_killed(symlink: Self) {
        let mut signals = match Signals::new([SIGINT, SIGTERM]) {
            Ok(signals) => signals,
            Err(e) => {
                log::warn!("symlink {:?} will not be removed on exit: {e}", symlink.dest);
                return;
            }
        };
        thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                drop(symlink);
                if let Err(e) = signal_hook::low_level::emulate_default_handler(signal) {
                    log::error!("could not re-raise signal {signal}: {e}");
                }
            }
        });
    }
}

impl Drop for Symlink {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.dest);
        log::info!("Deleted symlink {:#?}", self.dest);
    }
}
