//! Kernel input device emulation for testing: create virtual devices from evemu descriptions and
//! replay recorded events onto them with their original timing.

#[cfg(not(target_os = "linux"))]
compile_error!("evemu-play talks to uinput and evdev nodes and only builds for Linux");

pub mod device;
pub mod error;
pub mod hold;
pub mod lib_main;
pub mod mode;
pub mod replay;
pub mod tune;

pub use error::*;
pub use mode::{create_and_hold, Mode, ModeSelector, ReplayContext};
