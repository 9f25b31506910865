//! Materializes virtual input devices from descriptions.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use evemu_parser::Descriptor;

use crate::error::ResourceError;

mod symlink;
mod uinput;

pub use symlink::Symlink;
pub use uinput::*;

/// Registers virtual devices with the OS.
///
/// Implementations must not leave anything registered when they return an error: whatever was
/// acquired before the failure is released before the original error is returned.
pub trait Registrar {
    /// Owns the registration. Dropping it unregisters the device.
    type Device;

    /// Registers `descriptor` and returns the registration together with its device node.
    fn register(&mut self, descriptor: &Descriptor) -> io::Result<(Self::Device, PathBuf)>;
}

/// Name given to devices whose description has none.
pub fn synthetic_name(pid: u32) -> String {
    format!("evemu-{pid}")
}

/// A registered virtual device and its node. The device is unregistered exactly once, when the
/// handle is dropped.
pub struct DeviceHandle<D> {
    name: String,
    devnode: PathBuf,
    _symlink: Option<Symlink>,
    // Fields drop in order: the link goes before the device it points to.
    _device: D,
}

impl<D> DeviceHandle<D> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn devnode(&self) -> &Path {
        &self.devnode
    }

    /// Opens the device node for reading and writing.
    pub fn open_node(&self) -> Result<File, ResourceError> {
        let node = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.devnode)
            .map_err(|source| ResourceError::Open {
                path: self.devnode.clone(),
                source,
            })?;
        log::debug!("opened device node {}", self.devnode.display());
        Ok(node)
    }

    /// Points a symlink at `dest` to the device node. It is removed together with the device,
    /// or when the process is killed with SIGINT/SIGTERM.
    pub fn link_to(&mut self, dest: PathBuf) -> Result<(), ResourceError> {
        let symlink = Symlink::new(self.devnode.clone(), dest).map_err(ResourceError::Symlink)?;
        Symlink::clean_when_killed(symlink.clone());
        self._symlink = Some(symlink);
        Ok(())
    }

    /// Unregisters the device now instead of at the end of the scope.
    pub fn destroy(self) {}
}

impl<D> Drop for DeviceHandle<D> {
    fn drop(&mut self) {
        log::info!("destroying device {} ({})", self.name, self.devnode.display());
    }
}

/// Registers a new virtual device from `descriptor`.
///
/// A description with an empty name is registered as `evemu-<pid>`. On success the status line
/// `<name>: <node>` is written to standard output.
pub fn create<R: Registrar>(
    registrar: &mut R,
    mut descriptor: Descriptor,
) -> Result<DeviceHandle<R::Device>, ResourceError> {
    if descriptor.name().is_empty() {
        let name = synthetic_name(std::process::id());
        log::debug!("description has no name, using {name}");
        descriptor.set_name(name);
    }
    let (device, devnode) = registrar
        .register(&descriptor)
        .map_err(ResourceError::Registration)?;
    let name = descriptor.name().to_owned();
    println!("{}: {}", name, devnode.display());
    log::info!("created device {name} at {}", devnode.display());
    Ok(DeviceHandle {
        name,
        devnode,
        _symlink: None,
        _device: device,
    })
}
