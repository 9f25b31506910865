//! Keeps a device node open and drained.
//!
//! Events written to a virtual device queue up in the kernel for every open reader. A process
//! that holds the node open must keep reading or the queue backs up; the bytes themselves are
//! meaningless here.

use std::io::{self, Read};

const SCRATCH_SIZE: usize = 256;

/// Reads and discards from `node` until it reports end of file or an error, then closes it.
///
/// Returns the number of read calls made, including the final one that returned 0. Under
/// normal operation this only returns once the device goes away.
pub fn hold_open<R: Read>(mut node: R) -> io::Result<usize> {
    let mut scratch = [0u8; SCRATCH_SIZE];
    let mut reads = 0;
    loop {
        reads += 1;
        match node.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => log::trace!("drained {n} bytes"),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("hold loop ended after {reads} reads: {e}");
                return Err(e);
            }
        }
    }
    log::debug!("device node closed after {reads} reads");
    Ok(reads)
}
