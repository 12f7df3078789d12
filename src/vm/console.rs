//! Console pipe shared between the host and a VM.

use crate::error::{Error, Result};
use std::fs::File;
use std::os::fd::{FromRawFd, OwnedFd};

/// Pipe carrying the VM's console output.
///
/// Created on the first run of a VM and reused for every later run; the
/// service gets a duplicate of the write end each time.
#[derive(Debug)]
pub struct ConsolePipe {
    reader: File,
    writer: File,
}

impl ConsolePipe {
    /// Create a new pipe. Both ends are close-on-exec.
    pub fn new() -> Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1, -1];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(Error::storage(
                "create console pipe",
                "pipe",
                std::io::Error::last_os_error(),
            ));
        }

        // Take ownership first so both ends are closed on any error below.
        let (reader, writer) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        for fd in fds {
            if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
                return Err(Error::storage(
                    "set console pipe cloexec",
                    "pipe",
                    std::io::Error::last_os_error(),
                ));
            }
        }

        Ok(Self {
            reader: File::from(reader),
            writer: File::from(writer),
        })
    }

    /// Duplicate the read end.
    pub fn reader(&self) -> Result<File> {
        self.reader
            .try_clone()
            .map_err(|e| Error::storage("duplicate console reader", "pipe", e))
    }

    /// Duplicate the write end.
    pub fn writer(&self) -> Result<File> {
        self.writer
            .try_clone()
            .map_err(|e| Error::storage("duplicate console writer", "pipe", e))
    }
}
