//! Detach the process from its controlling terminal

use crate::{LineLogError, Result};
use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;

/// Which side of a fork the caller is on
enum Fork {
    Parent,
    Child,
}

fn fork() -> Result<Fork> {
    // SAFETY: called before any runtime threads exist; the child only continues
    // single-threaded Rust code.
    match unsafe { libc::fork() } {
        -1 => Err(LineLogError::Daemon(format!(
            "fork failed: {}",
            io::Error::last_os_error()
        ))),
        0 => Ok(Fork::Child),
        _ => Ok(Fork::Parent),
    }
}

/// Double-fork into a new session with stdio on /dev/null.
///
/// Parents exit with status 0; only the detached grandchild returns. Must be
/// called before the tokio runtime is built.
pub fn daemonize() -> Result<()> {
    if let Fork::Parent = fork()? {
        std::process::exit(0);
    }

    // SAFETY: plain syscall without pointer arguments
    if unsafe { libc::setsid() } < 0 {
        return Err(LineLogError::Daemon(format!(
            "setsid failed: {}",
            io::Error::last_os_error()
        )));
    }

    if let Fork::Parent = fork()? {
        std::process::exit(0);
    }

    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|e| LineLogError::Daemon(format!("cannot open /dev/null: {}", e)))?;

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call
        if unsafe { libc::dup2(null.as_raw_fd(), target) } < 0 {
            return Err(LineLogError::Daemon(format!(
                "dup2 onto fd {} failed: {}",
                target,
                io::Error::last_os_error()
            )));
        }
    }

    Ok(())
}
