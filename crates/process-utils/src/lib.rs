//! Child-process helpers shared across the workspace.
//!
//! Tools spawned through these helpers never open a console window on
//! Windows, and long-running tools can be bounded by a wall-clock limit while
//! their standard streams are captured.

#[cfg(feature = "tokio")]
use std::ffi::OsStr;
#[cfg(feature = "tokio")]
use std::process::Stdio;
#[cfg(feature = "tokio")]
use std::time::{Duration, Instant};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Outcome of a child process run under a deadline.
#[cfg(feature = "tokio")]
#[derive(Debug)]
pub enum BoundedOutput {
    /// The process exited on its own.
    Exited(std::process::Output),
    /// The deadline elapsed first; the process has been killed.
    TimedOut { elapsed: Duration },
}

#[cfg(feature = "tokio")]
impl BoundedOutput {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Run `command` to completion with stdout/stderr captured.
///
/// The child is killed when `limit` elapses before it exits. Stdin is closed
/// so tools that prompt for input fail fast instead of hanging.
#[cfg(feature = "tokio")]
pub async fn output_with_timeout(
    command: &mut tokio::process::Command,
    limit: Duration,
) -> std::io::Result<BoundedOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let child = command.spawn()?;

    // Dropping the wait future drops the child, and `kill_on_drop` reaps it.
    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output.map(BoundedOutput::Exited),
        Err(_) => Ok(BoundedOutput::TimedOut {
            elapsed: started.elapsed(),
        }),
    }
}

/// Decode at most the last `max` bytes of `bytes`, lossily.
///
/// The cut never lands inside a UTF-8 sequence; a partial leading character
/// is dropped.
pub fn tail_lossy(bytes: &[u8], max: usize) -> String {
    if bytes.len() <= max {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut start = bytes.len() - max;
    // Skip continuation bytes (0b10xx_xxxx) so decoding starts on a char boundary.
    while start < bytes.len() && bytes[start] & 0xC0 == 0x80 {
        start += 1;
    }
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}
