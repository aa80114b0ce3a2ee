//! External commands with a wall-clock limit.
//!
//! Enumeration and init-script calls run inside the supervisor tick and the
//! switch sequence; a wedged child must not stall either one.

use std::io::{self, Read};
use std::process::{Command, ExitStatus, Output};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Spawns `command` and waits at most `timeout` for it to exit.
///
/// Piped stdout/stderr are drained on reader threads so a chatty child cannot
/// fill the pipe and stall. Returns `Ok(None)` when the child was killed for
/// overrunning; readers of a killed child are detached, not joined, since a
/// grandchild may still hold the pipe.
pub fn output_within(command: &mut Command, timeout: Duration) -> io::Result<Option<Output>> {
    let mut child = command.spawn()?;
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                warn!(
                    pid = child.id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Command timed out; killing"
                );
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        }
    };

    Ok(Some(Output {
        status,
        stdout: join_reader(stdout),
        stderr: join_reader(stderr),
    }))
}

/// Like [`output_within`] for commands whose stdio is not piped.
pub fn status_within(command: &mut Command, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    Ok(output_within(command, timeout)?.map(|output| output.status))
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
