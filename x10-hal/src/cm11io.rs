//! Blocking stdin/stdout glue for [`x10::cm11::Cm11Emulator`].
//!
//! The emulator's host loop needs to read a byte from the legacy client
//! with a bounded timeout (so it can still poll the SPI link on schedule
//! even when the client has nothing to say) and `std::io::Stdin` has no
//! such primitive. A background thread blocks on `read` forever and hands
//! bytes across a channel; the foreground side just waits on the channel
//! with a deadline.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Reads bytes from the process's stdin on a background thread and makes
/// them available to the foreground with a timeout.
pub struct StdinReader {
    rx: Receiver<u8>,
}

impl StdinReader {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut stdin = io::stdin();
            let mut byte = [0u8; 1];
            loop {
                match stdin.read_exact(&mut byte) {
                    Ok(()) => {
                        if tx.send(byte[0]).is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        });
        Self { rx }
    }

    /// Waits up to `timeout` for the next byte from the legacy client.
    pub fn read_timeout(&self, timeout: Duration) -> Option<u8> {
        match self.rx.recv_timeout(timeout) {
            Ok(byte) => Some(byte),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Writes bytes produced by the emulator to the process's stdout,
/// flushing after every write since the legacy client expects each reply
/// byte promptly.
pub struct StdoutWriter {
    stdout: io::Stdout,
}

impl StdoutWriter {
    pub fn new() -> Self {
        Self { stdout: io::stdout() }
    }

    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.stdout.write_all(bytes)?;
        self.stdout.flush()
    }
}

impl Default for StdoutWriter {
    fn default() -> Self {
        Self::new()
    }
}
