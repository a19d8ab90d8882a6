use super::unix::{sys_pipe, sys_read, sys_write};

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Readiness a registration is interested in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const READABLE: Interest = Interest {
        read: true,
        write: false,
    };

    pub(crate) const WRITABLE: Interest = Interest {
        read: false,
        write: true,
    };

    pub(crate) const BOTH: Interest = Interest {
        read: true,
        write: true,
    };
}

/// A non-blocking pipe used to interrupt a blocking poll.
///
/// The read end is registered with the poller; any thread (or a signal
/// handler, through [`SelfPipe::writer_fd`]) writes a byte to wake it.
pub(crate) struct SelfPipe {
    reader: OwnedFd,
    writer: OwnedFd,
}

impl SelfPipe {
    pub(crate) fn new() -> std::io::Result<Self> {
        let (reader, writer) = sys_pipe()?;

        Ok(Self { reader, writer })
    }

    pub(crate) fn reader_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub(crate) fn writer_fd(&self) -> RawFd {
        self.writer.as_raw_fd()
    }

    /// Writes a single byte. A full pipe already guarantees a wake-up.
    pub(crate) fn wake(&self) {
        let _ = sys_write(self.writer.as_raw_fd(), &[1]);
    }

    /// Empties the pipe and returns the bytes read.
    pub(crate) fn drain(&self) -> Vec<u8> {
        let mut drained = Vec::new();
        let mut buf = [0u8; 64];

        loop {
            let n = sys_read(self.reader.as_raw_fd(), &mut buf);
            if n <= 0 {
                break;
            }

            drained.extend_from_slice(&buf[..n as usize]);
        }

        drained
    }
}

/// Converts a poll timeout to milliseconds, rounding up so that a
/// sub-millisecond deadline does not turn into a busy loop.
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(t) => {
            let mut ms = t.as_millis();
            if Duration::from_millis(ms as u64) < t {
                ms += 1;
            }
            ms.min(i32::MAX as u128) as i32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_every_written_byte() {
        let pipe = SelfPipe::new().unwrap();

        pipe.wake();
        pipe.wake();
        let _ = sys_write(pipe.writer_fd(), &[10]);

        assert_eq!(pipe.drain(), vec![1, 1, 10]);
        assert!(pipe.drain().is_empty());
    }

    #[test]
    fn timeout_rounds_up() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(7))), 7);
    }

    #[test]
    fn interest_constants() {
        assert!(Interest::BOTH.read && Interest::BOTH.write);
        assert!(!Interest::READABLE.write);
        assert!(!Interest::WRITABLE.read);
    }
}
