//! Cooperative cancellation for blocking work.
//!
//! The async driver owns a [`CancelFlag`] and hands clones to its blocking
//! workers, which poll it between chunks, archive entries and child-process
//! waits. A [`CancelGuard`] raises the flag when it drops, so a run future
//! dropped on interrupt also stops the worker it spawned.

use std::io::{self, Read};
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often a cancellable wait looks at its child process
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

const CANCELLED_MESSAGE: &str = "run was cancelled";

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with a cancellation error once the flag is raised.
    pub fn check(&self) -> io::Result<()> {
        if self.is_cancelled() {
            Err(cancelled())
        } else {
            Ok(())
        }
    }

    /// Returns a guard that raises this flag when dropped.
    pub fn guard(&self) -> CancelGuard {
        CancelGuard(self.clone())
    }
}

/// Raises its flag on drop.
#[derive(Debug)]
pub struct CancelGuard(CancelFlag);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// The error every cancelled operation reports.
pub fn cancelled() -> io::Error {
    io::Error::other(CANCELLED_MESSAGE)
}

/// Reader that fails on the first read after the flag is raised.
pub struct CancellableReader<R> {
    inner: R,
    cancel: CancelFlag,
}

impl<R> CancellableReader<R> {
    pub fn new(inner: R, cancel: CancelFlag) -> Self {
        Self { inner, cancel }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cancel.check()?;
        self.inner.read(buf)
    }
}

/// Waits for `child`, killing and reaping it once the flag is raised.
pub fn wait_child(child: &mut Child, cancel: &CancelFlag) -> io::Result<ExitStatus> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(cancelled());
        }
        thread::sleep(CHILD_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Instant;

    #[test]
    fn test_guard_raises_flag_on_drop() {
        let flag = CancelFlag::default();
        {
            let _guard = flag.guard();
            assert!(!flag.is_cancelled());
        }
        assert!(flag.is_cancelled());
        assert!(flag.check().is_err());
    }

    #[test]
    fn test_reader_stops_after_cancel() {
        let flag = CancelFlag::default();
        let mut reader = CancellableReader::new(&b"abcdef"[..], flag.clone());

        let mut buf = [0u8; 3];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        flag.cancel();
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.to_string(), "run was cancelled");
    }

    #[test]
    fn test_wait_child_kills_on_cancel() {
        let flag = CancelFlag::default();
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();

        let canceller = flag.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });

        let start = Instant::now();
        assert!(wait_child(&mut child, &flag).is_err());
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(child.try_wait().unwrap().is_some());
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_child_returns_status() {
        let mut child = Command::new("sh").args(["-c", "exit 4"]).spawn().unwrap();
        let status = wait_child(&mut child, &CancelFlag::default()).unwrap();
        assert_eq!(status.code(), Some(4));
    }
}
