//! Per-unit log files
//!
//! Units write their diagnostic output to `NNNNN.log` (1-based, zero-padded)
//! inside the log directory of the mapping call.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;

/// File name of the log for the unit at `index` (0-based)
pub fn unit_log_name(index: usize) -> String {
    format!("{:05}.log", index + 1)
}

/// Produces a writable sink for one unit's log
pub trait LogSink: Send + Sync {
    fn open(&self, dir: &Path, index: usize) -> io::Result<Box<dyn Write + Send>>;
}

/// Writes unit logs as plain files
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLogSink;

impl LogSink for FileLogSink {
    fn open(&self, dir: &Path, index: usize) -> io::Result<Box<dyn Write + Send>> {
        let file = File::create(dir.join(unit_log_name(index)))?;
        Ok(Box::new(file))
    }
}

/// Cloneable handle onto a unit's log sink.
///
/// One clone feeds the scoped tracing subscriber while the wrapper keeps
/// another to append the timing trailer.
#[derive(Clone)]
pub struct UnitLog {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl UnitLog {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }
}

impl Write for UnitLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut sink = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("unit log lock poisoned"))?;
        sink.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut sink = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("unit log lock poisoned"))?;
        sink.flush()
    }
}

/// One-line memory report appended after each logged unit
pub fn memory_report() -> String {
    let mut system = System::new();
    system.refresh_memory();
    format!(
        "Memory in use: {} KiB of {} KiB",
        system.used_memory() / 1024,
        system.total_memory() / 1024
    )
}

/// Append the timing line and memory report to a unit log
pub fn write_trailer(log: &mut impl Write, elapsed: Duration) -> io::Result<()> {
    writeln!(log, "Job time in seconds: {:.2}", elapsed.as_secs_f64())?;
    writeln!(log, "{}", memory_report())?;
    log.flush()
}
