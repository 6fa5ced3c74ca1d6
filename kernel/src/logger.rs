//! Early-boot capable `log` backend
//!
//! Records are kept in a fixed buffer until the host attaches a console,
//! then flushed and written straight through. A record that does not fit
//! in the buffer is dropped whole.

use conquer_once::spin::OnceCell;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

const BUFFER_SIZE: usize = 8192;

/// Console the host kernel hands to the logger once it can print
pub trait ConsoleSink: Send + Sync {
    fn write_str(&self, s: &str);
}

struct SinkWriter<'a>(&'a dyn ConsoleSink);

impl Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// Buffer for storing log messages before a console is attached
struct LogBuffer {
    buffer: [u8; BUFFER_SIZE],
    position: usize,
    /// A write was refused since the current record started
    truncated: bool,
}

impl LogBuffer {
    const fn new() -> Self {
        Self {
            buffer: [0; BUFFER_SIZE],
            position: 0,
            truncated: false,
        }
    }

    /// Append one formatted record, or nothing if it does not fit
    fn append_record(&mut self, args: fmt::Arguments) {
        let start = self.position;
        self.truncated = false;
        if self.write_fmt(args).is_err() || self.truncated {
            self.position = start;
        }
        self.truncated = false;
    }

    fn contents(&self) -> &str {
        core::str::from_utf8(&self.buffer[..self.position]).unwrap_or("<invalid UTF-8>")
    }

    fn clear(&mut self) {
        self.position = 0;
    }
}

impl Write for LogBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = BUFFER_SIZE - self.position;

        // Full: keep what is already buffered, drop the new piece
        if bytes.len() > remaining {
            self.truncated = true;
            return Ok(());
        }

        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }
}

/// State of the logger
enum LoggerState {
    /// Buffering messages until a console is attached
    Buffering,
    /// Console attached, records go straight to it
    SinkReady,
}

pub struct CombinedLogger {
    buffer: Mutex<LogBuffer>,
    state: Mutex<LoggerState>,
    sink: OnceCell<&'static dyn ConsoleSink>,
}

impl CombinedLogger {
    const fn new() -> Self {
        CombinedLogger {
            buffer: Mutex::new(LogBuffer::new()),
            state: Mutex::new(LoggerState::Buffering),
            sink: OnceCell::uninit(),
        }
    }

    /// Attach the console and flush what was buffered so far.
    ///
    /// Returns false if a console was already attached.
    pub fn sink_ready(&self, sink: &'static dyn ConsoleSink) -> bool {
        if self.sink.try_init_once(|| sink).is_err() {
            return false;
        }

        let mut state = self.state.lock();
        let mut buffer = self.buffer.lock();
        if buffer.position > 0 {
            sink.write_str("=== Buffered Messages ===\n");
            sink.write_str(buffer.contents());
            sink.write_str("=== End Buffered Messages ===\n");
            buffer.clear();
        }
        *state = LoggerState::SinkReady;
        true
    }

    fn write_record(&self, sink: &dyn ConsoleSink, prefix: &str, record: &Record) {
        let _ = writeln!(
            SinkWriter(sink),
            "{}[{:>5}] {}: {}",
            prefix,
            record.level(),
            record.target(),
            record.args()
        );
    }
}

impl Log for CombinedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Never block the delivery path on the logger
        let state = match self.state.try_lock() {
            Some(state) => state,
            None => {
                if let Some(sink) = self.sink.get() {
                    self.write_record(*sink, "[BUSY] ", record);
                }
                return;
            }
        };

        match *state {
            LoggerState::Buffering => {
                drop(state);
                if let Some(mut buffer) = self.buffer.try_lock() {
                    buffer.append_record(format_args!(
                        "[{:>5}] {}: {}\n",
                        record.level(),
                        record.target(),
                        record.args()
                    ));
                }
            }
            LoggerState::SinkReady => {
                drop(state);
                if let Some(sink) = self.sink.get() {
                    self.write_record(*sink, "", record);
                }
            }
        }
    }

    fn flush(&self) {}
}

pub static COMBINED_LOGGER: CombinedLogger = CombinedLogger::new();

/// Install the logger. Records are buffered until `attach_sink` is called.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&COMBINED_LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Route log output to the host console
pub fn attach_sink(sink: &'static dyn ConsoleSink) -> bool {
    COMBINED_LOGGER.sink_ready(sink)
}
