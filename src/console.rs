//! Bounded line-print pipeline with a single consumer.
//!
//! Boot environments drain their diagnostics to a serial port, and a task
//! that is preempted halfway through a line must not interleave its output
//! with another task's. Rather than a shared buffer with rotating indices,
//! this is modeled as message passing: producers copy a whole line into a
//! fixed-size slot and send it over a bounded channel; a single consumer
//! thread drains the channel into the sink in arrival order. When the
//! queue is full, [`Console::print`] blocks until a slot frees up.

use std::io::Write;
use std::sync::mpsc::{self, SyncSender};
use std::thread::JoinHandle;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Payload capacity of one message slot, in bytes.
///
/// Lines longer than this are truncated; a whole line always occupies
/// exactly one slot so it can never be interleaved with another.
pub const SLOT_SIZE: usize = 120;

struct Slot {
    len: usize,
    bytes: [u8; SLOT_SIZE],
}

/// Handle to the print pipeline.
///
/// Dropping the console closes the channel, lets the consumer drain
/// whatever is still queued, and joins it.
pub struct Console {
    tx: Option<SyncSender<Slot>>,
    consumer: Option<JoinHandle<()>>,
}

impl Console {
    /// Spawn the consumer thread and return the producer handle.
    ///
    /// `slots` is the channel capacity: the number of whole lines that may
    /// be queued before producers block.
    pub fn spawn<W: Write + Send + 'static>(mut sink: W, slots: usize) -> Console {
        let (tx, rx) = mpsc::sync_channel::<Slot>(slots);
        let consumer = std::thread::spawn(move || {
            while let Ok(slot) = rx.recv() {
                // A sink failure here has nowhere to be reported; keep
                // draining so producers don't block forever.
                let _ = sink.write_all(&slot.bytes[..slot.len]);
                let _ = sink.write_all(b"\n");
            }
            let _ = sink.flush();
        });
        Console {
            tx: Some(tx),
            consumer: Some(consumer),
        }
    }

    /// Queue one line for printing, blocking while the queue is full.
    ///
    /// The line is truncated to [`SLOT_SIZE`] bytes. A trailing newline is
    /// added by the consumer and should not be included.
    pub fn print(&self, line: &str) {
        let mut slot = Slot {
            len: 0,
            bytes: [0; SLOT_SIZE],
        };
        let len = line.len().min(SLOT_SIZE);
        slot.bytes[..len].copy_from_slice(&line.as_bytes()[..len]);
        slot.len = len;
        if let Some(tx) = &self.tx {
            // Err means the consumer is gone; the line is dropped.
            let _ = tx.send(slot);
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.join();
        }
    }
}

/// Route the `log` macros through a [`Console`].
///
/// This lets the extractor's diagnostics drain to the same serial-style
/// sink the rest of a boot environment prints to.
pub struct ConsoleLogger {
    console: Console,
    level: LevelFilter,
}

impl ConsoleLogger {
    /// Wrap a console at the given maximum level.
    #[must_use]
    pub fn new(console: Console, level: LevelFilter) -> Self {
        Self { console, level }
    }

    /// Install this logger as the global `log` backend.
    ///
    /// # Errors
    ///
    /// Fails if a global logger is already installed.
    pub fn install(self) -> Result<(), SetLoggerError> {
        log::set_max_level(self.level);
        log::set_boxed_logger(Box::new(self))
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.console
                .print(&format!("{:<5} {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}
