//! Kernel log sink
//!
//! A fixed-capacity, heap-free ring of formatted log records that plugs
//! into the `log` facade. Kernel modules log through the ordinary
//! `log::trace!`/`debug!` macros; once [`init`] installs the sink, the
//! most recent records are kept in memory for a debugger or a shell
//! command to dump. When the ring is full the oldest records are
//! overwritten silently.

use core::fmt::{self, Write};

use spin::{Mutex, Once};

/// Number of records the ring can hold.
const KLOG_CAPACITY: usize = 64;

/// Maximum stored length of a formatted record, in bytes.
const KLOG_MESSAGE_MAX: usize = 96;

/// One formatted log record.
#[derive(Clone, Copy)]
pub struct KlogRecord {
    pub level: log::Level,
    len: u8,
    text: [u8; KLOG_MESSAGE_MAX],
}

impl KlogRecord {
    const fn empty() -> Self {
        KlogRecord {
            level: log::Level::Trace,
            len: 0,
            text: [0; KLOG_MESSAGE_MAX],
        }
    }

    /// The record text (truncated to the fixed capacity at write time).
    pub fn text(&self) -> &str {
        core::str::from_utf8(&self.text[..self.len as usize]).unwrap_or("<invalid utf8>")
    }
}

struct Ring {
    records: [KlogRecord; KLOG_CAPACITY],
    next: usize,
    total: usize,
}

static RING: Mutex<Ring> = Mutex::new(Ring {
    records: [KlogRecord::empty(); KLOG_CAPACITY],
    next: 0,
    total: 0,
});

/// Truncating writer into a record's fixed text buffer.
struct RecordWriter<'a> {
    record: &'a mut KlogRecord,
}

impl Write for RecordWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let used = self.record.len as usize;
        let room = KLOG_MESSAGE_MAX - used;
        let take = s.len().min(room);
        // Truncate on a character boundary.
        let mut take = take;
        while take > 0 && !s.is_char_boundary(take) {
            take -= 1;
        }
        self.record.text[used..used + take].copy_from_slice(&s.as_bytes()[..take]);
        self.record.len = (used + take) as u8;
        Ok(())
    }
}

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        // try_lock instead of lock: a log call from an ISR that preempted
        // a lower-priority logger must drop the record rather than spin
        // on a lock the preempted thread holds.
        let Some(mut ring) = RING.try_lock() else {
            return;
        };
        let slot = ring.next;
        ring.records[slot] = KlogRecord::empty();
        ring.records[slot].level = record.level();
        let mut writer = RecordWriter {
            record: &mut ring.records[slot],
        };
        let _ = write!(writer, "{}: {}", record.target(), record.args());
        ring.next = (slot + 1) % KLOG_CAPACITY;
        ring.total += 1;
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;
static INIT: Once<()> = Once::new();

/// Install the kernel log sink as the `log` backend. Idempotent; the
/// first call wins (the facade only accepts one logger per process).
pub fn init() {
    INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
}

/// Total records ever written (including overwritten ones).
pub fn count() -> usize {
    RING.lock().total
}

/// Drop all stored records.
pub fn clear() {
    let mut ring = RING.lock();
    ring.next = 0;
    ring.total = 0;
}

/// Visit the stored records, oldest first.
pub fn for_each(mut visit: impl FnMut(&KlogRecord)) {
    let ring = RING.lock();
    let stored = ring.total.min(KLOG_CAPACITY);
    let start = if ring.total > KLOG_CAPACITY {
        ring.next
    } else {
        0
    };
    for offset in 0..stored {
        visit(&ring.records[(start + offset) % KLOG_CAPACITY]);
    }
}
