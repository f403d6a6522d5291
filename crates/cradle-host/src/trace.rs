use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use cradle_sandbox::{TraceRecord, TraceSink};

pub const TRACE_HEADER: &str = "cpu: pc, opcode, r0-r15, cycles";

/// Collects one formatted line per traced instruction while enabled.
#[derive(Debug, Default)]
pub struct TraceBuffer {
    enabled: AtomicBool,
    lines: Mutex<Vec<String>>,
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self) -> &'static str {
        TRACE_HEADER
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take_lines(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TraceSink for TraceBuffer {
    fn trace(&self, record: &TraceRecord) {
        if !self.is_enabled() {
            return;
        }
        let mut line = format!("{}: {:08x}, {:08x},", record.cpu, record.pc, record.opcode);
        for reg in record.regs {
            line.push_str(&format!(" {reg:08x}"));
        }
        line.push_str(&format!(", {}", record.cycles));
        self.lock().push(line);
    }
}
