//! Diagnostic records for allocator misuse and exhaustion
//!
//! The pool hands a [`DiagnosticRecord`] to its [`DiagnosticSink`] whenever an
//! allocation fails for lack of space, a block is freed twice, or a
//! deallocation names an address the pool does not recognise. Records are
//! delivered after the pool lock has been released, so a sink may call back
//! into the pool.

use std::fmt;

use parking_lot::Mutex;

use crate::core::Address;

/// Kind of diagnostic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiagnosticKind {
    OutOfMemory,
    DoubleFree,
    InvalidPointer,
}

impl DiagnosticKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OutOfMemory => "out_of_memory",
            Self::DoubleFree => "double_free",
            Self::InvalidPointer => "invalid_pointer",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic event
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiagnosticRecord {
    pub kind: DiagnosticKind,
    /// Requested size for allocations, block size for double frees
    pub requested_size: usize,
    /// Tag supplied by the caller
    pub tag: String,
    /// Pool utilization when the event happened, in `0.0..=1.0`
    pub pool_utilization: f64,
    /// Address involved, for deallocation events
    pub address: Option<Address>,
}

impl DiagnosticRecord {
    pub fn new(
        kind: DiagnosticKind,
        requested_size: usize,
        tag: &str,
        pool_utilization: f64,
        address: Option<Address>,
    ) -> Self {
        Self {
            kind,
            requested_size,
            tag: tag.to_owned(),
            pool_utilization,
            address,
        }
    }
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] size={} utilization={:.1}%",
            self.kind,
            self.tag,
            self.requested_size,
            self.pool_utilization * 100.0
        )?;
        if let Some(address) = self.address {
            write!(f, " address={address}")?;
        }
        Ok(())
    }
}

/// Receiver of diagnostic records
pub trait DiagnosticSink: Send + Sync {
    fn on_record(&self, record: &DiagnosticRecord);
}

/// Writes every record as a `tracing` warning
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn on_record(&self, record: &DiagnosticRecord) {
        tracing::warn!(
            kind = record.kind.as_str(),
            requested_size = record.requested_size,
            tag = %record.tag,
            pool_utilization = record.pool_utilization,
            address = %record.address.map_or_else(String::new, |a| a.to_string()),
            "memory pool diagnostic"
        );
    }
}

/// Discards every record
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn on_record(&self, _record: &DiagnosticRecord) {}
}

/// Keeps records in memory for later inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<DiagnosticRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the collected records.
    pub fn take(&self) -> Vec<DiagnosticRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn on_record(&self, record: &DiagnosticRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_display() {
        let record = DiagnosticRecord::new(
            DiagnosticKind::DoubleFree,
            64,
            "Event",
            0.5,
            Some(Address::new(0x20)),
        );
        assert_eq!(
            record.to_string(),
            "double_free [Event] size=64 utilization=50.0% address=0x20"
        );
    }

    #[test]
    fn memory_sink_collects_and_drains() {
        let sink = MemorySink::new();
        let record = DiagnosticRecord::new(DiagnosticKind::OutOfMemory, 100, "big", 0.9, None);
        sink.on_record(&record);
        sink.on_record(&record);

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.take(), vec![record.clone(), record]);
        assert!(sink.is_empty());
    }

    #[test]
    fn kind_names() {
        assert_eq!(DiagnosticKind::OutOfMemory.to_string(), "out_of_memory");
        assert_eq!(DiagnosticKind::InvalidPointer.as_str(), "invalid_pointer");
    }
}
