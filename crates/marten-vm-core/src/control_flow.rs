//! Pending control-transfer records for try/finally and with regions
//!
//! A break, continue, return or throw that has to cross a region boundary
//! cannot transfer directly: the region's finally code must run first. The
//! interpreter parks the intent in a record at the top of the region stack,
//! returns natively out of the nested loop, and the region's FinallyEnd (or
//! the with exit) consumes or forwards the record.

use crate::value::Value;

/// What a suspended control transfer wants to do once the region unwinds
#[derive(Debug, Clone)]
pub enum ControlFlowRecord {
    /// break/continue to `target`, crossing `count` remaining regions
    NeedsJump {
        /// Final jump target after unwinding
        target: u32,
        /// Regions still to unwind, decremented at each region exit
        count: u32,
    },
    /// Return from the function, crossing `count` remaining regions
    NeedsReturn {
        /// Regions still to unwind
        count: u32,
    },
    /// Rethrow this value once the region's finally code has run
    NeedsThrow(Value),
}
