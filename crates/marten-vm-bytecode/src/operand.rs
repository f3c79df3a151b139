//! Bytecode operands

use serde::{Deserialize, Serialize};

/// Virtual register inside a frame's register file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Register(pub u16);

impl Register {
    /// Create a new register
    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Get register index
    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }
}

impl From<u16> for Register {
    fn from(index: u16) -> Self {
        Self(index)
    }
}

/// Slot in a frame's stack storage (parameters and spilled locals)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct StackSlot(pub u16);

impl StackSlot {
    /// Create a new stack slot
    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Get slot index
    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }
}

/// Index into the module constant pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConstantIndex(pub u32);

impl ConstantIndex {
    /// Create a new constant index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Index into the module function table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FunctionIndex(pub u32);

impl FunctionIndex {
    /// Create a new function index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Absolute jump target (instruction index, resolved at compile time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct JumpTarget(pub u32);

impl JumpTarget {
    /// Create a new jump target
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get target instruction index
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Index into a function's feedback (inline cache) table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CacheSlot(pub u32);

impl CacheSlot {
    /// Create a new cache slot
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get slot index
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register() {
        let r = Register::new(5);
        assert_eq!(r.index(), 5);
    }

    #[test]
    fn test_cache_slot() {
        let c = CacheSlot::new(1000);
        assert_eq!(c.index(), 1000);
    }
}
