//! Bytecode instructions
//!
//! Instructions are immutable once a function is built. All state the
//! interpreter learns at runtime (inline caches, feedback) lives out of line
//! in per-function feedback tables addressed by [`CacheSlot`], so the same
//! module can be shared read-only between contexts and cached to disk.

use serde::{Deserialize, Serialize};

use crate::operand::{CacheSlot, ConstantIndex, FunctionIndex, JumpTarget, Register, StackSlot};

/// Operation codes
///
/// Discriminants are dense (0..COUNT) so an opcode can index a flat dispatch
/// table directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // Constants and moves
    /// Load constant-pool entry into register
    LoadConst = 0,
    /// Load immediate int32 into register
    LoadInt32,
    /// Load undefined into register
    LoadUndefined,
    /// Copy register to register
    Move,
    /// Load stack-storage slot into register
    LoadStackSlot,
    /// Store register into stack-storage slot
    StoreStackSlot,
    /// Load the frame's `this` value
    LoadThis,

    // Named bindings
    /// Resolve identifier through the lexical environment chain
    LoadByName,
    /// Store through the lexical environment chain
    StoreByName,
    /// Instantiate a closure for a function-table entry
    DeclareFunction,

    // Global variables (inline cached)
    /// Read a global variable
    GetGlobal,
    /// Write a global variable
    SetGlobal,

    // Arithmetic
    /// Addition / string concatenation
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
    /// Remainder
    Mod,
    /// Increment by one
    Inc,
    /// Decrement by one
    Dec,
    /// Unary minus
    Neg,
    /// Coerce to number
    ToNumber,

    // Bitwise
    /// Bitwise and
    BitAnd,
    /// Bitwise or
    BitOr,
    /// Bitwise xor
    BitXor,
    /// Bitwise not
    BitNot,
    /// Shift left
    Shl,
    /// Arithmetic shift right
    Shr,
    /// Logical (unsigned) shift right
    Ushr,

    // Comparison
    /// Abstract equality
    Eq,
    /// Abstract inequality
    Ne,
    /// Strict equality
    StrictEq,
    /// Strict inequality
    StrictNe,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,

    // Logic and type queries
    /// Boolean not
    Not,
    /// typeof of a register value
    TypeOf,
    /// typeof of an identifier, undefined when unresolved
    TypeOfName,
    /// `in` operator
    In,
    /// `instanceof` operator
    InstanceOf,
    /// Delete a property by computed key
    DeleteProp,
    /// Delete a binding by name
    DeleteBinding,

    // Objects
    /// Allocate an empty object
    NewObject,
    /// Allocate an array with preallocated length
    NewArray,
    /// Read property by computed key
    GetProp,
    /// Write property by computed key
    SetProp,
    /// Read property by precomputed name (inline cached)
    GetPropNamed,
    /// Write property by precomputed name (inline cached)
    SetPropNamed,
    /// Define an own data property by computed key
    DefineOwnProp,
    /// Define an own data property by precomputed name
    DefineOwnPropNamed,
    /// Define an accessor getter
    DefineGetter,
    /// Define an accessor setter
    DefineSetter,

    // Calls
    /// Call with undefined receiver
    Call,
    /// Call with explicit receiver
    CallWithReceiver,
    /// Construct (`new`)
    New,
    /// Resolve `eval` by name and call it
    CallEvalByName,

    // Control flow
    /// Unconditional jump
    Jump,
    /// Jump when register is truthy
    JumpIfTrue,
    /// Jump when register is falsy
    JumpIfFalse,
    /// break/continue that must unwind enclosing finally/with regions
    JumpComplex,
    /// Return a register value
    Return,
    /// Return undefined
    ReturnUndefined,

    // Exceptions and regions
    /// Throw a register value
    Throw,
    /// Enter a try region
    Try,
    /// Normal end of a try or with body
    TryBodyEnd,
    /// End of finally code, resolves the pending record
    FinallyEnd,
    /// Enter a with region
    With,

    // Enumeration (for-in)
    /// Snapshot enumerable keys of an object
    EnumerateObject,
    /// Exit the loop when the snapshot is exhausted, revalidating it
    CheckIfKeyIsLast,
    /// Load the next key from the snapshot
    EnumerateObjectKey,
}

impl Opcode {
    /// Number of defined opcodes
    pub const COUNT: usize = Opcode::EnumerateObjectKey as usize + 1;

    /// Numeric value of this opcode
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single bytecode instruction with decoded operands
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// dst = constants[idx]
    LoadConst {
        /// Destination register
        dst: Register,
        /// Constant pool index
        idx: ConstantIndex,
    },
    /// dst = value
    LoadInt32 {
        /// Destination register
        dst: Register,
        /// Immediate value
        value: i32,
    },
    /// dst = undefined
    LoadUndefined {
        /// Destination register
        dst: Register,
    },
    /// dst = src
    Move {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
    },
    /// dst = stack[slot]
    LoadStackSlot {
        /// Destination register
        dst: Register,
        /// Stack-storage slot
        slot: StackSlot,
    },
    /// stack[slot] = src
    StoreStackSlot {
        /// Stack-storage slot
        slot: StackSlot,
        /// Source register
        src: Register,
    },
    /// dst = this
    LoadThis {
        /// Destination register
        dst: Register,
    },

    /// dst = lookup(name), ReferenceError when unresolved
    LoadByName {
        /// Destination register
        dst: Register,
        /// Identifier (string constant)
        name: ConstantIndex,
    },
    /// Binding(name) = src
    StoreByName {
        /// Identifier (string constant)
        name: ConstantIndex,
        /// Source register
        src: Register,
    },
    /// dst = closure over functions[func] and the current environment
    DeclareFunction {
        /// Destination register
        dst: Register,
        /// Function table index
        func: FunctionIndex,
    },

    /// dst = global[name], cached by shape identity
    GetGlobal {
        /// Destination register
        dst: Register,
        /// Property name (string constant)
        name: ConstantIndex,
        /// Feedback slot
        cache: CacheSlot,
    },
    /// global[name] = src, cached by shape identity
    SetGlobal {
        /// Property name (string constant)
        name: ConstantIndex,
        /// Source register
        src: Register,
        /// Feedback slot
        cache: CacheSlot,
    },

    /// dst = lhs + rhs
    Add {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs - rhs
    Sub {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs * rhs
    Mul {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs / rhs
    Div {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs % rhs
    Mod {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = src + 1
    Inc {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
    },
    /// dst = src - 1
    Dec {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
    },
    /// dst = -src
    Neg {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
    },
    /// dst = ToNumber(src)
    ToNumber {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
    },

    /// dst = lhs & rhs
    BitAnd {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs | rhs
    BitOr {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs ^ rhs
    BitXor {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = ~src
    BitNot {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
    },
    /// dst = lhs << (rhs & 31)
    Shl {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs >> (rhs & 31)
    Shr {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs >>> (rhs & 31)
    Ushr {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },

    /// dst = lhs == rhs
    Eq {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs != rhs
    Ne {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs === rhs
    StrictEq {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs !== rhs
    StrictNe {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs < rhs
    Lt {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs <= rhs
    Le {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs > rhs
    Gt {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// dst = lhs >= rhs
    Ge {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },

    /// dst = !ToBoolean(src)
    Not {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
    },
    /// dst = typeof src
    TypeOf {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
    },
    /// dst = typeof binding(name); "undefined" when unresolved, never throws
    TypeOfName {
        /// Destination register
        dst: Register,
        /// Identifier (string constant)
        name: ConstantIndex,
    },
    /// dst = key in obj
    In {
        /// Destination register
        dst: Register,
        /// Property key register
        key: Register,
        /// Object register
        obj: Register,
    },
    /// dst = lhs instanceof rhs
    InstanceOf {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand (constructor)
        rhs: Register,
    },
    /// dst = delete obj[key]
    DeleteProp {
        /// Destination register
        dst: Register,
        /// Object register
        obj: Register,
        /// Property key register
        key: Register,
    },
    /// dst = delete binding(name)
    DeleteBinding {
        /// Destination register
        dst: Register,
        /// Identifier (string constant)
        name: ConstantIndex,
    },

    /// dst = {}
    NewObject {
        /// Destination register
        dst: Register,
    },
    /// dst = new Array(len)
    NewArray {
        /// Destination register
        dst: Register,
        /// Preallocated dense length
        len: u32,
    },
    /// dst = obj[key]
    GetProp {
        /// Destination register
        dst: Register,
        /// Object register
        obj: Register,
        /// Property key register
        key: Register,
    },
    /// obj[key] = src
    SetProp {
        /// Object register
        obj: Register,
        /// Property key register
        key: Register,
        /// Source register
        src: Register,
    },
    /// dst = obj.name, inline cached
    GetPropNamed {
        /// Destination register
        dst: Register,
        /// Object register
        obj: Register,
        /// Property name (string constant)
        name: ConstantIndex,
        /// Feedback slot
        cache: CacheSlot,
    },
    /// obj.name = src, inline cached
    SetPropNamed {
        /// Object register
        obj: Register,
        /// Property name (string constant)
        name: ConstantIndex,
        /// Source register
        src: Register,
        /// Feedback slot
        cache: CacheSlot,
    },
    /// Define own data property obj[key] = src (object literals)
    DefineOwnProp {
        /// Object register
        obj: Register,
        /// Property key register
        key: Register,
        /// Source register
        src: Register,
    },
    /// Define own data property obj.name = src (object literals)
    DefineOwnPropNamed {
        /// Object register
        obj: Register,
        /// Property name (string constant)
        name: ConstantIndex,
        /// Source register
        src: Register,
    },
    /// Define getter obj[key]
    DefineGetter {
        /// Object register
        obj: Register,
        /// Property key register
        key: Register,
        /// Getter function register
        getter: Register,
    },
    /// Define setter obj[key]
    DefineSetter {
        /// Object register
        obj: Register,
        /// Property key register
        key: Register,
        /// Setter function register
        setter: Register,
    },

    /// dst = callee(args), receiver undefined
    Call {
        /// Destination register
        dst: Register,
        /// Callee register
        callee: Register,
        /// First argument register (arguments are contiguous)
        args_start: Register,
        /// Argument count
        argc: u16,
    },
    /// dst = receiver.callee(args)
    CallWithReceiver {
        /// Destination register
        dst: Register,
        /// Callee register
        callee: Register,
        /// Receiver register
        receiver: Register,
        /// First argument register (arguments are contiguous)
        args_start: Register,
        /// Argument count
        argc: u16,
    },
    /// dst = new callee(args)
    New {
        /// Destination register
        dst: Register,
        /// Callee register
        callee: Register,
        /// First argument register (arguments are contiguous)
        args_start: Register,
        /// Argument count
        argc: u16,
    },
    /// dst = eval(args), eval resolved through the environment chain
    CallEvalByName {
        /// Destination register
        dst: Register,
        /// First argument register (arguments are contiguous)
        args_start: Register,
        /// Argument count
        argc: u16,
    },

    /// pc = target
    Jump {
        /// Target instruction index
        target: JumpTarget,
    },
    /// pc = target when cond is truthy
    JumpIfTrue {
        /// Condition register
        cond: Register,
        /// Target instruction index
        target: JumpTarget,
    },
    /// pc = target when cond is falsy
    JumpIfFalse {
        /// Condition register
        cond: Register,
        /// Target instruction index
        target: JumpTarget,
    },
    /// break/continue crossing `depth` enclosing finally/with regions
    JumpComplex {
        /// Final jump target after unwinding
        target: JumpTarget,
        /// Number of regions between the jump and its target
        depth: u32,
    },
    /// Return src from the current function
    Return {
        /// Result register
        src: Register,
    },
    /// Return undefined from the current function
    ReturnUndefined,

    /// Throw the value in src
    Throw {
        /// Thrown value register
        src: Register,
    },
    /// Enter a try region; body starts at the next instruction
    Try {
        /// Catch body start (meaningful when has_catch)
        catch_target: JumpTarget,
        /// Finally code start; always terminated by FinallyEnd
        end_target: JumpTarget,
        /// Catch binding identifier (string constant)
        catch_name: ConstantIndex,
        /// Whether the region has a catch clause
        has_catch: bool,
    },
    /// Marks the normal end of a try or with body
    TryBodyEnd,
    /// Marks the end of finally code; resolves the region's pending record
    FinallyEnd,
    /// Enter a with region; body starts at the next instruction
    With {
        /// Scope object register
        obj: Register,
        /// Instruction index following the region
        end_target: JumpTarget,
    },

    /// dst = enumeration snapshot over obj's enumerable keys
    EnumerateObject {
        /// Destination register (opaque snapshot handle)
        dst: Register,
        /// Object register
        obj: Register,
    },
    /// Revalidate the snapshot in data; jump to end_target when exhausted
    CheckIfKeyIsLast {
        /// Snapshot handle register
        data: Register,
        /// Loop exit target
        end_target: JumpTarget,
    },
    /// dst = next key from the snapshot in data
    EnumerateObjectKey {
        /// Destination register
        dst: Register,
        /// Snapshot handle register
        data: Register,
    },
}

impl Instruction {
    /// The opcode tag for this instruction
    pub const fn opcode(&self) -> Opcode {
        match self {
            Instruction::LoadConst { .. } => Opcode::LoadConst,
            Instruction::LoadInt32 { .. } => Opcode::LoadInt32,
            Instruction::LoadUndefined { .. } => Opcode::LoadUndefined,
            Instruction::Move { .. } => Opcode::Move,
            Instruction::LoadStackSlot { .. } => Opcode::LoadStackSlot,
            Instruction::StoreStackSlot { .. } => Opcode::StoreStackSlot,
            Instruction::LoadThis { .. } => Opcode::LoadThis,
            Instruction::LoadByName { .. } => Opcode::LoadByName,
            Instruction::StoreByName { .. } => Opcode::StoreByName,
            Instruction::DeclareFunction { .. } => Opcode::DeclareFunction,
            Instruction::GetGlobal { .. } => Opcode::GetGlobal,
            Instruction::SetGlobal { .. } => Opcode::SetGlobal,
            Instruction::Add { .. } => Opcode::Add,
            Instruction::Sub { .. } => Opcode::Sub,
            Instruction::Mul { .. } => Opcode::Mul,
            Instruction::Div { .. } => Opcode::Div,
            Instruction::Mod { .. } => Opcode::Mod,
            Instruction::Inc { .. } => Opcode::Inc,
            Instruction::Dec { .. } => Opcode::Dec,
            Instruction::Neg { .. } => Opcode::Neg,
            Instruction::ToNumber { .. } => Opcode::ToNumber,
            Instruction::BitAnd { .. } => Opcode::BitAnd,
            Instruction::BitOr { .. } => Opcode::BitOr,
            Instruction::BitXor { .. } => Opcode::BitXor,
            Instruction::BitNot { .. } => Opcode::BitNot,
            Instruction::Shl { .. } => Opcode::Shl,
            Instruction::Shr { .. } => Opcode::Shr,
            Instruction::Ushr { .. } => Opcode::Ushr,
            Instruction::Eq { .. } => Opcode::Eq,
            Instruction::Ne { .. } => Opcode::Ne,
            Instruction::StrictEq { .. } => Opcode::StrictEq,
            Instruction::StrictNe { .. } => Opcode::StrictNe,
            Instruction::Lt { .. } => Opcode::Lt,
            Instruction::Le { .. } => Opcode::Le,
            Instruction::Gt { .. } => Opcode::Gt,
            Instruction::Ge { .. } => Opcode::Ge,
            Instruction::Not { .. } => Opcode::Not,
            Instruction::TypeOf { .. } => Opcode::TypeOf,
            Instruction::TypeOfName { .. } => Opcode::TypeOfName,
            Instruction::In { .. } => Opcode::In,
            Instruction::InstanceOf { .. } => Opcode::InstanceOf,
            Instruction::DeleteProp { .. } => Opcode::DeleteProp,
            Instruction::DeleteBinding { .. } => Opcode::DeleteBinding,
            Instruction::NewObject { .. } => Opcode::NewObject,
            Instruction::NewArray { .. } => Opcode::NewArray,
            Instruction::GetProp { .. } => Opcode::GetProp,
            Instruction::SetProp { .. } => Opcode::SetProp,
            Instruction::GetPropNamed { .. } => Opcode::GetPropNamed,
            Instruction::SetPropNamed { .. } => Opcode::SetPropNamed,
            Instruction::DefineOwnProp { .. } => Opcode::DefineOwnProp,
            Instruction::DefineOwnPropNamed { .. } => Opcode::DefineOwnPropNamed,
            Instruction::DefineGetter { .. } => Opcode::DefineGetter,
            Instruction::DefineSetter { .. } => Opcode::DefineSetter,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::CallWithReceiver { .. } => Opcode::CallWithReceiver,
            Instruction::New { .. } => Opcode::New,
            Instruction::CallEvalByName { .. } => Opcode::CallEvalByName,
            Instruction::Jump { .. } => Opcode::Jump,
            Instruction::JumpIfTrue { .. } => Opcode::JumpIfTrue,
            Instruction::JumpIfFalse { .. } => Opcode::JumpIfFalse,
            Instruction::JumpComplex { .. } => Opcode::JumpComplex,
            Instruction::Return { .. } => Opcode::Return,
            Instruction::ReturnUndefined => Opcode::ReturnUndefined,
            Instruction::Throw { .. } => Opcode::Throw,
            Instruction::Try { .. } => Opcode::Try,
            Instruction::TryBodyEnd => Opcode::TryBodyEnd,
            Instruction::FinallyEnd => Opcode::FinallyEnd,
            Instruction::With { .. } => Opcode::With,
            Instruction::EnumerateObject { .. } => Opcode::EnumerateObject,
            Instruction::CheckIfKeyIsLast { .. } => Opcode::CheckIfKeyIsLast,
            Instruction::EnumerateObjectKey { .. } => Opcode::EnumerateObjectKey,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_dense() {
        // The first and last opcodes bound the dense range.
        assert_eq!(Opcode::LoadConst.as_u8(), 0);
        assert_eq!(Opcode::EnumerateObjectKey.as_u8() as usize, Opcode::COUNT - 1);
    }

    #[test]
    fn test_instruction_opcode() {
        let inst = Instruction::Add {
            dst: Register(0),
            lhs: Register(1),
            rhs: Register(2),
        };
        assert_eq!(inst.opcode(), Opcode::Add);

        let inst = Instruction::ReturnUndefined;
        assert_eq!(inst.opcode(), Opcode::ReturnUndefined);
    }

    #[test]
    fn test_instruction_serde_roundtrip() {
        let inst = Instruction::GetPropNamed {
            dst: Register(1),
            obj: Register(2),
            name: ConstantIndex(7),
            cache: CacheSlot(0),
        };
        let json = serde_json::to_string(&inst).unwrap();
        let back: Instruction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, inst);
    }
}
