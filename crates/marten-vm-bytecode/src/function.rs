//! Function (code block) representation

use serde::{Deserialize, Serialize};

use crate::instruction::Instruction;

/// Static properties of a function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFlags {
    /// Function body is strict-mode code
    pub is_strict: bool,
    /// Function may be used as a constructor
    pub is_constructor: bool,
}

/// Source position for one instruction, used in stack traces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    /// 1-based line number
    pub line: u32,
    /// 1-based column number
    pub column: u32,
}

/// A compiled function
///
/// Each invocation gets a register file of `register_count` values and stack
/// storage of `stack_slot_count` values. Parameters are passed in the first
/// `param_count` stack slots. `cache_slot_count` sizes the out-of-line
/// feedback table; instructions reference it through `CacheSlot` operands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    /// Function name (empty for anonymous functions)
    pub name: String,

    /// Bytecode instructions
    pub instructions: Vec<Instruction>,

    /// Number of virtual registers used
    pub register_count: u16,

    /// Number of stack-storage slots used
    pub stack_slot_count: u16,

    /// Number of declared parameters
    pub param_count: u16,

    /// Number of feedback (inline cache) slots
    pub cache_slot_count: u32,

    /// Static flags
    pub flags: FunctionFlags,

    /// Per-instruction source positions; empty when unavailable
    pub positions: Vec<SourcePosition>,
}

impl Function {
    /// Create a new function builder
    pub fn builder() -> FunctionBuilder {
        FunctionBuilder::new()
    }

    /// Number of instructions
    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Check if the function has no instructions
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Source position of the instruction at `pc`, if recorded
    pub fn position_at(&self, pc: usize) -> Option<SourcePosition> {
        self.positions.get(pc).copied()
    }
}

/// Builder for functions
#[derive(Debug, Default)]
pub struct FunctionBuilder {
    name: String,
    instructions: Vec<Instruction>,
    register_count: u16,
    stack_slot_count: u16,
    param_count: u16,
    cache_slot_count: u32,
    flags: FunctionFlags,
    positions: Vec<SourcePosition>,
}

impl FunctionBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set function name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append an instruction
    pub fn instruction(mut self, inst: Instruction) -> Self {
        self.instructions.push(inst);
        self
    }

    /// Append many instructions
    pub fn instructions(mut self, insts: impl IntoIterator<Item = Instruction>) -> Self {
        self.instructions.extend(insts);
        self
    }

    /// Set register file size
    pub fn register_count(mut self, count: u16) -> Self {
        self.register_count = count;
        self
    }

    /// Set stack-storage size
    pub fn stack_slot_count(mut self, count: u16) -> Self {
        self.stack_slot_count = count;
        self
    }

    /// Set parameter count
    pub fn param_count(mut self, count: u16) -> Self {
        self.param_count = count;
        self
    }

    /// Set feedback table size
    pub fn cache_slot_count(mut self, count: u32) -> Self {
        self.cache_slot_count = count;
        self
    }

    /// Mark the function as strict-mode code
    pub fn strict(mut self, value: bool) -> Self {
        self.flags.is_strict = value;
        self
    }

    /// Mark the function as constructible
    pub fn constructor(mut self, value: bool) -> Self {
        self.flags.is_constructor = value;
        self
    }

    /// Set per-instruction source positions
    pub fn positions(mut self, positions: Vec<SourcePosition>) -> Self {
        self.positions = positions;
        self
    }

    /// Build the function
    ///
    /// When counts were not set explicitly, register and stack sizes are
    /// inferred from the highest operand index used.
    pub fn build(mut self) -> Function {
        if self.register_count == 0 {
            self.register_count = infer_register_count(&self.instructions);
        }
        if self.stack_slot_count == 0 {
            self.stack_slot_count = infer_stack_slot_count(&self.instructions)
                .max(self.param_count);
        }
        if self.cache_slot_count == 0 {
            self.cache_slot_count = infer_cache_slot_count(&self.instructions);
        }
        Function {
            name: self.name,
            instructions: self.instructions,
            register_count: self.register_count,
            stack_slot_count: self.stack_slot_count,
            param_count: self.param_count,
            cache_slot_count: self.cache_slot_count,
            flags: self.flags,
            positions: self.positions,
        }
    }
}

fn infer_register_count(instructions: &[Instruction]) -> u16 {
    use crate::operand::Register;
    let mut max: u16 = 0;
    let mut see = |r: Register| {
        if r.index() + 1 > max {
            max = r.index() + 1;
        }
    };
    for inst in instructions {
        match *inst {
            Instruction::LoadConst { dst, .. }
            | Instruction::LoadInt32 { dst, .. }
            | Instruction::LoadUndefined { dst }
            | Instruction::LoadStackSlot { dst, .. }
            | Instruction::LoadThis { dst }
            | Instruction::LoadByName { dst, .. }
            | Instruction::DeclareFunction { dst, .. }
            | Instruction::GetGlobal { dst, .. }
            | Instruction::TypeOfName { dst, .. }
            | Instruction::DeleteBinding { dst, .. }
            | Instruction::NewObject { dst }
            | Instruction::NewArray { dst, .. } => see(dst),
            Instruction::Move { dst, src }
            | Instruction::Inc { dst, src }
            | Instruction::Dec { dst, src }
            | Instruction::Neg { dst, src }
            | Instruction::ToNumber { dst, src }
            | Instruction::BitNot { dst, src }
            | Instruction::Not { dst, src }
            | Instruction::TypeOf { dst, src } => {
                see(dst);
                see(src);
            }
            Instruction::StoreStackSlot { src, .. }
            | Instruction::StoreByName { src, .. }
            | Instruction::SetGlobal { src, .. }
            | Instruction::Return { src }
            | Instruction::Throw { src } => see(src),
            Instruction::Add { dst, lhs, rhs }
            | Instruction::Sub { dst, lhs, rhs }
            | Instruction::Mul { dst, lhs, rhs }
            | Instruction::Div { dst, lhs, rhs }
            | Instruction::Mod { dst, lhs, rhs }
            | Instruction::BitAnd { dst, lhs, rhs }
            | Instruction::BitOr { dst, lhs, rhs }
            | Instruction::BitXor { dst, lhs, rhs }
            | Instruction::Shl { dst, lhs, rhs }
            | Instruction::Shr { dst, lhs, rhs }
            | Instruction::Ushr { dst, lhs, rhs }
            | Instruction::Eq { dst, lhs, rhs }
            | Instruction::Ne { dst, lhs, rhs }
            | Instruction::StrictEq { dst, lhs, rhs }
            | Instruction::StrictNe { dst, lhs, rhs }
            | Instruction::Lt { dst, lhs, rhs }
            | Instruction::Le { dst, lhs, rhs }
            | Instruction::Gt { dst, lhs, rhs }
            | Instruction::Ge { dst, lhs, rhs }
            | Instruction::InstanceOf { dst, lhs, rhs } => {
                see(dst);
                see(lhs);
                see(rhs);
            }
            Instruction::In { dst, key, obj } => {
                see(dst);
                see(key);
                see(obj);
            }
            Instruction::DeleteProp { dst, obj, key } | Instruction::GetProp { dst, obj, key } => {
                see(dst);
                see(obj);
                see(key);
            }
            Instruction::SetProp { obj, key, src } => {
                see(obj);
                see(key);
                see(src);
            }
            Instruction::GetPropNamed { dst, obj, .. } => {
                see(dst);
                see(obj);
            }
            Instruction::SetPropNamed { obj, src, .. } => {
                see(obj);
                see(src);
            }
            Instruction::DefineOwnProp { obj, key, src } => {
                see(obj);
                see(key);
                see(src);
            }
            Instruction::DefineOwnPropNamed { obj, src, .. } => {
                see(obj);
                see(src);
            }
            Instruction::DefineGetter { obj, key, getter } => {
                see(obj);
                see(key);
                see(getter);
            }
            Instruction::DefineSetter { obj, key, setter } => {
                see(obj);
                see(key);
                see(setter);
            }
            Instruction::Call {
                dst,
                callee,
                args_start,
                argc,
            } => {
                see(dst);
                see(callee);
                see(Register(args_start.index() + argc.saturating_sub(1)));
            }
            Instruction::CallWithReceiver {
                dst,
                callee,
                receiver,
                args_start,
                argc,
            } => {
                see(dst);
                see(callee);
                see(receiver);
                see(Register(args_start.index() + argc.saturating_sub(1)));
            }
            Instruction::New {
                dst,
                callee,
                args_start,
                argc,
            } => {
                see(dst);
                see(callee);
                see(Register(args_start.index() + argc.saturating_sub(1)));
            }
            Instruction::CallEvalByName {
                dst,
                args_start,
                argc,
            } => {
                see(dst);
                see(Register(args_start.index() + argc.saturating_sub(1)));
            }
            Instruction::JumpIfTrue { cond, .. } | Instruction::JumpIfFalse { cond, .. } => {
                see(cond)
            }
            Instruction::With { obj, .. } => see(obj),
            Instruction::EnumerateObject { dst, obj } => {
                see(dst);
                see(obj);
            }
            Instruction::CheckIfKeyIsLast { data, .. } => see(data),
            Instruction::EnumerateObjectKey { dst, data } => {
                see(dst);
                see(data);
            }
            Instruction::Jump { .. }
            | Instruction::JumpComplex { .. }
            | Instruction::ReturnUndefined
            | Instruction::Try { .. }
            | Instruction::TryBodyEnd
            | Instruction::FinallyEnd => {}
        }
    }
    max
}

fn infer_stack_slot_count(instructions: &[Instruction]) -> u16 {
    let mut max: u16 = 0;
    for inst in instructions {
        let slot = match *inst {
            Instruction::LoadStackSlot { slot, .. } | Instruction::StoreStackSlot { slot, .. } => {
                Some(slot)
            }
            _ => None,
        };
        if let Some(slot) = slot
            && slot.index() + 1 > max
        {
            max = slot.index() + 1;
        }
    }
    max
}

fn infer_cache_slot_count(instructions: &[Instruction]) -> u32 {
    let mut max: u32 = 0;
    for inst in instructions {
        let cache = match *inst {
            Instruction::GetGlobal { cache, .. }
            | Instruction::SetGlobal { cache, .. }
            | Instruction::GetPropNamed { cache, .. }
            | Instruction::SetPropNamed { cache, .. } => Some(cache),
            _ => None,
        };
        if let Some(cache) = cache
            && cache.index() + 1 > max
        {
            max = cache.index() + 1;
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::{CacheSlot, ConstantIndex, Register, StackSlot};

    #[test]
    fn test_builder_infers_counts() {
        let func = Function::builder()
            .name("f")
            .instruction(Instruction::LoadInt32 {
                dst: Register(3),
                value: 1,
            })
            .instruction(Instruction::StoreStackSlot {
                slot: StackSlot(2),
                src: Register(3),
            })
            .instruction(Instruction::GetPropNamed {
                dst: Register(0),
                obj: Register(3),
                name: ConstantIndex(0),
                cache: CacheSlot(4),
            })
            .instruction(Instruction::Return { src: Register(0) })
            .build();

        assert_eq!(func.register_count, 4);
        assert_eq!(func.stack_slot_count, 3);
        assert_eq!(func.cache_slot_count, 5);
    }

    #[test]
    fn test_builder_explicit_counts() {
        let func = Function::builder()
            .name("g")
            .param_count(2)
            .register_count(8)
            .instruction(Instruction::ReturnUndefined)
            .build();

        assert_eq!(func.register_count, 8);
        // stack storage always covers the parameters
        assert_eq!(func.stack_slot_count, 2);
        assert_eq!(func.param_count, 2);
    }

    #[test]
    fn test_call_argument_window_counts() {
        let func = Function::builder()
            .instruction(Instruction::Call {
                dst: Register(0),
                callee: Register(1),
                args_start: Register(2),
                argc: 3,
            })
            .instruction(Instruction::ReturnUndefined)
            .build();

        // registers 2, 3, 4 form the argument window
        assert_eq!(func.register_count, 5);
    }
}
