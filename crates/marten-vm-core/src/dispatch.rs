//! Opcode dispatch table
//!
//! A flat array of handler function pointers indexed by opcode, built once
//! per process, plus a reverse address-to-opcode map used for diagnostics.
//! Table corruption is an internal-consistency failure that no script may
//! observe or catch: it aborts the process.

use rustc_hash::FxHashMap;
use std::sync::OnceLock;

use marten_vm_bytecode::Opcode;

use crate::error::VmResult;
use crate::interpreter::{Flow, Machine, handlers};

/// Signature of every opcode handler
pub type OpHandler = for<'a, 'b> fn(&'a mut Machine<'b>, usize) -> VmResult<Flow>;

/// The process-wide dispatch table
pub struct DispatchTable {
    handlers: [OpHandler; Opcode::COUNT],
    by_address: FxHashMap<usize, Opcode>,
}

static TABLE: OnceLock<DispatchTable> = OnceLock::new();

/// The dispatch table, built on first use
pub fn table() -> &'static DispatchTable {
    TABLE.get_or_init(DispatchTable::build)
}

pub(crate) fn fatal(msg: &str) -> ! {
    eprintln!("fatal: interpreter dispatch table corrupted: {msg}");
    std::process::abort();
}

fn unregistered(_: &mut Machine<'_>, _: usize) -> VmResult<Flow> {
    fatal("handler executed before registration");
}

impl DispatchTable {
    fn build() -> Self {
        let mut table = DispatchTable {
            handlers: [unregistered as OpHandler; Opcode::COUNT],
            by_address: FxHashMap::default(),
        };

        use handlers::*;
        table.register(Opcode::LoadConst, op_load_const);
        table.register(Opcode::LoadInt32, op_load_int32);
        table.register(Opcode::LoadUndefined, op_load_undefined);
        table.register(Opcode::Move, op_move);
        table.register(Opcode::LoadStackSlot, op_load_stack_slot);
        table.register(Opcode::StoreStackSlot, op_store_stack_slot);
        table.register(Opcode::LoadThis, op_load_this);
        table.register(Opcode::LoadByName, op_load_by_name);
        table.register(Opcode::StoreByName, op_store_by_name);
        table.register(Opcode::DeclareFunction, op_declare_function);
        table.register(Opcode::GetGlobal, op_get_global);
        table.register(Opcode::SetGlobal, op_set_global);
        table.register(Opcode::Add, op_add);
        table.register(Opcode::Sub, op_sub);
        table.register(Opcode::Mul, op_mul);
        table.register(Opcode::Div, op_div);
        table.register(Opcode::Mod, op_mod);
        table.register(Opcode::Inc, op_inc);
        table.register(Opcode::Dec, op_dec);
        table.register(Opcode::Neg, op_neg);
        table.register(Opcode::ToNumber, op_to_number);
        table.register(Opcode::BitAnd, op_bit_and);
        table.register(Opcode::BitOr, op_bit_or);
        table.register(Opcode::BitXor, op_bit_xor);
        table.register(Opcode::BitNot, op_bit_not);
        table.register(Opcode::Shl, op_shl);
        table.register(Opcode::Shr, op_shr);
        table.register(Opcode::Ushr, op_ushr);
        table.register(Opcode::Eq, op_eq);
        table.register(Opcode::Ne, op_ne);
        table.register(Opcode::StrictEq, op_strict_eq);
        table.register(Opcode::StrictNe, op_strict_ne);
        table.register(Opcode::Lt, op_lt);
        table.register(Opcode::Le, op_le);
        table.register(Opcode::Gt, op_gt);
        table.register(Opcode::Ge, op_ge);
        table.register(Opcode::Not, op_not);
        table.register(Opcode::TypeOf, op_type_of);
        table.register(Opcode::TypeOfName, op_type_of_name);
        table.register(Opcode::In, op_in);
        table.register(Opcode::InstanceOf, op_instance_of);
        table.register(Opcode::DeleteProp, op_delete_prop);
        table.register(Opcode::DeleteBinding, op_delete_binding);
        table.register(Opcode::NewObject, op_new_object);
        table.register(Opcode::NewArray, op_new_array);
        table.register(Opcode::GetProp, op_get_prop);
        table.register(Opcode::SetProp, op_set_prop);
        table.register(Opcode::GetPropNamed, op_get_prop_named);
        table.register(Opcode::SetPropNamed, op_set_prop_named);
        table.register(Opcode::DefineOwnProp, op_define_own_prop);
        table.register(Opcode::DefineOwnPropNamed, op_define_own_prop_named);
        table.register(Opcode::DefineGetter, op_define_getter);
        table.register(Opcode::DefineSetter, op_define_setter);
        table.register(Opcode::Call, op_call);
        table.register(Opcode::CallWithReceiver, op_call_with_receiver);
        table.register(Opcode::New, op_new);
        table.register(Opcode::CallEvalByName, op_call_eval_by_name);
        table.register(Opcode::Jump, op_jump);
        table.register(Opcode::JumpIfTrue, op_jump_if_true);
        table.register(Opcode::JumpIfFalse, op_jump_if_false);
        table.register(Opcode::JumpComplex, op_jump_complex);
        table.register(Opcode::Return, op_return);
        table.register(Opcode::ReturnUndefined, op_return_undefined);
        table.register(Opcode::Throw, op_throw);
        table.register(Opcode::Try, op_try);
        table.register(Opcode::TryBodyEnd, op_try_body_end);
        table.register(Opcode::FinallyEnd, op_finally_end);
        table.register(Opcode::With, op_with);
        table.register(Opcode::EnumerateObject, op_enumerate_object);
        table.register(Opcode::CheckIfKeyIsLast, op_check_if_key_is_last);
        table.register(Opcode::EnumerateObjectKey, op_enumerate_object_key);

        table.verify();
        table
    }

    /// Register one handler; duplicate addresses and double registration are
    /// fatal
    fn register(&mut self, opcode: Opcode, handler: OpHandler) {
        let address = handler as usize;
        if let Some(previous) = self.by_address.insert(address, opcode) {
            fatal(&format!(
                "handler for {opcode:?} reuses the address registered for {previous:?}"
            ));
        }
        let index = opcode.as_u8() as usize;
        if self.handlers[index] as usize != unregistered as usize {
            fatal(&format!("{opcode:?} registered twice"));
        }
        self.handlers[index] = handler;
    }

    fn verify(&self) {
        for (index, handler) in self.handlers.iter().enumerate() {
            if *handler as usize == unregistered as usize {
                fatal(&format!("opcode {index} has no handler"));
            }
        }
    }

    /// Handler for an opcode
    #[inline]
    pub fn handler(&self, opcode: Opcode) -> OpHandler {
        self.handlers[opcode.as_u8() as usize]
    }

    /// Reverse lookup: which opcode owns a handler address
    pub fn opcode_at(&self, address: usize) -> Option<Opcode> {
        self.by_address.get(&address).copied()
    }
}
