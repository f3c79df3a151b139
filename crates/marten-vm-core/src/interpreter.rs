//! The bytecode interpreter
//!
//! One [`Machine`] per call frame. The frame's `run` loop decodes the opcode
//! of the current instruction and jumps through the process-wide dispatch
//! table; handlers return a [`Flow`] telling the loop how to continue.
//!
//! Try and with regions run their bodies in a nested `run` call over the same
//! machine. A return, complex jump or caught throw that has to cross region
//! boundaries parks a [`ControlFlowRecord`] in the region stack and returns
//! natively; `FinallyEnd` (or the with exit) consumes or forwards it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use marten_vm_bytecode::{
    BytecodeError, CacheSlot, Constant, ConstantIndex, Function, FunctionIndex, Instruction,
    Module, Register,
};

use crate::context::VmContext;
use crate::control_flow::ControlFlowRecord;
use crate::dispatch;
use crate::enumerate::EnumerateState;
use crate::environment::{EnvironmentRecord, LexicalEnvironment};
use crate::error::{StackFrame, ThrownValue, VmError, VmResult};
use crate::inline_cache::{
    CACHE_MISS_LIMIT, CacheState, FeedbackVector, GlobalCache, READ_CACHE_MAX_ENTRIES,
    READ_CACHE_MIN_FILL_COUNT, ReadCache, ReadCacheEntry, ShapeChain, WriteCache, WriteCacheKind,
};
use crate::object::{JsObject, ObjectKind, Property};
use crate::shape::{PropertyMeta, Shape};
use crate::string::{JsString, well_known};
use crate::value::{Closure, HeapRef, Value, number_to_string, to_int32, to_uint32};

/// What the dispatch loop does after a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the following instruction
    Next,
    /// Continue at an absolute instruction index
    Jump(usize),
    /// Leave the current `run` loop
    Return,
}

/// The interpreter entry point
#[derive(Debug, Default)]
pub struct Interpreter;

impl Interpreter {
    /// Create an interpreter
    pub fn new() -> Self {
        Self
    }

    /// Execute a module's entry function to completion
    pub fn execute(&self, module: &Arc<Module>, ctx: &mut VmContext) -> VmResult<Value> {
        debug!(source = %module.source_url, "executing module");
        let env = ctx.global_env().clone();
        call_function(module, module.entry_point, env, Value::undefined(), &[], ctx)
    }
}

/// Call a bytecode function, guarding the interpreter call depth
pub(crate) fn call_function(
    module: &Arc<Module>,
    function_index: u32,
    env: Arc<LexicalEnvironment>,
    this_value: Value,
    args: &[Value],
    ctx: &mut VmContext,
) -> VmResult<Value> {
    ctx.push_frame()?;
    let result = invoke(module, function_index, env, this_value, args, ctx);
    ctx.pop_frame();
    result
}

fn invoke(
    module: &Arc<Module>,
    function_index: u32,
    env: Arc<LexicalEnvironment>,
    this_value: Value,
    args: &[Value],
    ctx: &mut VmContext,
) -> VmResult<Value> {
    let block = module
        .function(function_index)
        .ok_or(VmError::Bytecode(BytecodeError::InvalidFunction(
            function_index,
        )))?;

    let mut stack = vec![Value::undefined(); block.stack_slot_count as usize];
    for (slot, arg) in stack
        .iter_mut()
        .take(block.param_count as usize)
        .zip(args.iter())
    {
        *slot = arg.clone();
    }

    let feedback = ctx.feedback_for(function_index, block.cache_slot_count);
    let records_base = ctx.control_flow.len();
    let saved_env = ctx.swap_env(env);

    let mut machine = Machine {
        module,
        block,
        registers: vec![Value::undefined(); block.register_count as usize],
        stack,
        this_value,
        result: Value::undefined(),
        feedback,
        records_base,
        strict: block.flags.is_strict,
        ctx,
        pc: 0,
    };
    let outcome = machine.run(0);
    let pc = machine.pc;
    let result = std::mem::replace(&mut machine.result, Value::undefined());
    drop(machine);

    ctx.control_flow.truncate(records_base);
    ctx.swap_env(saved_env);

    match outcome {
        Ok(()) => Ok(result),
        Err(err) => Err(augment_stack(err, module, block, pc)),
    }
}

/// Push this frame onto a propagating exception's stack trace
fn augment_stack(err: VmError, module: &Arc<Module>, block: &Function, pc: usize) -> VmError {
    let VmError::Exception(mut thrown) = err else {
        return err;
    };
    let position = block.position_at(pc).unwrap_or_default();
    let function_name = if block.name.is_empty() {
        "[anonymous]".to_string()
    } else {
        block.name.clone()
    };
    thrown.stack.push(StackFrame {
        function_name,
        file: module.source_url.clone(),
        line: position.line,
        column: position.column,
    });
    VmError::Exception(thrown)
}

/// One call frame of the interpreter
pub struct Machine<'a> {
    module: &'a Arc<Module>,
    block: &'a Function,
    registers: Vec<Value>,
    stack: Vec<Value>,
    this_value: Value,
    result: Value,
    feedback: Arc<FeedbackVector>,
    /// Region-stack length at frame entry; records above it belong to us
    records_base: usize,
    strict: bool,
    ctx: &'a mut VmContext,
    /// Last dispatched instruction index, for stack traces
    pc: usize,
}

impl Machine<'_> {
    /// Dispatch loop; `Ok` means a Return flow or running past the last
    /// instruction
    fn run(&mut self, mut pc: usize) -> VmResult<()> {
        let table = dispatch::table();
        loop {
            let Some(instruction) = self.block.instructions.get(pc) else {
                return Ok(());
            };
            self.pc = pc;
            let handler = table.handler(instruction.opcode());
            match handler(self, pc)? {
                Flow::Next => pc += 1,
                Flow::Jump(target) => pc = target,
                Flow::Return => return Ok(()),
            }
        }
    }

    #[inline]
    fn reg(&self, register: Register) -> Value {
        self.registers[register.index() as usize].clone()
    }

    #[inline]
    fn set_reg(&mut self, register: Register, value: Value) {
        self.registers[register.index() as usize] = value;
    }

    fn constant(&self, idx: ConstantIndex) -> VmResult<Value> {
        match self.module.constants.get(idx.index()) {
            Some(Constant::Number(n)) => Ok(Value::number(*n)),
            Some(Constant::String(s)) => Ok(Value::string(JsString::intern(s))),
            None => Err(VmError::Bytecode(BytecodeError::InvalidConstant(
                idx.index(),
            ))),
        }
    }

    fn constant_string(&self, idx: ConstantIndex) -> VmResult<Arc<JsString>> {
        match self.module.constants.get(idx.index()) {
            Some(Constant::String(s)) => Ok(JsString::intern(s)),
            Some(Constant::Number(n)) => Ok(JsString::intern(&number_to_string(*n))),
            None => Err(VmError::Bytecode(BytecodeError::InvalidConstant(
                idx.index(),
            ))),
        }
    }

    fn arg_window(&self, args_start: Register, argc: u16) -> Vec<Value> {
        let start = args_start.index() as usize;
        self.registers[start..start + argc as usize].to_vec()
    }

    /// Records pushed by regions of this frame
    fn active_records(&self) -> usize {
        self.ctx.control_flow.len() - self.records_base
    }

    /// Park a record in the innermost region slot
    fn set_back_record(&mut self, record: ControlFlowRecord) -> VmResult<()> {
        match self.ctx.control_flow.last_mut() {
            Some(slot) => {
                *slot = Some(record);
                Ok(())
            }
            None => Err(VmError::internal("no region to park a control record in")),
        }
    }

    fn to_int32_value(&mut self, value: &Value) -> VmResult<i32> {
        if let Some(i) = value.as_int32() {
            return Ok(i);
        }
        Ok(to_int32(self.to_number_value(value)?))
    }

    fn to_uint32_value(&mut self, value: &Value) -> VmResult<u32> {
        if let Some(i) = value.as_int32() {
            return Ok(i as u32);
        }
        Ok(to_uint32(self.to_number_value(value)?))
    }

    /// The object that holds properties for a value, if it has one
    pub(crate) fn property_container(&self, value: &Value) -> Option<Arc<JsObject>> {
        match value.heap_ref() {
            Some(HeapRef::Object(object)) => Some(object.clone()),
            Some(HeapRef::Function(closure)) => Some(closure.object.clone()),
            _ => None,
        }
    }

    /// ToObject for operations that need a property container
    fn to_object_container(&self, value: &Value) -> VmResult<Arc<JsObject>> {
        if value.is_nullish() {
            return Err(VmError::type_error(
                "Cannot convert undefined or null to object",
            ));
        }
        if let Some(container) = self.property_container(value) {
            return Ok(container);
        }
        if value.is_callable() {
            return Err(VmError::type_error(
                "Cannot use a host function as an object",
            ));
        }
        // Primitive wrapper; no builtin prototypes are installed
        Ok(JsObject::ordinary(None))
    }

    /// Generic property read: prototype chain walk, getters invoked with the
    /// original receiver
    pub(crate) fn get_property(
        &mut self,
        receiver: &Value,
        name: &Arc<JsString>,
    ) -> VmResult<Value> {
        if receiver.is_nullish() {
            return Err(VmError::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                if receiver.is_null() { "null" } else { "undefined" },
                name
            )));
        }
        if let Some(s) = receiver.as_string() {
            if Arc::ptr_eq(name, &*well_known::LENGTH) {
                return Ok(Value::number(s.as_str().encode_utf16().count() as f64));
            }
            if let Ok(index) = name.as_str().parse::<usize>() {
                return Ok(match s.as_str().encode_utf16().nth(index) {
                    Some(unit) => {
                        Value::string(JsString::intern(&String::from_utf16_lossy(&[unit])))
                    }
                    None => Value::undefined(),
                });
            }
            return Ok(Value::undefined());
        }
        let Some(container) = self.property_container(receiver) else {
            return Ok(Value::undefined());
        };
        let mut cursor = Some(container);
        while let Some(object) = cursor {
            if object.is_array() && Arc::ptr_eq(name, &*well_known::LENGTH) {
                return Ok(Value::number(object.element_len() as f64));
            }
            if let Some((slot, _)) = object.find_own_property(name) {
                return match object.get_slot(slot) {
                    Property::Data(value) => Ok(value),
                    Property::Accessor {
                        get: Some(getter), ..
                    } => self.call_value(&getter, receiver.clone(), &[]),
                    Property::Accessor { get: None, .. } => Ok(Value::undefined()),
                };
            }
            if let Ok(index) = name.as_str().parse::<usize>()
                && let Some(element) = object.get_element(index)
            {
                return Ok(element);
            }
            cursor = object.prototype();
        }
        Ok(Value::undefined())
    }

    /// Generic property write with the full prototype-chain protocol
    pub(crate) fn set_property(
        &mut self,
        receiver: &Value,
        name: &Arc<JsString>,
        value: Value,
    ) -> VmResult<()> {
        if receiver.is_nullish() {
            return Err(VmError::type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                if receiver.is_null() { "null" } else { "undefined" },
                name
            )));
        }
        let Some(container) = self.property_container(receiver) else {
            // Writes to primitives vanish outside strict mode
            if self.strict {
                return Err(VmError::type_error(format!(
                    "Cannot create property '{name}' on a primitive"
                )));
            }
            return Ok(());
        };
        if container.is_array() {
            if Arc::ptr_eq(name, &*well_known::LENGTH) {
                let n = self.to_number_value(&value)?;
                let len = n as u32;
                if f64::from(len) != n {
                    return Err(VmError::range_error("Invalid array length"));
                }
                container.set_element_len(len as usize);
                return Ok(());
            }
            if let Ok(index) = name.as_str().parse::<usize>()
                && container.set_element(index, value.clone())
            {
                return Ok(());
            }
        }
        let mut depth = 0usize;
        let mut cursor = Some(container.clone());
        while let Some(object) = cursor {
            if let Some((slot, meta)) = object.find_own_property(name) {
                if meta.accessor {
                    return match object.get_slot(slot) {
                        Property::Accessor {
                            set: Some(setter), ..
                        } => {
                            self.call_value(&setter, receiver.clone(), &[value])?;
                            Ok(())
                        }
                        _ => {
                            if self.strict {
                                Err(VmError::type_error(format!(
                                    "Cannot set property '{name}' which has only a getter"
                                )))
                            } else {
                                Ok(())
                            }
                        }
                    };
                }
                if !meta.writable {
                    if self.strict {
                        return Err(VmError::type_error(format!(
                            "Cannot assign to read only property '{name}'"
                        )));
                    }
                    return Ok(());
                }
                if depth == 0 {
                    object.set_slot_value(slot, value);
                    return Ok(());
                }
                // Writable data property on the prototype: shadow it
                break;
            }
            depth += 1;
            cursor = object.prototype();
        }
        if !container.is_extensible() {
            if self.strict {
                return Err(VmError::type_error(format!(
                    "Cannot add property '{name}', object is not extensible"
                )));
            }
            return Ok(());
        }
        container.add_property(name.clone(), Property::Data(value), PropertyMeta::data());
        Ok(())
    }

    /// Inline-cached property read for a non-array container
    fn read_cached(
        &mut self,
        cache: CacheSlot,
        container: &Arc<JsObject>,
        receiver: &Value,
        name: &Arc<JsString>,
    ) -> VmResult<Value> {
        let feedback = self.feedback.clone();
        let mut state = feedback.slot(cache).lock();
        let action = match &mut *state {
            CacheState::Uninitialized => {
                *state = CacheState::Read(ReadCache {
                    execute_count: 1,
                    ..ReadCache::default()
                });
                ReadAction::Generic
            }
            CacheState::Generic => ReadAction::Generic,
            CacheState::Read(read) => {
                if let Some((holder, slot)) = probe_read(container, read) {
                    ReadAction::Hit(holder, slot)
                } else {
                    read.execute_count += 1;
                    if read.execute_count <= READ_CACHE_MIN_FILL_COUNT {
                        ReadAction::Generic
                    } else {
                        read.miss_count += 1;
                        if read.miss_count > CACHE_MISS_LIMIT
                            || read.entries.len() >= READ_CACHE_MAX_ENTRIES
                        {
                            trace!(name = %name, "read site exhausted its miss budget");
                            *state = CacheState::Generic;
                            ReadAction::Generic
                        } else {
                            trace!(name = %name, "filling read cache entry");
                            let (holder, slot) = fill_read(container, name, read);
                            ReadAction::Hit(holder, slot)
                        }
                    }
                }
            }
            CacheState::Write(_) | CacheState::Global(_) => {
                dispatch::fatal("feedback slot shared between incompatible sites")
            }
        };
        drop(state);
        match action {
            ReadAction::Generic => self.get_property(receiver, name),
            ReadAction::Hit(_, None) => Ok(Value::undefined()),
            ReadAction::Hit(holder, Some(slot)) => match holder.get_slot(slot as usize) {
                Property::Data(value) => Ok(value),
                Property::Accessor {
                    get: Some(getter), ..
                } => self.call_value(&getter, receiver.clone(), &[]),
                Property::Accessor { get: None, .. } => Ok(Value::undefined()),
            },
        }
    }

    /// Inline-cached property write for a non-array container
    fn write_cached(
        &mut self,
        cache: CacheSlot,
        container: &Arc<JsObject>,
        receiver: &Value,
        name: &Arc<JsString>,
        value: Value,
    ) -> VmResult<()> {
        let feedback = self.feedback.clone();
        let mut state = feedback.slot(cache).lock();
        let action = match &mut *state {
            CacheState::Uninitialized => {
                *state = CacheState::Write(WriteCache::default());
                WriteAction::Miss { memoize: true }
            }
            CacheState::Generic => WriteAction::Generic,
            CacheState::Write(write) => {
                let hit = match &write.kind {
                    Some(WriteCacheKind::Slot { shape_id, slot })
                        if container.shape().id() == *shape_id =>
                    {
                        Some(WriteAction::Slot(*slot))
                    }
                    Some(WriteCacheKind::Transition { chain, target })
                        if validate_chain(container, chain) =>
                    {
                        // prevent_extensions leaves the shape id unchanged,
                        // so the chain match alone cannot prove the add is
                        // legal
                        if container.is_extensible() {
                            Some(WriteAction::Transition(target.clone()))
                        } else {
                            Some(WriteAction::Generic)
                        }
                    }
                    _ => None,
                };
                match hit {
                    Some(action) => action,
                    None => {
                        write.miss_count += 1;
                        write.kind = None;
                        if write.miss_count > CACHE_MISS_LIMIT {
                            trace!(name = %name, "write site exhausted its miss budget");
                            *state = CacheState::Generic;
                            WriteAction::Generic
                        } else {
                            WriteAction::Miss { memoize: true }
                        }
                    }
                }
            }
            CacheState::Read(_) | CacheState::Global(_) => {
                dispatch::fatal("feedback slot shared between incompatible sites")
            }
        };
        drop(state);
        match action {
            WriteAction::Slot(slot) => {
                container.set_slot_value(slot as usize, value);
                Ok(())
            }
            WriteAction::Transition(target) => {
                container.apply_transition(target, value);
                Ok(())
            }
            WriteAction::Generic => self.set_property(receiver, name, value),
            WriteAction::Miss { memoize } => {
                self.write_miss(cache, container, receiver, name, value, memoize)
            }
        }
    }

    /// Slow write that memoizes the site when the outcome is cacheable
    fn write_miss(
        &mut self,
        cache: CacheSlot,
        container: &Arc<JsObject>,
        receiver: &Value,
        name: &Arc<JsString>,
        value: Value,
        memoize: bool,
    ) -> VmResult<()> {
        let pre_shape = container.shape();
        if memoize && !pre_shape.supports_transitions() {
            // Rebuilt shapes never transition again; the site is permanently
            // uncacheable
            trace!(name = %name, "write site saw a non-transitioning shape");
            let mut state = self.feedback.slot(cache).lock();
            if matches!(&*state, CacheState::Write(_)) {
                *state = CacheState::Generic;
            }
        }
        if let Some((slot, meta)) = container.find_own_property(name) {
            if meta.is_plain_data() {
                container.set_slot_value(slot, value);
                if memoize && pre_shape.supports_transitions() {
                    self.memoize_write(
                        cache,
                        WriteCacheKind::Slot {
                            shape_id: pre_shape.id(),
                            slot: slot as u32,
                        },
                    );
                }
                return Ok(());
            }
            return self.set_property(receiver, name, value);
        }

        // Property addition: record the whole pre-write chain so a hit can
        // prove nothing on a prototype intercepts the write
        let mut chain = ShapeChain::new();
        let mut cursor = Some(container.clone());
        while let Some(object) = cursor {
            chain.push(object.shape().id());
            cursor = object.prototype();
        }
        let can_memoize = memoize && pre_shape.supports_transitions();

        self.set_property(receiver, name, value)?;

        if can_memoize {
            let post_shape = container.shape();
            let added_one = post_shape.property_count() == pre_shape.property_count() + 1;
            let plain = container
                .find_own_property(name)
                .is_some_and(|(_, meta)| meta.is_plain_data());
            if added_one && plain && post_shape.supports_transitions() {
                self.memoize_write(
                    cache,
                    WriteCacheKind::Transition {
                        chain,
                        target: post_shape,
                    },
                );
            }
        }
        Ok(())
    }

    fn memoize_write(&mut self, cache: CacheSlot, kind: WriteCacheKind) {
        let mut state = self.feedback.slot(cache).lock();
        if let CacheState::Write(write) = &mut *state {
            write.kind = Some(kind);
        }
    }

    /// Inline-cached global read
    fn global_read(&mut self, cache: CacheSlot, name: &Arc<JsString>) -> VmResult<Value> {
        let global = self.ctx.global().clone();
        let feedback = self.feedback.clone();
        let mut state = feedback.slot(cache).lock();
        let action = match &mut *state {
            CacheState::Uninitialized => {
                *state = CacheState::Global(GlobalCache::Unset);
                GlobalAction::Slow { memoize: true }
            }
            CacheState::Global(GlobalCache::Cached { shape_id, slot })
                if global.shape().id() == *shape_id =>
            {
                GlobalAction::Slot(*slot)
            }
            CacheState::Global(GlobalCache::Uncacheable) => GlobalAction::Slow { memoize: false },
            CacheState::Global(_) => GlobalAction::Slow { memoize: true },
            CacheState::Generic => GlobalAction::Slow { memoize: false },
            CacheState::Read(_) | CacheState::Write(_) => {
                dispatch::fatal("feedback slot shared between incompatible sites")
            }
        };
        drop(state);
        match action {
            GlobalAction::Slot(slot) => match global.get_slot(slot as usize) {
                Property::Data(value) => Ok(value),
                Property::Accessor { .. } => {
                    dispatch::fatal("global cache memoized an accessor slot")
                }
            },
            GlobalAction::Slow { memoize } => match global.find_own_property(name) {
                None => Err(VmError::reference_error(format!("{name} is not defined"))),
                Some((slot, meta)) => {
                    if meta.is_plain_data() {
                        if memoize {
                            set_global_cache(
                                &feedback,
                                cache,
                                GlobalCache::Cached {
                                    shape_id: global.shape().id(),
                                    slot: slot as u32,
                                },
                            );
                        }
                        match global.get_slot(slot) {
                            Property::Data(value) => Ok(value),
                            Property::Accessor { .. } => Ok(Value::undefined()),
                        }
                    } else {
                        if memoize {
                            set_global_cache(&feedback, cache, GlobalCache::Uncacheable);
                        }
                        let receiver = Value::object(global.clone());
                        self.get_property(&receiver, name)
                    }
                }
            },
        }
    }

    /// Inline-cached global write
    fn global_write(
        &mut self,
        cache: CacheSlot,
        name: &Arc<JsString>,
        value: Value,
    ) -> VmResult<()> {
        let global = self.ctx.global().clone();
        let feedback = self.feedback.clone();
        let mut state = feedback.slot(cache).lock();
        let action = match &mut *state {
            CacheState::Uninitialized => {
                *state = CacheState::Global(GlobalCache::Unset);
                GlobalAction::Slow { memoize: true }
            }
            CacheState::Global(GlobalCache::Cached { shape_id, slot })
                if global.shape().id() == *shape_id =>
            {
                GlobalAction::Slot(*slot)
            }
            CacheState::Global(GlobalCache::Uncacheable) => GlobalAction::Slow { memoize: false },
            CacheState::Global(_) => GlobalAction::Slow { memoize: true },
            CacheState::Generic => GlobalAction::Slow { memoize: false },
            CacheState::Read(_) | CacheState::Write(_) => {
                dispatch::fatal("feedback slot shared between incompatible sites")
            }
        };
        drop(state);
        match action {
            GlobalAction::Slot(slot) => {
                global.set_slot_value(slot as usize, value);
                Ok(())
            }
            GlobalAction::Slow { memoize } => {
                if let Some((slot, meta)) = global.find_own_property(name) {
                    if meta.is_plain_data() {
                        global.set_slot_value(slot, value);
                        if memoize {
                            set_global_cache(
                                &feedback,
                                cache,
                                GlobalCache::Cached {
                                    shape_id: global.shape().id(),
                                    slot: slot as u32,
                                },
                            );
                        }
                        Ok(())
                    } else {
                        if memoize {
                            set_global_cache(&feedback, cache, GlobalCache::Uncacheable);
                        }
                        let receiver = Value::object(global.clone());
                        self.set_property(&receiver, name, value)
                    }
                } else {
                    if self.strict {
                        return Err(VmError::reference_error(format!("{name} is not defined")));
                    }
                    // New global; a later execution memoizes the new layout
                    let receiver = Value::object(global.clone());
                    self.set_property(&receiver, name, value)
                }
            }
        }
    }

    /// Resolve an identifier through the environment chain; None when no
    /// record binds it
    fn load_by_name(&mut self, name: &Arc<JsString>) -> VmResult<Option<Value>> {
        let mut cursor = Some(self.ctx.env().clone());
        while let Some(env) = cursor {
            match env.record() {
                EnvironmentRecord::Declarative(_) => {
                    if let Some(value) = env.get_local(name) {
                        return Ok(Some(value));
                    }
                }
                EnvironmentRecord::Object(object) | EnvironmentRecord::Global(object) => {
                    if object_has_property(object, name) {
                        let receiver = Value::object(object.clone());
                        return self.get_property(&receiver, name).map(Some);
                    }
                }
            }
            cursor = env.outer().cloned();
        }
        Ok(None)
    }

    /// Assign through the environment chain; unresolved names become global
    /// properties outside strict mode
    fn store_by_name(&mut self, name: &Arc<JsString>, value: Value) -> VmResult<()> {
        let mut cursor = Some(self.ctx.env().clone());
        while let Some(env) = cursor {
            match env.record() {
                EnvironmentRecord::Declarative(_) => {
                    if env.set_local(name, value.clone()) {
                        return Ok(());
                    }
                }
                EnvironmentRecord::Object(object) | EnvironmentRecord::Global(object) => {
                    if object_has_property(object, name) {
                        let receiver = Value::object(object.clone());
                        return self.set_property(&receiver, name, value);
                    }
                }
            }
            cursor = env.outer().cloned();
        }
        if self.strict {
            return Err(VmError::reference_error(format!("{name} is not defined")));
        }
        let receiver = Value::object(self.ctx.global().clone());
        self.set_property(&receiver, name, value)
    }

    /// Invoke any callable value
    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        this_value: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        if let Some(closure) = callee.as_closure() {
            let env = LexicalEnvironment::declarative(closure.env.clone());
            return call_function(
                &closure.module,
                closure.function_index,
                env,
                this_value,
                args,
                self.ctx,
            );
        }
        if let Some(native) = callee.as_native() {
            self.ctx.push_frame()?;
            let result = (native.func)(&this_value, args);
            self.ctx.pop_frame();
            return result.map_err(|err| match err {
                VmError::Exception(mut thrown) => {
                    thrown.stack.push(StackFrame {
                        function_name: native.name.clone(),
                        file: "[native function]".to_string(),
                        line: 0,
                        column: 0,
                    });
                    VmError::Exception(thrown)
                }
                other => other,
            });
        }
        if let Some(bound) = callee.as_bound() {
            let mut merged = bound.bound_args.clone();
            merged.extend_from_slice(args);
            let target = bound.target.clone();
            let this_value = bound.this_value.clone();
            return self.call_value(&target, this_value, &merged);
        }
        Err(VmError::type_error(format!("{:?} is not a function", callee)))
    }

    /// `new callee(args)`
    fn construct(&mut self, callee: &Value, args: &[Value]) -> VmResult<Value> {
        if !is_constructible(callee) {
            return Err(VmError::type_error(format!(
                "{:?} is not a constructor",
                callee
            )));
        }
        let proto_value = self.get_property(callee, &well_known::PROTOTYPE)?;
        let prototype = proto_value.as_object().cloned();
        let receiver = Value::object(JsObject::ordinary(prototype));
        let result = self.call_value(callee, receiver.clone(), args)?;
        // An object (or callable) result replaces the allocated receiver
        if result.is_object() || result.is_callable() {
            Ok(result)
        } else {
            Ok(receiver)
        }
    }

    /// Instantiate a closure over a function-table entry
    fn declare_function(&mut self, func: FunctionIndex) -> VmResult<Value> {
        let index = func.index();
        let block = self
            .module
            .function(index)
            .ok_or(VmError::Bytecode(BytecodeError::InvalidFunction(index)))?;

        let hidden = PropertyMeta {
            enumerable: false,
            ..PropertyMeta::data()
        };
        let prototype = JsObject::ordinary(None);
        let object = JsObject::new(ObjectKind::Function, None);
        object.add_property(
            well_known::PROTOTYPE.clone(),
            Property::Data(Value::object(prototype.clone())),
            hidden,
        );
        object.add_property(
            well_known::NAME.clone(),
            Property::Data(Value::string(JsString::intern(&block.name))),
            hidden,
        );
        object.add_property(
            well_known::LENGTH.clone(),
            Property::Data(Value::int32(block.param_count as i32)),
            hidden,
        );

        let closure = Arc::new(Closure {
            function_index: index,
            module: self.module.clone(),
            env: self.ctx.env().clone(),
            object,
        });
        let function = Value::function(closure);
        prototype.add_property(
            well_known::CONSTRUCTOR.clone(),
            Property::Data(function.clone()),
            hidden,
        );
        Ok(function)
    }
}

enum ReadAction {
    Hit(Arc<JsObject>, Option<u32>),
    Generic,
}

enum WriteAction {
    Slot(u32),
    Transition(Arc<Shape>),
    Miss { memoize: bool },
    Generic,
}

enum GlobalAction {
    Slot(u32),
    Slow { memoize: bool },
}

/// Validate a memoized read entry against the live chain
fn probe_read(container: &Arc<JsObject>, cache: &ReadCache) -> Option<(Arc<JsObject>, Option<u32>)> {
    'entries: for entry in &cache.entries {
        let mut cursor = container.clone();
        for (position, shape_id) in entry.chain.iter().enumerate() {
            if cursor.shape().id() != *shape_id {
                continue 'entries;
            }
            if position + 1 == entry.chain.len() {
                // An absence entry must still cover the whole chain
                if entry.slot.is_none() && cursor.prototype().is_some() {
                    continue 'entries;
                }
                return Some((cursor, entry.slot));
            }
            match cursor.prototype() {
                Some(proto) => cursor = proto,
                None => continue 'entries,
            }
        }
    }
    None
}

/// Walk the chain for `name`, memoizing the path as the newest entry
fn fill_read(
    container: &Arc<JsObject>,
    name: &Arc<JsString>,
    cache: &mut ReadCache,
) -> (Arc<JsObject>, Option<u32>) {
    let mut chain = ShapeChain::new();
    let mut cursor = container.clone();
    loop {
        chain.push(cursor.shape().id());
        if let Some((slot, _)) = cursor.find_own_property(name) {
            cache.entries.insert(
                0,
                ReadCacheEntry {
                    chain,
                    slot: Some(slot as u32),
                },
            );
            return (cursor, Some(slot as u32));
        }
        match cursor.prototype() {
            Some(proto) => cursor = proto,
            None => break,
        }
    }
    cache.entries.insert(0, ReadCacheEntry { chain, slot: None });
    (cursor, None)
}

/// Validate a write-transition chain: every shape matches and the chain
/// covers every prototype
fn validate_chain(container: &Arc<JsObject>, chain: &ShapeChain) -> bool {
    let mut cursor = Some(container.clone());
    for shape_id in chain {
        match cursor {
            Some(object) if object.shape().id() == *shape_id => cursor = object.prototype(),
            _ => return false,
        }
    }
    cursor.is_none()
}

fn set_global_cache(feedback: &FeedbackVector, cache: CacheSlot, value: GlobalCache) {
    let mut state = feedback.slot(cache).lock();
    if matches!(&*state, CacheState::Global(_)) {
        *state = CacheState::Global(value);
    }
}

/// Whether a named property is reachable anywhere on the chain
fn object_has_property(object: &Arc<JsObject>, name: &Arc<JsString>) -> bool {
    let mut cursor = Some(object.clone());
    while let Some(object) = cursor {
        if object.shape().contains(name) {
            return true;
        }
        if object.is_array() && Arc::ptr_eq(name, &*well_known::LENGTH) {
            return true;
        }
        if let Ok(index) = name.as_str().parse::<usize>()
            && object.get_element(index).is_some()
        {
            return true;
        }
        cursor = object.prototype();
    }
    false
}

fn is_constructible(callee: &Value) -> bool {
    if let Some(closure) = callee.as_closure() {
        return closure
            .module
            .function(closure.function_index)
            .is_some_and(|f| f.flags.is_constructor);
    }
    if let Some(native) = callee.as_native() {
        return native.constructible;
    }
    if let Some(bound) = callee.as_bound() {
        return is_constructible(&bound.target);
    }
    false
}

/// Opcode handlers, one per [`marten_vm_bytecode::Opcode`]
///
/// Every handler re-decodes its instruction; a mismatch between the dispatch
/// table and the instruction stream is a fatal internal fault.
pub(crate) mod handlers {
    use super::*;

    fn decode_fault(op: &str) -> ! {
        dispatch::fatal(&format!("operand decode mismatch for {op}"))
    }

    pub(crate) fn op_load_const(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::LoadConst { dst, idx } = m.block.instructions[pc] else {
            decode_fault("LoadConst")
        };
        let value = m.constant(idx)?;
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_load_int32(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::LoadInt32 { dst, value } = m.block.instructions[pc] else {
            decode_fault("LoadInt32")
        };
        m.set_reg(dst, Value::int32(value));
        Ok(Flow::Next)
    }

    pub(crate) fn op_load_undefined(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::LoadUndefined { dst } = m.block.instructions[pc] else {
            decode_fault("LoadUndefined")
        };
        m.set_reg(dst, Value::undefined());
        Ok(Flow::Next)
    }

    pub(crate) fn op_move(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Move { dst, src } = m.block.instructions[pc] else {
            decode_fault("Move")
        };
        let value = m.reg(src);
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_load_stack_slot(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::LoadStackSlot { dst, slot } = m.block.instructions[pc] else {
            decode_fault("LoadStackSlot")
        };
        let value = m.stack[slot.index() as usize].clone();
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_store_stack_slot(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::StoreStackSlot { slot, src } = m.block.instructions[pc] else {
            decode_fault("StoreStackSlot")
        };
        m.stack[slot.index() as usize] = m.reg(src);
        Ok(Flow::Next)
    }

    pub(crate) fn op_load_this(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::LoadThis { dst } = m.block.instructions[pc] else {
            decode_fault("LoadThis")
        };
        let value = m.this_value.clone();
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_load_by_name(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::LoadByName { dst, name } = m.block.instructions[pc] else {
            decode_fault("LoadByName")
        };
        let name = m.constant_string(name)?;
        let Some(value) = m.load_by_name(&name)? else {
            return Err(VmError::reference_error(format!("{name} is not defined")));
        };
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_store_by_name(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::StoreByName { name, src } = m.block.instructions[pc] else {
            decode_fault("StoreByName")
        };
        let name = m.constant_string(name)?;
        let value = m.reg(src);
        m.store_by_name(&name, value)?;
        Ok(Flow::Next)
    }

    pub(crate) fn op_declare_function(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::DeclareFunction { dst, func } = m.block.instructions[pc] else {
            decode_fault("DeclareFunction")
        };
        let value = m.declare_function(func)?;
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_get_global(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::GetGlobal { dst, name, cache } = m.block.instructions[pc] else {
            decode_fault("GetGlobal")
        };
        let name = m.constant_string(name)?;
        let value = m.global_read(cache, &name)?;
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_set_global(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::SetGlobal { name, src, cache } = m.block.instructions[pc] else {
            decode_fault("SetGlobal")
        };
        let name = m.constant_string(name)?;
        let value = m.reg(src);
        m.global_write(cache, &name, value)?;
        Ok(Flow::Next)
    }

    pub(crate) fn op_add(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Add { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Add")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let value = match (a.as_int32(), b.as_int32()) {
            (Some(x), Some(y)) => match x.checked_add(y) {
                Some(sum) => Value::int32(sum),
                None => Value::double(x as f64 + y as f64),
            },
            _ => m.add_values(&a, &b)?,
        };
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_sub(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Sub { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Sub")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let value = match (a.as_int32(), b.as_int32()) {
            (Some(x), Some(y)) => match x.checked_sub(y) {
                Some(diff) => Value::int32(diff),
                None => Value::double(x as f64 - y as f64),
            },
            _ => {
                let x = m.to_number_value(&a)?;
                let y = m.to_number_value(&b)?;
                Value::number(x - y)
            }
        };
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_mul(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Mul { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Mul")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let value = match (a.as_int32(), b.as_int32()) {
            // A zero result with a negative operand must stay a double
            // to carry the sign of zero
            (Some(x), Some(y)) if !((x == 0 || y == 0) && (x < 0 || y < 0)) => {
                match x.checked_mul(y) {
                    Some(product) => Value::int32(product),
                    None => Value::double(x as f64 * y as f64),
                }
            }
            _ => {
                let x = m.to_number_value(&a)?;
                let y = m.to_number_value(&b)?;
                Value::number(x * y)
            }
        };
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_div(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Div { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Div")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let x = m.to_number_value(&a)?;
        let y = m.to_number_value(&b)?;
        m.set_reg(dst, Value::number(x / y));
        Ok(Flow::Next)
    }

    pub(crate) fn op_mod(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Mod { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Mod")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let value = match (a.as_int32(), b.as_int32()) {
            (Some(x), Some(y)) if x > 0 && y != 0 => Value::int32(x % y),
            _ => m.mod_values(&a, &b)?,
        };
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_inc(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Inc { dst, src } = m.block.instructions[pc] else {
            decode_fault("Inc")
        };
        let v = m.reg(src);
        let value = match v.as_int32() {
            Some(i) => match i.checked_add(1) {
                Some(n) => Value::int32(n),
                None => Value::double(i as f64 + 1.0),
            },
            None => Value::number(m.to_number_value(&v)? + 1.0),
        };
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_dec(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Dec { dst, src } = m.block.instructions[pc] else {
            decode_fault("Dec")
        };
        let v = m.reg(src);
        let value = match v.as_int32() {
            Some(i) => match i.checked_sub(1) {
                Some(n) => Value::int32(n),
                None => Value::double(i as f64 - 1.0),
            },
            None => Value::number(m.to_number_value(&v)? - 1.0),
        };
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_neg(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Neg { dst, src } = m.block.instructions[pc] else {
            decode_fault("Neg")
        };
        let v = m.reg(src);
        let value = match v.as_int32() {
            // -0 and -i32::MIN do not fit the int32 representation
            Some(i) if i != 0 && i != i32::MIN => Value::int32(-i),
            _ => Value::number(-m.to_number_value(&v)?),
        };
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_to_number(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::ToNumber { dst, src } = m.block.instructions[pc] else {
            decode_fault("ToNumber")
        };
        let v = m.reg(src);
        let value = Value::number(m.to_number_value(&v)?);
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_bit_and(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::BitAnd { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("BitAnd")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let x = m.to_int32_value(&a)?;
        let y = m.to_int32_value(&b)?;
        m.set_reg(dst, Value::int32(x & y));
        Ok(Flow::Next)
    }

    pub(crate) fn op_bit_or(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::BitOr { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("BitOr")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let x = m.to_int32_value(&a)?;
        let y = m.to_int32_value(&b)?;
        m.set_reg(dst, Value::int32(x | y));
        Ok(Flow::Next)
    }

    pub(crate) fn op_bit_xor(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::BitXor { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("BitXor")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let x = m.to_int32_value(&a)?;
        let y = m.to_int32_value(&b)?;
        m.set_reg(dst, Value::int32(x ^ y));
        Ok(Flow::Next)
    }

    pub(crate) fn op_bit_not(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::BitNot { dst, src } = m.block.instructions[pc] else {
            decode_fault("BitNot")
        };
        let v = m.reg(src);
        let x = m.to_int32_value(&v)?;
        m.set_reg(dst, Value::int32(!x));
        Ok(Flow::Next)
    }

    pub(crate) fn op_shl(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Shl { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Shl")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let x = m.to_int32_value(&a)?;
        let y = m.to_uint32_value(&b)?;
        m.set_reg(dst, Value::int32(x.wrapping_shl(y & 31)));
        Ok(Flow::Next)
    }

    pub(crate) fn op_shr(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Shr { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Shr")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let x = m.to_int32_value(&a)?;
        let y = m.to_uint32_value(&b)?;
        m.set_reg(dst, Value::int32(x >> (y & 31)));
        Ok(Flow::Next)
    }

    pub(crate) fn op_ushr(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Ushr { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Ushr")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let x = m.to_uint32_value(&a)?;
        let y = m.to_uint32_value(&b)?;
        m.set_reg(dst, Value::number((x >> (y & 31)) as f64));
        Ok(Flow::Next)
    }

    pub(crate) fn op_eq(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Eq { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Eq")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let value = Value::boolean(m.abstract_equals(&a, &b)?);
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_ne(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Ne { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Ne")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let value = Value::boolean(!m.abstract_equals(&a, &b)?);
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_strict_eq(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::StrictEq { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("StrictEq")
        };
        let value = Value::boolean(m.reg(lhs).strict_equals(&m.reg(rhs)));
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_strict_ne(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::StrictNe { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("StrictNe")
        };
        let value = Value::boolean(!m.reg(lhs).strict_equals(&m.reg(rhs)));
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_lt(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Lt { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Lt")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let value = Value::boolean(m.abstract_compare(&a, &b, true)? == Some(true));
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_le(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Le { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Le")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        // a <= b is !(b < a), except NaN which fails both
        let value = Value::boolean(m.abstract_compare(&b, &a, false)? == Some(false));
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_gt(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Gt { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Gt")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let value = Value::boolean(m.abstract_compare(&b, &a, false)? == Some(true));
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_ge(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Ge { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("Ge")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let value = Value::boolean(m.abstract_compare(&a, &b, true)? == Some(false));
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_not(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Not { dst, src } = m.block.instructions[pc] else {
            decode_fault("Not")
        };
        let value = Value::boolean(!m.reg(src).to_boolean());
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_type_of(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::TypeOf { dst, src } = m.block.instructions[pc] else {
            decode_fault("TypeOf")
        };
        let value = Value::string(JsString::intern(m.reg(src).type_of()));
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_type_of_name(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::TypeOfName { dst, name } = m.block.instructions[pc] else {
            decode_fault("TypeOfName")
        };
        let name = m.constant_string(name)?;
        // Unlike LoadByName, an unresolved name is "undefined", never a throw
        let tag = match m.load_by_name(&name)? {
            Some(value) => value.type_of(),
            None => "undefined",
        };
        m.set_reg(dst, Value::string(JsString::intern(tag)));
        Ok(Flow::Next)
    }

    pub(crate) fn op_in(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::In { dst, key, obj } = m.block.instructions[pc] else {
            decode_fault("In")
        };
        let object = m.reg(obj);
        let Some(container) = m.property_container(&object) else {
            return Err(VmError::type_error(
                "Cannot use 'in' operator to search in a non-object",
            ));
        };
        let key_value = m.reg(key);
        let name = m.to_string_value(&key_value)?;
        m.set_reg(dst, Value::boolean(object_has_property(&container, &name)));
        Ok(Flow::Next)
    }

    pub(crate) fn op_instance_of(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::InstanceOf { dst, lhs, rhs } = m.block.instructions[pc] else {
            decode_fault("InstanceOf")
        };
        let (a, b) = (m.reg(lhs), m.reg(rhs));
        let value = Value::boolean(m.instance_of(&a, &b)?);
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_delete_prop(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::DeleteProp { dst, obj, key } = m.block.instructions[pc] else {
            decode_fault("DeleteProp")
        };
        let object = m.reg(obj);
        if object.is_nullish() {
            return Err(VmError::type_error(
                "Cannot convert undefined or null to object",
            ));
        }
        let key_value = m.reg(key);
        let name = m.to_string_value(&key_value)?;
        let result = match m.property_container(&object) {
            // delete on a primitive is a successful no-op
            None => true,
            Some(container) => {
                if container.is_array()
                    && let Ok(index) = name.as_str().parse::<usize>()
                    && index < container.element_len()
                {
                    container.set_element(index, Value::empty());
                    true
                } else {
                    container.delete_property(&name)
                }
            }
        };
        if !result && m.strict {
            return Err(VmError::type_error(format!(
                "Cannot delete property '{name}'"
            )));
        }
        m.set_reg(dst, Value::boolean(result));
        Ok(Flow::Next)
    }

    pub(crate) fn op_delete_binding(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::DeleteBinding { dst, name } = m.block.instructions[pc] else {
            decode_fault("DeleteBinding")
        };
        let name = m.constant_string(name)?;
        let mut result = true;
        let mut cursor = Some(m.ctx.env().clone());
        while let Some(env) = cursor {
            match env.record() {
                EnvironmentRecord::Declarative(_) => {
                    if env.has_local(&name) {
                        // Declarative bindings are never deletable
                        result = false;
                        break;
                    }
                }
                EnvironmentRecord::Object(object) | EnvironmentRecord::Global(object) => {
                    if object_has_property(object, &name) {
                        result = object.delete_property(&name);
                        break;
                    }
                }
            }
            cursor = env.outer().cloned();
        }
        m.set_reg(dst, Value::boolean(result));
        Ok(Flow::Next)
    }

    pub(crate) fn op_new_object(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::NewObject { dst } = m.block.instructions[pc] else {
            decode_fault("NewObject")
        };
        m.set_reg(dst, Value::object(JsObject::ordinary(None)));
        Ok(Flow::Next)
    }

    pub(crate) fn op_new_array(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::NewArray { dst, len } = m.block.instructions[pc] else {
            decode_fault("NewArray")
        };
        m.set_reg(dst, Value::object(JsObject::array(len as usize, None)));
        Ok(Flow::Next)
    }

    pub(crate) fn op_get_prop(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::GetProp { dst, obj, key } = m.block.instructions[pc] else {
            decode_fault("GetProp")
        };
        let object = m.reg(obj);
        let key_value = m.reg(key);
        let fast = object
            .as_object()
            .filter(|container| container.is_array())
            .and_then(|container| {
                let index = key_value.as_int32().filter(|i| *i >= 0)?;
                container.get_element(index as usize)
            });
        let value = match fast {
            Some(value) => value,
            None => {
                let name = m.to_string_value(&key_value)?;
                m.get_property(&object, &name)?
            }
        };
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_set_prop(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::SetProp { obj, key, src } = m.block.instructions[pc] else {
            decode_fault("SetProp")
        };
        let object = m.reg(obj);
        let key_value = m.reg(key);
        let value = m.reg(src);
        if let Some(container) = object.as_object()
            && container.is_array()
            && let Some(index) = key_value.as_int32()
            && index >= 0
            && container.set_element(index as usize, value.clone())
        {
            return Ok(Flow::Next);
        }
        let name = m.to_string_value(&key_value)?;
        m.set_property(&object, &name, value)?;
        Ok(Flow::Next)
    }

    pub(crate) fn op_get_prop_named(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::GetPropNamed {
            dst,
            obj,
            name,
            cache,
        } = m.block.instructions[pc]
        else {
            decode_fault("GetPropNamed")
        };
        let name = m.constant_string(name)?;
        let receiver = m.reg(obj);
        // Dense arrays mutate element storage without shape changes, so they
        // always take the generic path
        let value = match m.property_container(&receiver) {
            Some(container) if !container.is_array() => {
                m.read_cached(cache, &container, &receiver, &name)?
            }
            _ => m.get_property(&receiver, &name)?,
        };
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_set_prop_named(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::SetPropNamed {
            obj,
            name,
            src,
            cache,
        } = m.block.instructions[pc]
        else {
            decode_fault("SetPropNamed")
        };
        let name = m.constant_string(name)?;
        let receiver = m.reg(obj);
        let value = m.reg(src);
        match m.property_container(&receiver) {
            Some(container) if !container.is_array() => {
                m.write_cached(cache, &container, &receiver, &name, value)?;
            }
            _ => m.set_property(&receiver, &name, value)?,
        }
        Ok(Flow::Next)
    }

    pub(crate) fn op_define_own_prop(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::DefineOwnProp { obj, key, src } = m.block.instructions[pc] else {
            decode_fault("DefineOwnProp")
        };
        let object = m.reg(obj);
        let key_value = m.reg(key);
        let value = m.reg(src);
        let container = m.to_object_container(&object)?;
        if container.is_array()
            && let Some(index) = key_value.as_int32()
            && index >= 0
            && container.set_element(index as usize, value.clone())
        {
            return Ok(Flow::Next);
        }
        let name = m.to_string_value(&key_value)?;
        if !container.define_own_property(name.clone(), Property::Data(value), PropertyMeta::data())
        {
            return Err(VmError::type_error(format!(
                "Cannot define property '{name}'"
            )));
        }
        Ok(Flow::Next)
    }

    pub(crate) fn op_define_own_prop_named(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::DefineOwnPropNamed { obj, name, src } = m.block.instructions[pc] else {
            decode_fault("DefineOwnPropNamed")
        };
        let object = m.reg(obj);
        let name = m.constant_string(name)?;
        let value = m.reg(src);
        let container = m.to_object_container(&object)?;
        if !container.define_own_property(name.clone(), Property::Data(value), PropertyMeta::data())
        {
            return Err(VmError::type_error(format!(
                "Cannot define property '{name}'"
            )));
        }
        Ok(Flow::Next)
    }

    pub(crate) fn op_define_getter(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::DefineGetter { obj, key, getter } = m.block.instructions[pc] else {
            decode_fault("DefineGetter")
        };
        let object = m.reg(obj);
        let key_value = m.reg(key);
        let getter = m.reg(getter);
        let container = m.to_object_container(&object)?;
        let name = m.to_string_value(&key_value)?;
        // Keep the other half of an existing accessor pair
        let set = match container.get_own(&name) {
            Some(Property::Accessor { set, .. }) => set,
            _ => None,
        };
        let property = Property::Accessor {
            get: Some(getter),
            set,
        };
        if !container.define_own_property(name.clone(), property, PropertyMeta::accessor()) {
            return Err(VmError::type_error(format!(
                "Cannot define getter for '{name}'"
            )));
        }
        Ok(Flow::Next)
    }

    pub(crate) fn op_define_setter(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::DefineSetter { obj, key, setter } = m.block.instructions[pc] else {
            decode_fault("DefineSetter")
        };
        let object = m.reg(obj);
        let key_value = m.reg(key);
        let setter = m.reg(setter);
        let container = m.to_object_container(&object)?;
        let name = m.to_string_value(&key_value)?;
        let get = match container.get_own(&name) {
            Some(Property::Accessor { get, .. }) => get,
            _ => None,
        };
        let property = Property::Accessor {
            get,
            set: Some(setter),
        };
        if !container.define_own_property(name.clone(), property, PropertyMeta::accessor()) {
            return Err(VmError::type_error(format!(
                "Cannot define setter for '{name}'"
            )));
        }
        Ok(Flow::Next)
    }

    pub(crate) fn op_call(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Call {
            dst,
            callee,
            args_start,
            argc,
        } = m.block.instructions[pc]
        else {
            decode_fault("Call")
        };
        let args = m.arg_window(args_start, argc);
        let callee = m.reg(callee);
        let value = m.call_value(&callee, Value::undefined(), &args)?;
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_call_with_receiver(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::CallWithReceiver {
            dst,
            callee,
            receiver,
            args_start,
            argc,
        } = m.block.instructions[pc]
        else {
            decode_fault("CallWithReceiver")
        };
        let args = m.arg_window(args_start, argc);
        let callee = m.reg(callee);
        let receiver = m.reg(receiver);
        let value = m.call_value(&callee, receiver, &args)?;
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_new(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::New {
            dst,
            callee,
            args_start,
            argc,
        } = m.block.instructions[pc]
        else {
            decode_fault("New")
        };
        let args = m.arg_window(args_start, argc);
        let callee = m.reg(callee);
        let value = m.construct(&callee, &args)?;
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_call_eval_by_name(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::CallEvalByName {
            dst,
            args_start,
            argc,
        } = m.block.instructions[pc]
        else {
            decode_fault("CallEvalByName")
        };
        let args = m.arg_window(args_start, argc);
        let Some(eval) = m.load_by_name(&well_known::EVAL)? else {
            return Err(VmError::reference_error("eval is not defined"));
        };
        let value = m.call_value(&eval, Value::undefined(), &args)?;
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }

    pub(crate) fn op_jump(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Jump { target } = m.block.instructions[pc] else {
            decode_fault("Jump")
        };
        Ok(Flow::Jump(target.index() as usize))
    }

    pub(crate) fn op_jump_if_true(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::JumpIfTrue { cond, target } = m.block.instructions[pc] else {
            decode_fault("JumpIfTrue")
        };
        if m.reg(cond).to_boolean() {
            Ok(Flow::Jump(target.index() as usize))
        } else {
            Ok(Flow::Next)
        }
    }

    pub(crate) fn op_jump_if_false(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::JumpIfFalse { cond, target } = m.block.instructions[pc] else {
            decode_fault("JumpIfFalse")
        };
        if m.reg(cond).to_boolean() {
            Ok(Flow::Next)
        } else {
            Ok(Flow::Jump(target.index() as usize))
        }
    }

    pub(crate) fn op_jump_complex(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::JumpComplex { target, depth } = m.block.instructions[pc] else {
            decode_fault("JumpComplex")
        };
        if m.active_records() == 0 {
            return Err(VmError::internal("JumpComplex outside any region"));
        }
        m.set_back_record(ControlFlowRecord::NeedsJump {
            target: target.index(),
            count: depth,
        })?;
        Ok(Flow::Return)
    }

    pub(crate) fn op_return(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Return { src } = m.block.instructions[pc] else {
            decode_fault("Return")
        };
        m.result = m.reg(src);
        if m.active_records() > 0 {
            let count = m.active_records() as u32;
            m.set_back_record(ControlFlowRecord::NeedsReturn { count })?;
        }
        Ok(Flow::Return)
    }

    pub(crate) fn op_return_undefined(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::ReturnUndefined = m.block.instructions[pc] else {
            decode_fault("ReturnUndefined")
        };
        m.result = Value::undefined();
        if m.active_records() > 0 {
            let count = m.active_records() as u32;
            m.set_back_record(ControlFlowRecord::NeedsReturn { count })?;
        }
        Ok(Flow::Return)
    }

    pub(crate) fn op_throw(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Throw { src } = m.block.instructions[pc] else {
            decode_fault("Throw")
        };
        Err(VmError::exception(m.reg(src)))
    }

    pub(crate) fn op_try(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::Try {
            catch_target,
            end_target,
            catch_name,
            has_catch,
        } = m.block.instructions[pc]
        else {
            decode_fault("Try")
        };
        let entry_depth = m.ctx.control_flow.len();
        m.ctx.control_flow.push(None);

        if let Err(err) = m.run(pc + 1) {
            let thrown = match reify_thrown(err) {
                Ok(thrown) => thrown,
                Err(fatal) => {
                    // Stack exhaustion and internal faults are not catchable
                    // by script
                    m.ctx.control_flow.truncate(entry_depth);
                    return Err(fatal);
                }
            };
            // Inner regions the body never exited are gone now
            m.ctx.control_flow.truncate(entry_depth + 1);
            m.ctx.control_flow[entry_depth] = None;
            if has_catch {
                let name = m.constant_string(catch_name)?;
                let catch_env = LexicalEnvironment::declarative(m.ctx.env().clone());
                catch_env.define(name, thrown.value.clone());
                let saved = m.ctx.swap_env(catch_env);
                let caught = m.run(catch_target.index() as usize);
                m.ctx.swap_env(saved);
                if let Err(err) = caught {
                    match reify_thrown(err) {
                        Ok(rethrown) => {
                            // The finally code still runs before the rethrow
                            m.ctx.control_flow.truncate(entry_depth + 1);
                            m.ctx.control_flow[entry_depth] =
                                Some(ControlFlowRecord::NeedsThrow(rethrown.value));
                        }
                        Err(fatal) => {
                            m.ctx.control_flow.truncate(entry_depth);
                            return Err(fatal);
                        }
                    }
                }
            } else {
                m.ctx.control_flow[entry_depth] =
                    Some(ControlFlowRecord::NeedsThrow(thrown.value));
            }
        }
        Ok(Flow::Jump(end_target.index() as usize))
    }

    pub(crate) fn op_try_body_end(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::TryBodyEnd = m.block.instructions[pc] else {
            decode_fault("TryBodyEnd")
        };
        if m.active_records() == 0 {
            return Err(VmError::internal("TryBodyEnd outside any region"));
        }
        Ok(Flow::Return)
    }

    pub(crate) fn op_finally_end(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::FinallyEnd = m.block.instructions[pc] else {
            decode_fault("FinallyEnd")
        };
        let Some(record) = m.ctx.control_flow.pop() else {
            return Err(VmError::internal("FinallyEnd without a region"));
        };
        match record {
            None => Ok(Flow::Next),
            Some(record) => forward_record(m, record),
        }
    }

    pub(crate) fn op_with(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::With { obj, end_target } = m.block.instructions[pc] else {
            decode_fault("With")
        };
        let scope = m.reg(obj);
        let container = m.to_object_container(&scope)?;
        let entry_depth = m.ctx.control_flow.len();
        m.ctx.control_flow.push(None);
        let with_env = LexicalEnvironment::object(container, m.ctx.env().clone());
        let saved = m.ctx.swap_env(with_env);
        let body = m.run(pc + 1);
        m.ctx.swap_env(saved);
        if let Err(err) = body {
            m.ctx.control_flow.truncate(entry_depth);
            return Err(err);
        }
        let Some(record) = m.ctx.control_flow.pop() else {
            return Err(VmError::internal("with region lost its record slot"));
        };
        match record {
            None => Ok(Flow::Jump(end_target.index() as usize)),
            Some(record) => forward_record(m, record),
        }
    }

    /// Engine-raised TypeError/ReferenceError/RangeError are language-level
    /// exceptions; reify them into an error value a catch binding can
    /// inspect. Stack exhaustion and internal faults pass through as fatal.
    fn reify_thrown(err: VmError) -> Result<Box<ThrownValue>, VmError> {
        let (kind, message) = match err {
            VmError::Exception(thrown) => return Ok(thrown),
            VmError::TypeError(msg) => ("TypeError", msg),
            VmError::ReferenceError(msg) => ("ReferenceError", msg),
            VmError::RangeError(msg) => ("RangeError", msg),
            other => return Err(other),
        };
        let error = JsObject::ordinary(None);
        error.add_property(
            well_known::NAME.clone(),
            Property::Data(Value::string(JsString::intern(kind))),
            PropertyMeta::data(),
        );
        error.add_property(
            well_known::MESSAGE.clone(),
            Property::Data(Value::string(JsString::intern(&message))),
            PropertyMeta::data(),
        );
        Ok(Box::new(ThrownValue {
            message: format!("{kind}: {message}"),
            value: Value::object(error),
            stack: Vec::new(),
        }))
    }

    /// Resolve a popped region record: act on it here or re-park it for the
    /// next region out
    fn forward_record(m: &mut Machine<'_>, record: ControlFlowRecord) -> VmResult<Flow> {
        match record {
            ControlFlowRecord::NeedsJump { target, count } => {
                if count <= 1 {
                    Ok(Flow::Jump(target as usize))
                } else {
                    m.set_back_record(ControlFlowRecord::NeedsJump {
                        target,
                        count: count - 1,
                    })?;
                    Ok(Flow::Return)
                }
            }
            ControlFlowRecord::NeedsReturn { count } => {
                if count > 1 {
                    m.set_back_record(ControlFlowRecord::NeedsReturn { count: count - 1 })?;
                }
                Ok(Flow::Return)
            }
            ControlFlowRecord::NeedsThrow(value) => Err(VmError::exception(value)),
        }
    }

    pub(crate) fn op_enumerate_object(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::EnumerateObject { dst, obj } = m.block.instructions[pc] else {
            decode_fault("EnumerateObject")
        };
        let target = m.reg(obj);
        // for-in over null/undefined runs zero iterations
        let container = if target.is_nullish() {
            JsObject::ordinary(None)
        } else {
            m.to_object_container(&target)?
        };
        let state = EnumerateState::new(container);
        m.set_reg(dst, Value::enumeration(Arc::new(Mutex::new(state))));
        Ok(Flow::Next)
    }

    pub(crate) fn op_check_if_key_is_last(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::CheckIfKeyIsLast { data, end_target } = m.block.instructions[pc] else {
            decode_fault("CheckIfKeyIsLast")
        };
        let handle = m.reg(data);
        let Some(state) = handle.as_enumeration() else {
            return Err(VmError::internal(
                "CheckIfKeyIsLast on a non-enumeration value",
            ));
        };
        if state.lock().check_exhausted() {
            Ok(Flow::Jump(end_target.index() as usize))
        } else {
            Ok(Flow::Next)
        }
    }

    pub(crate) fn op_enumerate_object_key(m: &mut Machine<'_>, pc: usize) -> VmResult<Flow> {
        let Instruction::EnumerateObjectKey { dst, data } = m.block.instructions[pc] else {
            decode_fault("EnumerateObjectKey")
        };
        let handle = m.reg(data);
        let Some(state) = handle.as_enumeration() else {
            return Err(VmError::internal(
                "EnumerateObjectKey on a non-enumeration value",
            ));
        };
        let Some(key) = state.lock().next_key() else {
            return Err(VmError::internal("enumeration cursor ran past its keys"));
        };
        let value = Value::string(key);
        m.set_reg(dst, value);
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_vm_bytecode::{JumpTarget, StackSlot};

    fn module_with(strings: &[&str], instructions: Vec<Instruction>) -> Arc<Module> {
        let mut builder = Module::builder("test.js");
        for s in strings {
            builder.constants_mut().add_string(s);
        }
        let main = Function::builder()
            .name("main")
            .instructions(instructions)
            .build();
        builder.add_function(main);
        Arc::new(builder.build())
    }

    fn run(module: &Arc<Module>) -> VmResult<Value> {
        let mut ctx = VmContext::new();
        Interpreter::new().execute(module, &mut ctx)
    }

    fn run_with(module: &Arc<Module>, ctx: &mut VmContext) -> VmResult<Value> {
        Interpreter::new().execute(module, ctx)
    }

    fn data(obj: &Arc<JsObject>, name: &str, value: Value) {
        obj.add_property(
            JsString::intern(name),
            Property::Data(value),
            PropertyMeta::data(),
        );
    }

    #[test]
    fn test_int32_add() {
        let module = module_with(
            &[],
            vec![
                Instruction::LoadInt32 {
                    dst: Register(0),
                    value: 10,
                },
                Instruction::LoadInt32 {
                    dst: Register(1),
                    value: 20,
                },
                Instruction::Add {
                    dst: Register(2),
                    lhs: Register(0),
                    rhs: Register(1),
                },
                Instruction::Return { src: Register(2) },
            ],
        );
        assert_eq!(run(&module).unwrap(), Value::int32(30));
    }

    #[test]
    fn test_add_concatenates_with_string() {
        let module = module_with(
            &["a"],
            vec![
                Instruction::LoadConst {
                    dst: Register(0),
                    idx: ConstantIndex(0),
                },
                Instruction::LoadInt32 {
                    dst: Register(1),
                    value: 1,
                },
                Instruction::Add {
                    dst: Register(2),
                    lhs: Register(0),
                    rhs: Register(1),
                },
                Instruction::Return { src: Register(2) },
            ],
        );
        let result = run(&module).unwrap();
        assert_eq!(result.as_string().unwrap().as_str(), "a1");
    }

    #[test]
    fn test_add_overflow_becomes_double() {
        let module = module_with(
            &[],
            vec![
                Instruction::LoadInt32 {
                    dst: Register(0),
                    value: i32::MAX,
                },
                Instruction::LoadInt32 {
                    dst: Register(1),
                    value: 1,
                },
                Instruction::Add {
                    dst: Register(2),
                    lhs: Register(0),
                    rhs: Register(1),
                },
                Instruction::Return { src: Register(2) },
            ],
        );
        let result = run(&module).unwrap();
        assert!(!result.is_int32());
        assert_eq!(result.as_number(), Some(2147483648.0));
    }

    #[test]
    fn test_mul_keeps_sign_of_zero() {
        let module = module_with(
            &[],
            vec![
                Instruction::LoadInt32 {
                    dst: Register(0),
                    value: 0,
                },
                Instruction::LoadInt32 {
                    dst: Register(1),
                    value: -1,
                },
                Instruction::Mul {
                    dst: Register(2),
                    lhs: Register(0),
                    rhs: Register(1),
                },
                Instruction::Return { src: Register(2) },
            ],
        );
        let result = run(&module).unwrap();
        let n = result.as_number().unwrap();
        assert_eq!(n, 0.0);
        assert!(n.is_sign_negative());
    }

    #[test]
    fn test_string_relational_uses_code_units() {
        let module = module_with(
            &["10", "9"],
            vec![
                Instruction::LoadConst {
                    dst: Register(0),
                    idx: ConstantIndex(0),
                },
                Instruction::LoadConst {
                    dst: Register(1),
                    idx: ConstantIndex(1),
                },
                Instruction::Lt {
                    dst: Register(2),
                    lhs: Register(0),
                    rhs: Register(1),
                },
                Instruction::Return { src: Register(2) },
            ],
        );
        assert_eq!(run(&module).unwrap(), Value::boolean(true));
    }

    #[test]
    fn test_abstract_vs_strict_equality() {
        let abstract_eq = module_with(
            &["1"],
            vec![
                Instruction::LoadInt32 {
                    dst: Register(0),
                    value: 1,
                },
                Instruction::LoadConst {
                    dst: Register(1),
                    idx: ConstantIndex(0),
                },
                Instruction::Eq {
                    dst: Register(2),
                    lhs: Register(0),
                    rhs: Register(1),
                },
                Instruction::Return { src: Register(2) },
            ],
        );
        assert_eq!(run(&abstract_eq).unwrap(), Value::boolean(true));

        let strict_eq = module_with(
            &["1"],
            vec![
                Instruction::LoadInt32 {
                    dst: Register(0),
                    value: 1,
                },
                Instruction::LoadConst {
                    dst: Register(1),
                    idx: ConstantIndex(0),
                },
                Instruction::StrictEq {
                    dst: Register(2),
                    lhs: Register(0),
                    rhs: Register(1),
                },
                Instruction::Return { src: Register(2) },
            ],
        );
        assert_eq!(run(&strict_eq).unwrap(), Value::boolean(false));
    }

    #[test]
    fn test_function_call_with_parameters() {
        let mut builder = Module::builder("call.js");
        let main = Function::builder()
            .name("main")
            .instruction(Instruction::DeclareFunction {
                dst: Register(0),
                func: FunctionIndex(1),
            })
            .instruction(Instruction::LoadInt32 {
                dst: Register(1),
                value: 3,
            })
            .instruction(Instruction::LoadInt32 {
                dst: Register(2),
                value: 4,
            })
            .instruction(Instruction::Call {
                dst: Register(3),
                callee: Register(0),
                args_start: Register(1),
                argc: 2,
            })
            .instruction(Instruction::Return { src: Register(3) })
            .build();
        let add = Function::builder()
            .name("add")
            .param_count(2)
            .instruction(Instruction::LoadStackSlot {
                dst: Register(0),
                slot: StackSlot(0),
            })
            .instruction(Instruction::LoadStackSlot {
                dst: Register(1),
                slot: StackSlot(1),
            })
            .instruction(Instruction::Add {
                dst: Register(2),
                lhs: Register(0),
                rhs: Register(1),
            })
            .instruction(Instruction::Return { src: Register(2) })
            .build();
        builder.add_function(main);
        builder.add_function(add);
        let module = Arc::new(builder.build());

        assert_eq!(run(&module).unwrap(), Value::int32(7));
    }

    #[test]
    fn test_calling_non_function_is_type_error() {
        let module = module_with(
            &[],
            vec![
                Instruction::LoadInt32 {
                    dst: Register(0),
                    value: 1,
                },
                Instruction::Call {
                    dst: Register(1),
                    callee: Register(0),
                    args_start: Register(2),
                    argc: 0,
                },
                Instruction::Return { src: Register(1) },
            ],
        );
        assert!(matches!(run(&module), Err(VmError::TypeError(_))));
    }

    #[test]
    fn test_catch_intercepts_call_on_non_callable() {
        // Engine-raised type errors are language-level exceptions; the
        // catch binding sees an error value with its classification
        let module = module_with(
            &["e", "name"],
            vec![
                // 0
                Instruction::Try {
                    catch_target: JumpTarget(4),
                    end_target: JumpTarget(8),
                    catch_name: ConstantIndex(0),
                    has_catch: true,
                },
                // 1..=3: body calls a number
                Instruction::LoadInt32 {
                    dst: Register(0),
                    value: 1,
                },
                Instruction::Call {
                    dst: Register(1),
                    callee: Register(0),
                    args_start: Register(2),
                    argc: 0,
                },
                Instruction::TryBodyEnd,
                // 4..=7: catch stores e.name
                Instruction::LoadByName {
                    dst: Register(1),
                    name: ConstantIndex(0),
                },
                Instruction::GetPropNamed {
                    dst: Register(2),
                    obj: Register(1),
                    name: ConstantIndex(1),
                    cache: CacheSlot(0),
                },
                Instruction::StoreStackSlot {
                    slot: StackSlot(0),
                    src: Register(2),
                },
                Instruction::TryBodyEnd,
                // 8: (empty) finally
                Instruction::FinallyEnd,
                // 9..=10
                Instruction::LoadStackSlot {
                    dst: Register(3),
                    slot: StackSlot(0),
                },
                Instruction::Return { src: Register(3) },
            ],
        );
        let result = run(&module).unwrap();
        assert_eq!(result.as_string().unwrap().as_str(), "TypeError");
    }

    #[test]
    fn test_construct_initializes_receiver() {
        let mut builder = Module::builder("new.js");
        builder.constants_mut().add_string("x");
        let main = Function::builder()
            .name("main")
            .instruction(Instruction::DeclareFunction {
                dst: Register(0),
                func: FunctionIndex(1),
            })
            .instruction(Instruction::New {
                dst: Register(1),
                callee: Register(0),
                args_start: Register(2),
                argc: 0,
            })
            .instruction(Instruction::GetPropNamed {
                dst: Register(2),
                obj: Register(1),
                name: ConstantIndex(0),
                cache: CacheSlot(0),
            })
            .instruction(Instruction::Return { src: Register(2) })
            .build();
        let point = Function::builder()
            .name("Point")
            .constructor(true)
            .instruction(Instruction::LoadThis { dst: Register(0) })
            .instruction(Instruction::LoadInt32 {
                dst: Register(1),
                value: 5,
            })
            .instruction(Instruction::SetPropNamed {
                obj: Register(0),
                name: ConstantIndex(0),
                src: Register(1),
                cache: CacheSlot(0),
            })
            .instruction(Instruction::ReturnUndefined)
            .build();
        builder.add_function(main);
        builder.add_function(point);
        let module = Arc::new(builder.build());

        assert_eq!(run(&module).unwrap(), Value::int32(5));
    }

    #[test]
    fn test_new_on_non_constructor_is_type_error() {
        let mut builder = Module::builder("new.js");
        let main = Function::builder()
            .name("main")
            .instruction(Instruction::DeclareFunction {
                dst: Register(0),
                func: FunctionIndex(1),
            })
            .instruction(Instruction::New {
                dst: Register(1),
                callee: Register(0),
                args_start: Register(2),
                argc: 0,
            })
            .instruction(Instruction::Return { src: Register(1) })
            .build();
        let plain = Function::builder()
            .name("plain")
            .instruction(Instruction::ReturnUndefined)
            .build();
        builder.add_function(main);
        builder.add_function(plain);
        let module = Arc::new(builder.build());

        assert!(matches!(run(&module), Err(VmError::TypeError(_))));
    }

    #[test]
    fn test_throw_is_caught_by_catch() {
        let module = module_with(
            &["boom", "e"],
            vec![
                // 0
                Instruction::Try {
                    catch_target: JumpTarget(4),
                    end_target: JumpTarget(7),
                    catch_name: ConstantIndex(1),
                    has_catch: true,
                },
                // 1..=3: body
                Instruction::LoadConst {
                    dst: Register(0),
                    idx: ConstantIndex(0),
                },
                Instruction::Throw { src: Register(0) },
                Instruction::TryBodyEnd,
                // 4..=6: catch
                Instruction::LoadByName {
                    dst: Register(1),
                    name: ConstantIndex(1),
                },
                Instruction::StoreStackSlot {
                    slot: StackSlot(0),
                    src: Register(1),
                },
                Instruction::TryBodyEnd,
                // 7: (empty) finally
                Instruction::FinallyEnd,
                // 8..=9
                Instruction::LoadStackSlot {
                    dst: Register(2),
                    slot: StackSlot(0),
                },
                Instruction::Return { src: Register(2) },
            ],
        );
        let result = run(&module).unwrap();
        assert_eq!(result.as_string().unwrap().as_str(), "boom");
    }

    #[test]
    fn test_throw_in_finally_replaces_pending_throw() {
        let module = module_with(
            &["first", "second"],
            vec![
                // 0
                Instruction::Try {
                    catch_target: JumpTarget(0),
                    end_target: JumpTarget(4),
                    catch_name: ConstantIndex(0),
                    has_catch: false,
                },
                // 1..=3: body throws "first"
                Instruction::LoadConst {
                    dst: Register(0),
                    idx: ConstantIndex(0),
                },
                Instruction::Throw { src: Register(0) },
                Instruction::TryBodyEnd,
                // 4..=6: finally throws "second"
                Instruction::LoadConst {
                    dst: Register(1),
                    idx: ConstantIndex(1),
                },
                Instruction::Throw { src: Register(1) },
                Instruction::FinallyEnd,
                // 7
                Instruction::ReturnUndefined,
            ],
        );
        let err = run(&module).unwrap_err();
        let thrown = err.thrown_value().unwrap();
        assert_eq!(thrown.as_string().unwrap().as_str(), "second");
    }

    #[test]
    fn test_return_runs_finally_first() {
        let module = module_with(
            &["ranFinally"],
            vec![
                // 0
                Instruction::Try {
                    catch_target: JumpTarget(0),
                    end_target: JumpTarget(4),
                    catch_name: ConstantIndex(0),
                    has_catch: false,
                },
                // 1..=3: body returns 1
                Instruction::LoadInt32 {
                    dst: Register(0),
                    value: 1,
                },
                Instruction::Return { src: Register(0) },
                Instruction::TryBodyEnd,
                // 4..=6: finally records that it ran
                Instruction::LoadInt32 {
                    dst: Register(1),
                    value: 1,
                },
                Instruction::SetGlobal {
                    name: ConstantIndex(0),
                    src: Register(1),
                    cache: CacheSlot(0),
                },
                Instruction::FinallyEnd,
                // 7..=8: unreachable
                Instruction::LoadInt32 {
                    dst: Register(2),
                    value: 2,
                },
                Instruction::Return { src: Register(2) },
            ],
        );
        let mut ctx = VmContext::new();
        assert_eq!(run_with(&module, &mut ctx).unwrap(), Value::int32(1));
        let key = JsString::intern("ranFinally");
        let (slot, _) = ctx.global().find_own_property(&key).unwrap();
        assert_eq!(ctx.global().get_slot(slot).as_data(), Some(&Value::int32(1)));
    }

    #[test]
    fn test_complex_jump_runs_finally_first() {
        let module = module_with(
            &["fin"],
            vec![
                // 0
                Instruction::Try {
                    catch_target: JumpTarget(0),
                    end_target: JumpTarget(3),
                    catch_name: ConstantIndex(0),
                    has_catch: false,
                },
                // 1..=2: body breaks out to 6
                Instruction::JumpComplex {
                    target: JumpTarget(6),
                    depth: 1,
                },
                Instruction::TryBodyEnd,
                // 3..=5: finally records that it ran
                Instruction::LoadInt32 {
                    dst: Register(0),
                    value: 9,
                },
                Instruction::SetGlobal {
                    name: ConstantIndex(0),
                    src: Register(0),
                    cache: CacheSlot(0),
                },
                Instruction::FinallyEnd,
                // 6..=7: the jump target
                Instruction::LoadInt32 {
                    dst: Register(1),
                    value: 42,
                },
                Instruction::Return { src: Register(1) },
            ],
        );
        let mut ctx = VmContext::new();
        assert_eq!(run_with(&module, &mut ctx).unwrap(), Value::int32(42));
        let key = JsString::intern("fin");
        let (slot, _) = ctx.global().find_own_property(&key).unwrap();
        assert_eq!(ctx.global().get_slot(slot).as_data(), Some(&Value::int32(9)));
    }

    #[test]
    fn test_with_scope_resolves_names() {
        let module = module_with(
            &["v"],
            vec![
                // 0..=2: build the scope object
                Instruction::NewObject { dst: Register(0) },
                Instruction::LoadInt32 {
                    dst: Register(1),
                    value: 7,
                },
                Instruction::SetPropNamed {
                    obj: Register(0),
                    name: ConstantIndex(0),
                    src: Register(1),
                    cache: CacheSlot(0),
                },
                // 3
                Instruction::With {
                    obj: Register(0),
                    end_target: JumpTarget(7),
                },
                // 4..=6: body reads v through the scope
                Instruction::LoadByName {
                    dst: Register(2),
                    name: ConstantIndex(0),
                },
                Instruction::StoreStackSlot {
                    slot: StackSlot(0),
                    src: Register(2),
                },
                Instruction::TryBodyEnd,
                // 7..=8
                Instruction::LoadStackSlot {
                    dst: Register(3),
                    slot: StackSlot(0),
                },
                Instruction::Return { src: Register(3) },
            ],
        );
        assert_eq!(run(&module).unwrap(), Value::int32(7));
    }

    #[test]
    fn test_typeof_name_never_throws() {
        let module = module_with(
            &["nope"],
            vec![
                Instruction::TypeOfName {
                    dst: Register(0),
                    name: ConstantIndex(0),
                },
                Instruction::Return { src: Register(0) },
            ],
        );
        let result = run(&module).unwrap();
        assert_eq!(result.as_string().unwrap().as_str(), "undefined");
    }

    #[test]
    fn test_load_by_name_unresolved_is_reference_error() {
        let module = module_with(
            &["nope"],
            vec![
                Instruction::LoadByName {
                    dst: Register(0),
                    name: ConstantIndex(0),
                },
                Instruction::Return { src: Register(0) },
            ],
        );
        assert!(matches!(run(&module), Err(VmError::ReferenceError(_))));
    }

    #[test]
    fn test_strict_store_to_undeclared_is_reference_error() {
        let mut builder = Module::builder("strict.js");
        builder.constants_mut().add_string("ghost");
        let main = Function::builder()
            .name("main")
            .strict(true)
            .instruction(Instruction::LoadInt32 {
                dst: Register(0),
                value: 1,
            })
            .instruction(Instruction::StoreByName {
                name: ConstantIndex(0),
                src: Register(0),
            })
            .instruction(Instruction::ReturnUndefined)
            .build();
        builder.add_function(main);
        let module = Arc::new(builder.build());

        assert!(matches!(run(&module), Err(VmError::ReferenceError(_))));
    }

    #[test]
    fn test_sloppy_store_to_undeclared_creates_global() {
        let module = module_with(
            &["ghost"],
            vec![
                Instruction::LoadInt32 {
                    dst: Register(0),
                    value: 1,
                },
                Instruction::StoreByName {
                    name: ConstantIndex(0),
                    src: Register(0),
                },
                Instruction::ReturnUndefined,
            ],
        );
        let mut ctx = VmContext::new();
        assert!(run_with(&module, &mut ctx).unwrap().is_undefined());
        let key = JsString::intern("ghost");
        let (slot, _) = ctx.global().find_own_property(&key).unwrap();
        assert_eq!(ctx.global().get_slot(slot).as_data(), Some(&Value::int32(1)));
    }

    #[test]
    fn test_exception_carries_stack_trace() {
        let mut builder = Module::builder("trace.js");
        builder.constants_mut().add_string("bang");
        let main = Function::builder()
            .name("main")
            .instruction(Instruction::DeclareFunction {
                dst: Register(0),
                func: FunctionIndex(1),
            })
            .instruction(Instruction::Call {
                dst: Register(1),
                callee: Register(0),
                args_start: Register(1),
                argc: 0,
            })
            .instruction(Instruction::Return { src: Register(1) })
            .build();
        let boomer = Function::builder()
            .name("boomer")
            .instruction(Instruction::LoadConst {
                dst: Register(0),
                idx: ConstantIndex(0),
            })
            .instruction(Instruction::Throw { src: Register(0) })
            .build();
        builder.add_function(main);
        builder.add_function(boomer);
        let module = Arc::new(builder.build());

        let err = run(&module).unwrap_err();
        let VmError::Exception(thrown) = err else {
            panic!("expected an exception, got {err:?}");
        };
        assert_eq!(thrown.value.as_string().unwrap().as_str(), "bang");
        assert_eq!(thrown.stack.len(), 2);
        assert_eq!(thrown.stack[0].function_name, "boomer");
        assert_eq!(thrown.stack[1].function_name, "main");
        assert_eq!(thrown.stack[0].file, "trace.js");
    }

    #[test]
    fn test_read_cache_follows_shape_changes() {
        // o.x where o changes shape between executions: own slot, then a
        // prototype holder, then confirmed absence
        let module = module_with(
            &["o", "x"],
            vec![
                Instruction::GetGlobal {
                    dst: Register(0),
                    name: ConstantIndex(0),
                    cache: CacheSlot(0),
                },
                Instruction::GetPropNamed {
                    dst: Register(1),
                    obj: Register(0),
                    name: ConstantIndex(1),
                    cache: CacheSlot(1),
                },
                Instruction::Return { src: Register(1) },
            ],
        );
        let mut ctx = VmContext::new();

        // Enough executions to pass the generic warmup and fill the cache
        for i in 0..6 {
            let obj = JsObject::ordinary(None);
            data(&obj, "x", Value::int32(i));
            data(&obj, "y", Value::int32(0));
            ctx.define_global("o", Value::object(obj));
            assert_eq!(run_with(&module, &mut ctx).unwrap(), Value::int32(i));
        }

        // The property moves to a prototype
        let proto = JsObject::ordinary(None);
        data(&proto, "x", Value::int32(99));
        let obj = JsObject::ordinary(Some(proto));
        ctx.define_global("o", Value::object(obj));
        assert_eq!(run_with(&module, &mut ctx).unwrap(), Value::int32(99));

        // And disappears entirely
        let obj = JsObject::ordinary(None);
        ctx.define_global("o", Value::object(obj));
        assert!(run_with(&module, &mut ctx).unwrap().is_undefined());
    }

    #[test]
    fn test_write_cache_transition_converges_shapes() {
        // o.w = 5 on a stream of fresh empty objects: every receiver must
        // end up with the same transitioned shape
        let module = module_with(
            &["o", "w"],
            vec![
                Instruction::GetGlobal {
                    dst: Register(0),
                    name: ConstantIndex(0),
                    cache: CacheSlot(0),
                },
                Instruction::LoadInt32 {
                    dst: Register(1),
                    value: 5,
                },
                Instruction::SetPropNamed {
                    obj: Register(0),
                    name: ConstantIndex(1),
                    src: Register(1),
                    cache: CacheSlot(1),
                },
                Instruction::GetPropNamed {
                    dst: Register(2),
                    obj: Register(0),
                    name: ConstantIndex(1),
                    cache: CacheSlot(2),
                },
                Instruction::Return { src: Register(2) },
            ],
        );
        let mut ctx = VmContext::new();
        let mut shape_ids = Vec::new();
        for _ in 0..4 {
            let obj = JsObject::ordinary(None);
            ctx.define_global("o", Value::object(obj.clone()));
            assert_eq!(run_with(&module, &mut ctx).unwrap(), Value::int32(5));
            shape_ids.push(obj.shape().id());
        }
        assert!(shape_ids.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn test_write_cache_transition_checks_extensible() {
        // A receiver sealed after the site warmed still matches the recorded
        // shape chain; the memoized transition must not add the property
        let module = module_with(
            &["o", "w"],
            vec![
                Instruction::GetGlobal {
                    dst: Register(0),
                    name: ConstantIndex(0),
                    cache: CacheSlot(0),
                },
                Instruction::LoadInt32 {
                    dst: Register(1),
                    value: 5,
                },
                Instruction::SetPropNamed {
                    obj: Register(0),
                    name: ConstantIndex(1),
                    src: Register(1),
                    cache: CacheSlot(1),
                },
                Instruction::ReturnUndefined,
            ],
        );
        let mut ctx = VmContext::new();
        for _ in 0..3 {
            let obj = JsObject::ordinary(None);
            ctx.define_global("o", Value::object(obj.clone()));
            run_with(&module, &mut ctx).unwrap();
            assert!(obj.find_own_property(&JsString::intern("w")).is_some());
        }

        let sealed = JsObject::ordinary(None);
        sealed.prevent_extensions();
        ctx.define_global("o", Value::object(sealed.clone()));
        run_with(&module, &mut ctx).unwrap();
        assert!(sealed.find_own_property(&JsString::intern("w")).is_none());
    }

    #[test]
    fn test_write_site_on_rebuilt_shape_goes_generic() {
        let module = module_with(
            &["o", "w"],
            vec![
                Instruction::GetGlobal {
                    dst: Register(0),
                    name: ConstantIndex(0),
                    cache: CacheSlot(0),
                },
                Instruction::LoadInt32 {
                    dst: Register(1),
                    value: 5,
                },
                Instruction::SetPropNamed {
                    obj: Register(0),
                    name: ConstantIndex(1),
                    src: Register(1),
                    cache: CacheSlot(1),
                },
                Instruction::ReturnUndefined,
            ],
        );
        // Deletion rebuilds the shape as fast-access
        let obj = JsObject::ordinary(None);
        data(&obj, "a", Value::int32(1));
        data(&obj, "b", Value::int32(2));
        obj.delete_property(&JsString::intern("a"));
        assert!(!obj.shape().supports_transitions());

        let mut ctx = VmContext::new();
        ctx.define_global("o", Value::object(obj.clone()));
        run_with(&module, &mut ctx).unwrap();
        assert!(obj.find_own_property(&JsString::intern("w")).is_some());

        let feedback = ctx.feedback_for(0, 2);
        assert!(matches!(
            &*feedback.slot(CacheSlot(1)).lock(),
            CacheState::Generic
        ));
    }

    #[test]
    fn test_for_in_collects_keys_in_order() {
        let module = module_with(
            &["o"],
            vec![
                // 0..=3: snapshot and loop setup
                Instruction::GetGlobal {
                    dst: Register(0),
                    name: ConstantIndex(0),
                    cache: CacheSlot(0),
                },
                Instruction::EnumerateObject {
                    dst: Register(1),
                    obj: Register(0),
                },
                Instruction::NewArray {
                    dst: Register(2),
                    len: 0,
                },
                Instruction::LoadInt32 {
                    dst: Register(3),
                    value: 0,
                },
                // 4..=8: loop
                Instruction::CheckIfKeyIsLast {
                    data: Register(1),
                    end_target: JumpTarget(9),
                },
                Instruction::EnumerateObjectKey {
                    dst: Register(4),
                    data: Register(1),
                },
                Instruction::SetProp {
                    obj: Register(2),
                    key: Register(3),
                    src: Register(4),
                },
                Instruction::Inc {
                    dst: Register(3),
                    src: Register(3),
                },
                Instruction::Jump {
                    target: JumpTarget(4),
                },
                // 9
                Instruction::Return { src: Register(2) },
            ],
        );
        let mut ctx = VmContext::new();
        let obj = JsObject::ordinary(None);
        data(&obj, "a", Value::int32(1));
        data(&obj, "b", Value::int32(2));
        ctx.define_global("o", Value::object(obj));

        let result = run_with(&module, &mut ctx).unwrap();
        let array = result.as_object().unwrap();
        assert_eq!(array.element_len(), 2);
        assert_eq!(array.get_element(0).unwrap().as_string().unwrap().as_str(), "a");
        assert_eq!(array.get_element(1).unwrap().as_string().unwrap().as_str(), "b");
    }

    #[test]
    fn test_in_operator_walks_prototypes() {
        let module = module_with(
            &["o", "a"],
            vec![
                Instruction::GetGlobal {
                    dst: Register(0),
                    name: ConstantIndex(0),
                    cache: CacheSlot(0),
                },
                Instruction::LoadConst {
                    dst: Register(1),
                    idx: ConstantIndex(1),
                },
                Instruction::In {
                    dst: Register(2),
                    key: Register(1),
                    obj: Register(0),
                },
                Instruction::Return { src: Register(2) },
            ],
        );
        let mut ctx = VmContext::new();
        let proto = JsObject::ordinary(None);
        data(&proto, "a", Value::int32(1));
        let obj = JsObject::ordinary(Some(proto));
        ctx.define_global("o", Value::object(obj));

        assert_eq!(run_with(&module, &mut ctx).unwrap(), Value::boolean(true));
    }

    #[test]
    fn test_getter_defined_in_bytecode() {
        let mut builder = Module::builder("getter.js");
        builder.constants_mut().add_string("g");
        let main = Function::builder()
            .name("main")
            .instruction(Instruction::NewObject { dst: Register(0) })
            .instruction(Instruction::DeclareFunction {
                dst: Register(1),
                func: FunctionIndex(1),
            })
            .instruction(Instruction::LoadConst {
                dst: Register(2),
                idx: ConstantIndex(0),
            })
            .instruction(Instruction::DefineGetter {
                obj: Register(0),
                key: Register(2),
                getter: Register(1),
            })
            .instruction(Instruction::GetPropNamed {
                dst: Register(3),
                obj: Register(0),
                name: ConstantIndex(0),
                cache: CacheSlot(0),
            })
            .instruction(Instruction::Return { src: Register(3) })
            .build();
        let getter = Function::builder()
            .name("get g")
            .instruction(Instruction::LoadInt32 {
                dst: Register(0),
                value: 42,
            })
            .instruction(Instruction::Return { src: Register(0) })
            .build();
        builder.add_function(main);
        builder.add_function(getter);
        let module = Arc::new(builder.build());

        assert_eq!(run(&module).unwrap(), Value::int32(42));
    }
}
