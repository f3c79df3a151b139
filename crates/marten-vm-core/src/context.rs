//! Execution context
//!
//! A `VmContext` is the sandbox boundary: it owns the global object, the
//! current environment chain, the control-flow record stack, feedback vectors
//! for inline caches, and the call-depth guard. Execution inside one context
//! is single-threaded; the context itself can be moved between threads.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::control_flow::ControlFlowRecord;
use crate::environment::LexicalEnvironment;
use crate::error::{VmError, VmResult};
use crate::inline_cache::FeedbackVector;
use crate::object::{JsObject, Property};
use crate::shape::PropertyMeta;
use crate::string::JsString;
use crate::value::Value;

/// Maximum interpreter call depth
pub const MAX_STACK_DEPTH: usize = 1000;

/// Per-execution state shared by every frame of a run
pub struct VmContext {
    global: Arc<JsObject>,
    global_env: Arc<LexicalEnvironment>,
    env: Arc<LexicalEnvironment>,
    /// One slot per active try/with region, innermost last
    pub(crate) control_flow: Vec<Option<ControlFlowRecord>>,
    /// Feedback vectors keyed by function index
    feedback: FxHashMap<u32, Arc<FeedbackVector>>,
    call_depth: usize,
}

impl VmContext {
    /// Create a context with a fresh global object
    pub fn new() -> Self {
        Self::with_global(JsObject::ordinary(None))
    }

    /// Create a context around an existing global object
    pub fn with_global(global: Arc<JsObject>) -> Self {
        let global_env = LexicalEnvironment::global(global.clone());
        Self {
            global,
            global_env: global_env.clone(),
            env: global_env,
            control_flow: Vec::new(),
            feedback: FxHashMap::default(),
            call_depth: 0,
        }
    }

    /// The global object
    #[inline]
    pub fn global(&self) -> &Arc<JsObject> {
        &self.global
    }

    /// The global environment (bottom of every chain)
    #[inline]
    pub fn global_env(&self) -> &Arc<LexicalEnvironment> {
        &self.global_env
    }

    /// The current environment
    #[inline]
    pub fn env(&self) -> &Arc<LexicalEnvironment> {
        &self.env
    }

    /// Replace the current environment, returning the previous one
    pub fn swap_env(&mut self, env: Arc<LexicalEnvironment>) -> Arc<LexicalEnvironment> {
        std::mem::replace(&mut self.env, env)
    }

    /// Define (or overwrite) a plain data property on the global object
    ///
    /// Host convenience for installing globals before execution.
    pub fn define_global(&self, name: &str, value: Value) {
        let key = JsString::intern(name);
        self.global
            .define_own_property(key, Property::Data(value), PropertyMeta::data());
    }

    /// Feedback vector for a function, created on first use
    pub fn feedback_for(&mut self, function_index: u32, slot_count: u32) -> Arc<FeedbackVector> {
        self.feedback
            .entry(function_index)
            .or_insert_with(|| FeedbackVector::new(slot_count))
            .clone()
    }

    /// Guard one more interpreter frame
    pub(crate) fn push_frame(&mut self) -> VmResult<()> {
        if self.call_depth >= MAX_STACK_DEPTH {
            return Err(VmError::StackOverflow);
        }
        self.call_depth += 1;
        Ok(())
    }

    /// Release one interpreter frame
    pub(crate) fn pop_frame(&mut self) {
        debug_assert!(self.call_depth > 0);
        self.call_depth -= 1;
    }

    /// Current call depth
    #[inline]
    pub fn call_depth(&self) -> usize {
        self.call_depth
    }
}

impl Default for VmContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_global() {
        let ctx = VmContext::new();
        ctx.define_global("answer", Value::int32(42));

        let key = JsString::intern("answer");
        let (idx, _) = ctx.global().find_own_property(&key).unwrap();
        assert_eq!(ctx.global().get_slot(idx).as_data(), Some(&Value::int32(42)));
    }

    #[test]
    fn test_feedback_vector_is_shared_per_function() {
        let mut ctx = VmContext::new();
        let a = ctx.feedback_for(0, 4);
        let b = ctx.feedback_for(0, 4);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_frame_guard() {
        let mut ctx = VmContext::new();
        for _ in 0..MAX_STACK_DEPTH {
            ctx.push_frame().unwrap();
        }
        assert!(matches!(ctx.push_frame(), Err(VmError::StackOverflow)));
    }
}
