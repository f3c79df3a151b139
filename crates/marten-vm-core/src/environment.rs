//! Lexical environments
//!
//! Identifier resolution walks a chain of records: declarative records for
//! catch bindings, object records for `with` scopes, and the global record
//! backed by the global object. Records backed by objects can invoke getters,
//! so the interpreter drives the walk; this module only owns the structure
//! and the declarative storage.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::object::JsObject;
use crate::string::JsString;
use crate::value::Value;

/// One record in the environment chain
#[derive(Debug)]
pub enum EnvironmentRecord {
    /// Plain bindings (catch variables, function scopes)
    Declarative(RwLock<FxHashMap<Arc<JsString>, Value>>),
    /// `with (obj)` scope
    Object(Arc<JsObject>),
    /// Global scope, backed by the global object
    Global(Arc<JsObject>),
}

/// A lexical environment: one record plus an outer link
#[derive(Debug)]
pub struct LexicalEnvironment {
    record: EnvironmentRecord,
    outer: Option<Arc<LexicalEnvironment>>,
}

impl LexicalEnvironment {
    /// Create the global environment
    pub fn global(global: Arc<JsObject>) -> Arc<Self> {
        Arc::new(Self {
            record: EnvironmentRecord::Global(global),
            outer: None,
        })
    }

    /// Create a declarative environment
    pub fn declarative(outer: Arc<LexicalEnvironment>) -> Arc<Self> {
        Arc::new(Self {
            record: EnvironmentRecord::Declarative(RwLock::new(FxHashMap::default())),
            outer: Some(outer),
        })
    }

    /// Create an object environment for a `with` scope
    pub fn object(object: Arc<JsObject>, outer: Arc<LexicalEnvironment>) -> Arc<Self> {
        Arc::new(Self {
            record: EnvironmentRecord::Object(object),
            outer: Some(outer),
        })
    }

    /// The record of this environment
    #[inline]
    pub fn record(&self) -> &EnvironmentRecord {
        &self.record
    }

    /// The enclosing environment
    #[inline]
    pub fn outer(&self) -> Option<&Arc<LexicalEnvironment>> {
        self.outer.as_ref()
    }

    /// Create or overwrite a declarative binding
    ///
    /// No-op on object-backed records; those go through property writes.
    pub fn define(&self, name: Arc<JsString>, value: Value) {
        if let EnvironmentRecord::Declarative(bindings) = &self.record {
            bindings.write().insert(name, value);
        }
    }

    /// Read a declarative binding
    pub fn get_local(&self, name: &Arc<JsString>) -> Option<Value> {
        match &self.record {
            EnvironmentRecord::Declarative(bindings) => bindings.read().get(name).cloned(),
            _ => None,
        }
    }

    /// Overwrite an existing declarative binding, returns false when absent
    pub fn set_local(&self, name: &Arc<JsString>, value: Value) -> bool {
        match &self.record {
            EnvironmentRecord::Declarative(bindings) => {
                let mut bindings = bindings.write();
                match bindings.get_mut(name) {
                    Some(slot) => {
                        *slot = value;
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// Whether a declarative binding exists here
    pub fn has_local(&self, name: &Arc<JsString>) -> bool {
        match &self.record {
            EnvironmentRecord::Declarative(bindings) => bindings.read().contains_key(name),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarative_bindings() {
        let global = LexicalEnvironment::global(JsObject::ordinary(None));
        let env = LexicalEnvironment::declarative(global);

        let name = JsString::intern("e");
        env.define(name.clone(), Value::int32(1));
        assert_eq!(env.get_local(&name), Some(Value::int32(1)));
        assert!(env.set_local(&name, Value::int32(2)));
        assert_eq!(env.get_local(&name), Some(Value::int32(2)));

        let missing = JsString::intern("missing");
        assert!(!env.set_local(&missing, Value::int32(3)));
        assert_eq!(env.get_local(&missing), None);
    }

    #[test]
    fn test_chain_structure() {
        let global = LexicalEnvironment::global(JsObject::ordinary(None));
        let with_obj = JsObject::ordinary(None);
        let inner = LexicalEnvironment::object(with_obj, global.clone());

        assert!(matches!(inner.record(), EnvironmentRecord::Object(_)));
        assert!(matches!(
            inner.outer().unwrap().record(),
            EnvironmentRecord::Global(_)
        ));
    }
}
