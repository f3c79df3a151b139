//! for-in enumeration snapshots
//!
//! EnumerateObject snapshots the enumerable keys of an object and its
//! prototype chain, together with the shape ids seen along the chain. Each
//! loop iteration revalidates the chain; when any shape changed, the snapshot
//! is recomputed keeping only keys that were still pending. Keys deleted
//! mid-loop are skipped, keys added mid-loop are not visited.

use rustc_hash::FxHashSet;
use std::sync::Arc;

use crate::object::JsObject;
use crate::string::JsString;

/// Live state of one for-in loop
#[derive(Debug)]
pub struct EnumerateState {
    object: Arc<JsObject>,
    shape_chain: Vec<u64>,
    keys: Vec<Arc<JsString>>,
    index: usize,
}

impl EnumerateState {
    /// Snapshot the enumerable keys of `object`
    pub fn new(object: Arc<JsObject>) -> Self {
        let (shape_chain, keys) = snapshot(&object);
        Self {
            object,
            shape_chain,
            keys,
            index: 0,
        }
    }

    /// Revalidate the snapshot and report whether all keys were visited
    pub fn check_exhausted(&mut self) -> bool {
        if self.shape_chain != chain_of(&self.object) {
            self.recompute();
        }
        self.index >= self.keys.len()
    }

    /// The next pending key, advancing the cursor
    pub fn next_key(&mut self) -> Option<Arc<JsString>> {
        let key = self.keys.get(self.index).cloned();
        self.index += 1;
        key
    }

    /// Number of keys remaining (after the cursor)
    pub fn remaining(&self) -> usize {
        self.keys.len().saturating_sub(self.index)
    }

    fn recompute(&mut self) {
        let pending: FxHashSet<Arc<JsString>> =
            self.keys[self.index.min(self.keys.len())..].iter().cloned().collect();
        let (shape_chain, fresh) = snapshot(&self.object);
        self.shape_chain = shape_chain;
        self.keys = fresh.into_iter().filter(|k| pending.contains(k)).collect();
        self.index = 0;
    }
}

fn chain_of(object: &Arc<JsObject>) -> Vec<u64> {
    let mut chain = vec![object.shape().id()];
    let mut cursor = object.prototype();
    while let Some(proto) = cursor {
        chain.push(proto.shape().id());
        cursor = proto.prototype();
    }
    chain
}

fn snapshot(object: &Arc<JsObject>) -> (Vec<u64>, Vec<Arc<JsString>>) {
    let mut chain = vec![object.shape().id()];
    let mut keys = Vec::new();

    // Every own key shadows the prototype chain, enumerable or not.
    let mut seen: FxHashSet<Arc<JsString>> = FxHashSet::default();

    // Integer indices come first, as strings.
    for index in object.element_indices() {
        let key = JsString::intern(itoa::Buffer::new().format(index));
        seen.insert(key.clone());
        keys.push(key);
    }
    for key in object.shape().own_keys() {
        seen.insert(key.clone());
    }
    keys.extend(object.enumerable_own_keys());

    let mut cursor = object.prototype();
    while let Some(proto) = cursor {
        chain.push(proto.shape().id());
        for index in proto.element_indices() {
            let key = JsString::intern(itoa::Buffer::new().format(index));
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
        let shape = proto.shape();
        for key in shape.own_keys() {
            if !seen.contains(key) {
                let enumerable = shape.get(key).is_some_and(|(_, meta)| meta.enumerable);
                if enumerable {
                    keys.push(key.clone());
                }
            }
            seen.insert(key.clone());
        }
        cursor = proto.prototype();
    }

    (chain, keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Property;
    use crate::shape::PropertyMeta;
    use crate::value::Value;

    fn key(s: &str) -> Arc<JsString> {
        JsString::intern(s)
    }

    fn with_data(obj: &Arc<JsObject>, name: &str, v: i32) {
        obj.add_property(key(name), Property::Data(Value::int32(v)), PropertyMeta::data());
    }

    fn drain(state: &mut EnumerateState) -> Vec<String> {
        let mut out = Vec::new();
        while !state.check_exhausted() {
            out.push(state.next_key().unwrap().as_str().to_string());
        }
        out
    }

    #[test]
    fn test_snapshot_order() {
        let proto = JsObject::ordinary(None);
        with_data(&proto, "inherited", 0);

        let obj = JsObject::ordinary(Some(proto));
        with_data(&obj, "a", 1);
        with_data(&obj, "b", 2);

        let mut state = EnumerateState::new(obj);
        assert_eq!(drain(&mut state), vec!["a", "b", "inherited"]);
    }

    #[test]
    fn test_own_key_shadows_prototype() {
        let proto = JsObject::ordinary(None);
        with_data(&proto, "p", 0);

        let obj = JsObject::ordinary(Some(proto));
        let hidden = PropertyMeta {
            enumerable: false,
            ..PropertyMeta::data()
        };
        obj.add_property(key("p"), Property::Data(Value::int32(1)), hidden);

        // Own non-enumerable "p" shadows the enumerable prototype "p"
        let mut state = EnumerateState::new(obj);
        assert_eq!(drain(&mut state), Vec::<String>::new());
    }

    #[test]
    fn test_deleted_pending_key_is_skipped() {
        let obj = JsObject::ordinary(None);
        with_data(&obj, "a", 1);
        with_data(&obj, "b", 2);
        with_data(&obj, "c", 3);

        let mut state = EnumerateState::new(obj.clone());
        assert!(!state.check_exhausted());
        assert_eq!(state.next_key().unwrap().as_str(), "a");

        obj.delete_property(&key("b"));

        let mut rest = Vec::new();
        while !state.check_exhausted() {
            rest.push(state.next_key().unwrap().as_str().to_string());
        }
        assert_eq!(rest, vec!["c"]);
    }

    #[test]
    fn test_added_key_not_visited() {
        let obj = JsObject::ordinary(None);
        with_data(&obj, "a", 1);
        with_data(&obj, "b", 2);

        let mut state = EnumerateState::new(obj.clone());
        assert!(!state.check_exhausted());
        assert_eq!(state.next_key().unwrap().as_str(), "a");

        with_data(&obj, "z", 9);

        let mut rest = Vec::new();
        while !state.check_exhausted() {
            rest.push(state.next_key().unwrap().as_str().to_string());
        }
        assert_eq!(rest, vec!["b"]);
    }

    #[test]
    fn test_elements_enumerate_first() {
        let arr = JsObject::array(0, None);
        assert!(arr.set_element(0, Value::int32(10)));
        assert!(arr.set_element(1, Value::int32(20)));
        with_data(&arr, "named", 1);

        let mut state = EnumerateState::new(arr);
        assert_eq!(drain(&mut state), vec!["0", "1", "named"]);
    }
}
