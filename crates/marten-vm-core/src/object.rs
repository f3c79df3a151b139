//! Runtime objects
//!
//! An object is a shape plus a parallel slot vector. Arrays additionally keep
//! a dense element vector with hole sentinels; indexed writes that fall out of
//! the dense preconditions degrade to named properties.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::shape::{PropertyMeta, Shape};
use crate::string::JsString;
use crate::value::Value;

/// Maximum gap a dense array write may create before falling back to a named
/// property.
const MAX_DENSE_GAP: usize = 1024;

/// Contents of one property slot
#[derive(Debug, Clone)]
pub enum Property {
    /// Plain data value
    Data(Value),
    /// Accessor pair; either side may be absent
    Accessor {
        /// Getter function
        get: Option<Value>,
        /// Setter function
        set: Option<Value>,
    },
}

impl Property {
    /// Get the data value, if this is a data slot
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Property::Data(v) => Some(v),
            Property::Accessor { .. } => None,
        }
    }
}

/// Object classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Plain object
    Ordinary,
    /// Array with dense element storage
    Array,
    /// Property bag of a function value
    Function,
    /// Date; only affects the toPrimitive hint
    Date,
}

/// A runtime object
pub struct JsObject {
    kind: ObjectKind,
    shape: RwLock<Arc<Shape>>,
    slots: RwLock<Vec<Property>>,
    elements: RwLock<Vec<Value>>,
    prototype: RwLock<Option<Arc<JsObject>>>,
    extensible: AtomicBool,
}

impl JsObject {
    /// Create an object of the given kind
    pub fn new(kind: ObjectKind, prototype: Option<Arc<JsObject>>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            shape: RwLock::new(Shape::root()),
            slots: RwLock::new(Vec::new()),
            elements: RwLock::new(Vec::new()),
            prototype: RwLock::new(prototype),
            extensible: AtomicBool::new(true),
        })
    }

    /// Create a plain object
    pub fn ordinary(prototype: Option<Arc<JsObject>>) -> Arc<Self> {
        Self::new(ObjectKind::Ordinary, prototype)
    }

    /// Create an array with `len` holes preallocated
    pub fn array(len: usize, prototype: Option<Arc<JsObject>>) -> Arc<Self> {
        let obj = Self::new(ObjectKind::Array, prototype);
        obj.elements.write().resize(len, Value::empty());
        obj
    }

    /// Object classification
    #[inline]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Whether this object is an array
    #[inline]
    pub fn is_array(&self) -> bool {
        self.kind == ObjectKind::Array
    }

    /// Current shape
    #[inline]
    pub fn shape(&self) -> Arc<Shape> {
        self.shape.read().clone()
    }

    /// Prototype link
    #[inline]
    pub fn prototype(&self) -> Option<Arc<JsObject>> {
        self.prototype.read().clone()
    }

    /// Replace the prototype link
    pub fn set_prototype(&self, prototype: Option<Arc<JsObject>>) {
        *self.prototype.write() = prototype;
    }

    /// Whether new properties may be added
    #[inline]
    pub fn is_extensible(&self) -> bool {
        self.extensible.load(Ordering::Relaxed)
    }

    /// Forbid adding new properties
    pub fn prevent_extensions(&self) {
        self.extensible.store(false, Ordering::Relaxed);
    }

    /// Slot index and attributes of an own named property
    pub fn find_own_property(&self, key: &Arc<JsString>) -> Option<(usize, PropertyMeta)> {
        self.shape.read().get(key)
    }

    /// Read a slot by index
    pub fn get_slot(&self, index: usize) -> Property {
        self.slots.read()[index].clone()
    }

    /// Overwrite a data slot by index
    pub fn set_slot_value(&self, index: usize, value: Value) {
        self.slots.write()[index] = Property::Data(value);
    }

    /// Read an own named property
    pub fn get_own(&self, key: &Arc<JsString>) -> Option<Property> {
        let (index, _) = self.find_own_property(key)?;
        Some(self.get_slot(index))
    }

    /// Append a new property, transitioning the shape
    ///
    /// The caller must have checked that the property does not exist and the
    /// object is extensible.
    pub fn add_property(&self, key: Arc<JsString>, property: Property, meta: PropertyMeta) {
        let mut shape = self.shape.write();
        let mut slots = self.slots.write();
        let next = shape.transition(key, meta);
        debug_assert_eq!(next.property_count(), slots.len() + 1);
        slots.push(property);
        *shape = next;
    }

    /// Apply a memoized write-cache transition: push the value and adopt the
    /// target shape in one step
    pub fn apply_transition(&self, target: Arc<Shape>, value: Value) {
        let mut shape = self.shape.write();
        let mut slots = self.slots.write();
        debug_assert_eq!(target.property_count(), slots.len() + 1);
        slots.push(Property::Data(value));
        *shape = target;
    }

    /// Define or redefine an own property, returns false when rejected
    pub fn define_own_property(
        &self,
        key: Arc<JsString>,
        property: Property,
        meta: PropertyMeta,
    ) -> bool {
        if let Some((index, old_meta)) = self.find_own_property(&key) {
            if old_meta == meta {
                self.slots.write()[index] = property;
                return true;
            }
            if !old_meta.configurable {
                return false;
            }
            // Attribute change: rebuild the lineage as a fast-access shape
            let mut shape = self.shape.write();
            let mut entries = shape.entries();
            entries[index].2 = meta;
            let rebuilt: Vec<_> = entries.iter().map(|(k, _, m)| (k.clone(), *m)).collect();
            *shape = Shape::rebuild(&rebuilt);
            self.slots.write()[index] = property;
            true
        } else {
            if !self.is_extensible() {
                return false;
            }
            self.add_property(key, property, meta);
            true
        }
    }

    /// Delete an own property, returns false when non-configurable
    ///
    /// Deletion rebuilds the shape lineage as fast-access; subsequent writes
    /// to this object are never memoized as cache transitions.
    pub fn delete_property(&self, key: &Arc<JsString>) -> bool {
        let Some((index, meta)) = self.find_own_property(key) else {
            return true;
        };
        if !meta.configurable {
            return false;
        }
        let mut shape = self.shape.write();
        let mut slots = self.slots.write();
        let mut entries = shape.entries();
        entries.remove(index);
        let rebuilt: Vec<_> = entries.iter().map(|(k, _, m)| (k.clone(), *m)).collect();
        *shape = Shape::rebuild(&rebuilt);
        slots.remove(index);
        true
    }

    /// Enumerable own named keys in insertion order
    pub fn enumerable_own_keys(&self) -> Vec<Arc<JsString>> {
        self.shape.read().enumerable_keys()
    }

    /// Dense element count (array length)
    pub fn element_len(&self) -> usize {
        self.elements.read().len()
    }

    /// Read a dense element; None for out-of-range or hole
    pub fn get_element(&self, index: usize) -> Option<Value> {
        let elements = self.elements.read();
        let v = elements.get(index)?;
        if v.is_empty() { None } else { Some(v.clone()) }
    }

    /// Write a dense element, growing modestly through holes
    ///
    /// Returns false when the write does not meet the dense preconditions
    /// (far out of range, or the object is not extensible past its length).
    pub fn set_element(&self, index: usize, value: Value) -> bool {
        let mut elements = self.elements.write();
        let len = elements.len();
        if index < len {
            elements[index] = value;
            return true;
        }
        if !self.is_extensible() {
            return false;
        }
        if index - len > MAX_DENSE_GAP {
            return false;
        }
        elements.resize(index, Value::empty());
        elements.push(value);
        true
    }

    /// Resize the dense storage (array `length` writes)
    pub fn set_element_len(&self, len: usize) {
        self.elements.write().resize(len, Value::empty());
    }

    /// Indices of present (non-hole) dense elements
    pub fn element_indices(&self) -> Vec<u32> {
        self.elements
            .read()
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_empty())
            .map(|(i, _)| i as u32)
            .collect()
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsObject")
            .field("kind", &self.kind)
            .field("shape", &self.shape.read().id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Arc<JsString> {
        JsString::intern(s)
    }

    #[test]
    fn test_add_and_get() {
        let obj = JsObject::ordinary(None);
        obj.add_property(key("x"), Property::Data(Value::int32(1)), PropertyMeta::data());
        obj.add_property(key("y"), Property::Data(Value::int32(2)), PropertyMeta::data());

        let (idx, meta) = obj.find_own_property(&key("y")).unwrap();
        assert_eq!(idx, 1);
        assert!(meta.is_plain_data());
        assert_eq!(obj.get_slot(idx).as_data(), Some(&Value::int32(2)));
    }

    #[test]
    fn test_same_insertion_order_shares_shape() {
        let a = JsObject::ordinary(None);
        let b = JsObject::ordinary(None);
        for obj in [&a, &b] {
            obj.add_property(key("p"), Property::Data(Value::int32(0)), PropertyMeta::data());
            obj.add_property(key("q"), Property::Data(Value::int32(0)), PropertyMeta::data());
        }
        assert_eq!(a.shape().id(), b.shape().id());
    }

    #[test]
    fn test_delete_changes_shape_mode() {
        let obj = JsObject::ordinary(None);
        obj.add_property(key("a"), Property::Data(Value::int32(1)), PropertyMeta::data());
        obj.add_property(key("b"), Property::Data(Value::int32(2)), PropertyMeta::data());

        assert!(obj.shape().supports_transitions());
        assert!(obj.delete_property(&key("a")));
        assert!(!obj.shape().supports_transitions());

        // Remaining property compacted to slot 0
        let (idx, _) = obj.find_own_property(&key("b")).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(obj.get_slot(idx).as_data(), Some(&Value::int32(2)));
        assert!(obj.find_own_property(&key("a")).is_none());
    }

    #[test]
    fn test_delete_non_configurable_fails() {
        let obj = JsObject::ordinary(None);
        let frozen = PropertyMeta {
            configurable: false,
            ..PropertyMeta::data()
        };
        obj.add_property(key("k"), Property::Data(Value::int32(9)), frozen);

        assert!(!obj.delete_property(&key("k")));
        assert!(obj.find_own_property(&key("k")).is_some());
    }

    #[test]
    fn test_define_rejected_when_sealed() {
        let obj = JsObject::ordinary(None);
        obj.prevent_extensions();
        assert!(!obj.define_own_property(
            key("n"),
            Property::Data(Value::int32(1)),
            PropertyMeta::data()
        ));
    }

    #[test]
    fn test_dense_elements() {
        let arr = JsObject::array(2, None);
        assert_eq!(arr.element_len(), 2);
        assert_eq!(arr.get_element(0), None); // hole

        assert!(arr.set_element(0, Value::int32(10)));
        assert!(arr.set_element(2, Value::int32(30))); // append
        assert_eq!(arr.element_len(), 3);
        assert_eq!(arr.get_element(2), Some(Value::int32(30)));

        // Way out of range falls back
        assert!(!arr.set_element(1_000_000, Value::int32(1)));
    }

    #[test]
    fn test_apply_transition() {
        let a = JsObject::ordinary(None);
        a.add_property(key("v"), Property::Data(Value::int32(1)), PropertyMeta::data());
        let target = a.shape();

        let b = JsObject::ordinary(None);
        b.apply_transition(target.clone(), Value::int32(7));
        assert_eq!(b.shape().id(), target.id());
        assert_eq!(b.get_slot(0).as_data(), Some(&Value::int32(7)));
    }
}
