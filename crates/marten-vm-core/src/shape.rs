//! Hidden classes (shapes) for fast property access
//!
//! Objects with the same property layout share a Shape. Adding a property
//! transitions to a child shape through a memoized transition edge, so objects
//! built the same way end up with pointer-identical shapes. Every shape also
//! carries a process-unique id; inline caches compare ids, never walk maps.
//!
//! Deleting a property (or redefining attributes) abandons the transition
//! tree: the object gets a rebuilt "fast access" shape that no longer
//! participates in transitions and must never be memoized as a write-cache
//! target.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use crate::string::JsString;

static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);

fn next_shape_id() -> u64 {
    NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed)
}

static ROOT: LazyLock<Arc<Shape>> = LazyLock::new(|| {
    Arc::new(Shape {
        id: next_shape_id(),
        parent: None,
        key: None,
        meta: PropertyMeta::data(),
        offset: 0,
        transitions_allowed: true,
        transitions: RwLock::new(FxHashMap::default()),
        property_map: FxHashMap::default(),
        keys_ordered: Vec::new(),
    })
});

/// Property attributes stored in the shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyMeta {
    /// Value may be replaced through ordinary writes
    pub writable: bool,
    /// Visible to for-in enumeration
    pub enumerable: bool,
    /// May be deleted or have its attributes changed
    pub configurable: bool,
    /// The slot holds a getter/setter pair instead of a value
    pub accessor: bool,
}

impl PropertyMeta {
    /// Default attributes of a plain data property
    pub const fn data() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
            accessor: false,
        }
    }

    /// Attributes of an accessor property
    pub const fn accessor() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
            accessor: true,
        }
    }

    /// Writable, non-accessor data slot (the only kind inline caches memoize
    /// for writes)
    #[inline]
    pub fn is_plain_data(&self) -> bool {
        !self.accessor && self.writable
    }
}

impl Default for PropertyMeta {
    fn default() -> Self {
        Self::data()
    }
}

/// A shape (hidden class) describing an object's property layout
pub struct Shape {
    id: u64,
    parent: Option<Arc<Shape>>,
    key: Option<Arc<JsString>>,
    meta: PropertyMeta,
    offset: usize,
    transitions_allowed: bool,
    transitions: RwLock<FxHashMap<(Arc<JsString>, PropertyMeta), Weak<Shape>>>,
    // Flattened view for O(1) lookup
    property_map: FxHashMap<Arc<JsString>, (usize, PropertyMeta)>,
    keys_ordered: Vec<Arc<JsString>>,
}

impl Shape {
    /// The shared root shape (no properties)
    pub fn root() -> Arc<Shape> {
        ROOT.clone()
    }

    /// Process-unique identity token
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this shape participates in the transition tree
    #[inline]
    pub fn supports_transitions(&self) -> bool {
        self.transitions_allowed
    }

    /// Number of properties (slot vector length)
    #[inline]
    pub fn property_count(&self) -> usize {
        self.keys_ordered.len()
    }

    /// Parent shape in the transition chain
    pub fn parent(&self) -> Option<&Arc<Shape>> {
        self.parent.as_ref()
    }

    /// The property this shape appended over its parent, with slot and
    /// attributes
    pub fn appended(&self) -> Option<(&Arc<JsString>, usize, PropertyMeta)> {
        self.key.as_ref().map(|k| (k, self.offset, self.meta))
    }

    /// Slot index and attributes for a property, if present
    pub fn get(&self, key: &Arc<JsString>) -> Option<(usize, PropertyMeta)> {
        self.property_map.get(key).copied()
    }

    /// Whether a property exists in this shape
    pub fn contains(&self, key: &Arc<JsString>) -> bool {
        self.property_map.contains_key(key)
    }

    /// All property keys in insertion order
    pub fn own_keys(&self) -> &[Arc<JsString>] {
        &self.keys_ordered
    }

    /// Enumerable property keys in insertion order
    pub fn enumerable_keys(&self) -> Vec<Arc<JsString>> {
        self.keys_ordered
            .iter()
            .filter(|k| {
                self.property_map
                    .get(*k)
                    .is_some_and(|(_, meta)| meta.enumerable)
            })
            .cloned()
            .collect()
    }

    /// All entries as (key, slot, meta) in insertion order
    pub fn entries(&self) -> Vec<(Arc<JsString>, usize, PropertyMeta)> {
        self.keys_ordered
            .iter()
            .map(|k| {
                let (offset, meta) = self.property_map[k];
                (k.clone(), offset, meta)
            })
            .collect()
    }

    /// Transition to a child shape with one more property
    ///
    /// Memoized through weak edges when this shape allows transitions;
    /// fast-access shapes always get a fresh non-memoized child.
    pub fn transition(self: &Arc<Self>, key: Arc<JsString>, meta: PropertyMeta) -> Arc<Shape> {
        debug_assert!(!self.contains(&key));

        if self.transitions_allowed {
            let edge = (key.clone(), meta);
            if let Some(existing) = self.transitions.read().get(&edge)
                && let Some(shape) = existing.upgrade()
            {
                return shape;
            }

            let child = self.make_child(key, meta, true);

            let mut transitions = self.transitions.write();
            // Double-check under the write lock
            if let Some(existing) = transitions.get(&edge)
                && let Some(shape) = existing.upgrade()
            {
                return shape;
            }
            transitions.insert(edge, Arc::downgrade(&child));
            child
        } else {
            self.make_child(key, meta, false)
        }
    }

    fn make_child(
        self: &Arc<Self>,
        key: Arc<JsString>,
        meta: PropertyMeta,
        transitions_allowed: bool,
    ) -> Arc<Shape> {
        let offset = self.keys_ordered.len();
        let mut property_map = self.property_map.clone();
        property_map.insert(key.clone(), (offset, meta));
        let mut keys_ordered = self.keys_ordered.clone();
        keys_ordered.push(key.clone());

        Arc::new(Shape {
            id: next_shape_id(),
            parent: Some(self.clone()),
            key: Some(key),
            meta,
            offset,
            transitions_allowed,
            transitions: RwLock::new(FxHashMap::default()),
            property_map,
            keys_ordered,
        })
    }

    /// Build a standalone fast-access shape from explicit entries
    ///
    /// Used after deletion or attribute redefinition. The result never
    /// memoizes transitions and is never a valid write-cache target.
    pub fn rebuild(entries: &[(Arc<JsString>, PropertyMeta)]) -> Arc<Shape> {
        let mut property_map = FxHashMap::default();
        let mut keys_ordered = Vec::with_capacity(entries.len());
        for (idx, (key, meta)) in entries.iter().enumerate() {
            property_map.insert(key.clone(), (idx, *meta));
            keys_ordered.push(key.clone());
        }
        Arc::new(Shape {
            id: next_shape_id(),
            parent: None,
            key: None,
            meta: PropertyMeta::data(),
            offset: 0,
            transitions_allowed: false,
            transitions: RwLock::new(FxHashMap::default()),
            property_map,
            keys_ordered,
        })
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id)
            .field("keys", &self.keys_ordered)
            .field("transitions_allowed", &self.transitions_allowed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_sharing() {
        let root = Shape::root();
        let a1 = root.transition(JsString::intern("x"), PropertyMeta::data());
        let a2 = root.transition(JsString::intern("x"), PropertyMeta::data());

        // Same edge, same shape, same id
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(a1.id(), a2.id());
    }

    #[test]
    fn test_transition_order_matters() {
        let root = Shape::root();
        let xy = root
            .transition(JsString::intern("x"), PropertyMeta::data())
            .transition(JsString::intern("y"), PropertyMeta::data());
        let yx = root
            .transition(JsString::intern("y"), PropertyMeta::data())
            .transition(JsString::intern("x"), PropertyMeta::data());

        assert_ne!(xy.id(), yx.id());
        assert_eq!(xy.get(&JsString::intern("x")), Some((0, PropertyMeta::data())));
        assert_eq!(xy.get(&JsString::intern("y")), Some((1, PropertyMeta::data())));
        assert_eq!(yx.get(&JsString::intern("x")), Some((1, PropertyMeta::data())));
    }

    #[test]
    fn test_meta_distinguishes_edges() {
        let root = Shape::root();
        let data = root.transition(JsString::intern("p"), PropertyMeta::data());
        let accessor = root.transition(JsString::intern("p"), PropertyMeta::accessor());

        assert!(!Arc::ptr_eq(&data, &accessor));
    }

    #[test]
    fn test_rebuild_is_fast_access() {
        let entries = vec![
            (JsString::intern("a"), PropertyMeta::data()),
            (JsString::intern("b"), PropertyMeta::data()),
        ];
        let shape = Shape::rebuild(&entries);

        assert!(!shape.supports_transitions());
        assert_eq!(shape.property_count(), 2);
        assert_eq!(shape.get(&JsString::intern("b")).map(|(i, _)| i), Some(1));

        // Children of fast-access shapes stay fast-access
        let child = shape.transition(JsString::intern("c"), PropertyMeta::data());
        assert!(!child.supports_transitions());
        let again = shape.transition(JsString::intern("c"), PropertyMeta::data());
        assert!(!Arc::ptr_eq(&child, &again));
    }

    #[test]
    fn test_enumerable_keys_filter() {
        let root = Shape::root();
        let hidden = PropertyMeta {
            enumerable: false,
            ..PropertyMeta::data()
        };
        let shape = root
            .transition(JsString::intern("a"), PropertyMeta::data())
            .transition(JsString::intern("b"), hidden)
            .transition(JsString::intern("c"), PropertyMeta::data());

        let keys: Vec<_> = shape
            .enumerable_keys()
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "c"]);
    }
}
