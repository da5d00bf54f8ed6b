//! The Main database.
//!
//! Owns every original data-block. Originals are stored behind an `Arc` and
//! edited through [`Arc::make_mut`], so a copy-on-write shadow holding the
//! same `Arc` keeps seeing the value it was taken from while the user edits
//! the original.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use super::data::{CollectionData, IdData, NodeTreeData, SceneData};
use super::id::{IdKey, IdType};
use super::object::ObjectData;
use crate::graph::RecalcFlags;

/// Database of original data-blocks.
///
/// Cloning shares every data-block with the clone until either side edits
/// it.
#[derive(Debug, Clone, Default)]
pub struct Main {
    ids: IndexMap<IdKey, Arc<IdData>>,
    /// Recalc flags recorded by user edits, consumed on graph rebuild.
    recalc: HashMap<IdKey, RecalcFlags>,
    next_key: u32,
}

impl Main {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a data-block, returning its key.
    pub fn add(&mut self, data: IdData) -> IdKey {
        let key = IdKey(self.next_key);
        self.next_key += 1;
        self.ids.insert(key, Arc::new(data));
        key
    }

    pub fn get(&self, key: IdKey) -> Option<&IdData> {
        self.ids.get(&key).map(Arc::as_ref)
    }

    /// Shared handle to the current version of a data-block.
    pub fn get_arc(&self, key: IdKey) -> Option<Arc<IdData>> {
        self.ids.get(&key).cloned()
    }

    /// Mutable access to a data-block.
    ///
    /// Clones the data first when an evaluated snapshot still shares it.
    pub fn edit(&mut self, key: IdKey) -> Option<&mut IdData> {
        self.ids.get_mut(&key).map(Arc::make_mut)
    }

    pub fn remove(&mut self, key: IdKey) -> Option<Arc<IdData>> {
        self.recalc.remove(&key);
        self.ids.shift_remove(&key)
    }

    pub fn contains(&self, key: IdKey) -> bool {
        self.ids.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (IdKey, &IdData)> {
        self.ids.iter().map(|(key, data)| (*key, data.as_ref()))
    }

    pub fn id_type(&self, key: IdKey) -> Option<IdType> {
        self.get(key).map(IdData::id_type)
    }

    pub fn name(&self, key: IdKey) -> Option<&str> {
        self.get(key).map(|data| data.name.as_str())
    }

    pub fn object(&self, key: IdKey) -> Option<&ObjectData> {
        self.get(key).and_then(IdData::as_object)
    }

    pub fn scene(&self, key: IdKey) -> Option<&SceneData> {
        self.get(key).and_then(IdData::as_scene)
    }

    pub fn collection(&self, key: IdKey) -> Option<&CollectionData> {
        self.get(key).and_then(IdData::as_collection)
    }

    pub fn node_tree(&self, key: IdKey) -> Option<&NodeTreeData> {
        self.get(key).and_then(IdData::as_node_tree)
    }

    /// Recalc flags recorded on the original by user edits.
    pub fn recalc(&self, key: IdKey) -> RecalcFlags {
        self.recalc.get(&key).copied().unwrap_or_default()
    }

    pub fn add_recalc(&mut self, key: IdKey, flags: RecalcFlags) {
        if flags.is_empty() || !self.ids.contains_key(&key) {
            return;
        }
        *self.recalc.entry(key).or_default() |= flags;
    }

    pub fn clear_recalc(&mut self) {
        self.recalc.clear();
    }

    /// Objects of a collection and all its children, depth first.
    pub fn collection_objects_recursive(&self, collection: IdKey) -> Vec<IdKey> {
        let mut result = Vec::new();
        let mut visited = Vec::new();
        self.collect_objects(collection, &mut result, &mut visited);
        result
    }

    fn collect_objects(&self, collection: IdKey, result: &mut Vec<IdKey>, visited: &mut Vec<IdKey>) {
        if visited.contains(&collection) {
            return;
        }
        visited.push(collection);
        let Some(data) = self.collection(collection) else {
            return;
        };
        for object in &data.objects {
            if !result.contains(object) {
                result.push(*object);
            }
        }
        for child in &data.children {
            self.collect_objects(*child, result, visited);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{IdPayload, ObjectKind};

    #[test]
    fn edit_does_not_touch_snapshot() {
        let mut main = Main::new();
        let key = main.add(IdData::new(
            "Cube",
            IdPayload::Object(ObjectData::new(ObjectKind::Mesh, None)),
        ));
        let snapshot = main.get_arc(key).unwrap();
        main.edit(key).unwrap().name = "Renamed".into();

        assert_eq!(snapshot.name, "Cube");
        assert_eq!(main.name(key), Some("Renamed"));
    }

    #[test]
    fn recursive_collection_objects() {
        let mut main = Main::new();
        let a = main.add(IdData::new("A", IdPayload::Object(ObjectData::default())));
        let b = main.add(IdData::new("B", IdPayload::Object(ObjectData::default())));
        let child = main.add(IdData::new(
            "Child",
            IdPayload::Collection(CollectionData {
                objects: vec![b],
                ..Default::default()
            }),
        ));
        let parent = main.add(IdData::new(
            "Parent",
            IdPayload::Collection(CollectionData {
                objects: vec![a],
                children: vec![child],
                ..Default::default()
            }),
        ));
        assert_eq!(main.collection_objects_recursive(parent), vec![a, b]);
    }

    #[test]
    fn recalc_flags() {
        let mut main = Main::new();
        let key = main.add(IdData::new("A", IdPayload::Image));
        main.add_recalc(key, RecalcFlags::TRANSFORM);
        main.add_recalc(key, RecalcFlags::GEOMETRY);
        assert_eq!(main.recalc(key), RecalcFlags::TRANSFORM | RecalcFlags::GEOMETRY);
        main.clear_recalc();
        assert!(main.recalc(key).is_empty());
    }
}
