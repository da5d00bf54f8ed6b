//! Builder Cache
//!
//! Answers "is this property of this data-block animated?" for the node and
//! relation builders. The answer only depends on the data-block's action
//! and drivers, so it is computed once per data-block and shared by every
//! builder of a build. The map is a `DashMap` so builders may query it
//! through a shared reference.

use std::collections::HashSet;

use dashmap::DashMap;

use super::path::contains;
use crate::scene::{IdKey, IdPayload, Main};

/// Animated property paths of one data-block.
#[derive(Debug, Clone, Default)]
pub struct AnimatedPropertyStorage {
    paths: HashSet<String>,
}

impl AnimatedPropertyStorage {
    /// Collect the paths written by the action and the drivers of `id`.
    pub fn new(main: &Main, id: IdKey) -> Self {
        let mut paths = HashSet::new();
        let Some(anim) = main.get(id).and_then(|data| data.anim.as_ref()) else {
            return Self { paths };
        };
        if let Some(action) = anim.action.and_then(|action| main.get(action)) {
            if let IdPayload::Action(action) = &action.payload {
                paths.extend(action.fcurves.iter().map(|fcurve| fcurve.rna_path.clone()));
            }
        }
        paths.extend(anim.drivers.iter().map(|driver| driver.rna_path.clone()));
        Self { paths }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Exactly this path is animated.
    pub fn is_property_animated(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Some path containing `component` as a path segment is animated.
    pub fn is_any_property_animated(&self, component: &str) -> bool {
        self.paths.iter().any(|path| contains(path, component))
    }
}

/// Memoized animation queries, keyed by data-block.
#[derive(Debug, Default)]
pub struct BuilderCache {
    animated: DashMap<IdKey, AnimatedPropertyStorage>,
}

impl BuilderCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_storage<R>(
        &self,
        main: &Main,
        id: IdKey,
        f: impl FnOnce(&AnimatedPropertyStorage) -> R,
    ) -> R {
        let storage = self
            .animated
            .entry(id)
            .or_insert_with(|| AnimatedPropertyStorage::new(main, id));
        f(&storage)
    }

    pub fn is_property_animated(&self, main: &Main, id: IdKey, path: &str) -> bool {
        self.with_storage(main, id, |storage| storage.is_property_animated(path))
    }

    pub fn is_any_property_animated(&self, main: &Main, id: IdKey, component: &str) -> bool {
        self.with_storage(main, id, |storage| storage.is_any_property_animated(component))
    }

    /// Either hide flag of the object is animated.
    pub fn is_object_visibility_animated(&self, main: &Main, object: IdKey) -> bool {
        self.with_storage(main, object, |storage| {
            storage.is_property_animated("hide_viewport")
                || storage.is_property_animated("hide_render")
        })
    }

    pub fn len(&self) -> usize {
        self.animated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.animated.is_empty()
    }

    pub fn clear(&self) {
        self.animated.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{ActionData, AnimData, Driver, FCurve, IdData, ObjectData};

    fn animated_object(main: &mut Main) -> IdKey {
        let action = main.add(IdData::new(
            "ACWalk",
            IdPayload::Action(ActionData {
                fcurves: vec![FCurve::new("location", 0), FCurve::new("hide_viewport", 0)],
            }),
        ));
        let mut anim = AnimData::with_action(action);
        anim.drivers.push(Driver::new("modifiers[\"Wave\"].height", -1));
        main.add(IdData::new("OBCube", IdPayload::Object(ObjectData::default())).with_anim(anim))
    }

    #[test]
    fn animated_paths() {
        let mut main = Main::new();
        let object = animated_object(&mut main);
        let cache = BuilderCache::new();
        assert!(cache.is_property_animated(&main, object, "location"));
        assert!(!cache.is_property_animated(&main, object, "scale"));
        assert!(cache.is_any_property_animated(&main, object, "modifiers"));
        assert!(cache.is_object_visibility_animated(&main, object));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unanimated_and_unknown_ids() {
        let mut main = Main::new();
        let object = main.add(IdData::new("OBPlain", IdPayload::Object(ObjectData::default())));
        let cache = BuilderCache::new();
        assert!(!cache.is_object_visibility_animated(&main, object));
        assert!(!cache.is_property_animated(&main, IdKey(99), "location"));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
