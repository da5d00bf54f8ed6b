//! Copy-on-Write Layer
//!
//! Every data-block whose type needs it gets an evaluated shadow: a
//! snapshot of the original that evaluation reads instead of the original.
//!
//! # Design Decisions
//!
//! 1. A shadow shares the original's `Arc<IdData>`. Originals are edited
//!    through `Arc::make_mut`, so an edit after the snapshot clones the
//!    original and the shadow keeps the old data.
//!
//! 2. Only the COPY_ON_WRITE operation of an id writes its shadow. Readers
//!    take the read side of the lock, so concurrent operations of other ids
//!    never block each other.
//!
//! 3. A shadow whose COPY_ON_WRITE operation is still pending is stale; the
//!    original is returned instead.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::graph::{Depsgraph, IdNodeIndex, NodeType, OpCode};
use crate::scene::{IdData, IdKey, IdPayload, Main};

/// A materialized evaluated shadow.
#[derive(Debug, Clone)]
pub struct EvaluatedId {
    pub orig: IdKey,
    pub data: Arc<IdData>,
    /// Bumped every time the shadow is refreshed.
    pub generation: u64,
}

impl EvaluatedId {
    pub fn new(orig: IdKey, data: Arc<IdData>) -> Self {
        Self {
            orig,
            data,
            generation: 1,
        }
    }

    /// Shadow and original still share their data.
    pub fn is_shared_with(&self, original: &Arc<IdData>) -> bool {
        Arc::ptr_eq(&self.data, original)
    }
}

impl Depsgraph {
    /// Refresh the shadow of an id from its original.
    ///
    /// Runs as the work of COPY_ON_WRITE operations. The scene shadow also
    /// receives the graph's current frame.
    pub(crate) fn update_copy_on_write(&self, main: &Main, id_index: IdNodeIndex) {
        let id_node = self.id_node(id_index);
        let Some(original) = main.get_arc(id_node.id_orig) else {
            warn!(id = %id_node.id_orig, "original data-block is gone, keeping shadow");
            return;
        };
        let data = if id_node.id_orig == self.scene {
            self.with_frame(original)
        } else {
            original
        };
        let mut cow = id_node.cow.write();
        let generation = cow.as_ref().map_or(0, |shadow| shadow.generation) + 1;
        *cow = Some(EvaluatedId {
            orig: id_node.id_orig,
            data,
            generation,
        });
    }

    fn with_frame(&self, original: Arc<IdData>) -> Arc<IdData> {
        match &original.payload {
            IdPayload::Scene(scene) if scene.frame != self.frame => {
                let mut data = (*original).clone();
                if let Some(scene) = data.as_scene_mut() {
                    scene.frame = self.frame;
                }
                Arc::new(data)
            }
            _ => original,
        }
    }

    /// Make sure the scene has a shadow before anything reads it.
    pub(crate) fn ensure_scene_cow(&self, main: &Main) {
        let Some(scene_index) = self.scene_cow else {
            return;
        };
        if self.id_node(scene_index).cow.read().is_none() {
            self.update_copy_on_write(main, scene_index);
        }
    }

    /// Push the current frame into an existing scene shadow.
    pub(crate) fn set_scene_cow_frame(&self) {
        let Some(scene_index) = self.scene_cow else {
            return;
        };
        let mut cow = self.id_node(scene_index).cow.write();
        if let Some(shadow) = cow.as_mut() {
            shadow.data = self.with_frame(shadow.data.clone());
        }
    }

    fn cow_is_pending(&self, id_index: IdNodeIndex) -> bool {
        self.id_node(id_index)
            .find_component(NodeType::CopyOnWrite, "")
            .and_then(|component| self.component(component).find_operation_by_code(OpCode::CopyOnWrite))
            .is_some_and(|op| self.operation(op).needs_update())
    }

    /// Evaluated data of `id`, or the original when there is no fresh
    /// shadow.
    pub fn evaluated_data(&self, main: &Main, id: IdKey) -> Option<Arc<IdData>> {
        if let Some(id_index) = self.find_id_node(id) {
            if !self.cow_is_pending(id_index) {
                if let Some(shadow) = self.id_node(id_index).cow.read().as_ref() {
                    return Some(shadow.data.clone());
                }
            }
            debug!(%id, "no fresh shadow, falling back to original");
        }
        main.get_arc(id)
    }

    /// Shadow of `id` if it is materialized and up to date.
    pub fn evaluated_id(&self, id: IdKey) -> Option<EvaluatedId> {
        let id_index = self.find_id_node(id)?;
        if self.cow_is_pending(id_index) {
            return None;
        }
        self.id_node(id_index).evaluated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationMode;
    use crate::graph::{OperationIdKey, OperationWork, ThreadSafety};
    use crate::scene::{IdType, ObjectData, ObjectKind, SceneData};

    fn setup() -> (Main, Depsgraph, IdKey, IdNodeIndex) {
        let mut main = Main::new();
        let scene = main.add(IdData::new("SCScene", IdPayload::Scene(SceneData::default())));
        let object = main.add(IdData::new(
            "OBCube",
            IdPayload::Object(ObjectData::new(ObjectKind::Empty, None)),
        ));
        let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
        let (id_index, _) = graph.add_id_node(object, IdType::Object, "OBCube");
        let comp = graph.add_component(id_index, NodeType::CopyOnWrite, "");
        graph.add_operation(
            comp,
            OperationIdKey::new(OpCode::CopyOnWrite, "", -1),
            Some(OperationWork::CopyOnWrite),
            ThreadSafety::ParallelSafe,
        );
        (main, graph, object, id_index)
    }

    #[test]
    fn shadow_isolated_from_edits() {
        let (mut main, graph, object, id_index) = setup();
        graph.update_copy_on_write(&main, id_index);
        let shadow = graph.evaluated_id(object).unwrap();
        assert_eq!(shadow.generation, 1);
        assert!(shadow.is_shared_with(&main.get_arc(object).unwrap()));

        main.edit(object).unwrap().name = "OBRenamed".into();
        assert_eq!(graph.evaluated_id(object).unwrap().data.name, "OBCube");

        graph.update_copy_on_write(&main, id_index);
        let shadow = graph.evaluated_id(object).unwrap();
        assert_eq!(shadow.generation, 2);
        assert_eq!(shadow.data.name, "OBRenamed");
    }

    #[test]
    fn pending_shadow_falls_back_to_original() {
        let (main, graph, object, id_index) = setup();
        assert!(graph.evaluated_id(object).is_none());
        assert_eq!(graph.evaluated_data(&main, object).unwrap().name, "OBCube");

        graph.update_copy_on_write(&main, id_index);
        let cow_op = graph
            .find_operation(object, NodeType::CopyOnWrite, "", OpCode::CopyOnWrite, "", -1)
            .unwrap();
        graph
            .operation(cow_op)
            .set_flags(crate::graph::OperationFlags::NEEDS_UPDATE);
        assert!(graph.evaluated_id(object).is_none());
    }
}
