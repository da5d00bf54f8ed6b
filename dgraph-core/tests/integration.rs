//! Integration Tests for Building and Evaluation
//!
//! These tests drive the graph the way an application would: describe a
//! scene, build, tag edits and evaluate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use dgraph_core::config::{EvaluationMode, GraphConfig};
use dgraph_core::builder::NodeHandle;
use dgraph_core::eval::EvalContext;
use dgraph_core::graph::{
    CustomDataMask, Depsgraph, NodeType, OpCode, OperationIndex, RecalcFlags, RelationFlags,
    UpdateSource,
};
use dgraph_core::scene::{
    ActionData, AnimData, Base, FCurve, GeometryData, IdData, IdKey, IdPayload, IdType, Main,
    Modifier, ModifierDependencies, ModifierKind, ObjectData, ObjectKind, Parent, ParentKind,
    SceneData, ViewLayer,
};

type Executions = Arc<Mutex<HashMap<OperationIndex, usize>>>;

/// Record every kernel operation the graph runs.
fn counting_kernel(graph: &mut Depsgraph) -> Executions {
    let executions: Executions = Arc::default();
    let sink = executions.clone();
    graph.set_kernel(Arc::new(move |ctx: &EvalContext<'_>| {
        *sink.lock().entry(ctx.operation()).or_insert(0) += 1;
    }));
    executions
}

fn executed_for(graph: &Depsgraph, executions: &Executions, id: IdKey) -> usize {
    let Some(id_index) = graph.find_id_node(id) else {
        return 0;
    };
    executions
        .lock()
        .keys()
        .filter(|op| graph.operation_id_node(**op) == id_index)
        .count()
}

fn add_scene(main: &mut Main, objects: &[IdKey]) -> IdKey {
    let mut layer = ViewLayer::new("ViewLayer");
    layer.bases.extend(objects.iter().map(|object| Base::new(*object)));
    main.add(IdData::new(
        "SCScene",
        IdPayload::Scene(SceneData {
            view_layers: vec![layer],
            ..Default::default()
        }),
    ))
}

fn add_mesh_object(main: &mut Main, name: &str, parent: Option<IdKey>) -> IdKey {
    let mesh = main.add(IdData::new(
        format!("ME{name}"),
        IdPayload::Geometry(IdType::Mesh, GeometryData::default()),
    ));
    let mut object = ObjectData::new(ObjectKind::Mesh, Some(mesh));
    object.parent = parent.map(|object| Parent {
        object,
        kind: ParentKind::Object,
    });
    object.modifiers.push(Modifier::new("Subdivision", ModifierKind::Subdivision));
    main.add(IdData::new(format!("OB{name}"), IdPayload::Object(object)))
}

/// A first pass runs every operation at most once and leaves nothing
/// tagged.
#[test]
fn first_evaluation_runs_each_operation_once() {
    let mut main = Main::new();
    let parent = add_mesh_object(&mut main, "Parent", None);
    let child = add_mesh_object(&mut main, "Child", Some(parent));
    let scene = add_scene(&mut main, &[parent, child]);

    let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
    graph.build_from_view_layer(&main).unwrap();
    let executions = counting_kernel(&mut graph);

    let report = graph.evaluate_on_refresh(&main);
    assert!(report.executed > 0);
    assert!(executions.lock().values().all(|count| *count == 1));
    assert!(graph.operations().all(|(_, op)| !op.needs_update()));
    assert!(graph.is_fully_evaluated());
    assert!(graph.evaluated_id(child).is_some());
}

/// Editing the child leaves its parent alone; editing the parent
/// re-evaluates the child as well.
#[test]
fn edits_propagate_downstream_only() {
    let mut main = Main::new();
    let parent = add_mesh_object(&mut main, "Parent", None);
    let child = add_mesh_object(&mut main, "Child", Some(parent));
    let scene = add_scene(&mut main, &[parent, child]);

    let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
    graph.build_from_view_layer(&main).unwrap();
    graph.make_active();
    graph.evaluate_on_refresh(&main);
    let executions = counting_kernel(&mut graph);

    graph
        .tag_update(&mut main, child, RecalcFlags::TRANSFORM, UpdateSource::UserEdit)
        .unwrap();
    graph.evaluate_on_refresh(&main);
    assert!(executed_for(&graph, &executions, child) > 0);
    assert_eq!(executed_for(&graph, &executions, parent), 0);
    assert!(main.recalc(child).contains(RecalcFlags::TRANSFORM));

    executions.lock().clear();
    graph
        .tag_update(&mut main, parent, RecalcFlags::TRANSFORM, UpdateSource::UserEdit)
        .unwrap();
    let report = graph.evaluate_on_refresh(&main);
    assert!(executed_for(&graph, &executions, parent) > 0);
    assert!(executed_for(&graph, &executions, child) > 0);
    assert!(report.updated_ids.iter().any(|(id, _)| *id == child));
}

/// Changing the frame re-evaluates animated data only.
#[test]
fn frame_change_updates_animated_objects() {
    let mut main = Main::new();
    let action = main.add(IdData::new(
        "ACMove",
        IdPayload::Action(ActionData {
            fcurves: vec![FCurve::new("location", 0)],
        }),
    ));
    let animated = main.add(
        IdData::new("OBMoving", IdPayload::Object(ObjectData::default()))
            .with_anim(AnimData::with_action(action)),
    );
    let still = main.add(IdData::new("OBStill", IdPayload::Object(ObjectData::default())));
    let scene = add_scene(&mut main, &[animated, still]);

    let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
    graph.build_from_view_layer(&main).unwrap();
    graph.evaluate_on_refresh(&main);
    let executions = counting_kernel(&mut graph);

    graph.evaluate_on_framechange(&main, 12.0);
    assert_eq!(graph.frame(), 12.0);
    assert!(executed_for(&graph, &executions, animated) > 0);
    assert_eq!(executed_for(&graph, &executions, still), 0);
    let scene_eval = graph.evaluated_scene().unwrap();
    assert_eq!(scene_eval.data.as_scene().unwrap().frame, 12.0);
}

/// Two objects parented to each other form a cycle that the build cuts.
#[test]
fn parent_cycle_is_cut_and_evaluates() {
    let mut main = Main::new();
    let first = add_mesh_object(&mut main, "First", None);
    let second = add_mesh_object(&mut main, "Second", Some(first));
    if let Some(object) = main.edit(first).and_then(IdData::as_object_mut) {
        object.parent = Some(Parent {
            object: second,
            kind: ParentKind::Object,
        });
    }
    let scene = add_scene(&mut main, &[first, second]);

    let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
    graph.build_from_view_layer(&main).unwrap();
    assert!(graph
        .relations()
        .any(|(_, relation)| relation.flags().contains(RelationFlags::CYCLIC)));
    assert_eq!(graph.consistency_check(), Ok(()));

    let executions = counting_kernel(&mut graph);
    graph.evaluate_on_refresh(&main);
    assert!(executions.lock().values().all(|count| *count == 1));
    assert!(graph.operations().all(|(_, op)| !op.needs_update()));
}

/// Shadows keep the state of the last evaluation until the next one.
#[test]
fn shadows_are_isolated_from_edits() {
    let mut main = Main::new();
    let cube = add_mesh_object(&mut main, "Cube", None);
    let scene = add_scene(&mut main, &[cube]);

    let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
    graph.build_from_view_layer(&main).unwrap();
    graph.evaluate_on_refresh(&main);

    main.edit(cube).unwrap().as_object_mut().unwrap().hide_viewport = true;
    let shadow = graph.evaluated_id(cube).unwrap();
    assert!(!shadow.data.as_object().unwrap().hide_viewport);
    assert_eq!(graph.original_id(&shadow), cube);

    graph
        .tag_update(&mut main, cube, RecalcFlags::COPY_ON_WRITE, UpdateSource::UserEdit)
        .unwrap();
    graph.evaluate_on_refresh(&main);
    let shadow = graph.evaluated_id(cube).unwrap();
    assert!(shadow.data.as_object().unwrap().hide_viewport);
}

/// Adding an object needs a relations update; validation notices when it
/// was forgotten.
#[test]
fn relations_update_picks_up_new_objects() {
    let mut main = Main::new();
    let cube = add_mesh_object(&mut main, "Cube", None);
    let scene = add_scene(&mut main, &[cube]);

    let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
    graph.build_from_view_layer(&main).unwrap();
    graph.evaluate_on_refresh(&main);

    let sphere = add_mesh_object(&mut main, "Sphere", None);
    main.edit(scene)
        .and_then(IdData::as_scene_mut)
        .unwrap()
        .view_layers[0]
        .bases
        .push(Base::new(sphere));
    assert!(!graph.relations_validate(&main));

    graph.tag_relations_update(&main).unwrap();
    graph.relations_update(&main).unwrap();
    assert!(graph.find_id_node(sphere).is_some());
    assert!(graph.relations_validate(&main));

    graph.evaluate_on_refresh(&main);
    assert!(graph.evaluated_id(sphere).is_some());
}

/// Evaluating a graph whose relations were tagged as outdated rebuilds
/// them first.
#[test]
fn evaluation_rebuilds_outdated_relations() {
    let mut main = Main::new();
    let cube = add_mesh_object(&mut main, "Cube", None);
    let scene = add_scene(&mut main, &[cube]);

    let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
    graph.build_from_view_layer(&main).unwrap();
    graph.evaluate_on_refresh(&main);

    let sphere = add_mesh_object(&mut main, "Sphere", Some(cube));
    main.edit(scene)
        .and_then(IdData::as_scene_mut)
        .unwrap()
        .view_layers[0]
        .bases
        .push(Base::new(sphere));
    graph.tag_relations_update(&main).unwrap();
    assert!(graph.need_update());

    graph.evaluate_on_refresh(&main);
    assert!(!graph.need_update());
    assert!(graph.find_id_node(sphere).is_some());
    assert!(graph.evaluated_id(sphere).is_some());
    assert!(graph.relations_validate(&main));
    assert!(graph.is_fully_evaluated());
}

/// A configuration read from JSON drives the worker pool.
#[test]
fn threaded_evaluation_from_json_config() {
    let mut main = Main::new();
    let mut objects = Vec::new();
    let mut parent = None;
    for i in 0..32 {
        let object = add_mesh_object(&mut main, &format!("Object{i}"), parent);
        // Chains of four.
        parent = if i % 4 == 3 { None } else { Some(object) };
        objects.push(object);
    }
    let scene = add_scene(&mut main, &objects);

    let config = GraphConfig::from_json_str(r#"{ "num_threads": 4, "record_stats": true }"#).unwrap();
    let mut graph = Depsgraph::with_config(scene, 0, EvaluationMode::Viewport, config);
    graph.build_from_view_layer(&main).unwrap();
    let executions = counting_kernel(&mut graph);

    let report = graph.evaluate_on_refresh(&main);
    assert!(executions.lock().values().all(|count| *count == 1));
    assert_eq!(graph.stats().passes, 1);
    assert_eq!(graph.stats().timings.len(), report.executed);
    for object in objects {
        assert!(graph.evaluated_id(object).is_some());
    }
}

/// Modifier defined outside the crate that follows another object.
#[derive(Debug)]
struct FollowModifier {
    target: IdKey,
}

impl ModifierDependencies for FollowModifier {
    fn foreach_id(&self, f: &mut dyn FnMut(IdKey)) {
        f(self.target);
    }

    fn update_depsgraph(&self, handle: &mut NodeHandle<'_, '_>) {
        handle.add_object_relation(self.target, NodeType::Transform, "Follow Target");
        handle.add_customdata_mask(self.target, CustomDataMask::UV_MAP);
        handle.add_modifier_to_transform_relation("Follow Space");
    }
}

/// Relations declared by an external modifier end up in the graph and
/// carry updates of the object it follows.
#[test]
fn external_modifier_relations_flush() {
    let mut main = Main::new();
    let target = add_mesh_object(&mut main, "Target", None);
    let follower = add_mesh_object(&mut main, "Follower", None);
    main.edit(follower)
        .and_then(IdData::as_object_mut)
        .unwrap()
        .modifiers
        .push(Modifier::new(
            "Follow",
            ModifierKind::External(Arc::new(FollowModifier { target })),
        ));
    let scene = add_scene(&mut main, &[target, follower]);

    let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
    graph.build_from_view_layer(&main).unwrap();
    graph.make_active();

    let modifier = graph
        .find_operation(follower, NodeType::Geometry, "", OpCode::Modifier, "Follow", -1)
        .unwrap();
    let target_node = graph.find_id_node(target).unwrap();
    let follows = graph.operation(modifier).inlinks().iter().any(|index| {
        let relation = graph.relation(*index).unwrap();
        relation.name() == "Follow Target"
            && relation
                .from_operation()
                .is_some_and(|from| graph.operation_id_node(from) == target_node)
    });
    assert!(follows);
    assert!(graph
        .customdata_mask_for_object(target)
        .contains(CustomDataMask::UV_MAP));

    graph.evaluate_on_refresh(&main);
    let executions = counting_kernel(&mut graph);
    graph
        .tag_update(&mut main, target, RecalcFlags::TRANSFORM, UpdateSource::UserEdit)
        .unwrap();
    graph.evaluate_on_refresh(&main);
    assert!(executions.lock().contains_key(&modifier));
    assert!(executed_for(&graph, &executions, follower) > 0);
}
