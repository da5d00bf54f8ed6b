use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use dgraph_core::config::EvaluationMode;
use dgraph_core::graph::{Depsgraph, RecalcFlags, UpdateSource};
use dgraph_core::scene::{
    ActionData, AnimData, Base, FCurve, GeometryData, IdData, IdKey, IdPayload, IdType, Main,
    Modifier, ModifierKind, ObjectData, ObjectKind, Parent, ParentKind, SceneData, ViewLayer,
};

/// A scene of `count` mesh objects in parent chains of eight. Every fourth
/// object is animated.
fn build_scene(count: usize) -> (Main, IdKey, Vec<IdKey>) {
    let mut main = Main::new();
    let action = main.add(IdData::new(
        "ACSpin",
        IdPayload::Action(ActionData {
            fcurves: vec![FCurve::new("rotation_euler", 2)],
        }),
    ));
    let mut layer = ViewLayer::new("ViewLayer");
    let mut objects = Vec::with_capacity(count);
    let mut parent = None;
    for i in 0..count {
        let mesh = main.add(IdData::new(
            format!("MEMesh{i}"),
            IdPayload::Geometry(IdType::Mesh, GeometryData::default()),
        ));
        let mut data = ObjectData::new(ObjectKind::Mesh, Some(mesh));
        data.parent = parent.map(|object| Parent {
            object,
            kind: ParentKind::Object,
        });
        data.modifiers.push(Modifier::new("Subdivision", ModifierKind::Subdivision));
        let mut id = IdData::new(format!("OBMesh{i}"), IdPayload::Object(data));
        if i % 4 == 0 {
            id = id.with_anim(AnimData::with_action(action));
        }
        let object = main.add(id);
        layer.bases.push(Base::new(object));
        objects.push(object);
        parent = if i % 8 == 7 { None } else { Some(object) };
    }
    let scene = main.add(IdData::new(
        "SCScene",
        IdPayload::Scene(SceneData {
            view_layers: vec![layer],
            ..Default::default()
        }),
    ));
    (main, scene, objects)
}

fn built_graph(main: &Main, scene: IdKey) -> Depsgraph {
    let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
    graph.build_from_view_layer(main).unwrap();
    graph.evaluate_on_refresh(main);
    graph
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("depsgraph");
    group.sample_size(20);

    for &count in &[64_usize, 512, 2_048] {
        let (main, scene, objects) = build_scene(count);

        group.bench_function(format!("build(objects={count})"), |b| {
            b.iter(|| {
                let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
                graph.build_from_view_layer(&main).unwrap();
                black_box(graph);
            });
        });

        group.bench_function(format!("first_evaluation(objects={count})"), |b| {
            b.iter_batched(
                || {
                    let mut graph = Depsgraph::new(scene, 0, EvaluationMode::Viewport);
                    graph.build_from_view_layer(&main).unwrap();
                    graph
                },
                |mut graph| black_box(graph.evaluate_on_refresh(&main)),
                BatchSize::LargeInput,
            );
        });

        let mut graph = built_graph(&main, scene);
        let mut frame = 1.0;
        group.bench_function(format!("frame_change(objects={count})"), |b| {
            b.iter(|| {
                frame += 1.0;
                black_box(graph.evaluate_on_framechange(&main, frame))
            });
        });

        group.bench_function(format!("transform_edit(objects={count})"), |b| {
            b.iter_batched(
                || (main.clone(), built_graph(&main, scene)),
                |(mut main, mut graph)| {
                    graph
                        .tag_update(&mut main, objects[0], RecalcFlags::TRANSFORM, UpdateSource::UserEdit)
                        .unwrap();
                    black_box(graph.evaluate_on_refresh(&main))
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build);
criterion_main!(benches);
