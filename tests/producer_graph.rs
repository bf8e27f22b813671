//! Producer chains built from configuration.

use std::sync::Arc;

use terramp::config::TerrainConfig;
use terramp::layers::HEIGHT;
use terramp::producer::{get_ready_tile, SceneState, TileProducer};
use terramp::quadtree::TileAddress;
use terramp::residual::save_residual;
use terramp::task::{Deadline, RenderContext, Scheduler};
use terramp::ProducerRegistry;

fn terrain_json(residuals: Option<&str>) -> String {
    let residuals = residuals
        .map(|root| format!(r#", "residuals": {{ "root": {:?} }}"#, root))
        .unwrap_or_default();
    format!(
        r#"{{
            "caches": [{{ "name": "terrain", "capacity": 64 }}],
            "producers": [
                {{ "name": "elevation", "cache": "terrain", "kind": "elevation",
                   "layout": {{ "tile_size": 8, "border": 2, "max_level": 5 }}{residuals} }},
                {{ "name": "normals", "cache": "terrain", "kind": "normal",
                   "layout": {{ "tile_size": 8, "border": 1, "max_level": 5 }},
                   "elevation": "elevation", "world_size": 8000.0 }},
                {{ "name": "detail", "cache": "terrain", "kind": "fallback",
                   "delegate": "elevation", "max_level": 9 }},
                {{ "name": "stack", "cache": "terrain", "kind": "level_stack",
                   "base": "elevation", "min_level": 2, "max_level": 6 }}
            ]
        }}"#
    )
}

fn registry(residuals: Option<&str>) -> ProducerRegistry {
    let config = TerrainConfig::from_json_str(&terrain_json(residuals)).unwrap();
    ProducerRegistry::from_config(&config).unwrap()
}

fn height_at(producer: &Arc<dyn TileProducer>, address: TileAddress) -> f32 {
    let tile = get_ready_tile(
        producer.as_ref(),
        address,
        Deadline::IMMEDIATE,
        &Scheduler::new(),
        &mut RenderContext::new(),
    )
    .unwrap();
    let layout = producer.layout();
    let h = tile.read().samples(0)[layout.index(layout.side() / 2, layout.side() / 2, HEIGHT)];
    producer.put_tile(&tile);
    h
}

#[test]
fn test_inputs_run_before_readers() {
    terramp::core::logging::init_for_tests();
    let registry = registry(None);
    let normals = registry.producer("normals").unwrap();
    let address = TileAddress::new(3, 5, 2);

    let tile = normals.get_tile(address, Deadline::IMMEDIATE).unwrap();
    let report = Scheduler::new().run_tasks(&[tile.task().clone()], &mut RenderContext::new());
    assert!(report.is_success());
    // Elevation levels 0..=3, then the normal tile
    assert_eq!(report.executed, 5);
    assert_eq!(report.order.last().map(String::as_str), Some("normals (3, 5, 2)"));
    let position = |label: &str| report.order.iter().position(|l| l == label).unwrap();
    assert!(position("elevation (0, 0, 0)") < position("elevation (2, 2, 1)"));
    assert!(position("elevation (2, 2, 1)") < position("elevation (3, 5, 2)"));
    normals.put_tile(&tile);

    // Inputs are released once the reader is built
    assert_eq!(registry.producer("elevation").unwrap().tiles_in_use(), 0);
    assert_eq!(registry.caches()[0].stats().in_use, 0);
}

#[test]
fn test_invalidation_round_trip() {
    let registry = registry(None);
    let elevation = registry.producer("elevation").unwrap();
    let normals = registry.producer("normals").unwrap();
    let address = TileAddress::new(2, 1, 1);

    let before = height_at(&normals, address);
    let tile = normals.find_tile(address).unwrap();
    let version = tile.version();

    // Invalidating a coarse elevation tile reaches everything derived from it
    let count = elevation.invalidate_tile(TileAddress::new(1, 0, 0));
    assert!(count >= 3);
    assert!(!tile.is_done());

    let after = height_at(&normals, address);
    assert_eq!(before, after);
    assert!(tile.version() > version);
    assert_eq!(tile.task().run_count(), 2);
}

#[test]
fn test_fallback_refines_past_delegate() {
    let registry = registry(None);
    let detail = registry.producer("detail").unwrap();
    let elevation = registry.producer("elevation").unwrap();

    let inside = TileAddress::new(4, 9, 3);
    assert_eq!(height_at(&detail, inside), height_at(&elevation, inside));

    // Below the delegate's finest level tiles are resampled from its level 5
    let deep = TileAddress::new(8, 150, 60);
    let h = height_at(&detail, deep);
    assert!(h.is_finite());
    assert!(elevation.find_tile(deep.ancestor(5).unwrap()).is_some());
}

#[test]
fn test_level_stack_levels_follow_base() {
    let registry = registry(None);
    let stack = registry.producer("stack").unwrap();
    let base = registry.producer("elevation").unwrap();

    let coarse = TileAddress::new(2, 3, 0);
    assert_eq!(height_at(&stack, coarse), height_at(&base, coarse));
    assert!(height_at(&stack, TileAddress::new(6, 50, 7)).is_finite());
    assert!(!stack.has_tile(TileAddress::new(7, 0, 0)));
}

#[test]
fn test_residuals_correct_heights() {
    let dir = tempfile::tempdir().unwrap();
    let root = TileAddress::ROOT;
    let plain = registry(None);
    let layout = plain.producer("elevation").unwrap().layout();
    save_residual(dir.path(), root, &vec![5.0; layout.pixel_count()]).unwrap();

    let corrected = registry(dir.path().to_str());
    let a = height_at(&plain.producer("elevation").unwrap(), root);
    let b = height_at(&corrected.producer("elevation").unwrap(), root);
    assert!((b - a - 5.0).abs() < 1e-3, "{} vs {}", a, b);

    // Children without a residual file inherit the parent's correction
    let child = TileAddress::new(1, 1, 0);
    let c = height_at(&plain.producer("elevation").unwrap(), child);
    let d = height_at(&corrected.producer("elevation").unwrap(), child);
    assert!((d - c - 5.0).abs() < 1e-3);
}

#[test]
fn test_scene_update_rebuilds_on_parameter_change() {
    let registry = registry(None);
    let elevation = registry.producer("elevation").unwrap();
    let address = TileAddress::new(1, 0, 1);

    registry.update_all(&SceneState::new(0).with_parameter("roughness", 1.0));
    let a = height_at(&elevation, address);
    registry.update_all(&SceneState::new(1).with_parameter("roughness", 1.0));
    assert!(elevation.find_tile(address).unwrap().is_done());

    registry.update_all(&SceneState::new(2).with_parameter("roughness", 0.0));
    assert!(!elevation.find_tile(address).unwrap().is_done());
    let b = height_at(&elevation, address);
    assert_ne!(a, b);
    assert_eq!(b, 0.0);
}
