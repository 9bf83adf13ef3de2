// Scene Stream Texture Loading Tests
//
// Textures load behind the scene's back: nodes are inserted with a pending
// binding, identical requests share one load, and a torn down world ignores
// late completions.

use std::cell::RefCell;
use std::rc::Rc;

use scene_stream::{
    config::ViewerConfig,
    pose::PoseBatch,
    scene::{NodeId, NodeKind, TextureBinding},
    texture::{
        ImageData, QueuedTextureLoader, TextureCompletion, TextureLoader, TextureRequest,
    },
    world::SceneWorld,
};

/// Loader the test can still reach after handing it to the world
#[derive(Clone, Default)]
struct SharedLoader(Rc<RefCell<QueuedTextureLoader>>);

impl TextureLoader for SharedLoader {
    fn load_or_retrieve(
        &mut self,
        request: &TextureRequest,
        completion: TextureCompletion,
    ) -> Option<ImageData> {
        self.0.borrow_mut().load_or_retrieve(request, completion)
    }
}

fn world_with(config: ViewerConfig) -> (SceneWorld, SharedLoader) {
    let loader = SharedLoader::default();
    let world = SceneWorld::new(&config, Box::new(loader.clone()));
    (world, loader)
}

fn binding(world: &SceneWorld, id: &str) -> TextureBinding {
    let key = world.store().lookup(&NodeId::from(id)).unwrap();
    match world.store().node(key).unwrap().kind() {
        NodeKind::ImageTexture(texture) => texture.binding,
        other => panic!("expected an ImageTexture, got {other:?}"),
    }
}

fn textured_shape(shape: &str, texture: &str, url: &str, transform: &str) -> String {
    format!(
        "<Shape id='{shape}'><Appearance>\
           <ImageTexture id='{texture}' url='\"{url}\"'/>{transform}\
         </Appearance></Shape>"
    )
}

#[test]
fn test_identical_keys_share_one_load() {
    let (mut world, loader) = world_with(ViewerConfig::default());
    world.insert_markup(None, "<Group id='n0'/>").unwrap();
    let n0 = NodeId::from("n0");
    let markup = [
        textured_shape("n1", "n2", "wood.png", ""),
        textured_shape("n3", "n4", "wood.png", ""),
    ]
    .concat();
    world.insert_markup(Some(&n0), &markup).unwrap();

    assert_eq!(loader.0.borrow().requested_urls(), ["wood.png"]);
    let first = binding(&world, "n2");
    assert!(matches!(first, TextureBinding::Pending(_)));
    assert_eq!(first, binding(&world, "n4"));
    assert!(world.has_pending_textures());

    // One completion resolves both waiters
    assert_eq!(
        loader.0.borrow_mut().complete_url("wood.png", Ok(ImageData::white())),
        1
    );
    assert!(world.poll_textures());
    assert!(matches!(binding(&world, "n2"), TextureBinding::Ready(_)));
    assert!(matches!(binding(&world, "n4"), TextureBinding::Ready(_)));
    assert!(!world.has_pending_textures());
    assert_eq!(world.textures().stats().shared_hits, 1);
}

#[test]
fn test_texture_transform_splits_instances() {
    let (mut world, loader) = world_with(ViewerConfig::default());
    world.insert_markup(None, "<Group id='n0'/>").unwrap();
    let n0 = NodeId::from("n0");
    let markup = [
        textured_shape("n1", "n2", "tiles.png", ""),
        textured_shape("n3", "n4", "tiles.png", "<TextureTransform scale='4 4'/>"),
    ]
    .concat();
    world.insert_markup(Some(&n0), &markup).unwrap();

    assert_eq!(loader.0.borrow().requested_urls().len(), 2);
    assert_ne!(
        binding(&world, "n2").handle(),
        binding(&world, "n4").handle()
    );
}

#[test]
fn test_failed_load_keeps_placeholder_node() {
    let (mut world, loader) = world_with(ViewerConfig::default());
    world
        .insert_markup(None, &textured_shape("n1", "n2", "missing.png", ""))
        .unwrap();
    loader
        .0
        .borrow_mut()
        .complete_next(Err("404".to_string()));
    assert!(world.poll_textures());

    let handle = match binding(&world, "n2") {
        TextureBinding::Failed(handle) => handle,
        other => panic!("expected a failed binding, got {other:?}"),
    };
    assert_eq!(world.textures().failure(handle), Some("404"));
    assert!(world.store().lookup(&NodeId::from("n1")).is_some());
}

#[test]
fn test_timed_out_texture_still_binds_late() {
    let config = ViewerConfig {
        texture_timeout_ms: 100,
        ..ViewerConfig::default()
    };
    let (mut world, loader) = world_with(config);
    world.set_time(1_000);
    world
        .insert_markup(None, &textured_shape("n1", "n2", "slow.png", ""))
        .unwrap();
    assert!(world.has_pending_textures());

    world.set_time(1_050);
    world.poll_textures();
    assert!(world.has_pending_textures());

    world.set_time(1_200);
    // Timing out changes nothing visible
    assert!(!world.poll_textures());
    assert!(!world.has_pending_textures());
    assert!(matches!(binding(&world, "n2"), TextureBinding::Pending(_)));

    loader.0.borrow_mut().complete_all(Ok(ImageData::white()));
    assert!(world.poll_textures());
    assert!(matches!(binding(&world, "n2"), TextureBinding::Ready(_)));
}

#[test]
fn test_teardown_orphans_pending_loads() {
    let (mut world, loader) = world_with(ViewerConfig::default());
    world
        .insert_markup(None, &textured_shape("n1", "n2", "late.png", ""))
        .unwrap();
    assert_eq!(loader.0.borrow().pending_len(), 1);

    world.destroy();
    assert!(world.store().is_empty());
    assert!(world.textures().is_empty());
    assert!(!world.has_pending_textures());

    // Nobody listens any more
    assert_eq!(
        loader.0.borrow_mut().complete_url("late.png", Ok(ImageData::white())),
        0
    );
    assert!(!world.poll_textures());

    // A new scene requests the url afresh
    world
        .insert_markup(None, &textured_shape("n1", "n2", "late.png", ""))
        .unwrap();
    assert!(matches!(binding(&world, "n2"), TextureBinding::Pending(_)));
    assert_eq!(loader.0.borrow().requested_urls().len(), 2);
}

#[test]
fn test_prefix_applies_to_relative_urls_only() {
    let config = ViewerConfig {
        texture_path_prefix: "https://cdn.example/textures".to_string(),
        ..ViewerConfig::default()
    };
    let (mut world, loader) = world_with(config);
    world.insert_markup(None, "<Group id='n0'/>").unwrap();
    let n0 = NodeId::from("n0");
    let markup = [
        textured_shape("n1", "n2", "grass.jpg", ""),
        textured_shape("n3", "n4", "https://other.example/sky.jpg", ""),
    ]
    .concat();
    world.insert_markup(Some(&n0), &markup).unwrap();

    assert_eq!(
        loader.0.borrow().requested_urls(),
        [
            "https://cdn.example/textures/grass.jpg",
            "https://other.example/sky.jpg"
        ]
    );
}

#[test]
fn test_animated_texture_transform_keeps_one_texture() {
    let (mut world, loader) = world_with(ViewerConfig::default());
    world
        .insert_markup(
            None,
            &textured_shape("n1", "n2", "belt.png", "<TextureTransform id='n3'/>"),
        )
        .unwrap();

    for step in 1..=50 {
        let json = format!(r#"[{{"id": "n3", "translation": "{} 0"}}]"#, step as f32 / 100.0);
        world.apply_batch(&PoseBatch::from_json(&json).unwrap()).unwrap();
        assert_eq!(world.textures().len(), 1, "step {step}");
    }
    assert_eq!(loader.0.borrow().pending_len(), 51);

    // Only the latest load has anyone waiting for it
    let delivered = loader.0.borrow_mut().complete_url("belt.png", Ok(ImageData::white()));
    assert_eq!(delivered, 1);
    assert!(world.poll_textures());
    assert!(matches!(binding(&world, "n2"), TextureBinding::Ready(_)));
}
