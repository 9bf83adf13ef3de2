// Scene Stream Animation Replay Tests
//
// Seeking anywhere in a recording must leave the scene exactly as applying
// every frame up to that point one after the other would.

use scene_stream::{
    animation::{AnimationPlayer, Frame, PlayerState, PoseTarget, Recording},
    config::ViewerConfig,
    mutator::field_text,
    pose::{FieldPatchSet, FieldSet},
    scene::NodeId,
    texture::QueuedTextureLoader,
    world::SceneWorld,
};

const NODES: [&str; 3] = ["n1", "n2", "n3"];
const FIELDS: [&str; 3] = ["translation", "scale", "render"];
const FRAME_MS: f64 = 32.0;

/// Deterministic pseudo random sequence
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}

fn world() -> SceneWorld {
    let loader = Box::new(QueuedTextureLoader::new());
    let mut world = SceneWorld::new(&ViewerConfig::default(), loader);
    world
        .insert_markup(
            None,
            "<Group id='n0'>\
               <Transform id='n1' translation='0 0 1'/>\
               <Transform id='n2' scale='2 2 2'/>\
               <Transform id='n3' render='false'/>\
             </Group>",
        )
        .unwrap();
    world
}

fn value(rng: &mut Lcg, field: &str) -> String {
    match field {
        "render" => (rng.below(2) == 0).to_string(),
        _ => format!("{} {} {}", rng.below(10), rng.below(10), rng.below(10)),
    }
}

/// Frames touching a random subset of (node, field) pairs
fn recording(frames: usize, seed: u64) -> Recording {
    let mut rng = Lcg(seed);
    let mut recorded = Vec::with_capacity(frames);
    for index in 0..frames {
        let mut poses = Vec::new();
        for id in NODES {
            let mut patch = FieldPatchSet::new(id);
            for field in FIELDS {
                if rng.below(3) == 0 {
                    let value = value(&mut rng, field);
                    patch = patch.with_field(field, value);
                }
            }
            if !patch.fields.is_empty() {
                poses.push(patch);
            }
        }
        recorded.push(Frame {
            time: index as f64 * FRAME_MS,
            poses,
            labels: Vec::new(),
        });
    }
    Recording::new(FRAME_MS, recorded)
}

/// Every animated field of every node, as text
fn state(world: &mut SceneWorld) -> Vec<String> {
    let fields: Vec<String> = FIELDS.iter().map(|f| f.to_string()).collect();
    NODES
        .iter()
        .map(|id| {
            let snapshot = world.snapshot(&NodeId::from(*id), &fields).unwrap();
            format!("{:?}", snapshot.fields)
        })
        .collect()
}

/// Apply frames `0..=index` in order, each patch in full
fn sequential(recording: &Recording, index: usize) -> Vec<String> {
    let mut world = world();
    for frame in &recording.frames[..=index] {
        for patch in &frame.poses {
            world.apply_patch(patch, &FieldSet::default()).unwrap();
        }
    }
    state(&mut world)
}

#[test]
fn test_seeking_matches_sequential_application() {
    let recording = recording(40, 7);
    let mut world = world();
    let mut player = AnimationPlayer::new(false, false);
    player.load(recording.clone(), &mut world);

    let mut rng = Lcg(99);
    for _ in 0..25 {
        let index = rng.below(40) as usize;
        player
            .seek(index as f64 * FRAME_MS + 1.0, &mut world)
            .unwrap();
        assert_eq!(player.current_frame(), Some(index));
        assert_eq!(state(&mut world), sequential(&recording, index), "frame {index}");
    }
}

#[test]
fn test_playback_matches_sequential_application() {
    let recording = recording(30, 11);
    let mut world = world();
    let mut player = AnimationPlayer::new(true, false);
    player.load(recording.clone(), &mut world);

    // Uneven ticks skip frames
    for dt in [0.0, 5.0, 70.0, 33.0, 100.0, 1.0, 64.0] {
        player.tick(dt, &mut world).unwrap();
        let index = player.current_frame().unwrap();
        assert_eq!(state(&mut world), sequential(&recording, index));
    }
}

#[test]
fn test_seek_to_start_restores_untouched_fields() {
    let mut world = world();
    let before = state(&mut world);
    let recording = Recording::new(
        FRAME_MS,
        vec![
            Frame::default(),
            Frame {
                poses: vec![
                    FieldPatchSet::new("n1").with_field("translation", "9 9 9"),
                    FieldPatchSet::new("n3").with_field("render", "true"),
                ],
                ..Frame::default()
            },
        ],
    );
    let mut player = AnimationPlayer::new(false, false);
    player.load(recording, &mut world);

    player.seek(40.0, &mut world).unwrap();
    assert_ne!(state(&mut world), before);
    player.seek(0.0, &mut world).unwrap();
    assert_eq!(state(&mut world), before);
}

#[test]
fn test_state_machine_and_loop_wrap() {
    let recording = recording(4, 3);
    let mut world = world();

    let mut player = AnimationPlayer::new(false, true);
    player.load(recording.clone(), &mut world);
    assert_eq!(player.state(), PlayerState::Idle);
    player.pause();
    assert_eq!(player.state(), PlayerState::Idle);
    player.play();
    assert_eq!(player.state(), PlayerState::Playing);

    player.begin_scrub();
    assert_eq!(player.state(), PlayerState::Seeking);
    // Ticks do not move the clock while seeking
    player.tick(500.0, &mut world).unwrap();
    assert_eq!(player.current_frame(), None);
    player.scrub_to(3.0 * FRAME_MS, &mut world).unwrap();
    assert_eq!(player.current_frame(), Some(3));
    player.end_scrub();
    assert_eq!(player.state(), PlayerState::Playing);

    // 4 frames of 32 ms: 96 + 40 wraps to 8
    player.tick(40.0, &mut world).unwrap();
    assert_eq!(player.state(), PlayerState::Playing);
    assert_eq!(player.current_frame(), Some(0));
    assert_eq!(state(&mut world), sequential(&recording, 0));

    player.toggle();
    assert_eq!(player.state(), PlayerState::Paused);
    player.begin_scrub();
    player.end_scrub();
    assert_eq!(player.state(), PlayerState::Paused);

    let mut once = AnimationPlayer::new(true, false);
    once.load(recording.clone(), &mut world);
    once.tick(1_000.0, &mut world).unwrap();
    assert_eq!(once.state(), PlayerState::Paused);
    assert_eq!(once.current_frame(), Some(3));
}

#[test]
fn test_recording_file_drives_scene() {
    let mut world = world();
    let recording = Recording::from_json(
        r#"{"basicTimeStep": 32, "ids": "1",
            "frames": [{"time": 0, "poses": [{"id": 1, "translation": [1, 2, 3]}]}]}"#,
    )
    .unwrap();
    let mut player = AnimationPlayer::new(true, false);
    player.load(recording, &mut world);
    player.tick(0.0, &mut world).unwrap();

    let key = world.store().lookup(&NodeId::from("n1")).unwrap();
    let node = world.store().node(key).unwrap();
    assert_eq!(field_text(node, "translation").as_deref(), Some("1 2 3"));
}
