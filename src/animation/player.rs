//! Playback of a [`Recording`] against a live scene
//!
//! The player never applies whole frames blindly. Moving from the last
//! applied frame to a new one scans only the frames in between, newest
//! first, and skips fields that a newer frame already wrote. Moving
//! backwards rescans from the first frame and finishes with the baseline
//! captured at load, so any position can be reached exactly.

use rustc_hash::FxHashMap;

use crate::animation::recording::{Frame, Recording};
use crate::error::SceneResult;
use crate::network::protocol::Label;
use crate::pose::applier::FieldSet;
use crate::pose::patch::FieldPatchSet;
use crate::scene::node::NodeId;

/// Scene side of playback
pub trait PoseTarget {
    /// Apply the fields of `patch` not in `already_applied`, returning the
    /// union
    fn apply_patch(
        &mut self,
        patch: &FieldPatchSet,
        already_applied: &FieldSet,
    ) -> SceneResult<FieldSet>;

    /// Current values of `fields` on `id`, or `None` if the node is missing
    fn snapshot(&mut self, id: &NodeId, fields: &[String]) -> Option<FieldPatchSet>;

    fn show_labels(&mut self, _labels: &[Label]) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    Seeking,
}

#[derive(Debug)]
pub struct AnimationPlayer {
    recording: Option<Recording>,
    /// Pre-animation values of every animated field
    baseline: Vec<FieldPatchSet>,
    state: PlayerState,
    resume_state: PlayerState,
    elapsed_ms: f64,
    last_applied: Option<usize>,
    looping: bool,
    autoplay: bool,
}

impl AnimationPlayer {
    pub fn new(autoplay: bool, looping: bool) -> Self {
        Self {
            recording: None,
            baseline: Vec::new(),
            state: PlayerState::Idle,
            resume_state: PlayerState::Paused,
            elapsed_ms: 0.0,
            last_applied: None,
            looping,
            autoplay,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    pub fn current_frame(&self) -> Option<usize> {
        self.last_applied
    }

    pub fn recording(&self) -> Option<&Recording> {
        self.recording.as_ref()
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Take ownership of a recording once the scene it animates is loaded
    pub fn load(&mut self, recording: Recording, target: &mut dyn PoseTarget) {
        self.baseline = recording
            .animated_ids
            .iter()
            .filter_map(|id| {
                let fields = recording.animated_fields(id);
                if fields.is_empty() {
                    return None;
                }
                let snapshot = target.snapshot(id, &fields);
                if snapshot.is_none() {
                    log::warn!("Animated node {} is not in the scene", id);
                }
                snapshot
            })
            .collect();
        self.recording = Some(recording);
        self.elapsed_ms = 0.0;
        self.last_applied = None;
        self.state = if self.autoplay {
            PlayerState::Playing
        } else {
            PlayerState::Idle
        };
        log::info!("Animation loaded, state {:?}", self.state);
    }

    /// Stop playback and give the recording back
    pub fn unload(&mut self) -> Option<Recording> {
        self.baseline.clear();
        self.state = PlayerState::Idle;
        self.elapsed_ms = 0.0;
        self.last_applied = None;
        self.recording.take()
    }

    pub fn play(&mut self) {
        match self.state {
            PlayerState::Idle | PlayerState::Paused if self.recording.is_some() => {
                self.state = PlayerState::Playing;
            }
            PlayerState::Seeking => self.resume_state = PlayerState::Playing,
            _ => {}
        }
    }

    pub fn pause(&mut self) {
        match self.state {
            PlayerState::Playing => self.state = PlayerState::Paused,
            PlayerState::Seeking => self.resume_state = PlayerState::Paused,
            _ => {}
        }
    }

    pub fn toggle(&mut self) {
        match self.state {
            PlayerState::Playing => self.pause(),
            _ => self.play(),
        }
    }

    /// Start dragging the time slider
    pub fn begin_scrub(&mut self) {
        if matches!(self.state, PlayerState::Playing | PlayerState::Paused) {
            self.resume_state = self.state;
            self.state = PlayerState::Seeking;
        }
    }

    /// Show the frame at `time_ms` while seeking
    pub fn scrub_to(&mut self, time_ms: f64, target: &mut dyn PoseTarget) -> SceneResult<()> {
        if self.state != PlayerState::Seeking {
            return Ok(());
        }
        self.elapsed_ms = time_ms.max(0.0);
        self.show_elapsed(target)
    }

    pub fn end_scrub(&mut self) {
        if self.state == PlayerState::Seeking {
            self.state = self.resume_state;
        }
    }

    /// Jump to `time_ms` without changing the play state
    pub fn seek(&mut self, time_ms: f64, target: &mut dyn PoseTarget) -> SceneResult<()> {
        if self.recording.is_none() {
            return Ok(());
        }
        self.elapsed_ms = time_ms.max(0.0);
        self.show_elapsed(target)
    }

    /// Advance the clock while playing and apply the frames it crossed
    pub fn tick(&mut self, dt_ms: f64, target: &mut dyn PoseTarget) -> SceneResult<()> {
        if self.state != PlayerState::Playing {
            return Ok(());
        }
        let Some(duration) = self.recording.as_ref().map(Recording::duration_ms) else {
            return Ok(());
        };
        if duration <= 0.0 {
            return Ok(());
        }

        self.elapsed_ms += dt_ms.max(0.0);
        if self.elapsed_ms >= duration {
            if self.looping {
                self.elapsed_ms %= duration;
            } else {
                self.elapsed_ms = duration;
                self.state = PlayerState::Paused;
                log::debug!("Animation reached its end");
            }
        }
        self.show_elapsed(target)
    }

    fn show_elapsed(&mut self, target: &mut dyn PoseTarget) -> SceneResult<()> {
        let Some(recording) = self.recording.as_ref() else {
            return Ok(());
        };
        let Some(index) = recording.frame_index_at(self.elapsed_ms) else {
            return Ok(());
        };

        let (start, with_baseline) = match self.last_applied {
            Some(previous) if index == previous => return Ok(()),
            Some(previous) if index > previous => (previous + 1, false),
            _ => (0, true),
        };
        let rejected = apply_window(
            &recording.frames[start..=index],
            with_baseline.then_some(self.baseline.as_slice()),
            target,
        );
        if rejected > 0 {
            log::warn!("Frame {}: {} animated pose(s) rejected", index, rejected);
        }

        if let Some(labels) = recording.frames[..=index]
            .iter()
            .rev()
            .find(|frame| !frame.labels.is_empty())
            .map(|frame| frame.labels.as_slice())
        {
            target.show_labels(labels);
        }
        self.last_applied = Some(index);
        Ok(())
    }
}

/// Apply `frames` newest-first so each field is written once with its
/// latest value, then fill the untouched fields from `baseline`
///
/// A patch the scene rejects writes nothing and leaves its fields open for
/// older frames, the same outcome as applying the frames one by one.
/// Returns how many patches were rejected for bad values.
fn apply_window(
    frames: &[Frame],
    baseline: Option<&[FieldPatchSet]>,
    target: &mut dyn PoseTarget,
) -> usize {
    let mut applied: FxHashMap<NodeId, FieldSet> = FxHashMap::default();
    let mut rejected = 0;
    let newest_first = frames.iter().rev().flat_map(|frame| frame.poses.iter());
    for patch in newest_first.chain(baseline.into_iter().flatten()) {
        let already = applied.remove(&patch.id).unwrap_or_default();
        match target.apply_patch(patch, &already) {
            Ok(written) => {
                applied.insert(patch.id.clone(), written);
            }
            Err(error) => {
                if error.is_recoverable() {
                    log::debug!("Skipping animated pose: {}", error);
                } else {
                    log::warn!("Rejected animated pose for {}: {}", patch.id, error);
                    rejected += 1;
                }
                applied.insert(patch.id.clone(), already);
            }
        }
    }
    rejected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{invalid_field, not_found};

    /// Records the final value of every (node, field) and how often it was
    /// written
    #[derive(Default)]
    struct FakeScene {
        values: FxHashMap<(NodeId, String), String>,
        writes: usize,
        labels: Vec<String>,
    }

    impl PoseTarget for FakeScene {
        fn apply_patch(&mut self, patch: &FieldPatchSet, already: &FieldSet) -> SceneResult<FieldSet> {
            if patch.id.as_str() == "n404" {
                return Err(not_found(&patch.id));
            }
            if let Some((field, _)) = patch.fields.iter().find(|(_, v)| v.as_str() == "oops") {
                return Err(invalid_field("Transform", field, "not a number"));
            }
            let mut result = already.clone();
            for (field, value) in &patch.fields {
                if result.insert(field.clone()) {
                    self.values
                        .insert((patch.id.clone(), field.clone()), value.as_str().to_string());
                    self.writes += 1;
                }
            }
            Ok(result)
        }

        fn snapshot(&mut self, id: &NodeId, fields: &[String]) -> Option<FieldPatchSet> {
            let mut patch = FieldPatchSet::new(id.clone());
            for field in fields {
                let value = self
                    .values
                    .get(&(id.clone(), field.clone()))
                    .cloned()
                    .unwrap_or_else(|| "initial".to_string());
                patch = patch.with_field(field, value);
            }
            Some(patch)
        }

        fn show_labels(&mut self, labels: &[Label]) {
            self.labels = labels.iter().map(|label| label.text.clone()).collect();
        }
    }

    impl FakeScene {
        fn value(&self, id: &str, field: &str) -> Option<&str> {
            self.values
                .get(&(NodeId::from(id), field.to_string()))
                .map(String::as_str)
        }
    }

    fn frame(poses: &[(&str, &str, &str)]) -> Frame {
        Frame {
            time: 0.0,
            poses: poses
                .iter()
                .map(|(id, field, value)| FieldPatchSet::new(*id).with_field(field, *value))
                .collect(),
            labels: Vec::new(),
        }
    }

    fn recording() -> Recording {
        Recording::new(
            10.0,
            vec![
                frame(&[("n1", "translation", "0 0 0")]),
                frame(&[("n1", "translation", "1 0 0"), ("n2", "render", "false")]),
                frame(&[("n1", "translation", "2 0 0")]),
                frame(&[("n2", "render", "true")]),
            ],
        )
    }

    #[test]
    fn test_autoplay_transitions() {
        let mut scene = FakeScene::default();
        let mut player = AnimationPlayer::new(false, false);
        player.load(recording(), &mut scene);
        assert_eq!(player.state(), PlayerState::Idle);
        player.tick(100.0, &mut scene).unwrap();
        assert_eq!(player.current_frame(), None);

        player.play();
        assert_eq!(player.state(), PlayerState::Playing);
        player.toggle();
        assert_eq!(player.state(), PlayerState::Paused);
        player.toggle();
        assert_eq!(player.state(), PlayerState::Playing);

        let mut autoplay = AnimationPlayer::new(true, false);
        autoplay.load(recording(), &mut scene);
        assert_eq!(autoplay.state(), PlayerState::Playing);
    }

    #[test]
    fn test_forward_window_writes_each_field_once() {
        let mut scene = FakeScene::default();
        let mut player = AnimationPlayer::new(true, false);
        player.load(recording(), &mut scene);

        player.tick(0.0, &mut scene).unwrap();
        assert_eq!(scene.value("n1", "translation"), Some("0 0 0"));

        scene.writes = 0;
        player.tick(25.0, &mut scene).unwrap();
        assert_eq!(player.current_frame(), Some(2));
        assert_eq!(scene.value("n1", "translation"), Some("2 0 0"));
        assert_eq!(scene.value("n2", "render"), Some("false"));
        // translation once from frame 2, render once from frame 1
        assert_eq!(scene.writes, 2);
    }

    #[test]
    fn test_seek_backwards_restores_baseline() {
        let mut scene = FakeScene::default();
        let mut player = AnimationPlayer::new(true, false);
        player.load(recording(), &mut scene);
        player.tick(35.0, &mut scene).unwrap();
        assert_eq!(scene.value("n2", "render"), Some("true"));

        player.begin_scrub();
        assert_eq!(player.state(), PlayerState::Seeking);
        player.scrub_to(5.0, &mut scene).unwrap();
        assert_eq!(scene.value("n1", "translation"), Some("0 0 0"));
        // Not animated by frame 0, so the baseline value comes back
        assert_eq!(scene.value("n2", "render"), Some("initial"));

        player.end_scrub();
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[test]
    fn test_seek_matches_sequential_replay() {
        let mut sequential = FakeScene::default();
        let mut player = AnimationPlayer::new(true, false);
        player.load(recording(), &mut sequential);
        for _ in 0..3 {
            player.tick(10.0, &mut sequential).unwrap();
        }

        let mut jumped = FakeScene::default();
        let mut seeker = AnimationPlayer::new(false, false);
        seeker.load(recording(), &mut jumped);
        seeker.seek(35.0, &mut jumped).unwrap();
        seeker.seek(12.0, &mut jumped).unwrap();
        seeker.seek(30.0, &mut jumped).unwrap();

        assert_eq!(sequential.values, jumped.values);
    }

    #[test]
    fn test_end_of_animation() {
        let mut scene = FakeScene::default();
        let mut player = AnimationPlayer::new(true, false);
        player.load(recording(), &mut scene);
        player.tick(500.0, &mut scene).unwrap();
        assert_eq!(player.state(), PlayerState::Paused);
        assert_eq!(player.current_frame(), Some(3));

        let mut looping = AnimationPlayer::new(true, true);
        looping.load(recording(), &mut scene);
        looping.tick(35.0, &mut scene).unwrap();
        looping.tick(10.0, &mut scene).unwrap();
        assert_eq!(looping.state(), PlayerState::Playing);
        assert_eq!(looping.current_frame(), Some(0));
        assert_eq!(scene.value("n1", "translation"), Some("0 0 0"));
    }

    #[test]
    fn test_missing_nodes_do_not_stop_playback() {
        let mut scene = FakeScene::default();
        let mut player = AnimationPlayer::new(true, false);
        let mut recording = recording();
        recording.frames[1]
            .poses
            .push(FieldPatchSet::new("n404").with_field("translation", "1 1 1"));
        player.load(recording, &mut scene);
        player.tick(15.0, &mut scene).unwrap();
        assert_eq!(player.current_frame(), Some(1));
    }

    #[test]
    fn test_bad_recorded_value_does_not_stall_playback() {
        let mut scene = FakeScene::default();
        let mut player = AnimationPlayer::new(true, false);
        let recording = Recording::new(
            10.0,
            vec![
                frame(&[("n1", "translation", "0 0 0")]),
                frame(&[("n1", "rotation", "oops"), ("n2", "render", "false")]),
                frame(&[("n1", "translation", "2 0 0")]),
                frame(&[("n1", "translation", "3 0 0")]),
            ],
        );
        player.load(recording, &mut scene);

        player.tick(0.0, &mut scene).unwrap();
        let mut frames = Vec::new();
        for _ in 0..3 {
            player.tick(10.0, &mut scene).unwrap();
            frames.push(player.current_frame());
        }
        assert_eq!(frames, vec![Some(1), Some(2), Some(3)]);
        assert_eq!(scene.value("n1", "translation"), Some("3 0 0"));
        assert_eq!(scene.value("n2", "render"), Some("false"));
        assert_eq!(scene.value("n1", "rotation"), Some("initial"));

        // Seeking back across the bad frame still lands exactly
        player.seek(15.0, &mut scene).unwrap();
        assert_eq!(player.current_frame(), Some(1));
        assert_eq!(scene.value("n1", "translation"), Some("0 0 0"));
    }

    #[test]
    fn test_labels_follow_current_frame() {
        let mut scene = FakeScene::default();
        let mut player = AnimationPlayer::new(true, false);
        let mut recording = recording();
        recording.frames[1].labels.push(Label {
            text: "lap 1".to_string(),
            ..Label::default()
        });
        player.load(recording, &mut scene);
        player.tick(25.0, &mut scene).unwrap();
        assert_eq!(scene.labels, vec!["lap 1".to_string()]);
    }
}
