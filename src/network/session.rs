//! Message dispatch for one viewer connection
//!
//! The session is the error boundary of the core: whatever a message does
//! wrong is logged and reported as a [`MessageOutcome`], never returned to
//! the transport or the renderer.

use crate::animation::player::{AnimationPlayer, PlayerState, PoseTarget};
use crate::animation::recording::Recording;
use crate::config::ViewerConfig;
use crate::error::{ErrorCategory, SceneError, SceneResult};
use crate::network::protocol::{Label, Message};
use crate::pose::applier::FieldSet;
use crate::pose::patch::{FieldPatchSet, PoseBatch};
use crate::scene::node::NodeId;
use crate::texture::TextureLoader;
use crate::world::SceneWorld;

/// Collaborators outside the scene core; every hook defaults to a no-op
pub trait SessionObserver {
    fn redraw_requested(&mut self) {}
    fn label(&mut self, _label: &Label) {}
    fn loading_progress(&mut self, _stage: &str, _percent: Option<f32>) {}
    fn controller_file(&mut self, _file: &str) {}
    fn console(&mut self, _text: &str) {}
    fn simulation_time(&mut self, _time_ms: f64) {}
    fn scene_loaded(&mut self) {}
    fn reset_finished(&mut self) {}
    fn simulation_paused(&mut self) {}
}

impl SessionObserver for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The scene or the session state changed
    Applied,
    /// Handed to a collaborator
    Forwarded,
    /// Rejected; the scene is unchanged
    Dropped(ErrorCategory),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub messages: u64,
    pub applied: u64,
    pub forwarded: u64,
    pub dropped: u64,
    /// Pose patches skipped because their node was gone
    pub skipped_poses: u64,
}

/// Pose target that forwards animation labels to the observer
struct Playback<'a, O> {
    world: &'a mut SceneWorld,
    observer: &'a mut O,
}

impl<O: SessionObserver> PoseTarget for Playback<'_, O> {
    fn apply_patch(
        &mut self,
        patch: &FieldPatchSet,
        already_applied: &FieldSet,
    ) -> SceneResult<FieldSet> {
        self.world.apply_patch(patch, already_applied)
    }

    fn snapshot(&mut self, id: &NodeId, fields: &[String]) -> Option<FieldPatchSet> {
        self.world.snapshot(id, fields)
    }

    fn show_labels(&mut self, labels: &[Label]) {
        for label in labels {
            self.observer.label(label);
        }
    }
}

pub struct SceneSession<O: SessionObserver> {
    world: SceneWorld,
    player: AnimationPlayer,
    observer: O,
    /// Recording waiting for the scene it animates
    pending_recording: Option<Recording>,
    scene_loaded: bool,
    last_tick_ms: Option<u64>,
    stats: SessionStats,
}

impl<O: SessionObserver> SceneSession<O> {
    pub fn new(config: &ViewerConfig, loader: Box<dyn TextureLoader>, observer: O) -> Self {
        Self {
            world: SceneWorld::new(config, loader),
            player: AnimationPlayer::new(config.autoplay, config.loop_animation),
            observer,
            pending_recording: None,
            scene_loaded: false,
            last_tick_ms: None,
            stats: SessionStats::default(),
        }
    }

    pub fn world(&self) -> &SceneWorld {
        &self.world
    }

    pub fn player(&self) -> &AnimationPlayer {
        &self.player
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_scene_loaded(&self) -> bool {
        self.scene_loaded
    }

    /// Handle one transport frame
    pub fn handle_message(&mut self, raw: &str) -> MessageOutcome {
        self.stats.messages += 1;
        let outcome = match Message::classify(raw).and_then(|message| self.dispatch(message)) {
            Ok(outcome) => outcome,
            Err(error) => {
                report(&error);
                MessageOutcome::Dropped(error.category())
            }
        };
        match outcome {
            MessageOutcome::Applied => self.stats.applied += 1,
            MessageOutcome::Forwarded => self.stats.forwarded += 1,
            MessageOutcome::Dropped(_) => self.stats.dropped += 1,
        }
        self.flush_redraw();
        outcome
    }

    fn dispatch(&mut self, message: Message<'_>) -> SceneResult<MessageOutcome> {
        match message {
            Message::Node { parent, markup } => {
                self.world.insert_markup(parent.as_ref(), markup)?;
            }
            Message::Delete(id) => {
                self.world.delete(&id)?;
            }
            Message::Pose(json) => {
                let batch = PoseBatch::from_json(json)?;
                let report = self.world.apply_batch(&batch)?;
                self.stats.skipped_poses += report.skipped.len() as u64;
                if let Some(time) = batch.time {
                    self.observer.simulation_time(time);
                }
            }
            Message::Model(markup) => {
                self.world.load_model(markup)?;
                if let Some(recording) = self.player.unload() {
                    self.pending_recording = Some(recording);
                }
                self.scene_loaded = false;
            }
            Message::TexturePrefix(prefix) => self.world.set_texture_prefix(prefix),
            Message::SceneLoadCompleted => {
                self.scene_loaded = true;
                if let Some(recording) = self.pending_recording.take() {
                    self.start_recording(recording);
                }
                self.observer.scene_loaded();
            }
            Message::Controller(file) => {
                self.observer.controller_file(file);
                return Ok(MessageOutcome::Forwarded);
            }
            Message::Label(json) => {
                let label = Label::from_json(json)?;
                self.observer.label(&label);
                return Ok(MessageOutcome::Forwarded);
            }
            Message::Loading { stage, percent } => {
                self.observer.loading_progress(stage, percent);
                return Ok(MessageOutcome::Forwarded);
            }
            Message::ResetFinished => {
                self.observer.reset_finished();
                return Ok(MessageOutcome::Forwarded);
            }
            Message::Pause => {
                self.observer.simulation_paused();
                return Ok(MessageOutcome::Forwarded);
            }
            Message::RealTime(time) => {
                self.observer.simulation_time(time);
                return Ok(MessageOutcome::Forwarded);
            }
            Message::Console(text) => {
                self.observer.console(text);
                return Ok(MessageOutcome::Forwarded);
            }
        }
        Ok(MessageOutcome::Applied)
    }

    /// Play `recording` once the scene is loaded
    pub fn load_animation(&mut self, recording: Recording) {
        if self.scene_loaded {
            self.start_recording(recording);
        } else {
            log::debug!("Scene not loaded yet, holding the recording");
            self.pending_recording = Some(recording);
        }
    }

    fn start_recording(&mut self, recording: Recording) {
        let mut target = Playback {
            world: &mut self.world,
            observer: &mut self.observer,
        };
        self.player.load(recording, &mut target);
    }

    /// Advance to host time `now_ms`: bind finished textures and move the
    /// animation clock
    pub fn tick(&mut self, now_ms: u64) {
        let dt_ms = self
            .last_tick_ms
            .map_or(0, |last| now_ms.saturating_sub(last));
        self.last_tick_ms = Some(now_ms);

        self.world.set_time(now_ms);
        self.world.poll_textures();

        let mut target = Playback {
            world: &mut self.world,
            observer: &mut self.observer,
        };
        if let Err(error) = self.player.tick(dt_ms as f64, &mut target) {
            report(&error);
        }
        self.flush_redraw();
    }

    pub fn has_pending_textures(&self) -> bool {
        self.world.has_pending_textures()
    }

    pub fn play(&mut self) {
        self.player.play();
    }

    pub fn pause(&mut self) {
        self.player.pause();
    }

    pub fn toggle_playback(&mut self) {
        self.player.toggle();
    }

    pub fn playback_state(&self) -> PlayerState {
        self.player.state()
    }

    pub fn begin_scrub(&mut self) {
        self.player.begin_scrub();
    }

    pub fn scrub_to(&mut self, time_ms: f64) {
        let mut target = Playback {
            world: &mut self.world,
            observer: &mut self.observer,
        };
        if let Err(error) = self.player.scrub_to(time_ms, &mut target) {
            report(&error);
        }
        self.flush_redraw();
    }

    pub fn end_scrub(&mut self) {
        self.player.end_scrub();
    }

    pub fn seek(&mut self, time_ms: f64) {
        let mut target = Playback {
            world: &mut self.world,
            observer: &mut self.observer,
        };
        if let Err(error) = self.player.seek(time_ms, &mut target) {
            report(&error);
        }
        self.flush_redraw();
    }

    /// Tear the scene down; pending texture loads become no-ops
    pub fn destroy_world(&mut self) {
        self.player.unload();
        self.pending_recording = None;
        self.scene_loaded = false;
        self.world.destroy();
        self.flush_redraw();
    }

    fn flush_redraw(&mut self) {
        if self.world.take_redraw() {
            self.observer.redraw_requested();
        }
    }
}

fn report(error: &SceneError) {
    if error.is_recoverable() {
        log::warn!("Dropping message: {}", error);
    } else {
        log::error!("Dropping message: {}", error);
    }
}
