/// Scene replay tool
/// Feeds a recorded message log (one transport frame per line) into a scene
/// session, optionally plays an animation recording on top of it, and prints
/// what happened.
///
/// Usage: scene_replay <messages.log> [recording.json] [--config viewer.toml]

use std::path::PathBuf;

use anyhow::{bail, Context};
use scene_stream::animation::Recording;
use scene_stream::config::ViewerConfig;
use scene_stream::network::{Label, MessageOutcome, SceneSession, SessionObserver};
use scene_stream::texture::{ImageData, TextureCompletion, TextureLoader, TextureRequest};

/// Simulated host frame interval
const FRAME_MS: u64 = 16;

/// Every texture resolves to a white pixel at once
struct WhiteTextureLoader;

impl TextureLoader for WhiteTextureLoader {
    fn load_or_retrieve(
        &mut self,
        request: &TextureRequest,
        _completion: TextureCompletion,
    ) -> Option<ImageData> {
        log::debug!("Texture {} served as placeholder", request.url());
        Some(ImageData::white())
    }
}

#[derive(Default)]
struct ReplayObserver {
    redraws: usize,
    labels: usize,
    console_lines: usize,
}

impl SessionObserver for ReplayObserver {
    fn redraw_requested(&mut self) {
        self.redraws += 1;
    }

    fn label(&mut self, label: &Label) {
        self.labels += 1;
        log::debug!("Label {}: {}", label.id, label.text);
    }

    fn loading_progress(&mut self, stage: &str, percent: Option<f32>) {
        match percent {
            Some(percent) => log::info!("Loading: {} {:.0}%", stage, percent),
            None => log::info!("Loading: {}", stage),
        }
    }

    fn console(&mut self, text: &str) {
        self.console_lines += 1;
        println!("[console] {}", text);
    }
}

struct Args {
    messages: PathBuf,
    recording: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = Some(PathBuf::from(args.next().context("--config needs a path")?));
        } else {
            positional.push(PathBuf::from(arg));
        }
    }
    let mut positional = positional.into_iter();
    let Some(messages) = positional.next() else {
        bail!("usage: scene_replay <messages.log> [recording.json] [--config viewer.toml]");
    };
    Ok(Args {
        messages,
        recording: positional.next(),
        config,
    })
}

fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::default(),
    };
    env_logger::Builder::new()
        .filter_level(config.level_filter())
        .parse_default_env()
        .init();

    println!("Scene Replay");
    println!("============");

    let log = std::fs::read_to_string(&args.messages)
        .with_context(|| format!("reading {}", args.messages.display()))?;
    let mut session = SceneSession::new(
        &config,
        Box::new(WhiteTextureLoader),
        ReplayObserver::default(),
    );

    let mut now_ms = 0;
    for (line, raw) in log.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        if let MessageOutcome::Dropped(category) = session.handle_message(raw) {
            println!("line {}: dropped ({:?})", line + 1, category);
        }
        now_ms += FRAME_MS;
        session.tick(now_ms);
    }

    if let Some(path) = &args.recording {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let recording = Recording::from_json(&raw)?;
        let duration = recording.duration_ms() as u64;
        session.load_animation(recording);
        if !session.is_scene_loaded() {
            session.handle_message("scene load completed");
        }
        session.play();
        let end = now_ms + duration + FRAME_MS;
        while now_ms < end {
            now_ms += FRAME_MS;
            session.tick(now_ms);
        }
        println!(
            "Animation: state {:?}, frame {:?}",
            session.playback_state(),
            session.player().current_frame()
        );
    }

    let stats = session.stats();
    let store = session.world().store();
    let textures = session.world().textures().stats();
    println!(
        "\nMessages:  {} ({} applied, {} forwarded, {} dropped)",
        stats.messages, stats.applied, stats.forwarded, stats.dropped
    );
    println!("Poses skipped (missing node): {}", stats.skipped_poses);
    println!("Nodes:     {}", store.len());
    println!("Lookups:   {:?}", store.stats());
    println!(
        "Textures:  {} requested, {} loads, {} shared",
        textures.requests, textures.loads_started, textures.shared_hits
    );
    let observer = session.observer();
    println!(
        "Redraws:   {}, labels: {}, console lines: {}",
        observer.redraws, observer.labels, observer.console_lines
    );
    Ok(())
}
