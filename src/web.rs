//! Browser bindings
//!
//! JavaScript owns the websocket, the image decoder and the renderer. It
//! feeds frames to [`WebSceneClient::handle_message`], answers texture
//! requests asynchronously through `texture_loaded`/`texture_failed` and
//! receives everything else through one event callback.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Function;
use rustc_hash::FxHashMap;
use wasm_bindgen::prelude::*;

use crate::animation::recording::Recording;
use crate::config::{ConfigFormat, ViewerConfig};
use crate::network::protocol::Label;
use crate::network::session::{MessageOutcome, SceneSession, SessionObserver};
use crate::texture::{ImageData, TextureCompletion, TextureLoader, TextureRequest};

type Completions = Rc<RefCell<FxHashMap<u64, TextureCompletion>>>;

/// Forwards texture requests to a JS `fetch(handle, url)` hook
struct JsTextureLoader {
    fetch: Function,
    completions: Completions,
}

impl TextureLoader for JsTextureLoader {
    fn load_or_retrieve(
        &mut self,
        request: &TextureRequest,
        completion: TextureCompletion,
    ) -> Option<ImageData> {
        let handle = request.handle.raw();
        let called = self.fetch.call2(
            &JsValue::NULL,
            &JsValue::from_f64(handle as f64),
            &JsValue::from_str(request.url()),
        );
        match called {
            Ok(_) => {
                self.completions.borrow_mut().insert(handle, completion);
            }
            Err(error) => {
                log::warn!("Texture hook failed for {}: {:?}", request.url(), error);
                completion.complete(Err("texture hook threw".to_string()));
            }
        }
        None
    }
}

/// Calls `onEvent(kind, payload)` for every collaborator message
struct JsObserver {
    on_event: Function,
}

impl JsObserver {
    fn emit(&self, kind: &str, payload: JsValue) {
        if let Err(error) = self
            .on_event
            .call2(&JsValue::NULL, &JsValue::from_str(kind), &payload)
        {
            log::warn!("Event handler failed on '{}': {:?}", kind, error);
        }
    }
}

impl SessionObserver for JsObserver {
    fn redraw_requested(&mut self) {
        self.emit("redraw", JsValue::UNDEFINED);
    }

    fn label(&mut self, label: &Label) {
        let payload = js_sys::Array::of2(
            &JsValue::from_str(&label.id),
            &JsValue::from_str(&label.text),
        );
        self.emit("label", payload.into());
    }

    fn loading_progress(&mut self, stage: &str, percent: Option<f32>) {
        let percent = percent.map_or(JsValue::NULL, |p| JsValue::from_f64(p as f64));
        let payload = js_sys::Array::of2(&JsValue::from_str(stage), &percent);
        self.emit("loading", payload.into());
    }

    fn controller_file(&mut self, file: &str) {
        self.emit("controller", JsValue::from_str(file));
    }

    fn console(&mut self, text: &str) {
        self.emit("console", JsValue::from_str(text));
    }

    fn simulation_time(&mut self, time_ms: f64) {
        self.emit("time", JsValue::from_f64(time_ms));
    }

    fn scene_loaded(&mut self) {
        self.emit("sceneLoaded", JsValue::UNDEFINED);
    }

    fn reset_finished(&mut self) {
        self.emit("resetFinished", JsValue::UNDEFINED);
    }

    fn simulation_paused(&mut self) {
        self.emit("pause", JsValue::UNDEFINED);
    }
}

#[wasm_bindgen]
pub struct WebSceneClient {
    session: SceneSession<JsObserver>,
    completions: Completions,
}

#[wasm_bindgen]
impl WebSceneClient {
    /// `config` is an optional JSON viewer configuration
    #[wasm_bindgen(constructor)]
    pub fn new(
        config: Option<String>,
        fetch_texture: Function,
        on_event: Function,
    ) -> Result<WebSceneClient, JsValue> {
        console_error_panic_hook::set_once();

        let config = match config {
            Some(raw) => ViewerConfig::parse(&raw, ConfigFormat::Json)
                .map_err(|e| JsValue::from_str(&e.to_string()))?,
            None => ViewerConfig::default(),
        };
        // Already initialized when several clients live on one page
        let level = config.level_filter().to_level().unwrap_or(log::Level::Info);
        let _ = console_log::init_with_level(level);

        let completions = Completions::default();
        let loader = JsTextureLoader {
            fetch: fetch_texture,
            completions: completions.clone(),
        };
        let session = SceneSession::new(&config, Box::new(loader), JsObserver { on_event });
        log::info!("Scene client ready");
        Ok(WebSceneClient {
            session,
            completions,
        })
    }

    /// Returns `false` when the message was dropped
    #[wasm_bindgen(js_name = handleMessage)]
    pub fn handle_message(&mut self, raw: &str) -> bool {
        !matches!(
            self.session.handle_message(raw),
            MessageOutcome::Dropped(_)
        )
    }

    pub fn tick(&mut self, now_ms: f64) {
        self.session.tick(now_ms.max(0.0) as u64);
    }

    /// Deliver decoded RGBA8 pixels; `false` if nobody waits any more
    #[wasm_bindgen(js_name = textureLoaded)]
    pub fn texture_loaded(
        &mut self,
        handle: f64,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> bool {
        self.complete(handle, Ok(ImageData::new(width, height, pixels)))
    }

    #[wasm_bindgen(js_name = textureFailed)]
    pub fn texture_failed(&mut self, handle: f64, error: String) -> bool {
        self.complete(handle, Err(error))
    }

    /// The texture is bound on the next `tick`
    fn complete(&mut self, handle: f64, result: Result<ImageData, String>) -> bool {
        let completion = self.completions.borrow_mut().remove(&(handle as u64));
        completion.is_some_and(|completion| completion.complete(result))
    }

    #[wasm_bindgen(js_name = loadAnimation)]
    pub fn load_animation(&mut self, json: &str) -> Result<(), JsValue> {
        let recording =
            Recording::from_json(json).map_err(|e| JsValue::from_str(&e.to_string()))?;
        self.session.load_animation(recording);
        Ok(())
    }

    pub fn play(&mut self) {
        self.session.play();
    }

    pub fn pause(&mut self) {
        self.session.pause();
    }

    #[wasm_bindgen(js_name = togglePlayback)]
    pub fn toggle_playback(&mut self) {
        self.session.toggle_playback();
    }

    #[wasm_bindgen(js_name = beginScrub)]
    pub fn begin_scrub(&mut self) {
        self.session.begin_scrub();
    }

    #[wasm_bindgen(js_name = scrubTo)]
    pub fn scrub_to(&mut self, time_ms: f64) {
        self.session.scrub_to(time_ms);
    }

    #[wasm_bindgen(js_name = endScrub)]
    pub fn end_scrub(&mut self) {
        self.session.end_scrub();
    }

    pub fn seek(&mut self, time_ms: f64) {
        self.session.seek(time_ms);
    }

    #[wasm_bindgen(js_name = destroyWorld)]
    pub fn destroy_world(&mut self) {
        self.completions.borrow_mut().clear();
        self.session.destroy_world();
    }

    #[wasm_bindgen(js_name = hasPendingTextures)]
    pub fn has_pending_textures(&self) -> bool {
        self.session.has_pending_textures()
    }

    #[wasm_bindgen(js_name = nodeCount)]
    pub fn node_count(&self) -> usize {
        self.session.world().store().len()
    }
}
