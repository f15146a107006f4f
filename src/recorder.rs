use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use anyhow::anyhow;
use bytes::Bytes;

use crate::codec::{CodecDevice, SurfaceHandle};
use crate::config::RecorderConfig;
use crate::encode::{AudioEncoderCore, VideoEncoderCore};
use crate::error::EncodeError;
use crate::gl::{GlContext, RecordSurface, Renderer, SharedContext, Viewport};
use crate::mux::{MuxSink, SharedMux};

/// Commands consumed by the recorder worker thread, in arrival order.
enum Command {
    Prepare,
    /// A frame is ready on the shared textures; timestamp in nanoseconds.
    FrameAvailable(i64),
    /// The embedder's GL context was rebuilt; rebind against the new one.
    UpdateSharedContext(SharedContext),
    Stop,
    Quit,
}

/// Platform seam: everything the worker needs created for one session.
/// All objects are handed over to the worker thread and released there.
pub trait RecorderBackend: Send {
    fn create_muxer(&mut self, path: &Path) -> anyhow::Result<Box<dyn crate::mux::Muxer>>;

    fn create_video_encoder(
        &mut self,
        config: &RecorderConfig,
    ) -> anyhow::Result<Box<dyn CodecDevice>>;

    fn create_audio_encoder(&mut self) -> anyhow::Result<Box<dyn CodecDevice>>;

    fn create_context(&mut self, shared: SharedContext) -> anyhow::Result<Box<dyn GlContext>>;

    fn create_surface(
        &mut self,
        context: &mut dyn GlContext,
        target: SurfaceHandle,
    ) -> anyhow::Result<Box<dyn RecordSurface>>;
}

/// Handle the embedder uses to push raw PCM into the session. A stub sink
/// (video-only session) swallows chunks silently.
#[derive(Clone)]
pub struct AudioSink {
    tx: Option<Sender<Bytes>>,
}

impl AudioSink {
    pub fn stub() -> Self {
        Self { tx: None }
    }

    pub fn push(&self, chunk: Bytes) {
        let Some(tx) = self.tx.as_ref() else {
            log::trace!("push::no audio track, dropping {} bytes", chunk.len());
            return;
        };
        if tx.send(chunk).is_err() {
            log::warn!("push::recorder worker is gone, dropping audio chunk");
        }
    }
}

/// Hooks fired from the worker thread.
pub struct RecorderCallbacks {
    pub on_prepared: Box<dyn FnMut(AudioSink) + Send>,
    pub on_post_render: Box<dyn FnMut() + Send>,
    pub on_fault: Box<dyn FnMut(EncodeError) + Send>,
}

impl Default for RecorderCallbacks {
    fn default() -> Self {
        Self {
            on_prepared: Box::new(|_| {}),
            on_post_render: Box::new(|| {}),
            on_fault: Box::new(|err| log::error!("recorder fault: {err}")),
        }
    }
}

#[derive(Default)]
struct Flags {
    ready: bool,
    running: bool,
}

struct WorkerSetup {
    config: RecorderConfig,
    backend: Box<dyn RecorderBackend>,
    renderer: Box<dyn Renderer>,
    viewport: Viewport,
    with_audio: bool,
    callbacks: RecorderCallbacks,
}

/// Encode-side coordinator. Owns a dedicated worker thread driving the GL
/// surface, encoder cores and muxer; the public methods only enqueue
/// commands and never block on codec work.
pub struct Recorder {
    shared: Arc<(Mutex<Flags>, Condvar)>,
    setup: Mutex<Option<WorkerSetup>>,
    tx: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    pub fn new(
        config: RecorderConfig,
        backend: Box<dyn RecorderBackend>,
        renderer: Box<dyn Renderer>,
        viewport: Viewport,
        with_audio: bool,
        callbacks: RecorderCallbacks,
    ) -> Self {
        Self {
            shared: Arc::new((Mutex::new(Flags::default()), Condvar::new())),
            setup: Mutex::new(Some(WorkerSetup {
                config,
                backend,
                renderer,
                viewport,
                with_audio,
                callbacks,
            })),
            tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker and ask it to build the encode pipeline. Blocks only
    /// until the worker's command loop is up, not until the pipeline exists.
    pub fn prepare(&self) {
        let (lock, cvar) = &*self.shared;
        {
            let mut flags = lock.lock().unwrap();
            if flags.running {
                log::warn!("prepare::recorder already running");
                return;
            }
            flags.running = true;
            flags.ready = false;
        }

        let Some(setup) = self.setup.lock().unwrap().take() else {
            log::warn!("prepare::recorder session already consumed");
            lock.lock().unwrap().running = false;
            return;
        };

        let (tx, rx) = mpsc::channel();
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("glbaker-recorder".into())
            .spawn(move || Worker::new(setup, shared).run(rx));

        match spawned {
            Ok(handle) => {
                *self.worker.lock().unwrap() = Some(handle);
            }
            Err(err) => {
                log::error!("prepare::failed to spawn recorder worker: {err}");
                lock.lock().unwrap().running = false;
                return;
            }
        }

        let mut flags = lock.lock().unwrap();
        while !flags.ready {
            flags = cvar.wait(flags).unwrap();
        }
        drop(flags);

        *self.tx.lock().unwrap() = Some(tx);
        self.send(Command::Prepare);
    }

    /// Notify the worker that a frame is ready on the shared textures.
    /// Dropped while the worker is not up, and for the zero timestamp some
    /// sources emit as a placeholder before real frames start flowing.
    pub fn frame_available(&self, ts_ns: i64) {
        {
            let flags = self.shared.0.lock().unwrap();
            if !flags.ready {
                return;
            }
        }
        if ts_ns == 0 {
            log::warn!("frame_available::got frame with timestamp zero, dropping");
            return;
        }
        self.send(Command::FrameAvailable(ts_ns));
    }

    pub fn update_shared_context(&self, shared: SharedContext) {
        self.send(Command::UpdateSharedContext(shared));
    }

    /// Ask the worker to flush, release the pipeline and exit. Returns
    /// immediately; use `join` to wait for the file to be finalized.
    pub fn stop(&self) {
        self.send(Command::Stop);
        self.send(Command::Quit);
    }

    pub fn is_recording(&self) -> bool {
        self.shared.0.lock().unwrap().running
    }

    pub fn join(&self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("join::recorder worker panicked");
            }
        }
    }

    fn send(&self, cmd: Command) {
        let tx = self.tx.lock().unwrap();
        let Some(tx) = tx.as_ref() else {
            log::trace!("send::no recorder worker");
            return;
        };
        if tx.send(cmd).is_err() {
            log::trace!("send::recorder worker is gone");
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

struct Worker {
    config: RecorderConfig,
    backend: Box<dyn RecorderBackend>,
    renderer: Option<Box<dyn Renderer>>,
    viewport: Viewport,
    with_audio: bool,
    callbacks: RecorderCallbacks,
    shared: Arc<(Mutex<Flags>, Condvar)>,
    mux: Option<SharedMux>,
    video: Option<VideoEncoderCore>,
    audio: Option<AudioEncoderCore>,
    context: Option<Box<dyn GlContext>>,
    surface: Option<Box<dyn RecordSurface>>,
    audio_rx: Option<Receiver<Bytes>>,
    last_pts_ns: i64,
}

impl Worker {
    fn new(setup: WorkerSetup, shared: Arc<(Mutex<Flags>, Condvar)>) -> Self {
        Self {
            config: setup.config,
            backend: setup.backend,
            renderer: Some(setup.renderer),
            viewport: setup.viewport,
            with_audio: setup.with_audio,
            callbacks: setup.callbacks,
            shared,
            mux: None,
            video: None,
            audio: None,
            context: None,
            surface: None,
            audio_rx: None,
            last_pts_ns: 0,
        }
    }

    fn run(mut self, rx: Receiver<Command>) {
        {
            let (lock, cvar) = &*self.shared;
            let mut flags = lock.lock().unwrap();
            flags.ready = true;
            cvar.notify_all();
        }
        log::debug!("run::recorder worker up");

        while let Ok(cmd) = rx.recv() {
            let result = match cmd {
                Command::Prepare => self.handle_prepare(),
                Command::FrameAvailable(ts_ns) => self.handle_frame(ts_ns),
                Command::UpdateSharedContext(shared) => self.handle_update_shared_context(shared),
                Command::Stop => self.handle_stop(),
                Command::Quit => break,
            };
            if let Err(err) = result {
                log::error!("run::recorder fault: {err}");
                (self.callbacks.on_fault)(err);
                break;
            }
        }

        // Quit without Stop, or a fault mid-command. Idempotent otherwise.
        self.release_pipeline();

        let (lock, cvar) = &*self.shared;
        let mut flags = lock.lock().unwrap();
        flags.ready = false;
        flags.running = false;
        cvar.notify_all();
        log::debug!("run::recorder worker exiting");
    }

    fn handle_prepare(&mut self) -> Result<(), EncodeError> {
        if self.video.is_some() {
            log::warn!("handle_prepare::pipeline already prepared");
            return Ok(());
        }
        let Some(renderer) = self.renderer.as_mut() else {
            log::warn!("handle_prepare::pipeline already released");
            return Ok(());
        };
        self.config.validate().map_err(EncodeError::Setup)?;

        let muxer = self
            .backend
            .create_muxer(&self.config.output_path)
            .map_err(EncodeError::MuxSetup)?;
        let expected_tracks = if self.with_audio { 2 } else { 1 };
        let mux = MuxSink::shared(muxer, expected_tracks);

        if self.with_audio {
            let device = self
                .backend
                .create_audio_encoder()
                .map_err(EncodeError::Setup)?;
            self.audio = Some(AudioEncoderCore::new(device, mux.clone()));
        }

        let device = self
            .backend
            .create_video_encoder(&self.config)
            .map_err(EncodeError::Setup)?;
        let video = VideoEncoderCore::new(device, mux.clone());
        let target = video
            .input_surface()
            .ok_or_else(|| EncodeError::Setup(anyhow!("video encoder has no input surface")))?;

        let mut context = self
            .backend
            .create_context(self.config.shared_context)
            .map_err(EncodeError::Setup)?;
        let mut surface = self
            .backend
            .create_surface(context.as_mut(), target)
            .map_err(EncodeError::Surface)?;
        surface.make_current().map_err(EncodeError::Surface)?;

        renderer.on_surface_created();
        renderer.on_surface_changed(self.config.width, self.config.height);
        renderer.set_viewport(self.viewport);

        let sink = if self.with_audio {
            let (tx, rx) = mpsc::channel();
            self.audio_rx = Some(rx);
            AudioSink { tx: Some(tx) }
        } else {
            AudioSink::stub()
        };

        self.mux = Some(mux);
        self.video = Some(video);
        self.context = Some(context);
        self.surface = Some(surface);
        log::info!(
            "handle_prepare::pipeline ready, {}x{} @{} -> {}",
            self.config.width,
            self.config.height,
            self.config.fps,
            self.config.output_path.display()
        );

        (self.callbacks.on_prepared)(sink);
        Ok(())
    }

    fn handle_frame(&mut self, ts_ns: i64) -> Result<(), EncodeError> {
        if self.video.is_none() {
            log::warn!("handle_frame::no pipeline, dropping frame");
            return Ok(());
        }
        self.last_pts_ns = ts_ns;

        // Audio first: its track registration may be what starts the muxer
        // before video samples pile up.
        if let (Some(audio), Some(mux)) = (self.audio.as_mut(), self.mux.as_ref()) {
            if mux.lock().unwrap().tracks_added() > 0 {
                audio.drain()?;
            }
            if let Some(rx) = self.audio_rx.as_ref() {
                while let Ok(chunk) = rx.try_recv() {
                    audio.encode(Some(&chunk), ts_ns / 1_000)?;
                }
            }
        }

        if let Some(video) = self.video.as_mut() {
            video.drain(false)?;
        }

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.draw_frame();
        }
        if let Some(surface) = self.surface.as_mut() {
            surface.set_presentation_time(ts_ns);
            surface.swap_buffers().map_err(EncodeError::Surface)?;
        }

        (self.callbacks.on_post_render)();
        Ok(())
    }

    fn handle_update_shared_context(&mut self, shared: SharedContext) -> Result<(), EncodeError> {
        let Some(surface) = self.surface.as_mut() else {
            log::warn!("handle_update_shared_context::no pipeline");
            return Ok(());
        };
        let Some(renderer) = self.renderer.as_mut() else {
            log::warn!("handle_update_shared_context::no renderer");
            return Ok(());
        };
        log::info!("handle_update_shared_context::rebinding to {shared:?}");

        // Tear down GL state bound to the old context, keep the encoder's
        // native surface alive, then rebuild against the new context.
        surface.release_gl_surface();
        renderer.release();
        if let Some(mut context) = self.context.take() {
            context.release();
        }

        let mut context = self
            .backend
            .create_context(shared)
            .map_err(EncodeError::Setup)?;
        surface.recreate(context.as_mut()).map_err(EncodeError::Surface)?;
        surface.make_current().map_err(EncodeError::Surface)?;
        self.context = Some(context);

        renderer.on_surface_created();
        renderer.on_surface_changed(self.config.width, self.config.height);
        renderer.set_viewport(self.viewport);
        Ok(())
    }

    fn handle_stop(&mut self) -> Result<(), EncodeError> {
        log::info!("handle_stop::flushing encoders");
        let flushed = self.flush();
        self.release_pipeline();
        flushed
    }

    fn flush(&mut self) -> Result<(), EncodeError> {
        if let Some(audio) = self.audio.as_mut() {
            audio.encode(None, self.last_pts_ns / 1_000)?;
            audio.drain_to_end()?;
        }
        if let Some(video) = self.video.as_mut() {
            video.drain(true)?;
        }
        Ok(())
    }

    fn release_pipeline(&mut self) {
        if let Some(mut video) = self.video.take() {
            video.release();
        }
        if let Some(mut audio) = self.audio.take() {
            audio.release();
        }
        if let Some(mux) = self.mux.take() {
            if let Err(err) = mux.lock().unwrap().finish() {
                log::warn!("release_pipeline::muxer stop failed: {err}");
            }
        }
        if let Some(mut surface) = self.surface.take() {
            surface.release();
        }
        if let Some(mut renderer) = self.renderer.take() {
            renderer.release();
        }
        if let Some(mut context) = self.context.take() {
            context.release();
        }
        self.audio_rx = None;
    }
}

#[cfg(test)]
#[path = "recorder_test.rs"]
pub(crate) mod recorder_test;
