use super::*;
use crate::codec::CodecPoll;
use crate::mux::tests::{FakeMuxer, MuxLog};
use crate::sample::{SampleFlags, SampleInfo, TrackFormat};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct BackendState {
    pub muxers_created: usize,
    pub contexts_created: usize,
    pub contexts_released: usize,
    pub surface_recreated: usize,
    pub surface_released: usize,
    pub gl_surface_released: usize,
    pub made_current: usize,
    pub swaps: usize,
    pub last_ts_ns: i64,
    pub video_pending: VecDeque<i64>,
    pub video_format_sent: bool,
    pub video_eos: bool,
    /// When set the video device produces no format or samples, only the
    /// terminal unit once end of input is signalled.
    pub video_silent: bool,
    pub video_stopped: bool,
    pub audio_pending: VecDeque<(i64, usize)>,
    pub audio_format_sent: bool,
    pub audio_eos: bool,
    pub audio_stopped: bool,
}

pub(crate) type SharedState = Arc<Mutex<BackendState>>;

struct FakeVideoDevice(SharedState);

impl CodecDevice for FakeVideoDevice {
    fn dequeue_input(&mut self, _timeout_us: u64) -> Option<usize> {
        None
    }

    fn submit_input(
        &mut self,
        _slot: usize,
        _data: &[u8],
        _pts_us: i64,
        _flags: SampleFlags,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout_us: u64) -> CodecPoll {
        let mut state = self.0.lock().unwrap();
        if state.video_silent {
            if state.video_eos {
                state.video_eos = false;
                return eos_sample();
            }
            return CodecPoll::TryAgain;
        }
        if !state.video_format_sent {
            state.video_format_sent = true;
            return CodecPoll::FormatChanged;
        }
        if let Some(pts_us) = state.video_pending.pop_front() {
            return data_sample(pts_us, 8);
        }
        if state.video_eos {
            state.video_eos = false;
            return eos_sample();
        }
        CodecPoll::TryAgain
    }

    fn release_output(&mut self, _id: usize, _render: bool) {}

    fn signal_end_of_input(&mut self) {
        self.0.lock().unwrap().video_eos = true;
    }

    fn output_format(&self) -> TrackFormat {
        TrackFormat::video("video/avc", 320, 240, 30)
    }

    fn input_surface(&self) -> Option<SurfaceHandle> {
        Some(SurfaceHandle(7))
    }

    fn stop(&mut self) {
        self.0.lock().unwrap().video_stopped = true;
    }
}

struct FakeAudioDevice(SharedState);

impl CodecDevice for FakeAudioDevice {
    fn dequeue_input(&mut self, _timeout_us: u64) -> Option<usize> {
        Some(0)
    }

    fn submit_input(
        &mut self,
        _slot: usize,
        data: &[u8],
        pts_us: i64,
        flags: SampleFlags,
    ) -> anyhow::Result<()> {
        let mut state = self.0.lock().unwrap();
        if flags.end_of_stream {
            state.audio_eos = true;
        } else {
            state.audio_pending.push_back((pts_us, data.len()));
        }
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout_us: u64) -> CodecPoll {
        let mut state = self.0.lock().unwrap();
        if !state.audio_format_sent {
            state.audio_format_sent = true;
            return CodecPoll::FormatChanged;
        }
        if let Some((pts_us, size)) = state.audio_pending.pop_front() {
            return data_sample(pts_us, size);
        }
        if state.audio_eos {
            state.audio_eos = false;
            return eos_sample();
        }
        CodecPoll::TryAgain
    }

    fn release_output(&mut self, _id: usize, _render: bool) {}

    fn output_format(&self) -> TrackFormat {
        TrackFormat::audio("audio/mp4a-latm", 44100, 2)
    }

    fn stop(&mut self) {
        self.0.lock().unwrap().audio_stopped = true;
    }
}

fn data_sample(pts_us: i64, size: usize) -> CodecPoll {
    CodecPoll::Sample {
        id: 0,
        data: Bytes::from(vec![0u8; size]),
        info: SampleInfo {
            offset: 0,
            size,
            pts_us,
            flags: SampleFlags::default(),
        },
    }
}

fn eos_sample() -> CodecPoll {
    CodecPoll::Sample {
        id: 0,
        data: Bytes::new(),
        info: SampleInfo {
            offset: 0,
            size: 0,
            pts_us: 0,
            flags: SampleFlags::eos(),
        },
    }
}

struct FakeContext(SharedState);

impl GlContext for FakeContext {
    fn release(&mut self) {
        self.0.lock().unwrap().contexts_released += 1;
    }
}

struct FakeSurface(SharedState);

impl RecordSurface for FakeSurface {
    fn make_current(&mut self) -> anyhow::Result<()> {
        self.0.lock().unwrap().made_current += 1;
        Ok(())
    }

    fn set_presentation_time(&mut self, ts_ns: i64) {
        self.0.lock().unwrap().last_ts_ns = ts_ns;
    }

    fn swap_buffers(&mut self) -> anyhow::Result<()> {
        let mut state = self.0.lock().unwrap();
        state.swaps += 1;
        let pts_us = state.last_ts_ns / 1_000;
        state.video_pending.push_back(pts_us);
        Ok(())
    }

    fn release_gl_surface(&mut self) {
        self.0.lock().unwrap().gl_surface_released += 1;
    }

    fn recreate(&mut self, _context: &mut dyn GlContext) -> anyhow::Result<()> {
        self.0.lock().unwrap().surface_recreated += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.0.lock().unwrap().surface_released += 1;
    }
}

pub(crate) struct FakeBackend {
    pub state: SharedState,
    pub mux_log: Arc<Mutex<MuxLog>>,
}

impl RecorderBackend for FakeBackend {
    fn create_muxer(&mut self, _path: &Path) -> anyhow::Result<Box<dyn crate::mux::Muxer>> {
        self.state.lock().unwrap().muxers_created += 1;
        Ok(Box::new(FakeMuxer::new(self.mux_log.clone())))
    }

    fn create_video_encoder(
        &mut self,
        _config: &RecorderConfig,
    ) -> anyhow::Result<Box<dyn CodecDevice>> {
        Ok(Box::new(FakeVideoDevice(self.state.clone())))
    }

    fn create_audio_encoder(&mut self) -> anyhow::Result<Box<dyn CodecDevice>> {
        Ok(Box::new(FakeAudioDevice(self.state.clone())))
    }

    fn create_context(&mut self, _shared: SharedContext) -> anyhow::Result<Box<dyn GlContext>> {
        self.state.lock().unwrap().contexts_created += 1;
        Ok(Box::new(FakeContext(self.state.clone())))
    }

    fn create_surface(
        &mut self,
        _context: &mut dyn GlContext,
        _target: SurfaceHandle,
    ) -> anyhow::Result<Box<dyn RecordSurface>> {
        Ok(Box::new(FakeSurface(self.state.clone())))
    }
}

#[derive(Default)]
pub(crate) struct RenderStats {
    pub created: usize,
    pub changed: usize,
    pub draws: usize,
    pub viewports: Vec<Viewport>,
    pub released: usize,
}

pub(crate) struct FakeRenderer(pub Arc<Mutex<RenderStats>>);

impl Renderer for FakeRenderer {
    fn on_surface_created(&mut self) {
        self.0.lock().unwrap().created += 1;
    }

    fn on_surface_changed(&mut self, _width: u32, _height: u32) {
        self.0.lock().unwrap().changed += 1;
    }

    fn draw_frame(&mut self) {
        self.0.lock().unwrap().draws += 1;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.0.lock().unwrap().viewports.push(viewport);
    }

    fn release(&mut self) {
        self.0.lock().unwrap().released += 1;
    }
}

pub(crate) struct TestSession {
    pub recorder: Recorder,
    pub state: SharedState,
    pub mux_log: Arc<Mutex<MuxLog>>,
    pub render: Arc<Mutex<RenderStats>>,
    pub prepared_rx: mpsc::Receiver<AudioSink>,
    pub post_render_rx: mpsc::Receiver<()>,
}

pub(crate) fn session(with_audio: bool) -> TestSession {
    let _ = env_logger::builder().is_test(true).try_init();
    let state = SharedState::default();
    let mux_log = Arc::new(Mutex::new(MuxLog::default()));
    let render = Arc::new(Mutex::new(RenderStats::default()));

    let (prepared_tx, prepared_rx) = mpsc::channel();
    let (post_tx, post_render_rx) = mpsc::channel();
    let callbacks = RecorderCallbacks {
        on_prepared: Box::new(move |sink| {
            let _ = prepared_tx.send(sink);
        }),
        on_post_render: Box::new(move || {
            let _ = post_tx.send(());
        }),
        on_fault: Box::new(|err| panic!("unexpected recorder fault: {err}")),
    };

    let backend = FakeBackend {
        state: state.clone(),
        mux_log: mux_log.clone(),
    };
    let recorder = Recorder::new(
        RecorderConfig::new(320, 240, "/tmp/out.mp4"),
        Box::new(backend),
        Box::new(FakeRenderer(render.clone())),
        Viewport::new(320, 240),
        with_audio,
        callbacks,
    );

    TestSession {
        recorder,
        state,
        mux_log,
        render,
        prepared_rx,
        post_render_rx,
    }
}

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn prepare_twice_builds_one_pipeline() {
    let s = session(false);
    s.recorder.prepare();
    s.recorder.prepare();
    s.prepared_rx.recv_timeout(WAIT).unwrap();
    s.recorder.stop();
    s.recorder.join();
    assert_eq!(s.state.lock().unwrap().muxers_created, 1);
    assert!(!s.recorder.is_recording());
}

#[test]
fn zero_timestamp_frames_are_dropped() {
    let s = session(false);
    s.recorder.prepare();
    s.prepared_rx.recv_timeout(WAIT).unwrap();

    s.recorder.frame_available(0);
    s.recorder.frame_available(16_666_667);
    s.post_render_rx.recv_timeout(WAIT).unwrap();

    s.recorder.stop();
    s.recorder.join();
    assert_eq!(s.state.lock().unwrap().swaps, 1);
    assert_eq!(s.render.lock().unwrap().draws, 1);
}

#[test]
fn stop_releases_everything_even_when_muxer_never_started() {
    let s = session(false);
    s.state.lock().unwrap().video_silent = true;
    s.recorder.prepare();
    s.prepared_rx.recv_timeout(WAIT).unwrap();
    s.recorder.stop();
    s.recorder.join();

    let state = s.state.lock().unwrap();
    let mux_log = s.mux_log.lock().unwrap();
    assert_eq!(mux_log.starts, 0);
    assert_eq!(mux_log.stops, 0);
    assert!(state.video_stopped);
    assert_eq!(state.surface_released, 1);
    assert_eq!(state.contexts_released, 1);
    assert_eq!(s.render.lock().unwrap().released, 1);
}

#[test]
fn audio_session_starts_muxer_once_both_tracks_exist() {
    let s = session(true);
    s.recorder.prepare();
    let sink = s.prepared_rx.recv_timeout(WAIT).unwrap();

    sink.push(Bytes::from_static(&[1, 2, 3, 4]));
    s.recorder.frame_available(33_000_000);
    s.post_render_rx.recv_timeout(WAIT).unwrap();
    s.recorder.frame_available(66_000_000);
    s.post_render_rx.recv_timeout(WAIT).unwrap();

    s.recorder.stop();
    s.recorder.join();

    let mux_log = s.mux_log.lock().unwrap();
    let events = &mux_log.events;
    let start = events.iter().position(|e| e == "start").unwrap();
    let first_write = events.iter().position(|e| e.starts_with("write:")).unwrap();
    assert!(start < first_write, "events: {events:?}");
    assert!(events.contains(&"add_track:video/avc".to_string()));
    assert!(events.contains(&"add_track:audio/mp4a-latm".to_string()));
    assert_eq!(mux_log.starts, 1);
    assert_eq!(mux_log.stops, 1);
    assert!(mux_log.writes >= 2);

    let state = s.state.lock().unwrap();
    assert!(state.video_stopped);
    assert!(state.audio_stopped);
}

#[test]
fn context_swap_rebuilds_gl_state_on_the_worker() {
    let s = session(false);
    s.recorder.prepare();
    s.prepared_rx.recv_timeout(WAIT).unwrap();

    s.recorder.update_shared_context(SharedContext(9));
    // A frame after the swap proves the pipeline still renders.
    s.recorder.frame_available(16_666_667);
    s.post_render_rx.recv_timeout(WAIT).unwrap();

    s.recorder.stop();
    s.recorder.join();

    let state = s.state.lock().unwrap();
    assert_eq!(state.contexts_created, 2);
    assert_eq!(state.surface_recreated, 1);
    assert_eq!(state.gl_surface_released, 1);
    assert_eq!(state.contexts_released, 2);
    assert_eq!(state.made_current, 2);
    assert_eq!(state.swaps, 1);

    let render = s.render.lock().unwrap();
    assert_eq!(render.created, 2);
    assert_eq!(render.changed, 2);
    assert_eq!(render.released, 2);
    assert_eq!(render.viewports.len(), 2);
}
