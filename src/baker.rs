use std::pin::Pin;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::codec::DecoderOpener;
use crate::config::RecorderConfig;
use crate::decode::DecoderPool;
use crate::gl::{Renderer, Viewport};
use crate::recorder::{AudioSink, Recorder, RecorderBackend, RecorderCallbacks};

const PREPARE_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Progress event published while a bake runs. Exactly one event with
/// `completed` set is published per bake, after the output is finalized.
#[derive(Clone, Debug)]
pub struct BakeProgress {
    /// 0.0..=1.0 against the job's expected duration.
    pub progress: f64,
    pub frames: u64,
    pub pts_ns: i64,
    pub completed: bool,
    pub failed: bool,
}

pub type BakeProgressStream = Pin<Box<dyn Stream<Item = BakeProgress> + Send>>;

/// Parameters of one offline transcode run.
pub struct BakeJob {
    pub config: RecorderConfig,
    pub viewport: Viewport,
    pub with_audio: bool,
    /// Expected output duration, for progress reporting only. Zero means
    /// unknown; progress stays at 0 until completion.
    pub duration_ns: i64,
}

/// Everything the bake pump consumes. Handed over whole; released on the
/// pump thread when the bake ends.
pub struct BakeDeps {
    pub backend: Box<dyn RecorderBackend>,
    pub renderer: Box<dyn Renderer>,
    pub pool: DecoderPool,
    pub opener: Box<dyn DecoderOpener + Send>,
    /// Called once with the session's audio sink so the embedder can feed
    /// PCM while frames are pumped.
    pub audio_feed: Option<Box<dyn FnMut(AudioSink) + Send>>,
}

/// Offline transcoder. Drives the decoder pool and the recorder in lockstep
/// at the target frame rate, as fast as the codecs allow, on a blocking
/// task; progress is fanned out over a broadcast channel.
pub struct Baker {
    cancel: CancellationToken,
    progress_tx: tokio::sync::broadcast::Sender<BakeProgress>,
    // Kept so the first subscriber sees every event from the start.
    first_rx: Mutex<Option<tokio::sync::broadcast::Receiver<BakeProgress>>>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Baker {
    /// Start a bake. Must be called inside a tokio runtime.
    pub fn start(job: BakeJob, deps: BakeDeps) -> Self {
        let cancel = CancellationToken::new();
        let (progress_tx, first_rx) = tokio::sync::broadcast::channel(64);

        let (prepared_tx, prepared_rx) = mpsc::channel();
        let (post_tx, post_rx) = mpsc::channel();
        let fault_cancel = cancel.clone();
        let callbacks = RecorderCallbacks {
            on_prepared: Box::new(move |sink| {
                let _ = prepared_tx.send(sink);
            }),
            on_post_render: Box::new(move || {
                let _ = post_tx.send(());
            }),
            on_fault: Box::new(move |err| {
                log::error!("bake encode fault: {err}");
                fault_cancel.cancel();
            }),
        };

        let recorder = Recorder::new(
            job.config.clone(),
            deps.backend,
            deps.renderer,
            job.viewport,
            job.with_audio,
            callbacks,
        );

        let pump = Pump {
            recorder,
            job,
            pool: deps.pool,
            opener: deps.opener,
            audio_feed: deps.audio_feed,
            cancel: cancel.clone(),
            progress_tx: progress_tx.clone(),
            prepared_rx,
            post_rx,
        };
        let handle = tokio::task::spawn_blocking(move || pump.run());

        Self {
            cancel,
            progress_tx,
            first_rx: Mutex::new(Some(first_rx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn progress(&self) -> BakeProgressStream {
        let rx = self
            .first_rx
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| self.progress_tx.subscribe());
        BroadcastStream::new(rx)
            .filter_map(|r| async move { r.ok() })
            .boxed()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(&self) {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                log::error!("bake pump panicked");
            }
        }
    }
}

impl Drop for Baker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Pump {
    recorder: Recorder,
    job: BakeJob,
    pool: DecoderPool,
    opener: Box<dyn DecoderOpener + Send>,
    audio_feed: Option<Box<dyn FnMut(AudioSink) + Send>>,
    cancel: CancellationToken,
    progress_tx: tokio::sync::broadcast::Sender<BakeProgress>,
    prepared_rx: mpsc::Receiver<AudioSink>,
    post_rx: mpsc::Receiver<()>,
}

impl Pump {
    fn run(mut self) {
        let frame_interval_ns = 1_000_000_000 / self.job.config.fps.max(1) as i64;
        let mut pts_ns = 0i64;
        let mut frames = 0u64;
        let mut failed = false;

        self.recorder.prepare();
        match self.prepared_rx.recv_timeout(PREPARE_TIMEOUT) {
            Ok(sink) => {
                if let Some(feed) = self.audio_feed.as_mut() {
                    feed(sink);
                }
            }
            Err(_) => {
                log::error!("run::encode pipeline never came up");
                failed = true;
            }
        }

        if !failed {
            if let Err(err) = self.pool.prepare_all(self.opener.as_mut()) {
                log::error!("run::decoder setup failed: {err}");
                failed = true;
            }
        }

        while !failed {
            if self.cancel.is_cancelled() {
                log::info!("run::bake cancelled at frame {frames}");
                break;
            }
            pts_ns += frame_interval_ns;
            if self.job.duration_ns > 0 && pts_ns > self.job.duration_ns {
                log::info!("run::reached target duration after {frames} frames");
                break;
            }

            if let Err(err) = self.pool.advance(pts_ns / 1_000, |_| true) {
                log::error!("run::decode fault: {err}");
                failed = true;
                break;
            }
            if !self.pool.has_frames() {
                log::info!("run::all sources drained after {frames} frames");
                break;
            }

            self.recorder.frame_available(pts_ns);
            if self.post_rx.recv_timeout(FRAME_ACK_TIMEOUT).is_err() {
                log::error!("run::recorder stopped acknowledging frames");
                failed = true;
                break;
            }
            frames += 1;

            let _ = self.progress_tx.send(BakeProgress {
                progress: self.progress_of(pts_ns),
                frames,
                pts_ns,
                completed: false,
                failed: false,
            });
        }

        self.pool.release_all();
        self.recorder.stop();
        self.recorder.join();

        let _ = self.progress_tx.send(BakeProgress {
            progress: if failed { self.progress_of(pts_ns) } else { 1.0 },
            frames,
            pts_ns,
            completed: true,
            failed,
        });
    }

    fn progress_of(&self, pts_ns: i64) -> f64 {
        if self.job.duration_ns > 0 {
            (pts_ns as f64 / self.job.duration_ns as f64).min(1.0)
        } else {
            0.0
        }
    }
}
