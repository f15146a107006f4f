use std::sync::{Arc, Mutex};

use crate::error::EncodeError;
use crate::sample::{SampleInfo, TrackFormat};

/// Container writer boundary. `start` may be called once, only after every
/// track has been added; no sample may be written before that.
pub trait Muxer: Send {
    fn add_track(&mut self, format: &TrackFormat) -> anyhow::Result<usize>;

    fn start(&mut self) -> anyhow::Result<()>;

    fn write_sample(&mut self, track: usize, data: &[u8], info: &SampleInfo) -> anyhow::Result<()>;

    fn stop(&mut self) -> anyhow::Result<()>;
}

/// Muxer plus the track-gated start logic shared by every encoder core of
/// one session. The coordinator knows up front how many tracks to expect
/// (1 video-only, 2 video+audio); each core registers its track here and
/// the muxer is started exactly once when the last expected track lands.
pub struct MuxSink {
    muxer: Box<dyn Muxer>,
    expected_tracks: usize,
    added_tracks: usize,
    started: bool,
    stopped: bool,
}

/// One `MuxSink` is shared across the video and audio cores of a session.
pub type SharedMux = Arc<Mutex<MuxSink>>;

impl MuxSink {
    pub fn new(muxer: Box<dyn Muxer>, expected_tracks: usize) -> Self {
        Self {
            muxer,
            expected_tracks,
            added_tracks: 0,
            started: false,
            stopped: false,
        }
    }

    pub fn shared(muxer: Box<dyn Muxer>, expected_tracks: usize) -> SharedMux {
        Arc::new(Mutex::new(Self::new(muxer, expected_tracks)))
    }

    /// Register one output track. Starts the muxer when the expected count
    /// is reached; reaching it again is a defensive no-op.
    pub fn add_track(&mut self, format: &TrackFormat) -> Result<usize, EncodeError> {
        let index = self.muxer.add_track(format).map_err(EncodeError::MuxSetup)?;
        self.added_tracks += 1;
        log::debug!(
            "add_track::{} registered ({}/{})",
            format.mime,
            self.added_tracks,
            self.expected_tracks
        );

        if self.added_tracks >= self.expected_tracks {
            if self.started {
                log::warn!("add_track::track threshold reached again, muxer already started");
            } else {
                self.muxer.start().map_err(EncodeError::MuxSetup)?;
                self.started = true;
                log::debug!("add_track::all tracks present, muxer started");
            }
        }

        Ok(index)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn tracks_added(&self) -> usize {
        self.added_tracks
    }

    pub fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        info: &SampleInfo,
    ) -> Result<(), EncodeError> {
        if !self.started {
            return Err(EncodeError::MuxNotStarted(track));
        }
        self.muxer
            .write_sample(track, data, info)
            .map_err(EncodeError::MuxWrite)
    }

    /// Stop the muxer. Safe when it was never started (single-track session
    /// that never reached the threshold) and idempotent.
    pub fn finish(&mut self) -> Result<(), EncodeError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if !self.started {
            log::debug!("finish::muxer was never started, releasing without stop");
            return Ok(());
        }
        self.muxer.stop().map_err(EncodeError::MuxWrite)
    }
}
