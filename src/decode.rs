use std::collections::HashMap;

use crate::codec::{CodecDevice, CodecPoll, DecoderOpener, DemuxSource, SurfaceHandle};
use crate::error::DecodeError;
use crate::speed::SpeedController;

const TIMEOUT_US: u64 = 10_000;

/// Surface-rendering decoder driven externally, one bounded step per call.
/// Nothing here blocks beyond the poll timeout; the caller owns the cadence
/// and simply calls `advance` once per output frame it wants to compose.
pub struct PassiveDecoder {
    tag: String,
    source: Option<Box<dyn DemuxSource>>,
    decoder: Option<Box<dyn CodecDevice>>,
    render_target: Option<SurfaceHandle>,
    speed: Option<SpeedController>,
    input_done: bool,
    output_done: bool,
    used: bool,
    released: bool,
    read_buf: Vec<u8>,
}

impl PassiveDecoder {
    pub fn new(
        tag: impl Into<String>,
        source: Box<dyn DemuxSource>,
        render_target: Option<SurfaceHandle>,
    ) -> Self {
        Self {
            tag: tag.into(),
            source: Some(source),
            decoder: None,
            render_target,
            speed: None,
            input_done: false,
            output_done: false,
            used: false,
            released: false,
            read_buf: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Rebind the surface decoded frames are presented into. Takes effect
    /// at the next `prepare`; a prepared decoder keeps its binding.
    pub fn set_render_target(&mut self, target: Option<SurfaceHandle>) {
        if self.decoder.is_some() {
            log::warn!("set_render_target::{} already prepared, ignoring", self.tag);
            return;
        }
        self.render_target = target;
    }

    /// Select the first video track and open a decoder for it, bound to the
    /// render target. A setup failure releases the source before returning.
    pub fn prepare(&mut self, opener: &mut dyn DecoderOpener) -> Result<(), DecodeError> {
        if self.decoder.is_some() {
            log::warn!("prepare::{} already prepared", self.tag);
            return Ok(());
        }
        let Some(source) = self.source.as_mut() else {
            log::warn!("prepare::{} already released", self.tag);
            return Ok(());
        };

        let mut selected = None;
        for index in 0..source.track_count() {
            let format = source.track_format(index);
            if format.is_video() {
                selected = Some((index, format));
                break;
            }
        }
        let Some((index, format)) = selected else {
            self.release();
            return Err(DecodeError::NoTrackFound);
        };

        source.select_track(index);
        if format.frame_rate > 0 {
            self.speed = Some(SpeedController::new(format.frame_rate));
        }

        match opener.open(&format, self.render_target) {
            Ok(decoder) => {
                log::debug!("prepare::{} decoding {} track {index}", self.tag, format.mime);
                self.decoder = Some(decoder);
                Ok(())
            }
            Err(err) => {
                self.release();
                Err(DecodeError::SetupFailed(err))
            }
        }
    }

    /// One decode step at wall time `now_us`: feed at most one input sample
    /// and handle at most one output unit. The frame-rate gate rejects calls
    /// coming faster than the track's native rate.
    pub fn advance(&mut self, now_us: i64) -> Result<(), DecodeError> {
        if self.released || self.output_done {
            log::debug!("advance::{} already finished, ignoring", self.tag);
            return Ok(());
        }
        let (Some(decoder), Some(source)) = (self.decoder.as_mut(), self.source.as_mut()) else {
            log::warn!("advance::{} called before prepare", self.tag);
            return Ok(());
        };

        // Marked used even when the gate rejects; the pool releases decoders
        // that have been driven at least once and then left the scene.
        self.used = true;

        if let Some(speed) = self.speed.as_mut() {
            if !speed.admit(now_us) {
                return Ok(());
            }
        }

        if !self.input_done {
            if let Some(slot) = decoder.dequeue_input(TIMEOUT_US) {
                match source.read_sample(&mut self.read_buf) {
                    None => {
                        decoder
                            .submit_input(slot, &[], 0, crate::sample::SampleFlags::eos())
                            .map_err(DecodeError::Device)?;
                        self.input_done = true;
                        log::debug!("advance::{} input exhausted", self.tag);
                    }
                    Some(size) => {
                        let pts_us = source.sample_time_us();
                        let flags = source.sample_flags();
                        decoder
                            .submit_input(slot, &self.read_buf[..size], pts_us, flags)
                            .map_err(DecodeError::Device)?;
                        source.advance();
                    }
                }
            }
        }

        match decoder.dequeue_output(TIMEOUT_US) {
            CodecPoll::TryAgain | CodecPoll::FormatChanged | CodecPoll::BuffersChanged => {}
            CodecPoll::Fault(status) => return Err(DecodeError::Fault(status)),
            CodecPoll::Sample { id, info, .. } => {
                decoder.release_output(id, info.size != 0);
                if info.is_eos() {
                    self.output_done = true;
                    log::debug!("advance::{} output done", self.tag);
                }
            }
        }
        Ok(())
    }

    /// True once `advance` has been called at least once after prepare.
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// True once the terminal output unit has been handled.
    pub fn is_done(&self) -> bool {
        self.output_done
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(mut decoder) = self.decoder.take() {
            decoder.stop();
        }
        self.source.take();
        log::debug!("release::{} released", self.tag);
    }
}

impl Drop for PassiveDecoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Keyed set of passive decoders for one composition. Decoders for clips
/// that left the visible scene after being driven are released eagerly so
/// their hardware codecs free up.
#[derive(Default)]
pub struct DecoderPool {
    decoders: HashMap<String, PassiveDecoder>,
}

impl DecoderPool {
    pub fn insert(&mut self, decoder: PassiveDecoder) {
        self.decoders.insert(decoder.tag().to_string(), decoder);
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    pub fn prepare_all(&mut self, opener: &mut dyn DecoderOpener) -> Result<(), DecodeError> {
        for decoder in self.decoders.values_mut() {
            decoder.prepare(opener)?;
        }
        Ok(())
    }

    /// Advance every visible decoder one step and drop used invisible ones.
    pub fn advance(
        &mut self,
        now_us: i64,
        visible: impl Fn(&str) -> bool,
    ) -> Result<(), DecodeError> {
        let mut stale = Vec::new();
        for (tag, decoder) in self.decoders.iter_mut() {
            if visible(tag) {
                decoder.advance(now_us)?;
            } else if decoder.is_used() {
                decoder.release();
                stale.push(tag.clone());
            }
        }
        for tag in stale {
            self.decoders.remove(&tag);
        }
        Ok(())
    }

    /// True while any decoder still has frames to deliver.
    pub fn has_frames(&self) -> bool {
        self.decoders.values().any(|d| !d.is_done())
    }

    pub fn release_all(&mut self) {
        for decoder in self.decoders.values_mut() {
            decoder.release();
        }
        self.decoders.clear();
    }
}
