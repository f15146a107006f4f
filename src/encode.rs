use crate::codec::{CodecDevice, CodecPoll, SurfaceHandle};
use crate::error::EncodeError;
use crate::mux::SharedMux;
use crate::sample::SampleFlags;

const TIMEOUT_US: u64 = 10_000;

/// Pull everything currently pending out of a codec device and hand it to
/// the shared mux sink. With `until_eos` set the loop keeps polling through
/// `TryAgain` until the end-of-stream unit shows up; otherwise it returns as
/// soon as the device has nothing ready.
fn drain_device(
    device: &mut dyn CodecDevice,
    mux: &SharedMux,
    track_index: &mut Option<usize>,
    until_eos: bool,
) -> Result<(), EncodeError> {
    loop {
        match device.dequeue_output(TIMEOUT_US) {
            CodecPoll::TryAgain => {
                if !until_eos {
                    break;
                }
                log::debug!("drain::no output available, spinning to wait for eos");
            }
            CodecPoll::BuffersChanged => {}
            CodecPoll::FormatChanged => {
                if track_index.is_some() {
                    return Err(EncodeError::FormatChangedTwice);
                }
                let format = device.output_format();
                let index = mux.lock().unwrap().add_track(&format)?;
                *track_index = Some(index);
            }
            CodecPoll::Fault(status) => {
                log::warn!("drain::unexpected encoder status {status}, ignoring");
            }
            CodecPoll::Sample { id, data, info } => {
                // Config units were already consumed via the track format.
                let size = if info.flags.codec_config { 0 } else { info.size };
                if size > 0 {
                    let track = track_index.ok_or(EncodeError::MuxNotStarted(0))?;
                    mux.lock().unwrap().write_sample(track, &data, &info)?;
                }
                device.release_output(id, false);
                if info.is_eos() {
                    if !until_eos {
                        log::warn!("drain::reached end of stream unexpectedly");
                    }
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Video side of the encode pipeline. Frames arrive through the encoder's
/// input surface; this core only pumps the compressed output into the mux.
pub struct VideoEncoderCore {
    device: Box<dyn CodecDevice>,
    mux: SharedMux,
    track_index: Option<usize>,
}

impl VideoEncoderCore {
    pub fn new(device: Box<dyn CodecDevice>, mux: SharedMux) -> Self {
        Self {
            device,
            mux,
            track_index: None,
        }
    }

    pub fn input_surface(&self) -> Option<SurfaceHandle> {
        self.device.input_surface()
    }

    /// Drain pending output. With `end_of_stream` the input side is signalled
    /// first and the drain blocks until the terminal unit is seen.
    pub fn drain(&mut self, end_of_stream: bool) -> Result<(), EncodeError> {
        if end_of_stream {
            log::debug!("drain::sending eos to video encoder");
            self.device.signal_end_of_input();
        }
        drain_device(
            self.device.as_mut(),
            &self.mux,
            &mut self.track_index,
            end_of_stream,
        )
    }

    pub fn release(&mut self) {
        self.device.stop();
    }
}

/// Audio side. Raw PCM chunks are fed by the embedder through `encode`;
/// compressed output is drained into the same mux sink as the video track.
pub struct AudioEncoderCore {
    device: Box<dyn CodecDevice>,
    mux: SharedMux,
    track_index: Option<usize>,
}

impl AudioEncoderCore {
    pub fn new(device: Box<dyn CodecDevice>, mux: SharedMux) -> Self {
        Self {
            device,
            mux,
            track_index: None,
        }
    }

    /// Queue one PCM chunk, or end of stream when `data` is `None`. A full
    /// input queue drops the chunk; the capture side keeps its own pace.
    pub fn encode(&mut self, data: Option<&[u8]>, pts_us: i64) -> Result<(), EncodeError> {
        let Some(slot) = self.device.dequeue_input(TIMEOUT_US) else {
            log::warn!("encode::no input slot available, dropping audio chunk");
            return Ok(());
        };
        match data {
            Some(chunk) => self
                .device
                .submit_input(slot, chunk, pts_us, SampleFlags::default()),
            None => self.device.submit_input(slot, &[], pts_us, SampleFlags::eos()),
        }
        .map_err(EncodeError::Codec)
    }

    pub fn drain(&mut self) -> Result<(), EncodeError> {
        drain_device(self.device.as_mut(), &self.mux, &mut self.track_index, false)
    }

    /// Drain through to the end-of-stream unit after `encode(None, _)`.
    pub fn drain_to_end(&mut self) -> Result<(), EncodeError> {
        drain_device(self.device.as_mut(), &self.mux, &mut self.track_index, true)
    }

    pub fn release(&mut self) {
        self.device.stop();
    }
}
