use bytes::Bytes;

use crate::sample::{SampleFlags, SampleInfo, TrackFormat};

/// Opaque handle to a native surface (e.g. a video encoder's input surface,
/// or the render target a video decoder presents into). Interpreted by the
/// backend only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceHandle(pub usize);

/// Result of polling a codec device for output. Transient conditions are
/// variants, not errors; only `Fault` is unexpected.
#[derive(Clone, Debug)]
pub enum CodecPoll {
    /// No output ready within the timeout.
    TryAgain,
    /// Output format is now known; `output_format()` is valid from here on.
    FormatChanged,
    /// Output buffer set changed. Benign, nothing to do.
    BuffersChanged,
    /// Unexpected negative status from the device.
    Fault(i32),
    /// One output unit. `data` is empty for surface-rendered output; the
    /// unit is presented by `release_output(id, render: true)`.
    Sample {
        id: usize,
        data: Bytes,
        info: SampleInfo,
    },
}

/// Raw hardware codec boundary (decoder or encoder side). Implementations
/// wrap the platform codec; all calls are bounded by the given timeout and
/// never block indefinitely.
pub trait CodecDevice: Send {
    /// Try to obtain a free input slot. `None` when none freed up within
    /// the timeout.
    fn dequeue_input(&mut self, timeout_us: u64) -> Option<usize>;

    /// Submit one compressed/raw unit into `slot`. An empty payload with
    /// the EOS flag set ends the input side.
    fn submit_input(
        &mut self,
        slot: usize,
        data: &[u8],
        pts_us: i64,
        flags: SampleFlags,
    ) -> anyhow::Result<()>;

    fn dequeue_output(&mut self, timeout_us: u64) -> CodecPoll;

    /// Release an output unit back to the device. `render` presents it to
    /// the bound surface (video decoder path).
    fn release_output(&mut self, id: usize, render: bool);

    /// Surface-input encoders only: declare end of input without a buffer.
    fn signal_end_of_input(&mut self) {}

    /// Valid after `FormatChanged` has been observed.
    fn output_format(&self) -> TrackFormat;

    /// Surface-input encoders expose the surface frames are rendered into.
    fn input_surface(&self) -> Option<SurfaceHandle> {
        None
    }

    fn stop(&mut self) {}
}

/// Demuxing source for one container, read sequentially one sample at a
/// time.
pub trait DemuxSource: Send {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> TrackFormat;

    fn select_track(&mut self, index: usize);

    /// Read the current sample into `buf`. `None` once the source is
    /// exhausted.
    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Option<usize>;

    /// Presentation timestamp of the current sample, microseconds.
    fn sample_time_us(&self) -> i64;

    fn sample_flags(&self) -> SampleFlags {
        SampleFlags::default()
    }

    /// Move to the next sample. `false` once past the last one.
    fn advance(&mut self) -> bool;
}

/// Opens a decoder device bound to a track format and an optional render
/// target. The seam where the platform decoder is created.
pub trait DecoderOpener {
    fn open(
        &mut self,
        format: &TrackFormat,
        target: Option<SurfaceHandle>,
    ) -> anyhow::Result<Box<dyn CodecDevice>>;
}
