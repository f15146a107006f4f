/// Flags attached to one decoded/encoded unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub end_of_stream: bool,
    /// Codec-specific config data (SPS/PPS and friends). Already consumed by
    /// the muxer at track registration, so cores skip writing these units.
    pub codec_config: bool,
}

impl SampleFlags {
    pub fn eos() -> Self {
        Self {
            end_of_stream: true,
            codec_config: false,
        }
    }
}

/// Describes one decoded/encoded unit. Produced by a codec device, consumed
/// within the same step, never retained.
#[derive(Clone, Copy, Debug, Default)]
pub struct SampleInfo {
    pub offset: usize,
    pub size: usize,
    pub pts_us: i64,
    pub flags: SampleFlags,
}

impl SampleInfo {
    pub fn is_eos(&self) -> bool {
        self.flags.end_of_stream
    }
}

/// Stream format descriptor exchanged between demux sources, codec devices
/// and the muxer. Zero means "unknown" for the numeric fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u32,
    pub frame_rate: u32,
}

impl TrackFormat {
    pub fn video(mime: &str, width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            mime: mime.to_string(),
            width,
            height,
            frame_rate,
            ..Default::default()
        }
    }

    pub fn audio(mime: &str, sample_rate: u32, channels: u32) -> Self {
        Self {
            mime: mime.to_string(),
            sample_rate,
            channels,
            ..Default::default()
        }
    }

    pub fn is_video(&self) -> bool {
        self.mime.starts_with("video/")
    }

    pub fn is_audio(&self) -> bool {
        self.mime.starts_with("audio/")
    }
}
