use std::path::PathBuf;

use crate::gl::SharedContext;

/// Session parameters for one recording. Built by the embedder, validated
/// once before the worker is spawned.
#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub keyframe_interval_secs: u32,
    pub output_path: PathBuf,
    /// Context of the embedding application to share textures with.
    pub shared_context: SharedContext,
}

impl RecorderConfig {
    pub fn new(width: u32, height: u32, output_path: impl Into<PathBuf>) -> Self {
        Self {
            width,
            height,
            fps: 30,
            bitrate: 4_000_000,
            keyframe_interval_secs: 5,
            output_path: output_path.into(),
            shared_context: SharedContext::default(),
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_shared_context(mut self, context: SharedContext) -> Self {
        self.shared_context = context;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.width > 0 && self.height > 0, "zero output dimensions");
        anyhow::ensure!(self.fps > 0, "fps must be positive");
        anyhow::ensure!(self.bitrate > 0, "bitrate must be positive");
        Ok(())
    }
}
