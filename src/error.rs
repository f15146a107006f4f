//! Error taxonomy for the decode and encode paths.
//!
//! Transient codec states (nothing ready yet, format changed) are not
//! errors; they are `CodecPoll` variants and get absorbed where they occur.
//! The variants here are either fatal for the session or setup failures
//! raised synchronously to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no video track found in source")]
    NoTrackFound,

    #[error("decoder setup failed: {0}")]
    SetupFailed(anyhow::Error),

    #[error("decoder device i/o failed: {0}")]
    Device(anyhow::Error),

    #[error("unexpected decoder status {0}")]
    Fault(i32),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("muxer creation failed: {0}")]
    MuxSetup(anyhow::Error),

    #[error("encode pipeline setup failed: {0}")]
    Setup(anyhow::Error),

    #[error("render surface failure: {0}")]
    Surface(anyhow::Error),

    #[error("encoder output format changed twice")]
    FormatChangedTwice,

    #[error("sample for track {0} produced before muxer start")]
    MuxNotStarted(usize),

    #[error("muxer write failed: {0}")]
    MuxWrite(anyhow::Error),

    #[error("encoder device i/o failed: {0}")]
    Codec(anyhow::Error),
}
