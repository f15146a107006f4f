//! GPU-surface transcode pipeline: passive decoders rendering into shared
//! textures, a recorder worker driving the encode side, and a baker that
//! pumps both for offline runs.

pub mod baker;
pub mod codec;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod gl;
pub mod mux;
pub mod recorder;
pub mod sample;
pub mod speed;
