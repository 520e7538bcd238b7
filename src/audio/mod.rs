//! # Audio
//!
//! Everything the agent does with raw audio bytes.
//!
//! ## Audio Format:
//! - **Sample Rate**: configurable, 16kHz by default
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono
//! - **Encoding**: Little-endian signed integers

pub mod buffer;
pub mod codec;

pub use buffer::AudioBuffer;
