//! PCM helpers and the binary audio frame used on the room socket.
//!
//! Frame layout (both directions):
//!
//! ```text
//! +----------------+-----------------+----------------------------+
//! | sid_len: u16LE | sid: UTF-8 bytes | PCM: 16-bit LE mono samples |
//! +----------------+-----------------+----------------------------+
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short")]
    Truncated,

    #[error("track sid is not valid UTF-8")]
    InvalidSid,

    #[error("track sid longer than {} bytes", u16::MAX)]
    SidTooLong,
}

/// Prefix `pcm` with the track sid header.
pub fn encode_frame(track_sid: &str, pcm: &[u8]) -> Result<Vec<u8>, FrameError> {
    let sid = track_sid.as_bytes();
    let sid_len = u16::try_from(sid.len()).map_err(|_| FrameError::SidTooLong)?;

    let mut frame = Vec::with_capacity(2 + sid.len() + pcm.len());
    // Writing into a Vec cannot fail.
    let _ = frame.write_u16::<LittleEndian>(sid_len);
    frame.extend_from_slice(sid);
    frame.extend_from_slice(pcm);
    Ok(frame)
}

/// Split a frame into its track sid and PCM payload.
pub fn decode_frame(frame: &[u8]) -> Result<(String, &[u8]), FrameError> {
    let mut cursor = Cursor::new(frame);
    let sid_len = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| FrameError::Truncated)? as usize;

    let mut sid = vec![0u8; sid_len];
    cursor.read_exact(&mut sid).map_err(|_| FrameError::Truncated)?;
    let sid = String::from_utf8(sid).map_err(|_| FrameError::InvalidSid)?;

    Ok((sid, &frame[2 + sid_len..]))
}

/// Wrap 16-bit mono samples in a WAV container for upload to transcription APIs.
pub fn pcm_to_wav(samples: &[i16], sample_rate: u32) -> std::io::Result<Vec<u8>> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut out = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    wav::write(header, &wav::BitDepth::Sixteen(samples.to_vec()), &mut out)?;
    Ok(out.into_inner())
}

/// `duration_ms` of digital silence as 16-bit LE PCM bytes.
pub fn silence(duration_ms: u64, sample_rate: u32) -> Vec<u8> {
    let samples = (sample_rate as u64 * duration_ms / 1000) as usize;
    vec![0u8; samples * 2]
}
