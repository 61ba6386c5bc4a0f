// Shared test fixtures. Real decode paths need real audio; a generated WAV
// keeps the tests hermetic without binary files in the tree.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Write a mono 16-bit PCM WAV (8 kHz) containing a 440 Hz sine of the given
/// length.
pub(crate) fn write_sine_wav(path: &Path, length: Duration) {
    let sample_rate: u32 = 8000;
    let sample_count = (length.as_secs_f64() * sample_rate as f64).round() as u32;
    let data_len = sample_count * 2; // 16-bit mono

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");

    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    bytes.extend_from_slice(&2u16.to_le_bytes()); // block align
    bytes.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    for n in 0..sample_count {
        let t = n as f64 / sample_rate as f64;
        let sample = (0.3 * (2.0 * std::f64::consts::PI * 440.0 * t).sin() * 32767.0) as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    let mut file = File::create(path).expect("create test wav");
    file.write_all(&bytes).expect("write test wav");
}
