//! Base64url codec for component custom ids.
//!
//! Applications pack arbitrary bytes into a button's `custom_id` when a message is sent and get
//! the same bytes back when the button is clicked. Encoding uses the URL-safe alphabet without
//! padding; decoding also accepts the standard alphabet (`+/`) and `=` padding.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

/// The vendor caps `custom_id` at 100 characters.
pub const MAX_CUSTOM_ID_LEN: usize = 100;

const CUSTOM_ID: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub use base64::DecodeError;

/// Encode bytes as unpadded Base64url.
pub fn encode(bytes: &[u8]) -> String {
    CUSTOM_ID.encode(bytes)
}

/// Decode Base64 in either alphabet, padded or not.
pub fn decode(s: &str) -> Result<Vec<u8>, DecodeError> {
    let normalized: String = s
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    CUSTOM_ID.decode(normalized.as_bytes())
}

/// Longest payload that still fits in a custom id once encoded.
pub fn max_payload_len() -> usize {
    MAX_CUSTOM_ID_LEN / 4 * 3
}
