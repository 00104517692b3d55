//! Key to filename encoding
//!
//! Keys are arbitrary strings (provider event ids can contain `/`, `+`,
//! `=` or non-ASCII text). Each key is stored under the unpadded URL-safe
//! base64 encoding of its UTF-8 bytes, which only uses `[A-Za-z0-9_-]`
//! and therefore never collides with path separators or the `.tmp`
//! suffix used for in-flight writes.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use super::atomic::TEMP_SUFFIX;

/// Longest filename accepted by common filesystems (ext4, APFS, NTFS)
pub const MAX_FILENAME_LEN: usize = 255;

/// Longest key (in bytes) whose encoding plus the temp suffix fits in one
/// filename
pub const MAX_KEY_LEN: usize = (MAX_FILENAME_LEN - TEMP_SUFFIX.len()) * 3 / 4;

/// Encode a key into its on-disk filename
pub fn encode_filename(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

/// Decode an on-disk filename back into its key
///
/// Returns `None` for names that are not valid encodings or that decode
/// to invalid UTF-8; such files were not written by the store.
pub fn decode_filename(filename: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(filename).ok()?;
    String::from_utf8(bytes).ok()
}
