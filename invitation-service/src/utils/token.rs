//! Invitation token minting and digesting.
//!
//! Raw tokens leave the process only through the pending-token store and the
//! mailer. Persistence sees the SHA-256 digest and an 8 character preview.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Bytes of entropy in a raw token.
pub const TOKEN_BYTES: usize = 32;

/// Length of the non-secret prefix kept for display and preview lookups.
pub const TOKEN_PREVIEW_LEN: usize = 8;

/// Mint a URL-safe raw token from the OS CSPRNG.
pub fn generate_raw_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256 digest of a raw token.
pub fn hash_token(raw_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_token.as_bytes());
    hex::encode(hasher.finalize())
}

/// First [`TOKEN_PREVIEW_LEN`] characters, or `None` when the input is shorter.
pub fn token_preview(raw_token: &str) -> Option<&str> {
    let end = raw_token
        .char_indices()
        .nth(TOKEN_PREVIEW_LEN)
        .map(|(idx, _)| idx)
        .unwrap_or(raw_token.len());
    let preview = &raw_token[..end];
    (preview.chars().count() == TOKEN_PREVIEW_LEN).then_some(preview)
}
