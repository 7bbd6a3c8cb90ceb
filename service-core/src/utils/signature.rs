use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `payload` under `secret`.
///
/// Used for values a trusted upstream hands us in headers, where the header
/// value itself is the signed payload.
pub fn sign_payload(secret: &str, payload: &str) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex HMAC-SHA256 signature using constant-time comparison
pub fn verify_payload(secret: &str, payload: &str, signature: &str) -> Result<bool, anyhow::Error> {
    let expected_signature = sign_payload(secret, payload)?;
    let expected_bytes = expected_signature.as_bytes();
    let signature_bytes = signature.trim().to_ascii_lowercase().into_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(&signature_bytes).into())
}
