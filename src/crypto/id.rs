use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

/// The size of a raw session id in bytes (256 bits of entropy).
const SESSION_ID_SIZE: usize = 32;

/// Generates a new random session id.
///
/// # Returns
///
/// A URL-safe base64-encoded id, suitable for a cookie value.
pub fn generate_session_id() -> String {
    let mut id = [0u8; SESSION_ID_SIZE];
    OsRng.fill_bytes(&mut id);

    general_purpose::URL_SAFE_NO_PAD.encode(id)
}

/// Derives the store key for a raw session id.
///
/// The store only ever sees this value, so a leaked store cannot be replayed
/// as cookies.
pub fn hash_session_id(raw_id: &str, secret: &[u8]) -> String {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret)
        .expect("HMAC accepts keys of any length");
    mac.update(raw_id.as_bytes());

    general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}
