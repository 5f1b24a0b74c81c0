//! HMAC-SHA256 signatures for cookie values.
//!
//! Wire format: `<raw id>.<base64url-no-pad tag>`. Raw ids are base64url, so
//! they never contain a `.` themselves.

use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{Result, SessionError};

type HmacSha256 = Hmac<Sha256>;

fn tag(value: &str, key: &[u8]) -> Vec<u8> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .expect("HMAC accepts keys of any length");
    mac.update(value.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Signs `value` with `key`, returning the encoded tag.
pub fn sign(value: &str, key: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(tag(value, key))
}

/// Checks `signature` against every key in order.
///
/// Any match is accepted, which lets a new signing key be rolled out in front
/// of the old one without invalidating live cookies.
pub fn verify(value: &str, signature: &str, keys: &[Zeroizing<Vec<u8>>]) -> bool {
    let Ok(given) = general_purpose::URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };

    keys.iter()
        .any(|key| bool::from(tag(value, key).ct_eq(&given)))
}

/// Builds the cookie value, signing with the first key if any are configured.
pub fn encode_cookie_value(raw_id: &str, keys: &[Zeroizing<Vec<u8>>]) -> String {
    match keys.first() {
        Some(key) => format!("{}.{}", raw_id, sign(raw_id, key)),
        None => raw_id.to_string(),
    }
}

/// Extracts the raw id from a cookie value.
///
/// With no keys configured the whole value is the id.
pub fn decode_cookie_value<'a>(value: &'a str, keys: &[Zeroizing<Vec<u8>>]) -> Result<&'a str> {
    if keys.is_empty() {
        return Ok(value);
    }

    let mut parts = value.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(raw_id), Some(signature), None)
            if !raw_id.is_empty() && verify(raw_id, signature, keys) =>
        {
            Ok(raw_id)
        }
        _ => Err(SessionError::SignatureInvalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(raw: &[&[u8]]) -> Vec<Zeroizing<Vec<u8>>> {
        raw.iter().map(|k| Zeroizing::new(k.to_vec())).collect()
    }

    #[test]
    fn signed_value_round_trips() {
        let keys = keys(&[b"k1"]);
        let value = encode_cookie_value("abc", &keys);
        assert!(value.starts_with("abc."));
        assert_eq!(decode_cookie_value(&value, &keys).unwrap(), "abc");
    }

    #[test]
    fn any_configured_key_verifies() {
        let signed_with_k2 = encode_cookie_value("abc", &keys(&[b"k2"]));
        let rotated = keys(&[b"k2", b"k1"]);
        assert_eq!(decode_cookie_value(&signed_with_k2, &rotated).unwrap(), "abc");

        let signed_with_k1 = encode_cookie_value("abc", &keys(&[b"k1"]));
        assert_eq!(decode_cookie_value(&signed_with_k1, &rotated).unwrap(), "abc");
    }

    #[test]
    fn every_flipped_byte_is_rejected() {
        let keys = keys(&[b"k1"]);
        let value = encode_cookie_value("abcdef", &keys);

        for i in 0..value.len() {
            let mut bytes = value.clone().into_bytes();
            bytes[i] ^= 0x01;
            let Ok(tampered) = String::from_utf8(bytes) else {
                continue;
            };
            assert!(
                decode_cookie_value(&tampered, &keys).is_err(),
                "tampered byte {} accepted",
                i
            );
        }
    }

    #[test]
    fn unsigned_or_malformed_values_are_rejected() {
        let keys = keys(&[b"k1"]);
        assert!(decode_cookie_value("abc", &keys).is_err());
        assert!(decode_cookie_value("abc.def.ghi", &keys).is_err());
        assert!(decode_cookie_value(".sig", &keys).is_err());
        assert!(decode_cookie_value("abc.!!!", &keys).is_err());
    }

    #[test]
    fn without_keys_the_value_is_the_id() {
        assert_eq!(decode_cookie_value("abc", &[]).unwrap(), "abc");
        assert_eq!(encode_cookie_value("abc", &[]), "abc");
    }
}
