//! Opaque pagination tokens.
//!
//! Page tokens are HMAC-protected and base64url-encoded. A token binds the
//! directory and the query revision so it cannot be replayed against a
//! different directory or a different revision's listing, and carries the
//! resume position. Clients must treat tokens as opaque.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use lattica_keydir_types::{codec, KeydirError};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use snafu::Snafu;

/// Token format version for forward compatibility.
const TOKEN_VERSION: u8 = 1;

/// HMAC key length in bytes.
const HMAC_KEY_LENGTH: usize = 32;

/// HMAC output length (truncated).
const HMAC_LENGTH: usize = 16;

/// Internal page token structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    /// Token format version.
    pub version: u8,
    /// Directory the token was issued for.
    pub directory_id: String,
    /// Query context: the revision (or range end) being paginated.
    pub revision: u64,
    /// Resume position: last sequence number (or revision) already
    /// returned.
    pub position: u64,
}

impl PageToken {
    /// Builds a token for the given context and position.
    pub fn new(directory_id: &str, revision: u64, position: u64) -> Self {
        Self { version: TOKEN_VERSION, directory_id: directory_id.to_string(), revision, position }
    }
}

/// Encoded token with its truncated HMAC.
#[derive(Debug, Serialize, Deserialize)]
struct SealedToken {
    token: PageToken,
    hmac: [u8; HMAC_LENGTH],
}

/// Error type for page token decoding.
#[derive(Debug, Snafu)]
pub enum PageTokenError {
    /// The token could not be decoded.
    #[snafu(display("page token malformed"))]
    Malformed,

    /// The HMAC did not validate (tampering or foreign key).
    #[snafu(display("page token failed validation"))]
    BadSignature,

    /// Unsupported token version.
    #[snafu(display("page token version {version} not supported"))]
    UnsupportedVersion {
        /// The version the token carried.
        version: u8,
    },

    /// The token was issued for a different directory or revision.
    #[snafu(display("page token does not match this query"))]
    ContextMismatch,
}

impl From<PageTokenError> for KeydirError {
    fn from(err: PageTokenError) -> Self {
        KeydirError::invalid_argument(err.to_string())
    }
}

/// Page token encoder/decoder with HMAC validation.
///
/// The key is sampled at process startup; tokens are node-local and do not
/// survive restarts, which is acceptable for forward-only pagination.
#[derive(Clone)]
pub struct PageTokenCodec {
    key: [u8; HMAC_KEY_LENGTH],
}

impl PageTokenCodec {
    /// Creates a codec with the given key.
    pub fn new(key: [u8; HMAC_KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Creates a codec with a random key.
    pub fn with_random_key() -> Self {
        use rand::RngCore;
        let mut key = [0u8; HMAC_KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Encodes a token to its opaque string form.
    pub fn encode(&self, token: &PageToken) -> String {
        let Ok(token_bytes) = codec::encode(token) else {
            return String::new(); // Unreachable for a valid PageToken
        };

        let sealed = SealedToken { token: token.clone(), hmac: self.hmac_of(&token_bytes) };
        let Ok(bytes) = codec::encode(&sealed) else {
            return String::new(); // Unreachable for a valid SealedToken
        };
        URL_SAFE_NO_PAD.encode(&bytes)
    }

    /// Decodes and validates a token, checking it was issued for
    /// `(directory_id, revision)`.
    pub fn decode(
        &self,
        encoded: &str,
        directory_id: &str,
        revision: u64,
    ) -> Result<PageToken, PageTokenError> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| PageTokenError::Malformed)?;
        let sealed: SealedToken = codec::decode(&bytes).map_err(|_| PageTokenError::Malformed)?;

        let token_bytes = codec::encode(&sealed.token).map_err(|_| PageTokenError::Malformed)?;
        let expected = self.hmac_of(&token_bytes);
        if !constant_time_eq(&expected, &sealed.hmac) {
            return Err(PageTokenError::BadSignature);
        }
        if sealed.token.version != TOKEN_VERSION {
            return Err(PageTokenError::UnsupportedVersion { version: sealed.token.version });
        }
        if sealed.token.directory_id != directory_id || sealed.token.revision != revision {
            return Err(PageTokenError::ContextMismatch);
        }
        Ok(sealed.token)
    }

    #[allow(clippy::expect_used)] // HMAC accepts any key length
    fn hmac_of(&self, token_bytes: &[u8]) -> [u8; HMAC_LENGTH] {
        let mut mac = <Hmac<Sha256>>::new_from_slice(&self.key)
            .expect("HMAC accepts any key length");
        mac.update(token_bytes);
        let full = mac.finalize().into_bytes();

        let mut truncated = [0u8; HMAC_LENGTH];
        truncated.copy_from_slice(&full[..HMAC_LENGTH]);
        truncated
    }
}

fn constant_time_eq(a: &[u8; HMAC_LENGTH], b: &[u8; HMAC_LENGTH]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let codec = PageTokenCodec::with_random_key();
        let token = PageToken::new("d1", 7, 42);

        let encoded = codec.encode(&token);
        let decoded = codec.decode(&encoded, "d1", 7).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let codec = PageTokenCodec::with_random_key();
        let encoded = codec.encode(&PageToken::new("d1", 7, 42));

        let mut bytes = URL_SAFE_NO_PAD.decode(&encoded).unwrap();
        bytes[2] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(&bytes);

        assert!(codec.decode(&tampered, "d1", 7).is_err());
    }

    #[test]
    fn test_foreign_key_rejected() {
        let codec_a = PageTokenCodec::with_random_key();
        let codec_b = PageTokenCodec::with_random_key();
        let encoded = codec_a.encode(&PageToken::new("d1", 7, 42));

        assert!(matches!(
            codec_b.decode(&encoded, "d1", 7),
            Err(PageTokenError::BadSignature)
        ));
    }

    #[test]
    fn test_cross_directory_reuse_rejected() {
        let codec = PageTokenCodec::with_random_key();
        let encoded = codec.encode(&PageToken::new("d1", 7, 42));

        assert!(matches!(
            codec.decode(&encoded, "d2", 7),
            Err(PageTokenError::ContextMismatch)
        ));
    }

    #[test]
    fn test_cross_revision_reuse_rejected() {
        let codec = PageTokenCodec::with_random_key();
        let encoded = codec.encode(&PageToken::new("d1", 7, 42));

        assert!(matches!(
            codec.decode(&encoded, "d1", 8),
            Err(PageTokenError::ContextMismatch)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let codec = PageTokenCodec::with_random_key();
        assert!(matches!(
            codec.decode("not-a-token!!!", "d1", 0),
            Err(PageTokenError::Malformed)
        ));
        assert!(matches!(codec.decode("", "d1", 0), Err(PageTokenError::Malformed)));
    }
}
