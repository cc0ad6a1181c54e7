//! Keyed Stream Transform
//!
//! The transform is a ChaCha20 keystream (64-bit counter variant) keyed from
//! an arbitrary-length shared secret through HKDF-SHA256. It is symmetric,
//! so the same [`Encryptor`] configuration both encrypts outbound and
//! decrypts inbound bytes, and it keeps its position across calls so a
//! message split over several reads decodes the same as one read.
//!
//! ```text
//! secret ──HKDF-SHA256(salt, info)──> key (32) ‖ nonce (8) ──> ChaCha20 keystream
//! ```

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20Legacy;
use hkdf::Hkdf;
use sha2::Sha256;
use std::fmt;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 8;

/// Binds derived keys to this transform
const KDF_SALT: &[u8] = b"connkit stream salt v1";
const KDF_INFO: &[u8] = b"connkit stream keystream";

/// Keyed symmetric byte transform with a running keystream position.
#[derive(Default)]
pub struct Encryptor {
    enabled: bool,
    cipher: Option<ChaCha20Legacy>,
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("enabled", &self.enabled)
            .field("keyed", &self.cipher.is_some())
            .finish()
    }
}

fn derive_cipher(secret: &[u8]) -> ChaCha20Legacy {
    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), secret);
    let mut okm = [0u8; KEY_LEN + NONCE_LEN];
    // 40 bytes is far below the HKDF-SHA256 output limit.
    let _ = hk.expand(KDF_INFO, &mut okm);

    let mut key = [0u8; KEY_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    key.copy_from_slice(&okm[..KEY_LEN]);
    nonce.copy_from_slice(&okm[KEY_LEN..]);
    ChaCha20Legacy::new(&key.into(), &nonce.into())
}

impl Encryptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self, enable: bool) {
        self.enabled = enable;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Replaces the key and restarts the keystream. An empty key unkeys the
    /// transform.
    pub fn set_key(&mut self, key: &[u8]) {
        self.cipher = (!key.is_empty()).then(|| derive_cipher(key));
    }

    pub fn is_keyed(&self) -> bool {
        self.cipher.is_some()
    }

    /// Restarts the keystream.
    pub fn reset(&mut self) {
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.seek(0u64);
        }
    }

    /// Keystream bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.cipher.as_ref().map_or(0, |c| c.current_pos())
    }

    /// Transforms `data` in place. No-op while disabled or without a key.
    pub fn apply(&mut self, data: &mut [u8]) {
        if !self.enabled {
            return;
        }
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.apply_keystream(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(key: &[u8]) -> Encryptor {
        let mut enc = Encryptor::new();
        enc.enable(true);
        enc.set_key(key);
        enc
    }

    #[test]
    fn test_disabled_is_identity() {
        let mut enc = Encryptor::new();
        enc.set_key(b"secret");
        let mut data = *b"hello";
        enc.apply(&mut data);
        assert_eq!(&data, b"hello");
        assert_eq!(enc.position(), 0);
    }

    #[test]
    fn test_enabled_without_key_is_identity() {
        let mut enc = Encryptor::new();
        enc.enable(true);
        let mut data = *b"hello";
        enc.apply(&mut data);
        assert_eq!(&data, b"hello");

        enc.set_key(b"");
        assert!(!enc.is_keyed());
    }

    #[test]
    fn test_split_application_matches_whole() {
        let mut whole = keyed(b"k3y");
        let mut a = *b"packet payload";
        whole.apply(&mut a);

        let mut split = keyed(b"k3y");
        let mut b = *b"packet payload";
        split.apply(&mut b[..5]);
        split.apply(&mut b[5..]);

        assert_eq!(a, b);
        assert_ne!(&a, b"packet payload");
        assert_eq!(split.position(), 14);
    }

    #[test]
    fn test_symmetric() {
        let mut tx = keyed(b"abc");
        let mut rx = keyed(b"abc");
        let mut data = b"round and round".to_vec();
        tx.apply(&mut data);
        rx.apply(&mut data);
        assert_eq!(data, b"round and round");
    }

    #[test]
    fn test_keystream_does_not_repeat_key() {
        // A known all-zero plaintext must not reveal the key bytes.
        let mut enc = keyed(b"k");
        let mut zeros = [0u8; 64];
        enc.apply(&mut zeros);
        assert!(zeros.iter().any(|&b| b != b'k'));
        assert_ne!(zeros[..32], zeros[32..]);
    }

    #[test]
    fn test_different_keys_differ() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        keyed(b"alpha").apply(&mut a);
        keyed(b"bravo").apply(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_reset_restarts_keystream() {
        let mut enc = keyed(b"restart");
        let mut first = [0u8; 10];
        enc.apply(&mut first);

        enc.reset();
        assert_eq!(enc.position(), 0);
        let mut again = [0u8; 10];
        enc.apply(&mut again);
        assert_eq!(first, again);
    }

    #[test]
    fn test_debug_hides_key() {
        let enc = keyed(b"topsecret");
        let text = format!("{:?}", enc);
        assert!(!text.contains("topsecret"));
        assert!(text.contains("keyed: true"));
    }
}
