//! Time-derived shared key used by the connection handshake.
//!
//! The key is the SHA3-512 digest of the local wall-clock time at minute
//! precision. Anyone who knows the server's clock can derive it, so it only
//! keeps out clients that were not told to connect; it is not access control.

use chrono::{Local, NaiveDateTime};
use sha3::{Digest, Sha3_512};
use std::fmt;

/// Clock format fed to the digest, e.g. `2018/05/01-13:07`.
pub const KEY_TIME_FORMAT: &str = "%Y/%m/%d-%H:%M";

/// Digest length in bytes.
pub const KEY_LEN: usize = 64;

#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; KEY_LEN]);

impl SharedKey {
    /// Derives the key for the current local minute.
    pub fn generate() -> Self {
        Self::for_naive(&Local::now().naive_local())
    }

    pub fn for_naive(time: &NaiveDateTime) -> Self {
        Self::for_timestamp(&time.format(KEY_TIME_FORMAT).to_string())
    }

    /// Digests an already formatted timestamp.
    pub fn for_timestamp(stamp: &str) -> Self {
        let digest = Sha3_512::digest(stamp.as_bytes());
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Exact byte comparison against a candidate sent by a client.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        self.0.as_slice() == candidate
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a key printed by [`to_hex`](Self::to_hex). Either case is accepted.
    pub fn from_hex(text: &str) -> Option<Self> {
        let bytes = hex::decode(text.trim()).ok()?;
        let bytes = <[u8; KEY_LEN]>::try_from(bytes).ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedKey({}..)", &self.to_hex()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_digest_matches_sha3_512() {
        let key = SharedKey::for_timestamp("abc");
        assert_eq!(
            key.to_hex(),
            "b751850b1a57168a5693cd924b6b096e08f621827444f70d884f5d0240d2712e\
             10e116e9192af3c91a7ec57647e3934057340b4cf408d5a56592f8274eec53f0"
        );
    }

    #[test]
    fn test_key_ignores_seconds() {
        let date = NaiveDate::from_ymd_opt(2018, 5, 1).unwrap();
        let early = SharedKey::for_naive(&date.and_hms_opt(13, 7, 0).unwrap());
        let late = SharedKey::for_naive(&date.and_hms_opt(13, 7, 59).unwrap());
        let next = SharedKey::for_naive(&date.and_hms_opt(13, 8, 0).unwrap());

        assert_eq!(early, late);
        assert_ne!(early, next);
        assert_eq!(early, SharedKey::for_timestamp("2018/05/01-13:07"));
    }

    #[test]
    fn test_matches_is_exact() {
        let key = SharedKey::for_timestamp("2018/05/01-13:07");
        assert!(key.matches(key.as_bytes()));

        let mut trailing_newline = key.as_bytes().to_vec();
        trailing_newline.push(b'\n');
        assert!(!key.matches(&trailing_newline));
        assert!(!key.matches(&key.as_bytes()[1..]));
        assert!(!key.matches(key.to_hex().as_bytes()));
    }

    #[test]
    fn test_hex_round_trip() {
        let key = SharedKey::generate();
        assert_eq!(SharedKey::from_hex(&key.to_hex()), Some(key.clone()));
        assert_eq!(SharedKey::from_hex(&key.to_hex().to_uppercase()), Some(key.clone()));
        assert_eq!(SharedKey::from_hex("abcd"), None);
        assert_eq!(SharedKey::from_hex(&"zz".repeat(KEY_LEN)), None);
        // Valid hex of the wrong length
        assert_eq!(SharedKey::from_hex(&"ab".repeat(KEY_LEN - 1)), None);
        assert_eq!(SharedKey::from_hex(&format!(" {}\n", key.to_hex())), Some(key));
    }

    #[test]
    fn test_debug_does_not_print_whole_key() {
        let key = SharedKey::for_timestamp("abc");
        assert_eq!(format!("{:?}", key), "SharedKey(b751850b..)");
    }
}
