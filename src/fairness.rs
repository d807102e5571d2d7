//! Provably fair commit-reveal for crash rounds.
//!
//! Each round draws a 32-byte secret from the OS RNG. The SHA-256 of the secret
//! is published before any bet is accepted; the secret itself is revealed only
//! when the round resolves. The crash point is a pure function of the secret:
//!
//! 1. `digest = HMAC-SHA256(key = secret, message = "crash-engine/round")`
//! 2. `h` = leading 52 bits of `digest` (first 13 hex digits)
//! 3. if `h % modulus == 0` the round busts at exactly 1.00
//! 4. otherwise `floor(100 * 2^52 / (2^52 - h)) / 100`, floored at 1.01
//!
//! Anyone holding the revealed secret can recompute both values.

use crate::errors::FairnessError;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Domain-separation message signed with the round secret
pub const DOMAIN_SEPARATOR: &[u8] = b"crash-engine/round";

pub const SECRET_LEN: usize = 32;

const E: u64 = 1 << 52;

/// Lowest crash point outside the instant-bust branch, in hundredths
const MIN_CRASH_HUNDREDTHS: u64 = 101;

/// Secret, public commitment and derived crash point for one round
#[derive(Clone, PartialEq)]
pub struct RoundCommitment {
    pub secret: [u8; SECRET_LEN],
    pub hash: String,
    pub crash_point: Decimal,
}

impl RoundCommitment {
    /// Draw a fresh secret from the operating system RNG
    pub fn generate(instant_bust_modulus: u64) -> Self {
        let mut secret = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret(secret, instant_bust_modulus)
    }

    pub fn from_secret(secret: [u8; SECRET_LEN], instant_bust_modulus: u64) -> Self {
        Self {
            hash: hash_secret(&secret),
            crash_point: crash_point_from_secret(&secret, instant_bust_modulus),
            secret,
        }
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret)
    }
}

impl fmt::Debug for RoundCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundCommitment")
            .field("hash", &self.hash)
            .field("secret", &"<hidden>")
            .finish()
    }
}

/// Source of per-round commitments
pub trait CommitmentSource: Send {
    fn next_commitment(&mut self, instant_bust_modulus: u64) -> RoundCommitment;
}

/// Production source backed by the OS RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRngCommitments;

impl CommitmentSource for OsRngCommitments {
    fn next_commitment(&mut self, instant_bust_modulus: u64) -> RoundCommitment {
        RoundCommitment::generate(instant_bust_modulus)
    }
}

/// Public commitment: hex SHA-256 of the raw secret
pub fn hash_secret(secret: &[u8]) -> String {
    hex::encode(Sha256::digest(secret))
}

/// Leading 52 bits of a digest as an integer
pub fn leading_52_bits(digest: &[u8]) -> u64 {
    let mut head = [0u8; 8];
    let n = digest.len().min(8);
    head[..n].copy_from_slice(&digest[..n]);
    u64::from_be_bytes(head) >> 12
}

/// Crash point for a 52-bit sample, two decimal places
pub fn crash_point_from_bits(h: u64, instant_bust_modulus: u64) -> Decimal {
    let h = h & (E - 1);
    if h % instant_bust_modulus.max(1) == 0 {
        return Decimal::new(100, 2);
    }

    let hundredths = (100 * E) / (E - h);
    Decimal::new(hundredths.max(MIN_CRASH_HUNDREDTHS) as i64, 2)
}

pub fn crash_point_from_secret(secret: &[u8], instant_bust_modulus: u64) -> Decimal {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(DOMAIN_SEPARATOR);
    let digest = mac.finalize().into_bytes();

    crash_point_from_bits(leading_52_bits(&digest), instant_bust_modulus)
}

/// Outcome of auditing a revealed secret
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub hash: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub crash_point: Decimal,
    /// Present when an expected hash was supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_matches: Option<bool>,
}

/// Recompute hash and crash point from a hex-encoded revealed secret
pub fn verify(
    secret_hex: &str,
    expected_hash: Option<&str>,
    instant_bust_modulus: u64,
) -> Result<Verification, FairnessError> {
    let secret = hex::decode(secret_hex.trim()).map_err(|e| FairnessError::InvalidHex(e.to_string()))?;
    if secret.len() != SECRET_LEN {
        return Err(FairnessError::InvalidLength {
            expected: SECRET_LEN,
            actual: secret.len(),
        });
    }

    let hash = hash_secret(&secret);
    let hash_matches = expected_hash.map(|expected| expected.trim().eq_ignore_ascii_case(&hash));

    Ok(Verification {
        crash_point: crash_point_from_secret(&secret, instant_bust_modulus),
        hash,
        hash_matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_point_bounds_over_many_secrets() {
        for i in 0..2_000u32 {
            let mut secret = [0u8; SECRET_LEN];
            secret[..4].copy_from_slice(&i.to_be_bytes());
            let commitment = RoundCommitment::from_secret(secret, 25);

            let one = Decimal::new(100, 2);
            let floor = Decimal::new(101, 2);
            assert!(
                commitment.crash_point == one || commitment.crash_point >= floor,
                "secret {} produced {}",
                i,
                commitment.crash_point
            );
            assert!(commitment.crash_point.scale() <= 2);
        }
    }

    #[test]
    fn test_instant_bust_branch() {
        assert_eq!(crash_point_from_bits(0, 25), Decimal::new(100, 2));
        assert_eq!(crash_point_from_bits(25 * 7, 25), Decimal::new(100, 2));
        // Non-multiples just above zero land on the 1.01 floor
        assert_eq!(crash_point_from_bits(1, 25), Decimal::new(101, 2));
    }

    #[test]
    fn test_crash_point_formula() {
        // h just above e/2: floor(100 * e / (e/2 - 1)) = 200
        assert_eq!(crash_point_from_bits(E / 2 + 1, 25), Decimal::new(200, 2));
        // h = 3e/4 -> 100 * 4 = 400 (3e/4 = 3 * 2^50, not a multiple of 25)
        assert_eq!(crash_point_from_bits(3 * (E / 4), 25), Decimal::new(400, 2));
        // Largest sample yields the largest multiplier
        let top = crash_point_from_bits(E - 1, 25);
        assert_eq!(top, Decimal::new((100 * E) as i64, 2));
    }

    #[test]
    fn test_leading_bits() {
        let digest = [0xff; 32];
        assert_eq!(leading_52_bits(&digest), E - 1);

        let digest = hex::decode("0000000000001fff").unwrap();
        assert_eq!(leading_52_bits(&digest), 1);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let secret = [7u8; SECRET_LEN];
        let a = RoundCommitment::from_secret(secret, 25);
        let b = RoundCommitment::from_secret(secret, 25);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.crash_point, b.crash_point);

        let other = RoundCommitment::from_secret([8u8; SECRET_LEN], 25);
        assert_ne!(a.hash, other.hash);
    }

    #[test]
    fn test_hash_matches_sha256_of_secret() {
        let commitment = RoundCommitment::from_secret([0u8; SECRET_LEN], 25);
        assert_eq!(
            commitment.hash,
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
    }

    #[test]
    fn test_verify_roundtrip() {
        let commitment = RoundCommitment::generate(25);
        let verification = verify(&commitment.secret_hex(), Some(&commitment.hash), 25).unwrap();

        assert_eq!(verification.crash_point, commitment.crash_point);
        assert_eq!(verification.hash_matches, Some(true));

        let mismatch = verify(&commitment.secret_hex(), Some("deadbeef"), 25).unwrap();
        assert_eq!(mismatch.hash_matches, Some(false));
    }

    #[test]
    fn test_verify_rejects_bad_input() {
        assert!(matches!(verify("zz", None, 25), Err(FairnessError::InvalidHex(_))));
        assert!(matches!(
            verify("abcd", None, 25),
            Err(FairnessError::InvalidLength { expected: 32, actual: 2 })
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let commitment = RoundCommitment::from_secret([9u8; SECRET_LEN], 25);
        let rendered = format!("{:?}", commitment);
        assert!(!rendered.contains(&commitment.secret_hex()));
    }
}
