//! Deterministic slot derivation.
//!
//! Both ends of a channel hold the same seed slot and walk the same one-way
//! chain, so slot *N* can be computed by either peer without talking to the
//! other.

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use super::base32;
use crate::error::SlotError;

/// Length of a well-formed slot token: a 256-bit digest in base-32.
pub const SLOT_LEN: usize = 52;

/// Derives the successor of a slot token.
///
/// The cursor takes a sequencer at construction, so alternative chains can
/// be plugged in without touching the window bookkeeping.
pub trait SlotSequencer: Send + Sync {
    /// Return the slot that follows `token` in the chain.
    fn advance(&self, token: &str) -> Result<String, SlotError>;
}

/// Returns true if `token` has the fixed slot length.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == SLOT_LEN
}

/// SHA-256 hash chain over base-32 tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashChain;

impl HashChain {
    /// Generate a fresh random seed slot.
    pub fn random_seed() -> String {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        base32::encode(&seed)
    }
}

impl SlotSequencer for HashChain {
    fn advance(&self, token: &str) -> Result<String, SlotError> {
        let raw = base32::decode(token)?;
        let digest = Sha256::digest(&raw);
        Ok(base32::encode(&digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "MFRGGZDFMZTWQ2LKNNWG23TPOBYXE43UOV3HO6DZPIYDCMRTGQ2Q";

    #[test]
    fn test_advance_is_deterministic() {
        let a = HashChain.advance(SEED).unwrap();
        let b = HashChain.advance(SEED).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, SEED);
    }

    #[test]
    fn test_known_chain_values() {
        let first = HashChain.advance(SEED).unwrap();
        assert_eq!(first, "MU53CJC6QKH43JH2KP6NLI666W6XMVHGKH2UWQJSW46XJZSEGXCA");
        assert_eq!(
            HashChain.advance(&first).unwrap(),
            "Y2J4IWXRZLR2AHL7FQGYBIFMIRRL7MKP4MMHMBBPUJKRENTWX6OQ"
        );
    }

    #[test]
    fn test_advance_produces_fixed_length_tokens() {
        let mut slot = HashChain::random_seed();
        assert_eq!(slot.len(), SLOT_LEN);
        for _ in 0..20 {
            slot = HashChain.advance(&slot).unwrap();
            assert!(is_well_formed(&slot), "bad slot {slot}");
        }
    }

    #[test]
    fn test_independent_chains_agree() {
        let seed = HashChain::random_seed();
        let walk = |seq: &dyn SlotSequencer| {
            let mut slot = seed.clone();
            (0..10)
                .map(|_| {
                    slot = seq.advance(&slot).unwrap();
                    slot.clone()
                })
                .collect::<Vec<_>>()
        };

        let sender = HashChain;
        let receiver = HashChain;
        assert_eq!(walk(&sender), walk(&receiver));
    }

    #[test]
    fn test_advance_matches_sha256_of_decoded_bytes() {
        let seed = base32::encode(&[0u8; 32]);
        let expected = base32::encode(&Sha256::digest([0u8; 32]));
        assert_eq!(HashChain.advance(&seed).unwrap(), expected);
    }

    #[test]
    fn test_advance_rejects_invalid_base32() {
        assert!(HashChain.advance("not-a-slot!").is_err());
    }

    #[test]
    fn test_random_seeds_differ() {
        assert_ne!(HashChain::random_seed(), HashChain::random_seed());
    }
}
