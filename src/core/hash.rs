//! State Hashing
//!
//! Canonical SHA-256 digest of the battle state. The authority attaches the
//! digest to every broadcast so a peer can tell whether the mirror it holds
//! matches the snapshot it was sent, and the match log uses it to verify a
//! replay.

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for game state.
///
/// Order of updates is part of the format.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Hasher for a battle state snapshot.
    pub fn for_game_state() -> Self {
        Self::new(b"CRYPTID_DUEL_STATE_V1")
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 value (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Length-prefixed string.
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Presence marker followed by the value when present.
    pub fn update_opt_u32(&mut self, value: Option<u32>) {
        match value {
            Some(v) => {
                self.update_u8(1);
                self.update_u32(v);
            }
            None => self.update_u8(0),
        }
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute a state hash. The closure feeds the state-specific fields after
/// the turn number and seed.
pub fn compute_state_hash<F>(turn: u32, rng_seed: u64, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_game_state();
    hasher.update_u32(turn);
    hasher.update_u64(rng_seed);
    add_state(&mut hasher);
    hasher.finalize()
}

/// Hex form used on the wire and in logs.
pub fn hash_to_hex(hash: &StateHash) -> String {
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_repeatable() {
        let make = || {
            compute_state_hash(3, 77, |h| {
                h.update_str("emberling");
                h.update_i32(-2);
                h.update_bool(true);
                h.update_opt_u32(Some(9));
            })
        };
        assert_eq!(make(), make());
    }

    #[test]
    fn test_field_order_matters() {
        let a = compute_state_hash(1, 1, |h| {
            h.update_u32(1);
            h.update_u32(2);
        });
        let b = compute_state_hash(1, 1, |h| {
            h.update_u32(2);
            h.update_u32(1);
        });
        assert_ne!(a, b);
    }

    #[test]
    fn test_strings_are_length_prefixed() {
        let a = compute_state_hash(0, 0, |h| {
            h.update_str("ab");
            h.update_str("c");
        });
        let b = compute_state_hash(0, 0, |h| {
            h.update_str("a");
            h.update_str("bc");
        });
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_form() {
        let hash = [0xabu8; 32];
        assert_eq!(hash_to_hex(&hash).len(), 64);
        assert!(hash_to_hex(&hash).starts_with("abab"));
    }
}
