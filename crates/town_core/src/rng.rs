//! Deterministic random stream utilities.
//!
//! Each [`Stream`] is an independent pseudo-random sequence derived from the
//! world seed, a logical stage label (`"tick:actions"`, `"tick:npc"`, ...) and
//! the current tick. The scheduler hands a fresh stream to every stage of a
//! tick, so replaying the same seed and the same queued actions reproduces the
//! same combat rolls, NPC choices and ambient lines.
//!
//! [`Stream`] implements [`rand::RngCore`], which lets the combat resolver and
//! the NPC engine stay generic over [`rand::Rng`] and accept any seeded
//! generator in tests.

use rand::RngCore;
use rand_chacha::ChaCha8Rng;
use rand_seeder::Seeder;

#[derive(Clone, Debug)]
pub struct Stream {
    /// Upper 64 bits store the logical stream id; lower 64 bits store the
    /// rolling counter for splitmix-style generation.
    state: u128,
}

impl Stream {
    /// Construct a stream for the given `(seed, stage, tick)` triple.
    pub fn from(seed: u64, stage: &str, tick: u64) -> Self {
        let stage_hash = fnv1a64(stage.as_bytes());
        let mut stream_id = seed
            .wrapping_mul(0xA0761D6478BD642F)
            .wrapping_add(0xE7037ED1A0B428DB)
            ^ tick.wrapping_mul(0x8E9D5A8F6A09E667)
            ^ stage_hash;
        stream_id = mix64(stream_id);
        let counter = mix64(stream_id ^ 0xD1342543DE82EF95);
        Self {
            state: (u128::from(stream_id) << 64) | u128::from(counter),
        }
    }

    /// Deterministically derive a child stream identified by `label`.
    pub fn derive(&self, label: u64) -> Self {
        let parent_id = (self.state >> 64) as u64;
        let derived = mix64(parent_id ^ mix64(label ^ 0x94D049BB133111EB));
        let counter = mix64(derived ^ 0xBF58476D1CE4E5B9);
        Self {
            state: (u128::from(derived) << 64) | u128::from(counter),
        }
    }

    fn advance(&mut self) -> u64 {
        let stream_id = (self.state >> 64) as u64;
        let mut counter = self.state as u64;
        counter = counter.wrapping_add(0x9E3779B97F4A7C15);
        self.state = (u128::from(stream_id) << 64) | u128::from(counter);
        mix64(stream_id ^ counter)
    }
}

impl RngCore for Stream {
    fn next_u32(&mut self) -> u32 {
        (self.advance() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.advance()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.advance().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Produce a deterministic label for deriving child streams.
pub fn stream_label(name: &str) -> u64 {
    fnv1a64(name.as_bytes())
}

/// Turn a free-text seed phrase ("high noon") into a numeric world seed.
pub fn seed_from_phrase(phrase: &str) -> u64 {
    let mut rng: ChaCha8Rng = Seeder::from(phrase).make_rng();
    rng.next_u64()
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
