//! Message id generation
//!
//! Ids are short random strings over the 62-symbol alphanumeric alphabet.
//! Short ids keep frames small on narrow links, at the price of a collision
//! risk among messages in flight. [`collision_probability`] makes that
//! risk explicit and [`IdGenerator::for_load`] sizes ids against it.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::{DEFAULT_ID_LENGTH, MAX_ID_LENGTH, MIN_ID_LENGTH};
use crate::error::{MeshError, Result};
use crate::frame::MessageId;

/// Size of the id alphabet (`[A-Za-z0-9]`)
pub const ALPHABET_SIZE: u32 = 62;

/// Probability that at least two of `in_flight` ids of `length` collide
///
/// Birthday bound `1 - exp(-k(k-1) / (2 * 62^length))`.
pub fn collision_probability(length: usize, in_flight: usize) -> f64 {
    if in_flight < 2 {
        return 0.0;
    }
    let space = f64::from(ALPHABET_SIZE).powi(length as i32);
    let k = in_flight as f64;
    1.0 - (-(k * (k - 1.0)) / (2.0 * space)).exp()
}

/// Random message id source
#[derive(Debug, Clone, Copy)]
pub struct IdGenerator {
    length: usize,
}

impl IdGenerator {
    /// Create a generator for ids of `length` characters (3-5)
    pub fn new(length: usize) -> Result<Self> {
        if !(MIN_ID_LENGTH..=MAX_ID_LENGTH).contains(&length) {
            return Err(MeshError::InvalidConfig(format!(
                "id length must be between {} and {}, got {}",
                MIN_ID_LENGTH, MAX_ID_LENGTH, length
            )));
        }
        Ok(Self { length })
    }

    /// Shortest generator whose collision risk stays within `max_probability`
    ///
    /// Falls back to the longest id length when no length meets the bound.
    pub fn for_load(in_flight: usize, max_probability: f64) -> Self {
        let length = (MIN_ID_LENGTH..=MAX_ID_LENGTH)
            .find(|&len| collision_probability(len, in_flight) <= max_probability)
            .unwrap_or(MAX_ID_LENGTH);
        Self { length }
    }

    /// Configured id length
    pub fn length(&self) -> usize {
        self.length
    }

    /// Collision risk of this generator with `in_flight` concurrent messages
    pub fn collision_probability(&self, in_flight: usize) -> f64 {
        collision_probability(self.length, in_flight)
    }

    /// Draw a fresh id
    pub fn generate(&self) -> MessageId {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect();
        MessageId::from_generated(id)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            length: DEFAULT_ID_LENGTH,
        }
    }
}
