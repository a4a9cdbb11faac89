//! Correlation id generation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::log::targets;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 10;

/// A source of candidate correlation ids.
///
/// Candidates need not be unique; [`IdGenerator`] redraws on collision.
pub trait IdSource: Send + 'static {
    /// Draw the next candidate id.
    fn draw(&mut self) -> String;
}

/// Random base-36 ids.
#[derive(Debug)]
pub struct RandomIds {
    rng: StdRng,
}

impl RandomIds {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for RandomIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSource for RandomIds {
    fn draw(&mut self) -> String {
        (0..ID_LEN)
            .map(|_| ALPHABET[self.rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }
}

/// Produces ids that are unique among the ids currently in use.
pub struct IdGenerator {
    source: Box<dyn IdSource>,
}

impl IdGenerator {
    pub fn new(source: impl IdSource) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Draw ids until one is not `in_use`.
    pub fn next(&mut self, in_use: impl Fn(&str) -> bool) -> String {
        loop {
            let id = self.source.draw();
            if !in_use(&id) {
                return id;
            }
            tracing::trace!(target: targets::CLIENT, %id, "correlation id collision, redrawing");
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(RandomIds::new())
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}
