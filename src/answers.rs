//! Multiple-choice option synthesis.

use rand::{seq::SliceRandom, Rng};

/// Upper bound (inclusive) of the distractor pool used by the game.
pub const DEFAULT_RANGE_MAX: u32 = 14;

// 0..=3 always leaves three distinct distractors besides the correct value.
const MIN_RANGE_MAX: u32 = 3;

/// Build 4 distinct options containing `correct` exactly once, drawing the
/// distractors uniformly from `0..=range_max` and shuffling the result.
///
/// `correct` is included verbatim even when it lies outside the draw pool.
pub fn generate<R: Rng + ?Sized>(correct: u32, range_max: u32, rng: &mut R) -> [u32; 4] {
  let hi = range_max.max(MIN_RANGE_MAX);
  let mut options = Vec::with_capacity(4);
  options.push(correct);

  while options.len() < 4 {
    let candidate = rng.gen_range(0..=hi);
    if !options.contains(&candidate) {
      options.push(candidate);
    }
  }

  options.shuffle(rng);
  [options[0], options[1], options[2], options[3]]
}
