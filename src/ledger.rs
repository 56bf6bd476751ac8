//! Running session score. Only the round engine holds a mutable ledger.

use crate::domain::DifficultyProfile;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScoreLedger {
  value: u32,
}

impl ScoreLedger {
  pub fn new() -> Self { Self::default() }

  pub fn value(&self) -> u32 { self.value }

  pub fn reset(&mut self) { self.value = 0; }

  /// Apply one evaluated answer under `profile`'s rules; returns the new score.
  pub fn record(&mut self, correct: bool, profile: &DifficultyProfile) -> u32 {
    if correct {
      self.value = self.value.saturating_add(profile.points_per_correct);
    } else if profile.penalty_enabled {
      self.value = self.value.saturating_sub(profile.penalty_per_wrong);
    }
    self.value
  }
}
