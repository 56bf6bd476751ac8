//! Domain models: difficulty tiers and their profiles, the fetched question,
//! and the per-round challenge built from it.

use serde::{Deserialize, Serialize};

/// Difficulty tier selected once per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
}
impl Default for Difficulty {
  fn default() -> Self { Difficulty::Easy }
}

impl Difficulty {
  pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

  pub fn as_str(&self) -> &'static str {
    match self {
      Difficulty::Easy => "easy",
      Difficulty::Medium => "medium",
      Difficulty::Hard => "hard",
    }
  }
}

impl std::fmt::Display for Difficulty {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Timer, reward and penalty rules for one tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DifficultyProfile {
  pub id: Difficulty,
  pub timer_seconds: u32,
  pub points_per_correct: u32,
  pub penalty_per_wrong: u32,
  pub penalty_enabled: bool,
}

const EASY: DifficultyProfile = DifficultyProfile {
  id: Difficulty::Easy,
  timer_seconds: 45,
  points_per_correct: 1,
  penalty_per_wrong: 0,
  penalty_enabled: false,
};

const MEDIUM: DifficultyProfile = DifficultyProfile {
  id: Difficulty::Medium,
  timer_seconds: 30,
  points_per_correct: 3,
  penalty_per_wrong: 1,
  penalty_enabled: true,
};

const HARD: DifficultyProfile = DifficultyProfile {
  id: Difficulty::Hard,
  timer_seconds: 20,
  points_per_correct: 5,
  penalty_per_wrong: 1,
  penalty_enabled: true,
};

/// Constant lookup; every tier has exactly one profile.
pub fn profile_for(id: Difficulty) -> DifficultyProfile {
  match id {
    Difficulty::Easy => EASY,
    Difficulty::Medium => MEDIUM,
    Difficulty::Hard => HARD,
  }
}

/// One question as returned by the remote source.
///
/// The upstream JSON names the hearts count `solution`:
/// `{"question": "<image url>", "solution": 5, "carrots": 3}`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Question {
  #[serde(rename = "question")]
  pub image_ref: String,
  #[serde(rename = "solution")]
  pub hearts: u32,
  pub carrots: u32,
}

/// Which count the player is asked for this round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
  Hearts,
  Carrots,
}

impl Metric {
  /// Field of `q` that answers this metric.
  pub fn value_in(&self, q: &Question) -> u32 {
    match self {
      Metric::Hearts => q.hearts,
      Metric::Carrots => q.carrots,
    }
  }
}

/// Round-scoped challenge; `options` always holds 4 distinct values with
/// `correct_value` present exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundChallenge {
  pub image_ref: String,
  pub metric: Metric,
  pub correct_value: u32,
  pub options: [u32; 4],
}
