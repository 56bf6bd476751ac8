//! Persistence collaborator for finished sessions, plus the in-memory leaderboard.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::domain::Difficulty;

#[derive(Debug, thiserror::Error)]
pub enum ScoreSinkError {
  #[error("score store unavailable: {0}")]
  Unavailable(String),
}

/// Receives the final score of every session that ends by timeout.
#[async_trait]
pub trait ScoreSink: Send + Sync {
  async fn save_score(&self, player: &str, score: u32, difficulty: Difficulty) -> Result<(), ScoreSinkError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
  pub player: String,
  pub score: u32,
  pub difficulty: Difficulty,
  /// Unix millis.
  pub recorded_at: u64,
}

/// Entries retained by the in-memory board; anything ranked lower is dropped.
pub const LEADERBOARD_CAPACITY: usize = 100;

/// Kept sorted by score descending (ties in insertion order) and capped.
pub struct MemoryLeaderboard {
  entries: RwLock<Vec<LeaderboardEntry>>,
  capacity: usize,
}

impl Default for MemoryLeaderboard {
  fn default() -> Self { Self::with_capacity(LEADERBOARD_CAPACITY) }
}

impl MemoryLeaderboard {
  pub fn new() -> Self { Self::default() }

  pub fn with_capacity(capacity: usize) -> Self {
    Self { entries: RwLock::new(Vec::with_capacity(capacity)), capacity }
  }

  /// Best `n` entries, highest score first; ties keep insertion order.
  pub async fn top(&self, n: usize) -> Vec<LeaderboardEntry> {
    let entries = self.entries.read().await;
    entries.iter().take(n).cloned().collect()
  }
}

#[async_trait]
impl ScoreSink for MemoryLeaderboard {
  #[instrument(level = "info", skip(self))]
  async fn save_score(&self, player: &str, score: u32, difficulty: Difficulty) -> Result<(), ScoreSinkError> {
    let recorded_at = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map_err(|e| ScoreSinkError::Unavailable(e.to_string()))?
      .as_millis() as u64;
    let mut entries = self.entries.write().await;
    let at = entries.partition_point(|e| e.score >= score);
    if at >= self.capacity {
      info!(target: "scores", %player, score, %difficulty, "Score below the board; not kept");
      return Ok(());
    }
    entries.insert(at, LeaderboardEntry {
      player: player.to_string(),
      score,
      difficulty,
      recorded_at,
    });
    entries.truncate(self.capacity);
    info!(target: "scores", %player, score, %difficulty, rank = at + 1, "Score saved");
    Ok(())
  }
}
