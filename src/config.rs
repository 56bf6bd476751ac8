//! Loading game configuration from TOML, with env overrides.
//!
//! See `GameConfig` for the expected schema. Every field is optional in the file.

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::answers::DEFAULT_RANGE_MAX;

pub const DEFAULT_API_URL: &str = "https://marcconrad.com/uob/heart/api.php";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GameConfig {
  /// Question endpoint (one GET per round).
  pub api_url: String,
  pub fetch_timeout_secs: u64,
  /// Distractors are drawn from `0..=option_range_max`.
  pub option_range_max: u32,
  /// Start the next round as soon as an answer is evaluated.
  pub auto_advance: bool,
  pub leaderboard_size: usize,
  /// Fixed seed for question/option randomness (demos, reproducible runs).
  pub rng_seed: Option<u64>,
}

impl Default for GameConfig {
  fn default() -> Self {
    Self {
      api_url: DEFAULT_API_URL.into(),
      fetch_timeout_secs: 10,
      option_range_max: DEFAULT_RANGE_MAX,
      auto_advance: true,
      leaderboard_size: 10,
      rng_seed: None,
    }
  }
}

impl GameConfig {
  /// Parse a TOML document; missing keys take their defaults.
  pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
    toml::from_str::<GameConfig>(s)
  }

  fn apply_env(mut self) -> Self {
    if let Ok(url) = std::env::var("HEART_API_URL") {
      if !url.trim().is_empty() {
        self.api_url = url.trim().to_string();
      }
    }
    if self.fetch_timeout_secs == 0 {
      warn!(target: "heartcount_backend", "fetch_timeout_secs = 0 is not usable; using 10");
      self.fetch_timeout_secs = 10;
    }
    self
  }
}

/// Load `GameConfig` from GAME_CONFIG_PATH, falling back to defaults on any IO/parse error.
pub fn load_from_env() -> GameConfig {
  let Ok(path) = std::env::var("GAME_CONFIG_PATH") else {
    return GameConfig::default().apply_env();
  };
  let cfg = match std::fs::read_to_string(&path) {
    Ok(s) => match GameConfig::from_toml(&s) {
      Ok(cfg) => {
        info!(target: "heartcount_backend", %path, "Loaded game config (TOML)");
        cfg
      }
      Err(e) => {
        error!(target: "heartcount_backend", %path, error = %e, "Failed to parse TOML config; using defaults");
        GameConfig::default()
      }
    },
    Err(e) => {
      error!(target: "heartcount_backend", %path, error = %e, "Failed to read TOML config file; using defaults");
      GameConfig::default()
    }
  };
  cfg.apply_env()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_toml_keeps_defaults() {
    let cfg = GameConfig::from_toml("auto_advance = false\nrng_seed = 42\n").expect("parse");
    assert!(!cfg.auto_advance);
    assert_eq!(cfg.rng_seed, Some(42));
    assert_eq!(cfg.api_url, DEFAULT_API_URL);
    assert_eq!(cfg.option_range_max, 14);
    assert_eq!(cfg.leaderboard_size, 10);
  }

  #[test]
  fn wrong_types_are_rejected() {
    assert!(GameConfig::from_toml("fetch_timeout_secs = \"soon\"").is_err());
  }
}
