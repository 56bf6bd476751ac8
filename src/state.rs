//! Application state shared by every connection: config, question source and leaderboard.
//!
//! No game state lives here. Each WebSocket session spawns and owns its own
//! round engine through `AppState::spawn_engine`.

use std::{sync::Arc, time::Duration};

use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::config::GameConfig;
use crate::domain::Difficulty;
use crate::engine::{EngineEvent, EngineHandle, EngineSettings, RoundEngine};
use crate::fetcher::{FetchError, HeartApi, RoundFetcher};
use crate::scores::MemoryLeaderboard;

#[derive(Clone)]
pub struct AppState {
    pub config: GameConfig,
    pub fetcher: Arc<dyn RoundFetcher>,
    pub leaderboard: Arc<MemoryLeaderboard>,
}

impl AppState {
    /// Build state from config with the HTTP question source.
    #[instrument(level = "info", skip_all)]
    pub fn new(config: GameConfig) -> Result<Self, FetchError> {
        let api = HeartApi::new(config.api_url.clone(), Duration::from_secs(config.fetch_timeout_secs))?;
        info!(
            target: "heartcount_backend",
            api_url = %api.url,
            timeout_secs = config.fetch_timeout_secs,
            auto_advance = config.auto_advance,
            seeded = config.rng_seed.is_some(),
            "Question source ready"
        );
        Ok(Self::with_fetcher(config, Arc::new(api)))
    }

    pub fn with_fetcher(config: GameConfig, fetcher: Arc<dyn RoundFetcher>) -> Self {
        Self { config, fetcher, leaderboard: Arc::new(MemoryLeaderboard::new()) }
    }

    /// Spawn a fresh round engine for one player session.
    pub fn spawn_engine(
        &self,
        player: &str,
        difficulty: Difficulty,
    ) -> (EngineHandle, mpsc::UnboundedReceiver<EngineEvent>) {
        let rng = match self.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let settings = EngineSettings {
            difficulty,
            player: player.to_string(),
            option_range_max: self.config.option_range_max,
            rng,
        };
        RoundEngine::spawn(settings, Arc::clone(&self.fetcher), self.leaderboard.clone())
    }
}
