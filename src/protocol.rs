//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{Difficulty, DifficultyProfile, Metric, RoundChallenge};
use crate::engine::{EngineEvent, Snapshot};
use crate::player::Player;
use crate::scores::LeaderboardEntry;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Hello {
        #[serde(default)]
        name: Option<String>,
    },
    NewSession {
        difficulty: Difficulty,
    },
    StartRound,
    SubmitAnswer {
        value: u32,
    },
    Pause,
    Resume,
    Cancel,
    Snapshot,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Welcome {
        player: Player,
    },
    RoundReady {
        round: u64,
        challenge: ChallengeOut,
    },
    Tick {
        remaining: u32,
    },
    Answered {
        correct: bool,
        correct_value: u32,
        score: u32,
    },
    GameOver {
        final_score: u32,
        difficulty: Difficulty,
    },
    ConnectionFailed {
        reason: String,
    },
    Snapshot {
        snapshot: SnapshotOut,
    },
    Error {
        message: String,
    },
}

/// What the player sees of a challenge: never the correct value.
#[derive(Debug, Serialize)]
pub struct ChallengeOut {
    pub image: String,
    pub metric: Metric,
    pub options: [u32; 4],
}

pub fn to_out(c: &RoundChallenge) -> ChallengeOut {
    ChallengeOut {
        image: c.image_ref.clone(),
        metric: c.metric,
        options: c.options,
    }
}

#[derive(Debug, Serialize)]
pub struct SnapshotOut {
    pub phase: &'static str,
    pub round: u64,
    pub score: u32,
    pub difficulty: Difficulty,
    pub remaining: u32,
    /// False before the first question of a session and after it ends.
    pub timer_armed: bool,
    pub paused: bool,
}

impl From<Snapshot> for SnapshotOut {
    fn from(s: Snapshot) -> Self {
        Self {
            phase: s.state.as_str(),
            round: s.round,
            score: s.score,
            difficulty: s.difficulty,
            remaining: s.remaining,
            timer_armed: s.timer_armed,
            paused: s.paused,
        }
    }
}

impl From<EngineEvent> for ServerWsMessage {
    fn from(ev: EngineEvent) -> Self {
        match ev {
            EngineEvent::RoundReady { round, challenge } => ServerWsMessage::RoundReady {
                round,
                challenge: to_out(&challenge),
            },
            EngineEvent::Tick { remaining } => ServerWsMessage::Tick { remaining },
            EngineEvent::Answered { correct, correct_value, score } => ServerWsMessage::Answered {
                correct,
                correct_value,
                score,
            },
            EngineEvent::GameOver { final_score, difficulty } => ServerWsMessage::GameOver {
                final_score,
                difficulty,
            },
            EngineEvent::ConnectionFailed { reason } => ServerWsMessage::ConnectionFailed { reason },
        }
    }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct LeaderboardOut {
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Serialize)]
pub struct DifficultiesOut {
    pub difficulties: Vec<DifficultyProfile>,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
