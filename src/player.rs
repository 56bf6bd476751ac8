//! Player display identity used for feedback and leaderboard entries.

use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Player {
  pub id: String,
  pub display_name: String,
  pub guest: bool,
}

impl Player {
  /// A named player; blank names fall back to a guest identity.
  pub fn named(name: &str) -> Self {
    let name = name.trim();
    if name.is_empty() {
      return Self::guest();
    }
    Self { id: Uuid::new_v4().to_string(), display_name: name.to_string(), guest: false }
  }

  /// Temporary identity such as `Guest4721`.
  pub fn guest() -> Self {
    let n: u32 = rand::thread_rng().gen_range(1..=9999);
    Self {
      id: format!("guest_{}", Uuid::new_v4()),
      display_name: format!("Guest{n}"),
      guest: true,
    }
  }
}
