use serde::{Deserialize, Serialize};

/// A live channel candidate for watch-time attribution. Transient, re-fetched
/// from the game directory on every evaluation tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub login: String,
    pub display_name: String,
    pub viewers: i32,
    pub game_id: String,
}
