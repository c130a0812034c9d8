use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::campaign::DropCampaign;
use crate::models::channel::Channel;

/// The current watch target: exactly one campaign + channel pair may hold
/// watch-time attribution at a time. Replaced wholesale on switch, cleared on
/// stop; never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    pub campaign: DropCampaign,
    pub channel: Channel,
    pub started_at: DateTime<Utc>,
}

impl Attribution {
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i32 {
        let mins = (now - self.started_at).num_minutes();
        mins.clamp(0, i32::MAX as i64) as i32
    }
}

/// Per-drop progress line for the status feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropSnapshot {
    pub drop_id: String,
    pub name: String,
    pub game_name: String,
    pub required_minutes: i32,
    pub current_minutes: i32,
    pub is_claimed: bool,
}

/// Snapshot of the coordinator's externally visible state. Consumers always
/// receive a value copy; internal state is never handed out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinerStatus {
    pub is_running: bool,
    pub attribution: Option<Attribution>,
    pub drops: Vec<DropSnapshot>,
    pub last_update: Option<DateTime<Utc>>,
    pub next_switch: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
