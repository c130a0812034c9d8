use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignStatus {
    #[serde(rename = "UPCOMING")]
    Upcoming,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "EXPIRED", other)]
    Expired,
}

/// A drop campaign as seen on an evaluation tick. Fetched fresh every pass
/// and replaced wholesale, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropCampaign {
    pub id: String,
    pub name: String,
    pub game: Game,
    pub status: CampaignStatus,
    #[serde(default)]
    pub account_connected: bool,
    pub drops: Vec<TimeBasedDrop>,
}

/// One time-gated reward inside a campaign. Campaigns with several of these
/// form a sequence ordered by `required_minutes`; Twitch only reports
/// authoritative progress for the one it currently tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBasedDrop {
    pub id: String,
    pub name: String,
    pub required_minutes: i32,
    #[serde(default)]
    pub current_minutes: i32,
    #[serde(default)]
    pub is_claimed: bool,
    /// Claim handle minted by Twitch once the drop is completable.
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl TimeBasedDrop {
    pub fn is_complete(&self) -> bool {
        self.current_minutes >= self.required_minutes
    }

    /// Eligible for watch-time accumulation: unclaimed and actually time-gated.
    pub fn is_mineable(&self) -> bool {
        !self.is_claimed && self.required_minutes > 0
    }
}

impl DropCampaign {
    pub fn has_mineable_drops(&self) -> bool {
        self.drops.iter().any(TimeBasedDrop::is_mineable)
    }
}

/// Authoritative per-session progress report from DropCurrentSessionContext.
/// Only the drop Twitch considers active for the watched channel appears here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProgress {
    pub drop_id: String,
    pub minutes_watched: i32,
    pub reported_at: DateTime<Utc>,
}
