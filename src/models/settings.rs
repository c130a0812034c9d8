use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration consumed (not owned) by the coordinator. Changing it
/// through `MiningService::update_config` triggers an immediate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Ordered by preference; earlier entries score higher.
    pub priority_games: Vec<String>,
    pub excluded_games: Vec<String>,
    /// Also mine campaigns for games not in the priority list.
    pub watch_unlisted: bool,
    pub auto_claim: bool,
    /// Campaign re-evaluation cadence.
    pub evaluation_interval: Duration,
    /// Watch probe cadence.
    pub watch_interval: Duration,
    /// Re-evaluate channel choice after this much time on one attribution.
    pub switch_threshold: Duration,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            priority_games: Vec::new(),
            excluded_games: Vec::new(),
            watch_unlisted: true,
            auto_claim: true,
            evaluation_interval: Duration::from_secs(60),
            watch_interval: Duration::from_secs(20),
            switch_threshold: Duration::from_secs(300),
        }
    }
}

impl MinerConfig {
    pub fn priority_index(&self, game_name: &str) -> Option<usize> {
        self.priority_games.iter().position(|g| g == game_name)
    }

    pub fn is_excluded(&self, game_name: &str) -> bool {
        self.excluded_games.iter().any(|g| g == game_name)
    }
}
