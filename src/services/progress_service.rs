use std::collections::HashMap;

use crate::models::{DropCampaign, DropSnapshot, SessionProgress, TimeBasedDrop};

#[derive(Debug, Clone, Copy, Default)]
struct KnownProgress {
    minutes: i32,
    claimed: bool,
}

/// A drop that is ready to claim right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimTarget {
    pub drop_id: String,
    pub instance_id: String,
}

/// Infers per-tier progress for multi-drop campaigns. Twitch only reports
/// authoritative minutes for the single drop it currently tracks; every other
/// tier's state is derived from the sequence ordering and remembered between
/// evaluation passes.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    known: HashMap<String, KnownProgress>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a campaign detail fetch and an optional session report into
    /// tier-ordered snapshots, updating remembered progress.
    ///
    /// With a report, the sequence rule applies: tiers before the active one
    /// are complete, the active tier takes the reported minutes clamped to its
    /// requirement, later tiers sit at zero. Without a report the last
    /// remembered value stands. A claimed flag never reverts.
    pub fn observe(
        &mut self,
        campaign: &DropCampaign,
        report: Option<&SessionProgress>,
    ) -> Vec<DropSnapshot> {
        let mut tiers: Vec<&TimeBasedDrop> = campaign.drops.iter().collect();
        tiers.sort_by_key(|d| d.required_minutes);

        let active_index = report.and_then(|r| tiers.iter().position(|d| d.id == r.drop_id));

        let mut snapshots = Vec::with_capacity(tiers.len());
        for (index, drop) in tiers.iter().enumerate() {
            let known = self.known.get(&drop.id).copied().unwrap_or_default();

            let (mut minutes, mut claimed) = match active_index {
                Some(active) if index < active => (drop.required_minutes, true),
                Some(active) if index == active => {
                    // the report is authoritative for the active tier
                    let reported = report.map(|r| r.minutes_watched).unwrap_or(0);
                    (reported.clamp(0, drop.required_minutes), drop.is_claimed)
                }
                Some(_) => (0, drop.is_claimed),
                None => (
                    known.minutes.max(drop.current_minutes),
                    drop.is_claimed,
                ),
            };

            claimed |= known.claimed;
            if claimed {
                minutes = drop.required_minutes;
            }
            minutes = minutes.clamp(0, drop.required_minutes);

            self.known.insert(drop.id.clone(), KnownProgress { minutes, claimed });
            snapshots.push(DropSnapshot {
                drop_id: drop.id.clone(),
                name: drop.name.clone(),
                game_name: campaign.game.name.clone(),
                required_minutes: drop.required_minutes,
                current_minutes: minutes,
                is_claimed: claimed,
            });
        }
        snapshots
    }

    /// Credits locally measured session time to the tier currently being
    /// mined. Called when an attribution ends, so no watched minute is lost
    /// between the last remote report and the switch or stop.
    pub fn record_elapsed(&mut self, campaign: &DropCampaign, elapsed_minutes: i32) {
        if elapsed_minutes <= 0 {
            return;
        }
        let mut tiers: Vec<&TimeBasedDrop> = campaign.drops.iter().collect();
        tiers.sort_by_key(|d| d.required_minutes);

        for drop in tiers {
            let known = self.known.entry(drop.id.clone()).or_default();
            if known.claimed || !drop.is_mineable() {
                continue;
            }
            if known.minutes < drop.required_minutes {
                known.minutes =
                    (known.minutes + elapsed_minutes).clamp(0, drop.required_minutes);
                return;
            }
        }
    }

    pub fn mark_claimed(&mut self, drop_id: &str, required_minutes: i32) {
        let known = self.known.entry(drop_id.to_string()).or_default();
        known.claimed = true;
        known.minutes = required_minutes;
    }

    pub fn is_claimed(&self, drop_id: &str) -> bool {
        self.known.get(drop_id).map(|k| k.claimed).unwrap_or(false)
    }

    /// Drops that are complete, unclaimed, and carry a claim handle. Already
    /// remembered claims are filtered out, which is what makes the claim step
    /// idempotent across passes.
    pub fn claimable(&self, campaign: &DropCampaign, snapshots: &[DropSnapshot]) -> Vec<ClaimTarget> {
        snapshots
            .iter()
            .filter(|s| !s.is_claimed && s.current_minutes >= s.required_minutes)
            .filter(|s| !self.is_claimed(&s.drop_id))
            .filter_map(|s| {
                campaign
                    .drops
                    .iter()
                    .find(|d| d.id == s.drop_id)
                    .and_then(|d| d.instance_id.as_ref())
                    .map(|instance_id| ClaimTarget {
                        drop_id: s.drop_id.clone(),
                        instance_id: instance_id.clone(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CampaignStatus, Game};
    use chrono::Utc;

    fn three_tier_campaign() -> DropCampaign {
        let tier = |id: &str, required: i32| TimeBasedDrop {
            id: id.into(),
            name: format!("Tier {}", id),
            required_minutes: required,
            current_minutes: 0,
            is_claimed: false,
            instance_id: None,
        };
        DropCampaign {
            id: "camp".into(),
            name: "Campaign".into(),
            status: CampaignStatus::Active,
            game: Game {
                id: "g".into(),
                name: "Game".into(),
            },
            account_connected: true,
            // deliberately out of tier order
            drops: vec![tier("t3", 180), tier("t1", 30), tier("t2", 90)],
        }
    }

    fn report(drop_id: &str, minutes: i32) -> SessionProgress {
        SessionProgress {
            drop_id: drop_id.into(),
            minutes_watched: minutes,
            reported_at: Utc::now(),
        }
    }

    #[test]
    fn test_sequence_inference_around_the_active_tier() {
        let campaign = three_tier_campaign();
        let mut tracker = ProgressTracker::new();

        let snapshots = tracker.observe(&campaign, Some(&report("t2", 45)));

        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].drop_id, "t1");
        assert_eq!(snapshots[0].current_minutes, 30);
        assert!(snapshots[0].is_claimed);
        assert_eq!(snapshots[1].drop_id, "t2");
        assert_eq!(snapshots[1].current_minutes, 45);
        assert!(!snapshots[1].is_claimed);
        assert_eq!(snapshots[2].drop_id, "t3");
        assert_eq!(snapshots[2].current_minutes, 0);
        assert!(!snapshots[2].is_claimed);
    }

    #[test]
    fn test_reported_minutes_are_clamped_to_the_requirement() {
        let campaign = three_tier_campaign();
        let mut tracker = ProgressTracker::new();
        let snapshots = tracker.observe(&campaign, Some(&report("t1", 500)));
        assert_eq!(snapshots[0].current_minutes, 30);
    }

    #[test]
    fn test_missing_report_falls_back_to_last_known() {
        let campaign = three_tier_campaign();
        let mut tracker = ProgressTracker::new();
        tracker.observe(&campaign, Some(&report("t2", 45)));

        let snapshots = tracker.observe(&campaign, None);
        assert_eq!(snapshots[1].current_minutes, 45);
        assert!(snapshots[0].is_claimed);
    }

    #[test]
    fn test_claimed_never_reverts() {
        let campaign = three_tier_campaign();
        let mut tracker = ProgressTracker::new();
        tracker.mark_claimed("t1", 30);

        // remote must not undo a claim it has not caught up with yet
        let snapshots = tracker.observe(&campaign, Some(&report("t1", 5)));
        assert!(snapshots[0].is_claimed);
        assert_eq!(snapshots[0].current_minutes, 30);
    }

    #[test]
    fn test_record_elapsed_credits_the_active_tier() {
        let campaign = three_tier_campaign();
        let mut tracker = ProgressTracker::new();
        tracker.observe(&campaign, Some(&report("t2", 45)));

        tracker.record_elapsed(&campaign, 7);
        let snapshots = tracker.observe(&campaign, None);
        // t1 is already remembered as claimed, so t2 receives the credit
        assert_eq!(snapshots[1].current_minutes, 52);
    }

    #[test]
    fn test_record_elapsed_clamps_at_the_requirement() {
        let campaign = three_tier_campaign();
        let mut tracker = ProgressTracker::new();
        tracker.observe(&campaign, Some(&report("t2", 85)));
        tracker.record_elapsed(&campaign, 60);
        let snapshots = tracker.observe(&campaign, None);
        assert_eq!(snapshots[1].current_minutes, 90);
    }

    #[test]
    fn test_claimable_requires_completion_and_a_handle() {
        let mut campaign = three_tier_campaign();
        campaign.drops[1].instance_id = Some("instance-t1".into()); // t1 node
        let mut tracker = ProgressTracker::new();

        // active tier short of its requirement: nothing to claim yet
        let snapshots = tracker.observe(&campaign, Some(&report("t1", 12)));
        assert!(tracker.claimable(&campaign, &snapshots).is_empty());

        // active tier reaches its requirement and carries a claim handle
        let snapshots = tracker.observe(&campaign, Some(&report("t1", 30)));
        let targets = tracker.claimable(&campaign, &snapshots);
        assert_eq!(
            targets,
            vec![ClaimTarget {
                drop_id: "t1".into(),
                instance_id: "instance-t1".into(),
            }]
        );

        // a completed tier without a handle is never offered
        let snapshots = tracker.observe(&campaign, Some(&report("t2", 90)));
        assert!(tracker
            .claimable(&campaign, &snapshots)
            .iter()
            .all(|t| t.drop_id != "t2"));

        // claiming twice yields no further targets
        tracker.mark_claimed("t1", 30);
        let snapshots = tracker.observe(&campaign, Some(&report("t1", 30)));
        assert!(tracker.claimable(&campaign, &snapshots).is_empty());
    }
}
