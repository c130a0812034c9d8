use chrono::{DateTime, Utc};

use crate::models::{Attribution, CampaignStatus, Channel, DropCampaign, MinerConfig};

/// Scores one campaign for the current configuration. Zero means "never
/// select": inactive, excluded, unlisted while unlisted mining is off, or
/// known to have nothing left to mine.
///
/// Dashboard listings carry no per-drop data, so an empty drop list does not
/// disqualify a campaign here; the mineability gate is re-applied once the
/// campaign detail fetch fills the drops in.
pub fn score_campaign(campaign: &DropCampaign, config: &MinerConfig) -> i64 {
    if campaign.status != CampaignStatus::Active {
        return 0;
    }
    if config.is_excluded(&campaign.game.name) {
        return 0;
    }
    if !campaign.drops.is_empty() && !campaign.has_mineable_drops() {
        return 0;
    }

    let mut score = match config.priority_index(&campaign.game.name) {
        Some(index) => 10_000 - 100 * index as i64,
        None if config.watch_unlisted => 10,
        None => return 0,
    };

    if campaign.account_connected {
        score += 50;
    }
    for drop in &campaign.drops {
        if drop.is_mineable() {
            score += 10;
            if drop.current_minutes > 0 {
                score += 5;
            }
        }
    }
    score
}

/// Strict maximum, first found wins on ties, so selection is deterministic
/// for a fixed campaign list.
pub fn select_campaign<'a>(
    campaigns: &'a [DropCampaign],
    config: &MinerConfig,
) -> Option<(&'a DropCampaign, i64)> {
    let mut best: Option<(&DropCampaign, i64)> = None;
    for campaign in campaigns {
        let score = score_campaign(campaign, config);
        if score == 0 {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((campaign, score)),
        }
    }
    best
}

/// Whether the evaluation pass should replace the current attribution.
/// The time-based rule re-checks channel liveness and viewer counts even
/// when the same campaign keeps winning.
pub fn should_switch(
    current: Option<&Attribution>,
    winner_campaign_id: &str,
    channel_unwatchable: bool,
    switch_threshold_secs: u64,
    now: DateTime<Utc>,
) -> bool {
    let attribution = match current {
        None => return true,
        Some(a) => a,
    };
    if attribution.campaign.id != winner_campaign_id {
        return true;
    }
    if channel_unwatchable {
        return true;
    }
    let elapsed = now
        .signed_duration_since(attribution.started_at)
        .num_seconds();
    elapsed >= switch_threshold_secs as i64
}

/// Highest viewer count wins, first found on ties.
pub fn best_channel(channels: &[Channel]) -> Option<&Channel> {
    let mut best: Option<&Channel> = None;
    for channel in channels {
        match best {
            Some(b) if channel.viewers <= b.viewers => {}
            _ => best = Some(channel),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Game, TimeBasedDrop};
    use chrono::Duration;

    fn drop_with(required: i32, current: i32, claimed: bool) -> TimeBasedDrop {
        TimeBasedDrop {
            id: format!("drop-{}-{}", required, current),
            name: "Reward".into(),
            required_minutes: required,
            current_minutes: current,
            is_claimed: claimed,
            instance_id: None,
        }
    }

    fn campaign(game: &str, drops: Vec<TimeBasedDrop>) -> DropCampaign {
        DropCampaign {
            id: format!("campaign-{}", game),
            name: format!("{} Drops", game),
            status: CampaignStatus::Active,
            game: Game {
                id: format!("game-{}", game),
                name: game.into(),
            },
            account_connected: false,
            drops,
        }
    }

    fn config(priority: &[&str]) -> MinerConfig {
        MinerConfig {
            priority_games: priority.iter().map(|s| s.to_string()).collect(),
            watch_unlisted: false,
            ..MinerConfig::default()
        }
    }

    #[test]
    fn test_priority_game_beats_unlisted_game() {
        let cfg = config(&["GameA", "GameB"]);
        let campaigns = vec![
            campaign("GameC", vec![drop_with(30, 0, false)]),
            campaign("GameB", vec![drop_with(30, 0, false)]),
        ];

        assert_eq!(score_campaign(&campaigns[0], &cfg), 0);
        let (winner, score) = select_campaign(&campaigns, &cfg).unwrap();
        assert_eq!(winner.game.name, "GameB");
        // index 1 in the priority list plus one fresh mineable drop
        assert_eq!(score, 10_000 - 100 + 10);
    }

    #[test]
    fn test_dashboard_listing_without_drop_data_is_selectable() {
        // the campaign dashboard carries no per-drop data; an empty drop
        // list must not disqualify an otherwise eligible campaign
        let cfg = config(&["GameA"]);
        let mut listing = campaign("GameA", Vec::new());
        listing.account_connected = true;

        let campaigns = vec![listing];
        let (winner, score) = select_campaign(&campaigns, &cfg).unwrap();
        assert_eq!(winner.game.name, "GameA");
        assert_eq!(score, 10_000 + 50);
    }

    #[test]
    fn test_fully_claimed_campaign_is_never_selected() {
        let cfg = config(&["GameA"]);
        let campaigns = vec![campaign("GameA", vec![drop_with(30, 30, true)])];
        assert_eq!(score_campaign(&campaigns[0], &cfg), 0);
        assert!(select_campaign(&campaigns, &cfg).is_none());
    }

    #[test]
    fn test_excluded_and_inactive_score_zero() {
        let mut cfg = config(&["GameA"]);
        cfg.excluded_games = vec!["GameA".into()];
        let active = campaign("GameA", vec![drop_with(30, 0, false)]);
        assert_eq!(score_campaign(&active, &cfg), 0);

        let cfg = config(&["GameA"]);
        let mut upcoming = campaign("GameA", vec![drop_with(30, 0, false)]);
        upcoming.status = CampaignStatus::Upcoming;
        assert_eq!(score_campaign(&upcoming, &cfg), 0);
    }

    #[test]
    fn test_partial_progress_and_connection_raise_the_score() {
        let cfg = config(&["GameA"]);
        let plain = campaign("GameA", vec![drop_with(60, 0, false)]);
        let mut richer = campaign("GameA", vec![drop_with(60, 20, false)]);
        richer.account_connected = true;
        assert_eq!(
            score_campaign(&richer, &cfg),
            score_campaign(&plain, &cfg) + 5 + 50
        );
    }

    #[test]
    fn test_selection_is_deterministic_on_ties() {
        let cfg = MinerConfig {
            watch_unlisted: true,
            ..MinerConfig::default()
        };
        let campaigns = vec![
            campaign("GameX", vec![drop_with(30, 0, false)]),
            campaign("GameY", vec![drop_with(30, 0, false)]),
        ];
        for _ in 0..10 {
            let (winner, _) = select_campaign(&campaigns, &cfg).unwrap();
            assert_eq!(winner.game.name, "GameX");
        }
    }

    #[test]
    fn test_best_channel_prefers_viewers_then_order() {
        let channels = vec![
            Channel {
                id: "1".into(),
                login: "small".into(),
                display_name: "Small".into(),
                viewers: 100,
                game_id: "g".into(),
            },
            Channel {
                id: "2".into(),
                login: "big".into(),
                display_name: "Big".into(),
                viewers: 5000,
                game_id: "g".into(),
            },
            Channel {
                id: "3".into(),
                login: "also_big".into(),
                display_name: "AlsoBig".into(),
                viewers: 5000,
                game_id: "g".into(),
            },
        ];
        assert_eq!(best_channel(&channels).unwrap().login, "big");
        assert!(best_channel(&[]).is_none());
    }

    #[test]
    fn test_switch_rules() {
        let now = Utc::now();
        let attribution = Attribution {
            campaign: campaign("GameA", vec![drop_with(30, 0, false)]),
            channel: Channel {
                id: "1".into(),
                login: "chan".into(),
                display_name: "Chan".into(),
                viewers: 10,
                game_id: "g".into(),
            },
            started_at: now - Duration::seconds(30),
        };
        let current_id = attribution.campaign.id.clone();

        assert!(should_switch(None, "anything", false, 300, now));
        assert!(should_switch(Some(&attribution), "campaign-Other", false, 300, now));
        assert!(should_switch(Some(&attribution), &current_id, true, 300, now));
        assert!(!should_switch(Some(&attribution), &current_id, false, 300, now));

        let stale = Attribution {
            started_at: now - Duration::seconds(301),
            ..attribution
        };
        assert!(should_switch(Some(&stale), &current_id, false, 300, now));
    }
}
