use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, watch, Mutex, Notify, RwLock};

use crate::error::{MinerError, Result};
use crate::models::{Attribution, DropCampaign, DropSnapshot, MinerConfig, MinerStatus};
use crate::services::gql_service::GqlClient;
use crate::services::progress_service::ProgressTracker;
use crate::services::selector_service::{best_channel, select_campaign, should_switch};
use crate::services::watch_service::{WatchService, WatchSession};

const DIRECTORY_PAGE_SIZE: u32 = 30;
const MAX_PROBE_FAILURES: u32 = 3;
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Everything the two loops mutate, behind one lock so a status snapshot can
/// never observe a half-applied switch. Network I/O always happens with this
/// lock released.
#[derive(Default)]
struct MinerState {
    /// Set by start, cleared by stop, both under this lock. An evaluation
    /// pass that was already past its network calls when stop ran checks it
    /// before installing an attribution or publishing one.
    running: bool,
    attribution: Option<Attribution>,
    watch_session: Option<WatchSession>,
    probe_failures: u32,
    channel_unwatchable: bool,
    tracker: ProgressTracker,
}

/// The mining coordinator. Owns the evaluation loop (campaign selection,
/// progress inference, claiming) and the watch loop (segment probes), and
/// publishes `MinerStatus` snapshots over a pull accessor and a broadcast
/// subscription.
pub struct MiningService {
    gql: Arc<GqlClient>,
    watch: WatchService,
    login: String,
    state: Mutex<MinerState>,
    status: RwLock<MinerStatus>,
    status_tx: broadcast::Sender<MinerStatus>,
    config: RwLock<MinerConfig>,
    config_changed: Notify,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl MiningService {
    pub fn new(gql: Arc<GqlClient>, login: String, config: MinerConfig) -> Arc<Self> {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Arc::new(Self {
            gql,
            watch: WatchService::new(),
            login,
            state: Mutex::new(MinerState::default()),
            status: RwLock::new(MinerStatus::default()),
            status_tx,
            config: RwLock::new(config),
            config_changed: Notify::new(),
            stop_tx: Mutex::new(None),
        })
    }

    pub async fn status(&self) -> MinerStatus {
        self.status.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MinerStatus> {
        self.status_tx.subscribe()
    }

    pub async fn config(&self) -> MinerConfig {
        self.config.read().await.clone()
    }

    /// Installs a new configuration and wakes the evaluation loop so the
    /// change takes effect now instead of on the next tick.
    pub async fn update_config(&self, config: MinerConfig) {
        *self.config.write().await = config;
        self.config_changed.notify_one();
        info!("configuration updated, re-evaluating");
    }

    /// Starts both loops. Rejects a second start while already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut stop_slot = self.stop_tx.lock().await;
        if stop_slot.is_some() {
            return Err(MinerError::InvalidState("miner already running"));
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        *stop_slot = Some(stop_tx);
        drop(stop_slot);

        {
            let mut state = self.state.lock().await;
            // fresh run: keep only the remembered drop progress
            let tracker = std::mem::take(&mut state.tracker);
            *state = MinerState {
                running: true,
                tracker,
                ..MinerState::default()
            };
        }

        {
            let mut status = self.status.write().await;
            status.is_running = true;
            status.last_error = None;
            status.last_update = Some(Utc::now());
            let _ = self.status_tx.send(status.clone());
        }
        info!("miner started for {}", self.login);

        let evaluator = Arc::clone(self);
        let eval_stop = stop_rx.clone();
        tokio::spawn(async move { evaluator.evaluation_loop(eval_stop).await });

        let watcher = Arc::clone(self);
        tokio::spawn(async move { watcher.watch_loop(stop_rx).await });
        Ok(())
    }

    /// Stops both loops cooperatively, finalizes the in-flight attribution's
    /// elapsed time, and clears the watch target. Rejects a stop while not
    /// running.
    pub async fn stop(&self) -> Result<()> {
        let stop_tx = self
            .stop_tx
            .lock()
            .await
            .take()
            .ok_or(MinerError::InvalidState("miner is not running"))?;
        let _ = stop_tx.send(true);

        {
            let mut state = self.state.lock().await;
            state.running = false;
            if let Some(attribution) = state.attribution.take() {
                let elapsed = attribution.elapsed_minutes(Utc::now());
                state.tracker.record_elapsed(&attribution.campaign, elapsed);
                info!(
                    "finalized {} watched minutes on {}",
                    elapsed, attribution.channel.login
                );
            }
            state.watch_session = None;
            state.probe_failures = 0;
            state.channel_unwatchable = false;
        }

        let mut status = self.status.write().await;
        status.is_running = false;
        status.attribution = None;
        status.next_switch = None;
        status.last_update = Some(Utc::now());
        let _ = self.status_tx.send(status.clone());
        info!("miner stopped");
        Ok(())
    }

    async fn evaluation_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            if *stop_rx.borrow() {
                break;
            }
            match self.evaluate_once().await {
                Ok(()) => self.record_error(None).await,
                Err(e) if e.is_auth() => {
                    error!("session no longer valid, halting mining: {}", e);
                    self.gql.clear_token().await;
                    self.drop_attribution().await;
                    self.record_error(Some(e.to_string())).await;
                }
                Err(e) => {
                    error!("evaluation pass failed: {}", e);
                    self.record_error(Some(e.to_string())).await;
                }
            }

            let interval = self.config.read().await.evaluation_interval;
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(interval) => {}
                _ = self.config_changed.notified() => {
                    debug!("evaluation woken early");
                }
            }
        }
        debug!("evaluation loop exited");
    }

    async fn watch_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            let interval = self.config.read().await.watch_interval;
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if *stop_rx.borrow() {
                break;
            }

            // read the current target under the lock, probe without it
            let session = self.state.lock().await.watch_session.clone();
            let session = match session {
                Some(s) => s,
                None => continue,
            };

            match self.watch.probe(&session).await {
                Ok(()) => {
                    let mut state = self.state.lock().await;
                    state.probe_failures = 0;
                    debug!("probed {}", session.channel.login);
                }
                Err(e) => {
                    warn!("watch probe for {} failed: {}", session.channel.login, e);
                    let mut state = self.state.lock().await;
                    state.probe_failures += 1;
                    if state.probe_failures >= MAX_PROBE_FAILURES && !state.channel_unwatchable {
                        warn!(
                            "{} failed {} consecutive probes, forcing re-selection",
                            session.channel.login, state.probe_failures
                        );
                        state.channel_unwatchable = true;
                        drop(state);
                        self.config_changed.notify_one();
                    }
                }
            }
        }
        debug!("watch loop exited");
    }

    /// One evaluation pass: select, maybe switch, infer progress, claim.
    /// Remote failures abort only this pass; the loop runs again next tick.
    async fn evaluate_once(&self) -> Result<()> {
        let config = self.config.read().await.clone();
        let campaigns = self.gql.campaigns().await?;

        let winner = match select_campaign(&campaigns, &config) {
            Some((campaign, score)) => {
                debug!("selected {} (score {})", campaign.name, score);
                campaign.clone()
            }
            None => {
                info!("no mineable campaign for the current configuration");
                self.drop_attribution().await;
                return Ok(());
            }
        };

        let (current, unwatchable) = {
            let state = self.state.lock().await;
            (state.attribution.clone(), state.channel_unwatchable)
        };

        let switching = should_switch(
            current.as_ref(),
            &winner.id,
            unwatchable,
            config.switch_threshold.as_secs(),
            Utc::now(),
        );

        let attribution = if switching {
            match self.switch_to(&winner).await? {
                Some(a) => a,
                None => return Ok(()),
            }
        } else {
            match current {
                Some(a) => a,
                None => return Ok(()),
            }
        };

        self.track_and_claim(&config, &attribution).await?;
        Ok(())
    }

    /// Replaces the attribution with the winning campaign's busiest live
    /// channel. Returns None when the campaign has nothing left to mine or
    /// the game has no watchable channel right now.
    async fn switch_to(&self, winner: &DropCampaign) -> Result<Option<Attribution>> {
        let details = self.gql.campaign_details(&winner.id, &self.login).await?;
        // the dashboard listing scored without drop data; re-check now that
        // the drops are known
        if !details.has_mineable_drops() {
            info!("{} has no unclaimed drops left, skipping", details.name);
            self.drop_attribution().await;
            return Ok(None);
        }
        let slug = self.gql.resolve_game_slug(&details.game.name).await?;
        let channels = self
            .gql
            .game_streams(&slug.id, &slug.slug, DIRECTORY_PAGE_SIZE)
            .await?;

        let channel = match best_channel(&channels) {
            Some(c) => c.clone(),
            None => {
                warn!("no live channels for {}", details.game.name);
                self.drop_attribution().await;
                return Ok(None);
            }
        };

        let session = match self.watch.open_session(&self.gql, &channel).await {
            Ok(s) => s,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                warn!("cannot open watch session on {}: {}", channel.login, e);
                self.drop_attribution().await;
                return Ok(None);
            }
        };

        let attribution = Attribution {
            campaign: details,
            channel: channel.clone(),
            started_at: Utc::now(),
        };

        if !self.install_attribution(&attribution, session).await {
            debug!("stopped while switching, discarding new attribution");
            return Ok(None);
        }

        info!(
            "now mining {} on {}",
            attribution.campaign.name, channel.login
        );
        Ok(Some(attribution))
    }

    /// Installs a new attribution unless the miner was stopped while the
    /// switch was doing its network round-trips. The outgoing attribution's
    /// elapsed time is credited first.
    async fn install_attribution(&self, attribution: &Attribution, session: WatchSession) -> bool {
        let mut state = self.state.lock().await;
        if !state.running {
            return false;
        }
        if let Some(previous) = state.attribution.take() {
            let elapsed = previous.elapsed_minutes(attribution.started_at);
            state.tracker.record_elapsed(&previous.campaign, elapsed);
        }
        state.attribution = Some(attribution.clone());
        state.watch_session = Some(session);
        state.probe_failures = 0;
        state.channel_unwatchable = false;
        true
    }

    /// Progress inference plus auto-claim for the active attribution, then a
    /// status publish.
    async fn track_and_claim(&self, config: &MinerConfig, attribution: &Attribution) -> Result<()> {
        let report = match self.gql.current_drop(&attribution.channel.id).await {
            Ok(r) => r,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                warn!("no session progress report this pass: {}", e);
                None
            }
        };

        let (snapshots, claim_targets) = {
            let mut state = self.state.lock().await;
            let snapshots = state.tracker.observe(&attribution.campaign, report.as_ref());
            let targets = if config.auto_claim {
                state.tracker.claimable(&attribution.campaign, &snapshots)
            } else {
                Vec::new()
            };
            (snapshots, targets)
        };

        for target in claim_targets {
            match self.gql.claim_drop(&target.instance_id).await {
                Ok(()) => {
                    let mut state = self.state.lock().await;
                    let required = attribution
                        .campaign
                        .drops
                        .iter()
                        .find(|d| d.id == target.drop_id)
                        .map(|d| d.required_minutes)
                        .unwrap_or(0);
                    state.tracker.mark_claimed(&target.drop_id, required);
                    info!("claimed drop {}", target.drop_id);
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    // left unclaimed; the next evaluation pass retries it
                    warn!("claim for {} failed: {}", target.drop_id, e);
                }
            }
        }

        self.publish_attribution(config, attribution, snapshots).await;
        Ok(())
    }

    /// Publishes a snapshot for an active attribution. Held under the state
    /// lock so a concurrent stop either precedes this write (and the pass
    /// skips publishing) or its cleared snapshot is published after it.
    async fn publish_attribution(
        &self,
        config: &MinerConfig,
        attribution: &Attribution,
        snapshots: Vec<DropSnapshot>,
    ) {
        let state = self.state.lock().await;
        if !state.running {
            return;
        }
        let mut status = self.status.write().await;
        status.attribution = Some(attribution.clone());
        status.drops = snapshots;
        status.last_update = Some(Utc::now());
        status.next_switch = Some(
            attribution.started_at
                + chrono::Duration::seconds(config.switch_threshold.as_secs() as i64),
        );
        let _ = self.status_tx.send(status.clone());
    }

    /// Clears the watch target, crediting any elapsed time first.
    async fn drop_attribution(&self) {
        let mut state = self.state.lock().await;
        if let Some(attribution) = state.attribution.take() {
            let elapsed = attribution.elapsed_minutes(Utc::now());
            state.tracker.record_elapsed(&attribution.campaign, elapsed);
        }
        state.watch_session = None;
        state.probe_failures = 0;
        state.channel_unwatchable = false;
        drop(state);

        let mut status = self.status.write().await;
        if status.attribution.is_some() {
            status.attribution = None;
            status.next_switch = None;
            status.last_update = Some(Utc::now());
            let _ = self.status_tx.send(status.clone());
        }
    }

    async fn record_error(&self, message: Option<String>) {
        let mut status = self.status.write().await;
        if status.last_error != message {
            status.last_error = message;
            status.last_update = Some(Utc::now());
            let _ = self.status_tx.send(status.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CampaignStatus, Channel, Game};

    fn service() -> Arc<MiningService> {
        let gql = Arc::new(GqlClient::new("0123456789abcdef".into(), "es-device".into()));
        MiningService::new(gql, "miner".into(), MinerConfig::default())
    }

    fn sample_attribution() -> (Attribution, WatchSession) {
        let channel = Channel {
            id: "1".into(),
            login: "somechannel".into(),
            display_name: "SomeChannel".into(),
            viewers: 1200,
            game_id: "g1".into(),
        };
        let attribution = Attribution {
            campaign: DropCampaign {
                id: "camp-1".into(),
                name: "Launch Drops".into(),
                status: CampaignStatus::Active,
                game: Game {
                    id: "g1".into(),
                    name: "Some Game".into(),
                },
                account_connected: true,
                drops: Vec::new(),
            },
            channel: channel.clone(),
            started_at: Utc::now(),
        };
        let session = WatchSession::new(
            channel,
            "https://video-weaver.example.ttvnw.net/v1/playlist/chunked.m3u8".into(),
        );
        (attribution, session)
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let miner = service();
        miner.start().await.unwrap();
        let err = miner.start().await.unwrap_err();
        assert!(matches!(err, MinerError::InvalidState(_)));
        miner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start_is_rejected() {
        let miner = service();
        let err = miner.stop().await.unwrap_err();
        assert!(matches!(err, MinerError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_status_tracks_the_running_flag() {
        let miner = service();
        assert!(!miner.status().await.is_running);

        miner.start().await.unwrap();
        assert!(miner.status().await.is_running);

        miner.stop().await.unwrap();
        let status = miner.status().await;
        assert!(!status.is_running);
        assert!(status.attribution.is_none());
    }

    #[tokio::test]
    async fn test_subscribers_see_lifecycle_transitions() {
        let miner = service();
        let mut rx = miner.subscribe();

        miner.start().await.unwrap();
        let started = rx.recv().await.unwrap();
        assert!(started.is_running);

        miner.stop().await.unwrap();
        // drain until the stop snapshot; the loops may have published
        // error snapshots in between
        loop {
            let update = rx.recv().await.unwrap();
            if !update.is_running {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_restart_after_stop_is_allowed() {
        let miner = service();
        miner.start().await.unwrap();
        miner.stop().await.unwrap();
        miner.start().await.unwrap();
        assert!(miner.status().await.is_running);
        miner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_wins_over_an_in_flight_switch() {
        let miner = service();
        miner.start().await.unwrap();
        miner.stop().await.unwrap();

        // a pass that finished its network calls just as stop ran must not
        // resurrect the attribution
        let (attribution, session) = sample_attribution();
        assert!(!miner.install_attribution(&attribution, session).await);
        assert!(miner.state.lock().await.attribution.is_none());
        assert!(miner.status().await.attribution.is_none());
    }

    #[tokio::test]
    async fn test_publish_is_skipped_after_stop() {
        let miner = service();
        miner.start().await.unwrap();
        miner.stop().await.unwrap();

        let (attribution, _) = sample_attribution();
        let config = miner.config().await;
        miner
            .publish_attribution(&config, &attribution, Vec::new())
            .await;

        let status = miner.status().await;
        assert!(!status.is_running);
        assert!(status.attribution.is_none());
        assert!(status.next_switch.is_none());
    }

    #[tokio::test]
    async fn test_start_resets_leftover_watch_state() {
        let miner = service();
        miner.start().await.unwrap();
        let (attribution, session) = sample_attribution();
        assert!(miner.install_attribution(&attribution, session).await);
        miner.stop().await.unwrap();

        miner.start().await.unwrap();
        {
            let state = miner.state.lock().await;
            assert!(state.running);
            assert!(state.attribution.is_none());
            assert!(state.watch_session.is_none());
            assert_eq!(state.probe_failures, 0);
        }
        miner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_config_is_visible_immediately() {
        let miner = service();
        let mut config = miner.config().await;
        config.priority_games = vec!["Something".into()];
        miner.update_config(config).await;
        assert_eq!(
            miner.config().await.priority_games,
            vec!["Something".to_string()]
        );
    }
}
