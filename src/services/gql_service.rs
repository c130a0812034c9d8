use chrono::Utc;
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::{MinerError, Result};
use crate::models::{CampaignStatus, Channel, DropCampaign, Game, SessionProgress, TimeBasedDrop};
use crate::services::auth_service::{CLIENT_ID, USER_AGENT};
use crate::utils::retry::RetryPolicy;

const GQL_URL: &str = "https://gql.twitch.tv/gql";
const CLIENT_URL: &str = "https://www.twitch.tv";

/// A persisted GraphQL operation: name plus the opaque query hash Twitch
/// expects byte-for-byte. These are shipped constants, never computed.
#[derive(Debug, Clone, Copy)]
pub struct GqlOperation {
    pub name: &'static str,
    pub hash: &'static str,
}

impl GqlOperation {
    fn body(&self, variables: Value) -> Value {
        json!({
            "operationName": self.name,
            "extensions": {
                "persistedQuery": {
                    "version": 1,
                    "sha256Hash": self.hash,
                }
            },
            "variables": variables,
        })
    }
}

pub const OP_CAMPAIGNS: GqlOperation = GqlOperation {
    name: "ViewerDropsDashboard",
    hash: "5a4da2ab3d5b47c9f9ce864e727b2cb346af1e3ea8b897fe8f704a97ff017619",
};
pub const OP_CAMPAIGN_DETAILS: GqlOperation = GqlOperation {
    name: "DropCampaignDetails",
    hash: "039277bf98f3130929262cc7c6efd9c141ca3749cb6dca442fc8ead9a53f77c1",
};
pub const OP_CURRENT_DROP: GqlOperation = GqlOperation {
    name: "DropCurrentSessionContext",
    hash: "4d06b702d25d652afb9ef835d2a550031f1cf762b193523a92166f40ea3d142b",
};
pub const OP_CLAIM_DROP: GqlOperation = GqlOperation {
    name: "DropsPage_ClaimDropRewards",
    hash: "a455deea71bdc9015b78eb49f4acfbce8baa7ccbedd28e549bb025bd0f751930",
};
pub const OP_PLAYBACK_ACCESS_TOKEN: GqlOperation = GqlOperation {
    name: "PlaybackAccessToken",
    hash: "ed230aa1e33e07eebb8928504583da78a5173989fadfb1ac94be06a04f3cdbe9",
};
pub const OP_GAME_DIRECTORY: GqlOperation = GqlOperation {
    name: "DirectoryPage_Game",
    hash: "c7c9d5aad09155c4161d2382092dc44610367f3536aac39019ec2582ae5065f9",
};
pub const OP_SLUG_REDIRECT: GqlOperation = GqlOperation {
    name: "DirectoryGameRedirect",
    hash: "1f0300090caceec51f33c5e20647aceff9017f740f223c3c532ba6fa59f6b6cc",
};

#[derive(Debug, Deserialize)]
struct GqlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GqlError>>,
}

#[derive(Debug, Deserialize)]
struct GqlError {
    message: String,
}

/// Maps a non-empty `errors[]` list to the miner taxonomy. "service error"
/// and "PersistedQueryNotFound" are transient on Twitch's side and worth
/// retrying; everything else is fatal for this call.
fn classify_gql_errors(errors: &[GqlError]) -> MinerError {
    let transient = errors
        .iter()
        .any(|e| e.message == "service error" || e.message == "PersistedQueryNotFound");
    let joined = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    if transient {
        MinerError::RetryableRemote(joined)
    } else {
        MinerError::Remote(joined)
    }
}

// Response shapes, one set per operation. Decoding fails closed: an
// unexpected shape is a decode error, not a silently empty result.

#[derive(Debug, Deserialize)]
struct CampaignsData {
    #[serde(rename = "currentUser")]
    current_user: Option<CurrentUserCampaigns>,
}

#[derive(Debug, Deserialize)]
struct CurrentUserCampaigns {
    #[serde(rename = "dropCampaigns", default)]
    drop_campaigns: Vec<CampaignNode>,
}

#[derive(Debug, Deserialize)]
struct CampaignDetailsData {
    user: Option<CampaignDetailsUser>,
}

#[derive(Debug, Deserialize)]
struct CampaignDetailsUser {
    #[serde(rename = "dropCampaign")]
    drop_campaign: Option<CampaignNode>,
}

#[derive(Debug, Deserialize)]
struct CampaignNode {
    id: String,
    name: String,
    status: CampaignStatus,
    game: GameNode,
    #[serde(rename = "self")]
    self_edge: Option<CampaignSelf>,
    #[serde(rename = "timeBasedDrops", default)]
    time_based_drops: Vec<DropNode>,
}

#[derive(Debug, Deserialize)]
struct GameNode {
    id: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct CampaignSelf {
    #[serde(rename = "isAccountConnected", default)]
    is_account_connected: bool,
}

#[derive(Debug, Deserialize)]
struct DropNode {
    id: String,
    name: String,
    #[serde(rename = "requiredMinutesWatched", default)]
    required_minutes_watched: i32,
    #[serde(rename = "self")]
    self_edge: Option<DropSelf>,
}

#[derive(Debug, Deserialize)]
struct DropSelf {
    #[serde(rename = "currentMinutesWatched", default)]
    current_minutes_watched: i32,
    #[serde(rename = "isClaimed", default)]
    is_claimed: bool,
    #[serde(rename = "dropInstanceID")]
    drop_instance_id: Option<String>,
}

impl From<CampaignNode> for DropCampaign {
    fn from(node: CampaignNode) -> Self {
        DropCampaign {
            id: node.id,
            name: node.name,
            status: node.status,
            game: Game {
                id: node.game.id,
                name: node.game.display_name,
            },
            account_connected: node
                .self_edge
                .map(|s| s.is_account_connected)
                .unwrap_or(false),
            drops: node
                .time_based_drops
                .into_iter()
                .map(|d| {
                    let self_edge = d.self_edge.unwrap_or(DropSelf {
                        current_minutes_watched: 0,
                        is_claimed: false,
                        drop_instance_id: None,
                    });
                    TimeBasedDrop {
                        id: d.id,
                        name: d.name,
                        required_minutes: d.required_minutes_watched,
                        current_minutes: self_edge.current_minutes_watched,
                        is_claimed: self_edge.is_claimed,
                        instance_id: self_edge.drop_instance_id,
                    }
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CurrentDropData {
    #[serde(rename = "currentUser")]
    current_user: Option<CurrentUserSession>,
}

#[derive(Debug, Deserialize)]
struct CurrentUserSession {
    #[serde(rename = "dropCurrentSession")]
    drop_current_session: Option<DropSessionNode>,
}

#[derive(Debug, Deserialize)]
struct DropSessionNode {
    #[serde(rename = "dropID")]
    drop_id: Option<String>,
    #[serde(rename = "currentMinutesWatched", default)]
    current_minutes_watched: i32,
}

#[derive(Debug, Deserialize)]
struct ClaimDropData {}

#[derive(Debug, Deserialize)]
struct PlaybackTokenData {
    #[serde(rename = "streamPlaybackAccessToken")]
    stream_playback_access_token: Option<PlaybackTokenNode>,
}

#[derive(Debug, Deserialize)]
struct PlaybackTokenNode {
    value: String,
    signature: String,
}

/// Short-lived credential for fetching a channel's HLS manifest.
#[derive(Debug, Clone)]
pub struct PlaybackToken {
    pub value: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
struct GameDirectoryData {
    game: Option<GameDirectoryNode>,
}

#[derive(Debug, Deserialize)]
struct GameDirectoryNode {
    streams: Option<StreamConnection>,
}

#[derive(Debug, Deserialize)]
struct StreamConnection {
    #[serde(default)]
    edges: Vec<StreamEdge>,
}

#[derive(Debug, Deserialize)]
struct StreamEdge {
    node: StreamNode,
}

#[derive(Debug, Deserialize)]
struct StreamNode {
    #[serde(rename = "viewersCount", default)]
    viewers_count: i32,
    broadcaster: Option<BroadcasterNode>,
}

#[derive(Debug, Deserialize)]
struct BroadcasterNode {
    id: String,
    login: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct SlugRedirectData {
    game: Option<SlugNode>,
}

#[derive(Debug, Deserialize)]
struct SlugNode {
    id: String,
    slug: String,
}

#[derive(Debug, Clone)]
pub struct GameSlug {
    pub id: String,
    pub slug: String,
}

/// The one canonical Twitch GraphQL client. Holds the per-process session and
/// device identifiers; the bearer token is installed after login and cleared
/// by the coordinator when Twitch stops accepting it.
pub struct GqlClient {
    client: Client,
    session_id: String,
    device_id: String,
    token: RwLock<Option<String>>,
    retry: RetryPolicy,
}

impl GqlClient {
    pub fn new(session_id: String, device_id: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .gzip(true)
                .build()
                .unwrap_or_else(|_| Client::new()),
            session_id,
            device_id,
            token: RwLock::new(None),
            retry: RetryPolicy::default(),
        }
    }

    pub async fn set_token(&self, token: String) {
        *self.token.write().await = Some(token);
    }

    pub async fn clear_token(&self) {
        *self.token.write().await = None;
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn request_once<T: DeserializeOwned>(
        &self,
        op: GqlOperation,
        variables: Value,
    ) -> Result<T> {
        let token = self
            .token
            .read()
            .await
            .clone()
            .ok_or(MinerError::AuthExpired)?;

        let response = self
            .client
            .post(GQL_URL)
            .header("Accept", "*/*")
            .header("Accept-Language", "en-US")
            .header("Pragma", "no-cache")
            .header("Cache-Control", "no-cache")
            .header("Client-Id", CLIENT_ID)
            .header("User-Agent", USER_AGENT)
            .header("Client-Session-Id", &self.session_id)
            .header("X-Device-Id", &self.device_id)
            .header("Origin", CLIENT_URL)
            .header("Referer", CLIENT_URL)
            .header("Authorization", format!("OAuth {}", token))
            .json(&op.body(variables))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MinerError::AuthExpired);
        }
        if !status.is_success() {
            return Err(MinerError::Remote(format!(
                "{} failed with status {}",
                op.name, status
            )));
        }

        let envelope: GqlResponse<T> = response.json().await?;
        if let Some(errors) = envelope.errors.filter(|e| !e.is_empty()) {
            return Err(classify_gql_errors(&errors));
        }
        envelope
            .data
            .ok_or_else(|| MinerError::Remote(format!("{} returned no data", op.name)))
    }

    /// Executes an operation with the shared bounded-retry policy applied to
    /// transient remote failures.
    async fn request<T: DeserializeOwned>(&self, op: GqlOperation, variables: Value) -> Result<T> {
        self.retry
            .run(op.name, || self.request_once(op, variables.clone()))
            .await
    }

    /// All campaigns visible to the logged-in account. The dashboard listing
    /// carries no per-drop detail; fetch `campaign_details` before mining one.
    pub async fn campaigns(&self) -> Result<Vec<DropCampaign>> {
        let data: CampaignsData = self
            .request(OP_CAMPAIGNS, json!({ "fetchRewardCampaigns": false }))
            .await?;
        let nodes = data
            .current_user
            .map(|u| u.drop_campaigns)
            .unwrap_or_default();
        debug!("fetched {} campaigns", nodes.len());
        Ok(nodes.into_iter().map(DropCampaign::from).collect())
    }

    pub async fn campaign_details(&self, campaign_id: &str, login: &str) -> Result<DropCampaign> {
        let data: CampaignDetailsData = self
            .request(
                OP_CAMPAIGN_DETAILS,
                json!({ "dropID": campaign_id, "channelLogin": login }),
            )
            .await?;
        data.user
            .and_then(|u| u.drop_campaign)
            .map(DropCampaign::from)
            .ok_or_else(|| MinerError::Remote("campaign details missing from response".into()))
    }

    /// Authoritative watch progress for the channel Twitch currently tracks.
    /// `None` is a normal answer: no drop session is active.
    pub async fn current_drop(&self, channel_id: &str) -> Result<Option<SessionProgress>> {
        let data: CurrentDropData = self
            .request(
                OP_CURRENT_DROP,
                // channelLogin is always the empty string on this operation.
                json!({ "channelID": channel_id, "channelLogin": "" }),
            )
            .await?;
        Ok(data
            .current_user
            .and_then(|u| u.drop_current_session)
            .and_then(|s| {
                s.drop_id.map(|drop_id| SessionProgress {
                    drop_id,
                    minutes_watched: s.current_minutes_watched,
                    reported_at: Utc::now(),
                })
            }))
    }

    pub async fn claim_drop(&self, instance_id: &str) -> Result<()> {
        let _: ClaimDropData = self
            .request(
                OP_CLAIM_DROP,
                json!({ "input": { "dropInstanceID": instance_id } }),
            )
            .await?;
        Ok(())
    }

    pub async fn playback_access_token(&self, login: &str) -> Result<PlaybackToken> {
        let data: PlaybackTokenData = self
            .request(
                OP_PLAYBACK_ACCESS_TOKEN,
                json!({
                    "isLive": true,
                    "isVod": false,
                    "login": login,
                    "platform": "web",
                    "playerType": "site",
                    "vodID": "",
                }),
            )
            .await?;
        data.stream_playback_access_token
            .map(|t| PlaybackToken {
                value: t.value,
                signature: t.signature,
            })
            .ok_or_else(|| MinerError::NotWatchable("no playback access token for channel".into()))
    }

    /// Live channels for a game, as the directory page lists them.
    pub async fn game_streams(&self, game_id: &str, slug: &str, limit: u32) -> Result<Vec<Channel>> {
        let data: GameDirectoryData = self
            .request(
                OP_GAME_DIRECTORY,
                json!({
                    "limit": limit,
                    "slug": slug,
                    "imageWidth": 50,
                    "includeIsDJ": false,
                    "options": {
                        "broadcasterLanguages": [],
                        "freeformTags": null,
                        "includeRestricted": ["SUB_ONLY_LIVE"],
                        "recommendationsContext": { "platform": "web" },
                        "sort": "RELEVANCE",
                        "systemFilters": [],
                        "tags": [],
                        "requestID": "JIRA-VXP-2397",
                    },
                    "sortTypeIsRecency": false,
                }),
            )
            .await?;

        let edges = data
            .game
            .and_then(|g| g.streams)
            .map(|s| s.edges)
            .unwrap_or_default();
        Ok(edges
            .into_iter()
            .filter_map(|edge| {
                let node = edge.node;
                node.broadcaster.map(|b| Channel {
                    id: b.id,
                    login: b.login,
                    display_name: b.display_name,
                    viewers: node.viewers_count,
                    game_id: game_id.to_string(),
                })
            })
            .collect())
    }

    pub async fn resolve_game_slug(&self, game_name: &str) -> Result<GameSlug> {
        let data: SlugRedirectData = self
            .request(OP_SLUG_REDIRECT, json!({ "name": game_name }))
            .await?;
        data.game
            .map(|g| GameSlug {
                id: g.id,
                slug: g.slug,
            })
            .ok_or_else(|| MinerError::NotWatchable(format!("no directory for game {}", game_name)))
    }
}
