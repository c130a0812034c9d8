use log::{debug, warn};
use reqwest::Client;
use url::Url;

use crate::error::{MinerError, Result};
use crate::models::Channel;
use crate::services::auth_service::{CLIENT_ID, USER_AGENT};
use crate::services::gql_service::{GqlClient, PlaybackToken};
use crate::utils::hex_nonce;

const USHER_URL: &str = "https://usher.ttvnw.net/api/channel/hls";

/// A resolved watch target: the variant playlist is pinned once per channel
/// and re-fetched on every tick so probes always hit a live segment.
#[derive(Debug, Clone)]
pub struct WatchSession {
    pub channel: Channel,
    variant_url: String,
}

impl WatchSession {
    pub(crate) fn new(channel: Channel, variant_url: String) -> Self {
        Self {
            channel,
            variant_url,
        }
    }
}

fn usher_url(login: &str, token: &PlaybackToken) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/{}.m3u8", USHER_URL, login))
        .map_err(|e| MinerError::NotWatchable(format!("bad channel login {}: {}", login, e)))?;
    url.query_pairs_mut()
        .append_pair("sig", &token.signature)
        .append_pair("token", &token.value)
        .append_pair("client_id", CLIENT_ID)
        .append_pair("allow_source", "true")
        .append_pair("allow_audio_only", "true")
        .append_pair("allow_spectre", "false")
        .append_pair("p", &hex_nonce(7));
    Ok(url)
}

/// First variant URI in a master playlist. Lines starting with `#` are tags;
/// the first bare line is the highest-listed quality, which is all a headless
/// viewer needs.
fn first_variant(master: &str) -> Option<&str> {
    master
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Last media segment URI in a variant playlist, i.e. the most recent one.
fn last_segment(variant: &str) -> Option<&str> {
    variant
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .last()
}

/// Simulates a viewer by resolving a channel's HLS stream and periodically
/// touching its newest segment. No media is ever downloaded; a HEAD request
/// on the segment is what registers watch time.
pub struct WatchService {
    client: Client,
}

impl Default for WatchService {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchService {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Resolves a channel into a probed-able session: playback token, master
    /// playlist, then the variant playlist URL. A channel that is offline or
    /// region-blocked surfaces as `NotWatchable`.
    pub async fn open_session(&self, gql: &GqlClient, channel: &Channel) -> Result<WatchSession> {
        let token = gql.playback_access_token(&channel.login).await?;
        let url = usher_url(&channel.login, &token)?;

        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Client-Id", CLIENT_ID)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MinerError::NotWatchable(format!(
                "{} is offline",
                channel.login
            )));
        }
        if !status.is_success() {
            return Err(MinerError::NotWatchable(format!(
                "manifest for {} returned {}",
                channel.login, status
            )));
        }

        let master = response.text().await?;
        let variant = first_variant(&master).ok_or_else(|| {
            MinerError::NotWatchable(format!("empty master playlist for {}", channel.login))
        })?;

        debug!("opened watch session for {}", channel.login);
        Ok(WatchSession::new(channel.clone(), variant.to_string()))
    }

    /// One watch tick: re-fetch the variant playlist and HEAD its newest
    /// segment. Returns Ok only when the segment answered with success.
    pub async fn probe(&self, session: &WatchSession) -> Result<()> {
        let playlist = self
            .client
            .get(&session.variant_url)
            .header("User-Agent", USER_AGENT)
            .header("Client-Id", CLIENT_ID)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                warn!("variant playlist fetch failed for {}: {}", session.channel.login, e);
                MinerError::NotWatchable(format!("variant playlist gone for {}", session.channel.login))
            })?
            .text()
            .await?;

        let segment = last_segment(&playlist).ok_or_else(|| {
            MinerError::NotWatchable(format!("no segments for {}", session.channel.login))
        })?;

        let status = self
            .client
            .head(segment)
            .header("User-Agent", USER_AGENT)
            .header("Client-Id", CLIENT_ID)
            .send()
            .await?
            .status();

        if status.is_success() {
            Ok(())
        } else {
            Err(MinerError::NotWatchable(format!(
                "segment probe for {} returned {}",
                session.channel.login, status
            )))
        }
    }
}
