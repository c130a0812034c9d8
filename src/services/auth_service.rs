use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::error::{MinerError, Result};

// Twitch Android app credentials. Drops queries only work with this client id,
// and the device flow for it takes no scopes.
pub const CLIENT_ID: &str = "kd1unb4b3q4t58fwlpcbzcbnm76a8fp";
pub const USER_AGENT: &str =
    "Dalvik/2.1.0 (Linux; U; Android 7.1.2; SM-G977N Build/LMY48Z) tv.twitch.android.app/16.8.1/1608010";

const DEVICE_CODE_URL: &str = "https://id.twitch.tv/oauth2/device";
const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const VALIDATE_URL: &str = "https://id.twitch.tv/oauth2/validate";
const REVOKE_URL: &str = "https://id.twitch.tv/oauth2/revoke";

const TOKEN_FILE_NAME: &str = "token.json";

/// Overall wall-clock budget for device-code polling, independent of the
/// per-request timeout.
const POLL_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub login: String,
}

/// An authenticated Twitch session. Owned by the coordinator; cleared whenever
/// Twitch stops accepting the token.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub identity: UserIdentity,
}

#[derive(Debug, Clone)]
pub struct DeviceCodeInfo {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval: u64,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    interval: u64,
}

#[derive(Debug, Deserialize)]
struct TokenPollBody {
    access_token: Option<String>,
    // Twitch reports the OAuth error code in `message` on this endpoint;
    // check both fields.
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    user_id: String,
    login: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
}

/// What one poll iteration decided.
#[derive(Debug, PartialEq, Eq)]
enum PollOutcome {
    Pending,
    SlowDown,
    Authorized(String),
}

/// Widens the poll interval by 2 seconds on the first slow_down only;
/// repeated slow_down responses leave it alone.
fn apply_slow_down(interval: &mut Duration, already_widened: &mut bool) {
    if !*already_widened {
        *interval += Duration::from_secs(2);
        *already_widened = true;
    }
}

fn classify_poll_body(body: &TokenPollBody) -> Result<PollOutcome> {
    if let Some(token) = &body.access_token {
        return Ok(PollOutcome::Authorized(token.clone()));
    }
    let code = body
        .error
        .as_deref()
        .or(body.message.as_deref())
        .unwrap_or("");
    match code {
        "authorization_pending" => Ok(PollOutcome::Pending),
        "slow_down" => Ok(PollOutcome::SlowDown),
        "expired_token" => Err(MinerError::Auth(
            "device code expired, start a new login".into(),
        )),
        "access_denied" => Err(MinerError::Auth("user denied the authorization".into())),
        other => Err(MinerError::Auth(format!("token poll failed: {}", other))),
    }
}

/// Device-code OAuth flow plus token persistence. The stored token is never
/// trusted on its own; Twitch's validate endpoint decides whether it is still
/// good.
pub struct AuthService {
    client: Client,
    token_path: PathBuf,
}

impl AuthService {
    pub fn new() -> Result<Self> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| MinerError::Auth("no config directory available".into()))?;
        path.push("dropmine");
        if !path.exists() {
            fs::create_dir_all(&path)
                .map_err(|e| MinerError::Auth(format!("cannot create config dir: {}", e)))?;
        }
        path.push(TOKEN_FILE_NAME);
        Ok(Self::with_token_path(path))
    }

    pub fn with_token_path(token_path: PathBuf) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            token_path,
        }
    }

    /// Requests a device code. The caller shows `user_code` and
    /// `verification_uri` to the user, then calls `poll_until_authorized`.
    pub async fn begin_device_auth(&self) -> Result<DeviceCodeInfo> {
        let params = [("client_id", CLIENT_ID), ("scopes", "")];
        let response = self
            .client
            .post(DEVICE_CODE_URL)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MinerError::Auth(format!(
                "device code request rejected: {}",
                text
            )));
        }

        let body: DeviceCodeResponse = response.json().await?;
        info!("device flow started, user code {}", body.user_code);
        Ok(DeviceCodeInfo {
            device_code: body.device_code,
            user_code: body.user_code,
            verification_uri: body.verification_uri,
            interval: body.interval,
            expires_in: body.expires_in,
        })
    }

    /// Polls the token endpoint until the user authorizes, the code expires,
    /// or the overall timeout elapses. A `slow_down` response widens the
    /// interval by 2 seconds.
    pub async fn poll_until_authorized(&self, info: &DeviceCodeInfo) -> Result<Session> {
        let started = Instant::now();
        let budget = POLL_TIMEOUT.min(Duration::from_secs(info.expires_in));
        let mut interval = Duration::from_secs(info.interval.max(1));
        let mut slowed = false;

        loop {
            if started.elapsed() >= budget {
                return Err(MinerError::Auth("device code polling timed out".into()));
            }
            tokio::time::sleep(interval).await;

            let params = [
                ("client_id", CLIENT_ID),
                ("scopes", ""),
                ("device_code", info.device_code.as_str()),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ];
            let response = self.client.post(TOKEN_URL).form(&params).send().await?;
            let body: TokenPollBody = response.json().await?;

            match classify_poll_body(&body)? {
                PollOutcome::Pending => {
                    debug!("waiting for user authorization");
                }
                PollOutcome::SlowDown => {
                    apply_slow_down(&mut interval, &mut slowed);
                    debug!("poll interval now {:?}", interval);
                }
                PollOutcome::Authorized(token) => {
                    let identity = self.validate(&token).await?;
                    info!("authenticated as {}", identity.login);
                    self.store_token(&token)?;
                    return Ok(Session {
                        access_token: token,
                        identity,
                    });
                }
            }
        }
    }

    /// Confirms a token is still accepted and resolves the identity behind it.
    /// Local expiry bookkeeping is never consulted; Twitch is the source of
    /// truth.
    pub async fn validate(&self, token: &str) -> Result<UserIdentity> {
        let response = self
            .client
            .get(VALIDATE_URL)
            .header("Authorization", format!("OAuth {}", token))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MinerError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(MinerError::Remote(format!(
                "token validation failed with status {}",
                response.status()
            )));
        }

        let body: ValidateResponse = response.json().await?;
        Ok(UserIdentity {
            user_id: body.user_id,
            login: body.login,
        })
    }

    /// Restores a persisted session, revalidating the token with Twitch. An
    /// invalid stored token is deleted on the way out.
    pub async fn load_session(&self) -> Result<Session> {
        let token = self.load_token()?;
        match self.validate(&token).await {
            Ok(identity) => {
                info!("restored session for {}", identity.login);
                Ok(Session {
                    access_token: token,
                    identity,
                })
            }
            Err(MinerError::AuthExpired) => {
                debug!("stored token no longer accepted, deleting");
                self.delete_token();
                Err(MinerError::AuthExpired)
            }
            Err(err) => Err(err),
        }
    }

    /// Best-effort revocation. Logout must always succeed locally, so remote
    /// failures are logged and swallowed; the token file is deleted either way.
    pub async fn revoke(&self, token: &str) {
        let params = [("client_id", CLIENT_ID), ("token", token)];
        match self.client.post(REVOKE_URL).form(&params).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!("token revocation returned status {}", response.status());
            }
            Err(err) => warn!("token revocation failed: {}", err),
            _ => {}
        }
        self.delete_token();
        info!("logged out");
    }

    fn store_token(&self, token: &str) -> Result<()> {
        let stored = StoredToken {
            access_token: token.to_string(),
        };
        let json = serde_json::to_string(&stored)?;
        fs::write(&self.token_path, json)
            .map_err(|e| MinerError::Auth(format!("cannot persist token: {}", e)))?;
        debug!("token saved to {:?}", self.token_path);
        Ok(())
    }

    fn load_token(&self) -> Result<String> {
        let raw = fs::read_to_string(&self.token_path)
            .map_err(|_| MinerError::Auth("no stored token".into()))?;
        let stored: StoredToken = serde_json::from_str(&raw)?;
        Ok(stored.access_token)
    }

    fn delete_token(&self) {
        if self.token_path.exists() {
            if let Err(err) = fs::remove_file(&self.token_path) {
                warn!("failed to delete token file: {}", err);
            }
        }
    }
}
