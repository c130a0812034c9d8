use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};

use dropmine::models::MinerConfig;
use dropmine::services::auth_service::{AuthService, Session};
use dropmine::services::gql_service::GqlClient;
use dropmine::services::mining_service::MiningService;
use dropmine::utils::hex_nonce;

const CONFIG_APP_NAME: &str = "dropmine";

async fn obtain_session(auth: &AuthService) -> Result<Session> {
    match auth.load_session().await {
        Ok(session) => return Ok(session),
        Err(err) if err.is_auth() => {}
        Err(err) => return Err(err).context("restoring stored session"),
    }

    let info = auth
        .begin_device_auth()
        .await
        .context("requesting device code")?;
    println!("Open {} and enter code: {}", info.verification_uri, info.user_code);

    auth.poll_until_authorized(&info)
        .await
        .context("waiting for device authorization")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config: MinerConfig =
        confy::load(CONFIG_APP_NAME, None).context("loading configuration")?;

    let auth = AuthService::new().context("initializing auth service")?;
    let session = obtain_session(&auth).await?;
    info!("mining as {}", session.identity.login);

    let gql = Arc::new(GqlClient::new(hex_nonce(16), hex_nonce(32)));
    gql.set_token(session.access_token.clone()).await;

    let miner = MiningService::new(gql, session.identity.login.clone(), config);
    miner.start().await.context("starting miner")?;

    let mut updates = miner.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(status) = updates.recv().await {
            if let Some(attribution) = &status.attribution {
                info!(
                    "watching {} for {} ({} drops tracked)",
                    attribution.channel.login,
                    attribution.campaign.name,
                    status.drops.len()
                );
            }
            if let Some(err) = &status.last_error {
                error!("miner error: {}", err);
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    if let Err(e) = miner.stop().await {
        error!("stop failed: {}", e);
    }
    printer.abort();
    Ok(())
}
