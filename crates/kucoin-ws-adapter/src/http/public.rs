/*
[INPUT]:  None (public endpoint, no credentials)
[OUTPUT]: Bullet token + instance server used to open the market stream
[POS]:    HTTP layer - public bootstrap endpoint
[UPDATE]: When the bullet endpoint or its response format changes
*/

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use crate::http::{KucoinClient, KucoinError, Result, TokenProvider};
use crate::types::{BootstrapToken, BulletResponse};

impl KucoinClient {
    /// Request a public bullet token
    ///
    /// POST /api/v1/bullet-public
    pub async fn bullet_public(&self) -> Result<BulletResponse> {
        let builder = self.request(Method::POST, "/api/v1/bullet-public")?;
        self.send_json(builder).await
    }
}

#[async_trait]
impl TokenProvider for KucoinClient {
    async fn fetch_token(&self) -> Result<BootstrapToken> {
        let response = self.bullet_public().await?;
        bootstrap_from_bullet(response)
    }
}

/// Extract the first instance server; a missing token is fatal.
pub fn bootstrap_from_bullet(response: BulletResponse) -> Result<BootstrapToken> {
    let data = response.data.ok_or(KucoinError::InvalidToken)?;
    if data.token.is_empty() {
        return Err(KucoinError::InvalidToken);
    }

    let server = data
        .instance_servers
        .into_iter()
        .next()
        .ok_or(KucoinError::NoInstanceServer)?;

    debug!(
        endpoint = %server.endpoint,
        ping_interval_ms = server.ping_interval,
        "bullet token received"
    );

    Ok(BootstrapToken {
        token: data.token,
        endpoint: server.endpoint,
        ping_interval: Duration::from_millis(server.ping_interval),
    })
}
