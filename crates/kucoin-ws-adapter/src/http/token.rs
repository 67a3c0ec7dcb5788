/*
[INPUT]:  Any source of streaming credentials (REST bullet call, fixtures)
[OUTPUT]: BootstrapToken for a single connection attempt
[POS]:    HTTP layer - seam between connections and the bootstrap call
[UPDATE]: When bootstrap sources or their contract change
*/

use async_trait::async_trait;

use crate::http::Result;
use crate::types::BootstrapToken;

/// Supplies a fresh `{token, endpoint, ping_interval}` per connection attempt.
#[async_trait]
pub trait TokenProvider: Send + Sync + std::fmt::Debug {
    async fn fetch_token(&self) -> Result<BootstrapToken>;
}
