/*
[INPUT]:  HTTP client configuration and API endpoints
[OUTPUT]: Bootstrap tokens, typed API results and the crate error type
[POS]:    HTTP layer - REST API communication
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod error;
pub mod public;
pub mod token;

pub use error::{KucoinError, Result};
pub use token::TokenProvider;

pub use client::{ClientConfig, KucoinClient};
