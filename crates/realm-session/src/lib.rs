#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;
mod clock;
mod credentials;
pub mod error;
#[cfg(feature = "tonic")]
pub mod grpc;
pub mod provider;
mod session;
#[cfg(test)]
mod test_support;
mod token;

pub use client::*;
pub use clock::{Clock, SystemClock};
pub use credentials::Credentials;
pub use error::{Error, Result};
#[cfg(feature = "tonic")]
pub use grpc::{AuthorizationLayer, AuthorizedService};
pub use provider::{IdentityProvider, KeycloakClient, ProviderError, TokenInfo};
pub use session::*;
pub use token::Token;
