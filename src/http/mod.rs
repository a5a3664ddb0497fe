//! HTTP model and transport for Gauntlet

pub mod client;
pub(crate) mod encoding;
pub mod pool;
pub mod request;
pub mod response;

pub use client::{HttpRequester, Requester};
pub use pool::{RequesterFactory, RequesterPool};
pub use request::{RedirectPolicy, Request};
pub use response::Response;
