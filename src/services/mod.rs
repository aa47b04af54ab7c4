// src/services/mod.rs

//! Upstream access: credential and proxy rotation, rate limiting, request
//! orchestration and the typed API built on top of them.

pub mod api;
pub mod client;
pub mod credentials;
pub mod endpoints;
pub mod proxies;
pub mod rate_limit;
pub mod timeline;

pub use api::{FollowingSource, SeedSource, SocialApi};
pub use client::{HttpRequest, HttpResponse, ReqwestTransport, RequestOrchestrator, Transport};
pub use credentials::{CredentialHandle, CredentialPool, CredentialState, PoolStats};
pub use endpoints::{ApiRequest, AuthKind, Endpoint, EndpointKind};
pub use proxies::{ProxyHandle, ProxyPool, ProxyStats};
pub use rate_limit::AdaptiveRateLimiter;
