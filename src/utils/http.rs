// src/utils/http.rs

//! HTTP client utilities.

use crate::error::Result;
use crate::models::CrawlerConfig;

/// Create a configured asynchronous HTTP client, optionally routed through a proxy.
pub fn create_async_client(
    config: &CrawlerConfig,
    proxy: Option<&str>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .gzip(true)
        .brotli(true)
        .deflate(true);
    if let Some(proxy_url) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_client_direct_and_proxied() {
        let config = CrawlerConfig::default();
        assert!(create_async_client(&config, None).is_ok());
        assert!(create_async_client(&config, Some("http://127.0.0.1:3128")).is_ok());
    }
}
