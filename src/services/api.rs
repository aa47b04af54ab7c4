// src/services/api.rs

//! Typed API surface used by the crawl and seed pipelines.

use std::sync::Arc;

use async_trait::async_trait;

use super::client::RequestOrchestrator;
use super::endpoints::ApiRequest;
use super::timeline;
use crate::error::RequestError;
use crate::models::{User, UserPage};

/// Source of following lists and profiles for the crawler.
#[async_trait]
pub trait FollowingSource: Send + Sync {
    /// One page of the accounts `user_id` follows.
    async fn following_page(
        &self,
        user_id: &str,
        count: usize,
        cursor: Option<&str>,
    ) -> Result<UserPage, RequestError>;

    /// Profile lookup; `Ok(None)` when the account is unavailable.
    async fn user_by_id(&self, user_id: &str) -> Result<Option<User>, RequestError>;
}

/// Source of candidate seed accounts.
#[async_trait]
pub trait SeedSource: Send + Sync {
    /// One page of people-search results for `query`.
    async fn search_users_page(
        &self,
        query: &str,
        count: usize,
        cursor: Option<&str>,
    ) -> Result<UserPage, RequestError>;

    /// One page of members of list `list_id`.
    async fn list_members_page(
        &self,
        list_id: &str,
        count: usize,
        cursor: Option<&str>,
    ) -> Result<UserPage, RequestError>;
}

/// Upstream API client.
#[derive(Clone)]
pub struct SocialApi {
    orchestrator: Arc<RequestOrchestrator>,
}

impl SocialApi {
    pub fn new(orchestrator: Arc<RequestOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<RequestOrchestrator> {
        &self.orchestrator
    }
}

#[async_trait]
impl FollowingSource for SocialApi {
    async fn following_page(
        &self,
        user_id: &str,
        count: usize,
        cursor: Option<&str>,
    ) -> Result<UserPage, RequestError> {
        let data = self
            .orchestrator
            .execute(&ApiRequest::following(user_id, count, cursor))
            .await?;
        Ok(timeline::parse_following(&data))
    }

    async fn user_by_id(&self, user_id: &str) -> Result<Option<User>, RequestError> {
        let data = self
            .orchestrator
            .execute(&ApiRequest::user_by_id(user_id))
            .await?;
        Ok(timeline::parse_user_by_id(&data))
    }
}

#[async_trait]
impl SeedSource for SocialApi {
    async fn search_users_page(
        &self,
        query: &str,
        count: usize,
        cursor: Option<&str>,
    ) -> Result<UserPage, RequestError> {
        let data = self
            .orchestrator
            .execute(&ApiRequest::search_users(query, count, cursor))
            .await?;
        Ok(timeline::parse_search(&data))
    }

    async fn list_members_page(
        &self,
        list_id: &str,
        count: usize,
        cursor: Option<&str>,
    ) -> Result<UserPage, RequestError> {
        let data = self
            .orchestrator
            .execute(&ApiRequest::list_members(list_id, count, cursor))
            .await?;
        Ok(timeline::parse_list_members(&data))
    }
}
