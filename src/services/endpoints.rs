// src/services/endpoints.rs

//! GraphQL endpoint descriptors and request builders.

use std::collections::HashMap;

use serde_json::{Value, json};
use url::Url;

/// Endpoints the crawler talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Following,
    SearchUsers,
    ListMembers,
    UserById,
}

/// How a request authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// Bearer token plus session cookie and CSRF header
    Session,
    /// Bearer token only
    Bearer,
}

/// Static description of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub kind: EndpointKind,
    /// GraphQL operation name, also the URL's last segment
    pub operation: &'static str,
    /// Default GraphQL query id
    pub query_id: &'static str,
    /// Rate-limit budget the endpoint draws from
    pub category: &'static str,
    pub auth: AuthKind,
    /// Variable carrying the pagination cursor, if paginated
    pub cursor_field: Option<&'static str>,
}

impl EndpointKind {
    pub fn descriptor(self) -> Endpoint {
        match self {
            EndpointKind::Following => Endpoint {
                kind: self,
                operation: "Following",
                query_id: "2vUj-_Ek-UmBVDNtd8OnQA",
                category: "timeline",
                auth: AuthKind::Session,
                cursor_field: Some("cursor"),
            },
            EndpointKind::SearchUsers => Endpoint {
                kind: self,
                operation: "SearchTimeline",
                query_id: "flaR-PUMshxFWZWPNpq4zA",
                category: "search",
                auth: AuthKind::Session,
                cursor_field: Some("cursor"),
            },
            EndpointKind::ListMembers => Endpoint {
                kind: self,
                operation: "ListMembers",
                query_id: "BQp2IEYkgxuSxqbTAr1e1g",
                category: "timeline",
                auth: AuthKind::Session,
                cursor_field: Some("cursor"),
            },
            EndpointKind::UserById => Endpoint {
                kind: self,
                operation: "UserByRestId",
                query_id: "tD8zKvQzwY3kdx5yz6YmOw",
                category: "graphql",
                auth: AuthKind::Session,
                cursor_field: None,
            },
        }
    }
}

/// One logical API call: an endpoint plus its variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub endpoint: Endpoint,
    pub variables: Value,
}

impl ApiRequest {
    fn new(kind: EndpointKind, mut variables: Value, cursor: Option<&str>) -> Self {
        let endpoint = kind.descriptor();
        if let (Some(field), Some(cursor), Some(map)) =
            (endpoint.cursor_field, cursor, variables.as_object_mut())
        {
            map.insert(field.to_string(), Value::String(cursor.to_string()));
        }
        Self {
            endpoint,
            variables,
        }
    }

    pub fn following(user_id: &str, count: usize, cursor: Option<&str>) -> Self {
        let variables = json!({
            "userId": user_id,
            "count": count,
            "includePromotedContent": false,
        });
        Self::new(EndpointKind::Following, variables, cursor)
    }

    pub fn search_users(query: &str, count: usize, cursor: Option<&str>) -> Self {
        let variables = json!({
            "rawQuery": query,
            "count": count,
            "querySource": "typed_query",
            "product": "People",
        });
        Self::new(EndpointKind::SearchUsers, variables, cursor)
    }

    pub fn list_members(list_id: &str, count: usize, cursor: Option<&str>) -> Self {
        let variables = json!({
            "listId": list_id,
            "count": count,
        });
        Self::new(EndpointKind::ListMembers, variables, cursor)
    }

    pub fn user_by_id(user_id: &str) -> Self {
        let variables = json!({
            "userId": user_id,
            "withSafetyModeUserFields": true,
        });
        Self::new(EndpointKind::UserById, variables, None)
    }

    /// Feature flags sent alongside the variables.
    pub fn features(&self) -> Value {
        match self.endpoint.kind {
            EndpointKind::UserById => json!({
                "hidden_profile_likes_enabled": true,
                "hidden_profile_subscriptions_enabled": true,
                "responsive_web_graphql_exclude_directive_enabled": true,
                "verified_phone_label_enabled": false,
                "subscriptions_verification_info_is_identity_verified_enabled": true,
                "subscriptions_verification_info_verified_since_enabled": true,
                "highlights_tweets_tab_ui_enabled": true,
                "responsive_web_twitter_article_notes_tab_enabled": true,
                "creator_subscriptions_tweet_preview_api_enabled": true,
                "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
                "responsive_web_graphql_timeline_navigation_enabled": true,
            }),
            _ => json!({
                "creator_subscriptions_tweet_preview_api_enabled": true,
                "c9s_tweet_anatomy_moderator_badge_enabled": true,
                "tweetypie_unmention_optimization_enabled": true,
                "responsive_web_edit_tweet_api_enabled": true,
                "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
                "view_counts_everywhere_api_enabled": true,
                "longform_notetweets_consumption_enabled": true,
                "responsive_web_twitter_article_tweet_consumption_enabled": true,
                "tweet_awards_web_tipping_enabled": false,
                "longform_notetweets_rich_text_read_enabled": true,
                "longform_notetweets_inline_media_enabled": true,
                "rweb_video_timestamps_enabled": true,
                "responsive_web_graphql_exclude_directive_enabled": true,
                "verified_phone_label_enabled": false,
                "freedom_of_speech_not_reach_fetch_enabled": true,
                "standardized_nudges_misinfo": true,
                "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
                "responsive_web_media_download_video_enabled": false,
                "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
                "responsive_web_graphql_timeline_navigation_enabled": true,
                "responsive_web_enhance_cards_enabled": false,
            }),
        }
    }

    /// Full request URL under `base_url`, honoring query id overrides.
    pub fn url(
        &self,
        base_url: &str,
        query_ids: &HashMap<String, String>,
    ) -> Result<Url, url::ParseError> {
        let query_id = query_ids
            .get(self.endpoint.operation)
            .map(String::as_str)
            .unwrap_or(self.endpoint.query_id);
        let mut url = Url::parse(&format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            query_id,
            self.endpoint.operation
        ))?;
        url.query_pairs_mut()
            .append_pair("variables", &self.variables.to_string())
            .append_pair("features", &self.features().to_string());
        Ok(url)
    }
}
