// src/models/user.rs

//! Account nodes and follow edges.

use serde::{Deserialize, Serialize};

/// An account discovered during seeding or crawling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Stable numeric id (as a string)
    pub id: String,

    /// Screen name without the leading `@`
    #[serde(default)]
    pub handle: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub bio: String,

    #[serde(default)]
    pub followers_count: u64,

    #[serde(default)]
    pub following_count: u64,

    /// Whether the account was a crawl seed
    #[serde(default)]
    pub is_seed: bool,

    /// Hops from the nearest seed at discovery
    #[serde(default)]
    pub depth: u32,
}

impl User {
    /// A node known only by id, e.g. an edge endpoint never fetched.
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handle: String::new(),
            display_name: String::new(),
            bio: String::new(),
            followers_count: 0,
            following_count: 0,
            is_seed: false,
            depth: 0,
        }
    }

    /// A seed placeholder stored when the profile lookup fails.
    pub fn seed_placeholder(id: impl Into<String>) -> Self {
        Self {
            is_seed: true,
            ..Self::bare(id)
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn as_seed(mut self) -> Self {
        self.is_seed = true;
        self.depth = 0;
        self
    }

    /// Merge a newer observation of the same account into this one.
    ///
    /// Profile fields take the newer values unless the newer observation
    /// has no handle (a bare node or placeholder). `is_seed` never reverts
    /// to false and `depth` keeps the minimum seen.
    pub fn merge(&mut self, newer: User) {
        debug_assert_eq!(self.id, newer.id);
        let is_seed = self.is_seed || newer.is_seed;
        let depth = self.depth.min(newer.depth);
        if !newer.handle.is_empty() || self.handle.is_empty() {
            *self = newer;
        }
        self.is_seed = is_seed;
        self.depth = depth;
    }
}

/// A follow relationship: `source_id` follows `target_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
}

impl Edge {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, followers: u64) -> User {
        User {
            handle: format!("user_{id}"),
            followers_count: followers,
            ..User::bare(id)
        }
    }

    #[test]
    fn test_merge_keeps_seed_flag() {
        let mut stored = profile("1", 10).as_seed();
        stored.merge(profile("1", 20).with_depth(2));

        assert!(stored.is_seed);
        assert_eq!(stored.depth, 0);
        assert_eq!(stored.followers_count, 20);
    }

    #[test]
    fn test_merge_keeps_min_depth() {
        let mut stored = profile("1", 10).with_depth(1);
        stored.merge(profile("1", 10).with_depth(3));
        assert_eq!(stored.depth, 1);

        stored.merge(profile("1", 10).with_depth(0));
        assert_eq!(stored.depth, 0);
    }

    #[test]
    fn test_merge_last_write_wins_profile() {
        let mut stored = profile("1", 10);
        let mut newer = profile("1", 11);
        newer.bio = "building things".to_string();
        stored.merge(newer);

        assert_eq!(stored.bio, "building things");
        assert_eq!(stored.followers_count, 11);
    }

    #[test]
    fn test_placeholder_does_not_erase_profile() {
        let mut stored = profile("1", 10).with_depth(1);
        stored.merge(User::seed_placeholder("1"));

        assert_eq!(stored.handle, "user_1");
        assert_eq!(stored.followers_count, 10);
        assert!(stored.is_seed);
        assert_eq!(stored.depth, 0);
    }

    #[test]
    fn test_user_deserializes_with_missing_fields() {
        let user: User = serde_json::from_str(r#"{"id":"42"}"#).unwrap();
        assert_eq!(user, User::bare("42"));
    }
}
