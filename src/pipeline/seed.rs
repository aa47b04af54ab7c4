// src/pipeline/seed.rs

//! Seed discovery from bio searches and curated lists.

use std::collections::HashSet;
use std::sync::Arc;

use super::progress::{ProgressEvent, ProgressSink, ProgressSource};
use super::retry::RetryPolicy;
use crate::error::{AppError, Disposition, RequestError, Result};
use crate::models::{Config, User, UserPage};
use crate::services::SeedSource;
use crate::storage::GraphStore;

#[derive(Debug, Clone, Copy)]
enum SeedQuery<'a> {
    Bio(&'a str),
    List(&'a str),
}

impl<'a> SeedQuery<'a> {
    fn source(self) -> ProgressSource {
        match self {
            SeedQuery::Bio(_) => ProgressSource::BioSearch,
            SeedQuery::List(_) => ProgressSource::List,
        }
    }

    fn kind(self) -> &'static str {
        match self {
            SeedQuery::Bio(_) => "keyword",
            SeedQuery::List(_) => "list",
        }
    }

    fn value(self) -> &'a str {
        match self {
            SeedQuery::Bio(value) | SeedQuery::List(value) => value,
        }
    }
}

/// Collects candidate seed accounts, de-duplicated across sources.
pub struct SeedCollector {
    source: Arc<dyn SeedSource>,
    retry: RetryPolicy,
    page_size: usize,
    progress: ProgressSink,
}

impl SeedCollector {
    pub fn new(source: Arc<dyn SeedSource>, config: &Config) -> Self {
        Self {
            source,
            retry: RetryPolicy::from(&config.retry),
            page_size: config.crawler.page_size,
            progress: ProgressSink::disabled(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Accounts whose bio matches each keyword, up to `max_per_keyword` each.
    pub async fn search_by_bio(
        &self,
        keywords: &[String],
        max_per_keyword: usize,
    ) -> Result<Vec<User>> {
        let mut seen = HashSet::new();
        let mut seeds = Vec::new();
        for keyword in keywords {
            self.collect(SeedQuery::Bio(keyword), max_per_keyword, &mut seen, &mut seeds)
                .await?;
        }
        log::info!(
            "Bio search over {} keywords found {} unique seeds",
            keywords.len(),
            seeds.len()
        );
        Ok(seeds)
    }

    /// Members of each list, up to `max_per_list` each.
    pub async fn scrape_lists(
        &self,
        list_ids: &[String],
        max_per_list: usize,
    ) -> Result<Vec<User>> {
        let mut seen = HashSet::new();
        let mut seeds = Vec::new();
        for list_id in list_ids {
            self.collect(SeedQuery::List(list_id), max_per_list, &mut seen, &mut seeds)
                .await?;
        }
        log::info!(
            "{} lists yielded {} unique seeds",
            list_ids.len(),
            seeds.len()
        );
        Ok(seeds)
    }

    /// Bio search followed by lists, de-duplicated across both.
    pub async fn collect_all(
        &self,
        keywords: &[String],
        max_per_keyword: usize,
        list_ids: &[String],
        max_per_list: usize,
    ) -> Result<Vec<User>> {
        let mut seen = HashSet::new();
        let mut seeds = Vec::new();
        for keyword in keywords {
            self.collect(SeedQuery::Bio(keyword), max_per_keyword, &mut seen, &mut seeds)
                .await?;
        }
        for list_id in list_ids {
            self.collect(SeedQuery::List(list_id), max_per_list, &mut seen, &mut seeds)
                .await?;
        }
        Ok(seeds)
    }

    /// Store seeds as `is_seed` at depth 0. Returns how many ids were new.
    pub async fn persist(&self, store: &dyn GraphStore, seeds: &[User]) -> Result<usize> {
        let seeds: Vec<User> = seeds.iter().cloned().map(User::as_seed).collect();
        let inserted = store.upsert_users(&seeds).await?;
        log::info!("Stored {} seeds ({} new)", seeds.len(), inserted);
        Ok(inserted)
    }

    /// Run one query, appending unseen users to `seeds`. A failing query is
    /// logged and skipped unless the failure is pool-wide.
    async fn collect(
        &self,
        query: SeedQuery<'_>,
        max: usize,
        seen: &mut HashSet<String>,
        seeds: &mut Vec<User>,
    ) -> Result<()> {
        let users = match self.fetch_all(query, max).await {
            Ok(users) => users,
            Err(err) if err.disposition() == Disposition::Fatal => {
                return Err(AppError::Request(err));
            }
            Err(err) => {
                log::warn!("Seed {} '{}' failed: {}", query.kind(), query.value(), err);
                Vec::new()
            }
        };

        let found = users.len();
        for user in users {
            if seen.insert(user.id.clone()) {
                seeds.push(user.as_seed());
            }
        }
        self.progress.emit(ProgressEvent::new(
            query.source(),
            query.value(),
            found,
            seeds.len(),
        ));
        Ok(())
    }

    async fn fetch_all(
        &self,
        query: SeedQuery<'_>,
        max: usize,
    ) -> std::result::Result<Vec<User>, RequestError> {
        let mut users = Vec::new();
        let mut cursor: Option<String> = None;
        let label = format!("{} '{}'", query.kind(), query.value());

        while users.len() < max {
            let count = self.page_size.min(max - users.len());
            let page = self
                .retry
                .run(&label, || self.fetch_page(query, count, cursor.as_deref()))
                .await?;
            let last = page.users.is_empty()
                || page.next_cursor.is_none()
                || page.next_cursor == cursor;
            users.extend(page.users);
            cursor = page.next_cursor;
            if last {
                break;
            }
        }

        users.truncate(max);
        Ok(users)
    }

    async fn fetch_page(
        &self,
        query: SeedQuery<'_>,
        count: usize,
        cursor: Option<&str>,
    ) -> std::result::Result<UserPage, RequestError> {
        match query {
            SeedQuery::Bio(keyword) => self.source.search_users_page(keyword, count, cursor).await,
            SeedQuery::List(list_id) => self.source.list_members_page(list_id, count, cursor).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolError;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn user(id: &str) -> User {
        User {
            handle: format!("h{id}"),
            followers_count: 100,
            ..User::bare(id)
        }
    }

    /// Serves fixed result sets two users per page.
    #[derive(Default)]
    struct FakeSeeds {
        searches: HashMap<String, Vec<User>>,
        lists: HashMap<String, Vec<User>>,
        no_credentials: bool,
    }

    fn page(all: &[User], count: usize, cursor: Option<&str>) -> UserPage {
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + count.min(2)).min(all.len());
        UserPage {
            users: all[start..end].to_vec(),
            next_cursor: (end < all.len()).then(|| end.to_string()),
        }
    }

    #[async_trait]
    impl SeedSource for FakeSeeds {
        async fn search_users_page(
            &self,
            query: &str,
            count: usize,
            cursor: Option<&str>,
        ) -> std::result::Result<UserPage, RequestError> {
            if self.no_credentials {
                return Err(PoolError::NoCredentials.into());
            }
            match self.searches.get(query) {
                Some(all) => Ok(page(all, count, cursor)),
                None => Err(RequestError::Scraping {
                    endpoint: "SearchTimeline".into(),
                    status: 400,
                    message: "bad query".into(),
                }),
            }
        }

        async fn list_members_page(
            &self,
            list_id: &str,
            count: usize,
            cursor: Option<&str>,
        ) -> std::result::Result<UserPage, RequestError> {
            let all = self.lists.get(list_id).cloned().unwrap_or_default();
            Ok(page(&all, count, cursor))
        }
    }

    fn collector(source: FakeSeeds) -> SeedCollector {
        SeedCollector::new(Arc::new(source), &Config::default())
    }

    #[tokio::test]
    async fn test_search_paginates_and_caps() {
        let mut source = FakeSeeds::default();
        source
            .searches
            .insert("rust".into(), (1..=5).map(|i| user(&i.to_string())).collect());

        let seeds = collector(source)
            .search_by_bio(&["rust".to_string()], 3)
            .await
            .unwrap();
        let ids: Vec<_> = seeds.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(seeds.iter().all(|u| u.is_seed && u.depth == 0));
    }

    #[tokio::test]
    async fn test_dedup_across_sources_with_progress() {
        let mut source = FakeSeeds::default();
        source
            .searches
            .insert("defi".into(), vec![user("1"), user("2")]);
        source.lists.insert("L1".into(), vec![user("2"), user("3")]);
        let (sink, mut rx) = ProgressSink::channel();

        let seeds = collector(source)
            .with_progress(sink)
            .collect_all(&["defi".to_string()], 10, &["L1".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(seeds.len(), 3);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.source, ProgressSource::BioSearch);
        assert_eq!((first.users_found, first.total_so_far), (2, 2));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.source, ProgressSource::List);
        assert_eq!(second.query_or_list_id, "L1");
        assert_eq!((second.users_found, second.total_so_far), (2, 3));
    }

    #[tokio::test]
    async fn test_failed_keyword_is_skipped() {
        let mut source = FakeSeeds::default();
        source.searches.insert("ok".into(), vec![user("1")]);

        let seeds = collector(source)
            .search_by_bio(&["missing".to_string(), "ok".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(seeds.len(), 1);
    }

    #[tokio::test]
    async fn test_no_credentials_aborts() {
        let source = FakeSeeds {
            no_credentials: true,
            ..FakeSeeds::default()
        };
        let err = collector(source)
            .search_by_bio(&["rust".to_string()], 10)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Request(RequestError::Pool(PoolError::NoCredentials))
        ));
    }

    #[tokio::test]
    async fn test_persist_marks_seeds() {
        let store = MemoryStorage::new();
        let c = collector(FakeSeeds::default());
        let inserted = c
            .persist(&store, &[user("1").with_depth(3), user("2")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let users = store.load_users().await.unwrap();
        assert!(users.iter().all(|u| u.is_seed && u.depth == 0));
    }
}
