//! # Episodic Recall
//!
//! Summaries of finished sessions, recalled at the start of a new session
//! by token Jaccard similarity against the new goal.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::state::db::{lock, AgoraDb};
use crate::text::{jaccard, tokenize};
use crate::workspace::EpisodicMatch;

/// Most recent episodes considered by a search
const SEARCH_WINDOW: i64 = 500;

/// Recall of related past sessions
#[async_trait]
pub trait EpisodicRecall: Send + Sync {
    async fn search(&self, query: &str, limit: usize, min_score: f64) -> Result<Vec<EpisodicMatch>>;

    /// Remember how a session ended. Read-only stores ignore this.
    async fn record(&self, _session_id: &str, _summary: &str) -> Result<()> {
        Ok(())
    }
}

/// Episode store on the shared AgoraDb connection
pub struct SqliteEpisodes {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEpisodes {
    /// Create from shared AgoraDb connection
    pub fn new(db: &AgoraDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Record a session summary
    pub fn add(&self, session_id: &str, summary: &str) -> Result<i64> {
        let conn = lock(&self.conn)?;

        conn.execute(
            "INSERT INTO episodes (session_id, summary, created_at) VALUES (?1, ?2, ?3)",
            params![session_id, summary, Utc::now().to_rfc3339()],
        )
        .context("Failed to insert episode")?;

        Ok(conn.last_insert_rowid())
    }

    /// Best matches first, ties broken by recency
    pub fn search_sync(
        &self,
        query: &str,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<EpisodicMatch>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT session_id, summary
            FROM episodes
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt
            .query_map(params![SEARCH_WINDOW], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to load episodes")?;

        let mut matches: Vec<EpisodicMatch> = rows
            .into_iter()
            .filter_map(|(session_id, summary)| {
                let similarity = jaccard(&query_tokens, &tokenize(&summary));
                (similarity >= min_score).then_some(EpisodicMatch {
                    session_id,
                    summary,
                    similarity,
                })
            })
            .collect();

        // Stable sort keeps newest-first among equal scores
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(limit);
        Ok(matches)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM episodes", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait]
impl EpisodicRecall for SqliteEpisodes {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<EpisodicMatch>> {
        self.search_sync(query, limit, min_score)
    }

    async fn record(&self, session_id: &str, summary: &str) -> Result<()> {
        self.add(session_id, summary).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_episode_search_ranks_by_similarity() {
        let path = ".agora/test_episodes.db";
        let _ = fs::remove_file(path);

        let db = AgoraDb::open_at(path).unwrap();
        let episodes = SqliteEpisodes::new(&db);

        episodes
            .add("s-1", "implement user authentication with JWT tokens")
            .unwrap();
        episodes
            .add("s-2", "optimize the database indexes")
            .unwrap();
        episodes
            .add("s-3", "implement user authentication")
            .unwrap();
        assert_eq!(episodes.count().unwrap(), 3);

        let results = episodes
            .search_sync("implement user authentication", 10, 0.3)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].session_id, "s-3");
        assert_eq!(results[0].similarity, 1.0);
        assert_eq!(results[1].session_id, "s-1");

        drop(db);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_search_respects_limit_and_blank_query() {
        let db = AgoraDb::open_in_memory().unwrap();
        let episodes = SqliteEpisodes::new(&db);
        for i in 0..5 {
            episodes
                .add(&format!("s-{}", i), "cache invalidation strategy")
                .unwrap();
        }

        let results = episodes
            .search_sync("cache invalidation strategy", 3, 0.0)
            .unwrap();
        assert_eq!(results.len(), 3);
        // Equal scores come back newest first
        assert_eq!(results[0].session_id, "s-4");

        assert!(episodes.search_sync("?!", 3, 0.0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recall_trait() {
        let db = AgoraDb::open_in_memory().unwrap();
        let episodes = SqliteEpisodes::new(&db);
        episodes.add("s-1", "choose a message queue").unwrap();

        let recall: Arc<dyn EpisodicRecall> = Arc::new(episodes);
        let results = recall.search("message queue choice", 3, 0.9).await.unwrap();
        assert!(results.is_empty());
        let query = "choose a message queue";
        let results = recall.search(query, 3, 0.9).await.unwrap();
        assert_eq!(results.len(), 1);

        recall
            .record("s-2", "choose a message queue: kafka")
            .await
            .unwrap();
        let results = recall.search(query, 3, 0.5).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
