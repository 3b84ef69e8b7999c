/*
 * SPDX-FileCopyrightText: 2026 Quietfeed Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Interest tag for the requester themself.
pub const INTEREST_SELF: i64 = 2;
/// Interest tag for a followed account.
pub const INTEREST_FOLLOWED: i64 = 1;

#[derive(Clone)]
pub struct GraphStore {
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    pub uri: String,
    pub contributor: String,
    pub post_uri: String,
    pub author: String,
    pub iso_time: String,
    pub votes: i64,
}

impl PostRow {
    /// An amplification surfaces someone else's content under the amplifier's identity.
    pub fn is_amplification(&self) -> bool {
        self.post_uri != self.uri
    }
}

impl GraphStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS user (
              uri TEXT PRIMARY KEY,
              interest INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS follow (
              follower TEXT NOT NULL,
              followed TEXT NOT NULL,
              UNIQUE(follower, followed)
            );
            CREATE INDEX IF NOT EXISTS idx_follow_follower ON follow(follower);

            CREATE TABLE IF NOT EXISTS post (
              uri TEXT PRIMARY KEY,
              contributor TEXT NOT NULL,
              post_uri TEXT NOT NULL,
              author TEXT NOT NULL,
              iso_time TEXT NOT NULL,
              votes INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_post_iso ON post(iso_time DESC);
            CREATE INDEX IF NOT EXISTS idx_post_post_uri ON post(post_uri);
            CREATE INDEX IF NOT EXISTS idx_post_contributor ON post(contributor);
            "#,
        )?;
        Ok(Self { path })
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// Lazy user creation: keeps the first-seen interest, never downgrades on replay.
    pub fn insert_user_if_missing(&self, uri: &str, interest: i64) -> Result<()> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Ok(());
        }
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT OR IGNORE INTO user(uri, interest) VALUES (?1, ?2)",
            params![uri, interest],
        )?;
        Ok(())
    }

    pub fn is_known_user(&self, uri: &str) -> Result<bool> {
        let conn = Connection::open(&self.path)?;
        let v: Option<String> = conn
            .query_row("SELECT uri FROM user WHERE uri=?1", params![uri], |r| r.get(0))
            .optional()?;
        Ok(v.is_some())
    }

    pub fn user_interest(&self, uri: &str) -> Result<Option<i64>> {
        let conn = Connection::open(&self.path)?;
        conn.query_row("SELECT interest FROM user WHERE uri=?1", params![uri], |r| r.get(0))
            .optional()
            .map_err(Into::into)
    }

    pub fn add_follow(&self, follower: &str, followed: &str) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT OR IGNORE INTO follow(follower, followed) VALUES (?1, ?2)",
            params![follower, followed],
        )?;
        Ok(())
    }

    pub fn remove_follow(&self, follower: &str, followed: &str) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        let _ = conn.execute(
            "DELETE FROM follow WHERE follower=?1 AND followed=?2",
            params![follower, followed],
        )?;
        Ok(())
    }

    pub fn list_followed(&self, follower: &str) -> Result<Vec<String>> {
        let conn = Connection::open(&self.path)?;
        let mut stmt = conn.prepare("SELECT followed FROM follow WHERE follower=?1")?;
        let rows = stmt
            .query_map(params![follower], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Idempotent: a replayed create for the same uri is silently ignored.
    pub fn insert_post(&self, row: &PostRow) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT OR IGNORE INTO post(uri, contributor, post_uri, author, iso_time, votes) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![row.uri, row.contributor, row.post_uri, row.author, row.iso_time, row.votes],
        )?;
        Ok(())
    }

    /// Removes original posts (and any amplifications of them) by subject uri.
    pub fn delete_post_by_post_uri(&self, post_uri: &str) -> Result<u64> {
        let conn = Connection::open(&self.path)?;
        Ok(conn.execute("DELETE FROM post WHERE post_uri=?1", params![post_uri])? as u64)
    }

    /// Removes a single row (an amplification) by its own record uri.
    pub fn delete_post_by_uri(&self, uri: &str) -> Result<u64> {
        let conn = Connection::open(&self.path)?;
        Ok(conn.execute("DELETE FROM post WHERE uri=?1", params![uri])? as u64)
    }

    /// Moves the vote counter on every row whose subject matches `post_uri`.
    /// Clamped at zero: an unlike replayed past the floor stays at zero.
    /// A missing subject matches nothing, which is the intended no-op.
    pub fn bump_votes(&self, post_uri: &str, delta: i64) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "UPDATE post SET votes = MAX(0, votes + ?2) WHERE post_uri=?1",
            params![post_uri, delta],
        )?;
        Ok(())
    }

    pub fn get_post(&self, uri: &str) -> Result<Option<PostRow>> {
        let conn = Connection::open(&self.path)?;
        conn.query_row(
            "SELECT uri, contributor, post_uri, author, iso_time, votes FROM post WHERE uri=?1",
            params![uri],
            |r| {
                Ok(PostRow {
                    uri: r.get(0)?,
                    contributor: r.get(1)?,
                    post_uri: r.get(2)?,
                    author: r.get(3)?,
                    iso_time: r.get(4)?,
                    votes: r.get(5)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Network-wide baseline: total posts and distinct authors across the whole table.
    pub fn network_post_stats(&self) -> Result<(u64, u64)> {
        let conn = Connection::open(&self.path)?;
        let (posts, authors): (u64, u64) = conn.query_row(
            "SELECT COUNT(post_uri), COUNT(DISTINCT author) FROM post",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok((posts, authors))
    }

    /// Raw (contributor, votes) pairs for every post by an account the
    /// follower follows. Per-author aggregation happens in Rust so the
    /// geometric mean does not lean on SQLite math builtins.
    pub fn followed_post_votes(&self, follower: &str) -> Result<Vec<(String, i64)>> {
        let conn = Connection::open(&self.path)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT post.contributor, post.votes
            FROM follow
            INNER JOIN post ON follow.followed = post.contributor
            WHERE follow.follower=?1
            "#,
        )?;
        let rows = stmt
            .query_map(params![follower], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Candidate page: posts by followed contributors, strictly older than
    /// `before_iso`, newest first. RFC 3339 strings order lexicographically.
    pub fn list_candidate_posts(&self, follower: &str, before_iso: &str, limit: u32) -> Result<Vec<PostRow>> {
        let conn = Connection::open(&self.path)?;
        let limit = limit.max(1) as i64;
        let mut stmt = conn.prepare(
            r#"
            SELECT post.uri, post.contributor, post.post_uri, post.author, post.iso_time, post.votes
            FROM follow
            INNER JOIN post ON follow.followed = post.contributor
            WHERE follow.follower=?1 AND post.iso_time < ?2
            ORDER BY post.iso_time DESC
            LIMIT ?3
            "#,
        )?;
        let rows = stmt
            .query_map(params![follower, before_iso, limit], |r| {
                Ok(PostRow {
                    uri: r.get(0)?,
                    contributor: r.get(1)?,
                    post_uri: r.get(2)?,
                    author: r.get(3)?,
                    iso_time: r.get(4)?,
                    votes: r.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn prune_posts_before(&self, cutoff_iso: &str) -> Result<u64> {
        let conn = Connection::open(&self.path)?;
        Ok(conn.execute("DELETE FROM post WHERE iso_time < ?1", params![cutoff_iso])? as u64)
    }

    pub fn count_posts(&self) -> Result<u64> {
        let conn = Connection::open(&self.path)?;
        Ok(conn.query_row("SELECT COUNT(*) FROM post", [], |r| r.get(0))?)
    }
}
