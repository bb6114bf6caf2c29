pub mod bots;
pub mod schema;

pub use bots::BotPatterns;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::models::{Comment, File, PullRequest, Review, SyncMetadata, User};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{resource} not found in cache")]
    NotFound { resource: String },

    #[error("Cache storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Malformed cached payload for {resource}: {source}")]
    Serialization {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to prepare cache location: {0}")]
    Filesystem(#[from] std::io::Error),
}

/// Row counts across the cache plus the repo's last sync time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_prs: u64,
    pub open_prs: u64,
    pub closed_prs: u64,
    pub total_reviews: u64,
    pub total_comments: u64,
    pub total_files: u64,
    pub last_pr_number: u64,
    pub last_sync: Option<DateTime<Utc>>,
}

/// SQLite-backed system of record for fetched PR data.
///
/// Each table keeps a handful of indexed columns for querying next to the
/// full record serialized as JSON. Reads always rebuild records from the
/// JSON; the indexed columns are only written, never read back into models.
pub struct Store {
    conn: Connection,
    bots: BotPatterns,
}

impl Store {
    /// Open (creating if needed) the cache database at `path`.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!(bot_patterns = store.bots.len(), "cache opened");
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        schema::migrate(&conn)?;
        let mut store = Self {
            conn,
            bots: BotPatterns::default(),
        };
        store.refresh_bot_patterns()?;
        Ok(store)
    }

    /// Reload the bot classifier from the bot_patterns table.
    pub fn refresh_bot_patterns(&mut self) -> Result<(), CacheError> {
        let mut stmt = self.conn.prepare("SELECT pattern FROM bot_patterns")?;
        let patterns = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        self.bots = BotPatterns::new(patterns);
        Ok(())
    }

    /// Register an extra bot pattern. Returns true when the pattern is new.
    /// Takes effect for writes after the next `refresh_bot_patterns`.
    pub fn add_bot_pattern(&self, pattern: &str, description: &str) -> Result<bool, CacheError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO bot_patterns (pattern, description) VALUES (?1, ?2)",
            params![pattern.trim().to_lowercase(), description],
        )?;
        Ok(inserted > 0)
    }

    pub fn is_bot(&self, login: &str) -> bool {
        self.bots.is_bot(login)
    }

    fn mark_bot(&self, user: &mut User) {
        user.is_bot = self.is_bot(&user.login);
    }

    #[instrument(skip(self, pr), fields(pr = pr.number))]
    pub fn save_pull_request(&self, pr: &PullRequest) -> Result<(), CacheError> {
        let mut record = pr.clone();
        record.files.clear();
        record.reviews.clear();
        record.comments.clear();
        self.mark_bot(&mut record.author);
        for user in record
            .assignees
            .iter_mut()
            .chain(record.requested_reviewers.iter_mut())
        {
            self.mark_bot(user);
        }

        let resource = format!("PR #{}", record.number);
        let raw_json = encode(&record, &resource)?;
        let assignees = encode(&logins(&record.assignees), &resource)?;
        let reviewers = encode(&logins(&record.requested_reviewers), &resource)?;
        let labels = encode(&record.labels, &resource)?;

        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO pulls
            (id, number, title, state, author, author_type, author_is_bot,
             assignees, requested_reviewers, labels,
             created_at, updated_at, merged_at, last_fetched_at, raw_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                record.id as i64,
                record.number as i64,
                record.title,
                record.state,
                record.author.login,
                record.author.account_type,
                record.author.is_bot,
                assignees,
                reviewers,
                labels,
                to_millis(record.created_at),
                to_millis(record.updated_at),
                record.merged_at.map(to_millis),
                to_millis(Utc::now()),
                raw_json,
            ],
        )?;
        debug!(author_is_bot = record.author.is_bot, "saved pull request");
        Ok(())
    }

    pub fn save_review(&self, review: &Review) -> Result<(), CacheError> {
        let mut record = review.clone();
        self.mark_bot(&mut record.reviewer);
        let raw_json = encode(&record, &format!("review {}", record.id))?;

        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO reviews
            (id, pull_number, reviewer, reviewer_type, reviewer_is_bot, state, submitted_at, raw_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.id as i64,
                record.pull_number as i64,
                record.reviewer.login,
                record.reviewer.account_type,
                record.reviewer.is_bot,
                record.state,
                record.submitted_at.map(to_millis),
                raw_json,
            ],
        )?;
        Ok(())
    }

    pub fn save_comment(&self, comment: &Comment) -> Result<(), CacheError> {
        let mut record = comment.clone();
        self.mark_bot(&mut record.author);
        let resource = format!("comment {}", record.id);
        let raw_json = encode(&record, &resource)?;
        let reactions = record
            .reactions
            .as_ref()
            .map(|r| encode(r, &resource))
            .transpose()?;

        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO comments
            (id, pull_number, review_id, author, author_type, author_is_bot, body,
             path, line, side, diff_hunk, reactions, created_at, updated_at,
             in_reply_to_id, raw_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                record.id as i64,
                record.pull_number as i64,
                record.review_id.map(|id| id as i64),
                record.author.login,
                record.author.account_type,
                record.author.is_bot,
                record.body,
                record.path,
                record.line.map(|l| l as i64),
                record.side,
                record.diff_hunk,
                reactions,
                to_millis(record.created_at),
                to_millis(record.updated_at),
                record.in_reply_to_id.map(|id| id as i64),
                raw_json,
            ],
        )?;
        Ok(())
    }

    pub fn save_file(&self, file: &File) -> Result<(), CacheError> {
        let raw_json = encode(
            file,
            &format!("file {} of PR #{}", file.filename, file.pull_number),
        )?;

        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO files
            (pull_number, filename, status, additions, deletions, patch, raw_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                file.pull_number as i64,
                file.filename,
                file.status,
                file.additions as i64,
                file.deletions as i64,
                file.patch,
                raw_json,
            ],
        )?;
        Ok(())
    }

    pub fn get_pull_request(&self, number: u64) -> Result<PullRequest, CacheError> {
        let resource = format!("PR #{number}");
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT raw_json FROM pulls WHERE number = ?1",
                params![number as i64],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => decode(&raw, &resource),
            None => Err(CacheError::NotFound { resource }),
        }
    }

    /// All cached PRs, most recently updated first. With `since`, only PRs
    /// updated at or after it.
    pub fn get_pull_requests(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PullRequest>, CacheError> {
        let mut stmt = self.conn.prepare(
            "SELECT number, raw_json FROM pulls WHERE ?1 IS NULL OR updated_at >= ?1 ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map(params![since.map(to_millis)], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(number, raw)| decode(raw, &format!("PR #{number}")))
            .collect()
    }

    pub fn get_reviews(&self, pr_number: u64) -> Result<Vec<Review>, CacheError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, raw_json FROM reviews WHERE pull_number = ?1 ORDER BY submitted_at, id",
        )?;
        let rows = stmt
            .query_map(params![pr_number as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(id, raw)| {
                let mut review: Review = decode(raw, &format!("review {id}"))?;
                review.pull_number = pr_number;
                Ok(review)
            })
            .collect()
    }

    /// Comments for a PR, oldest first.
    pub fn get_comments(&self, pr_number: u64) -> Result<Vec<Comment>, CacheError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, raw_json FROM comments WHERE pull_number = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![pr_number as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(id, raw)| decode(raw, &format!("comment {id}")))
            .collect()
    }

    pub fn get_files(&self, pr_number: u64) -> Result<Vec<File>, CacheError> {
        let mut stmt = self.conn.prepare(
            "SELECT filename, raw_json FROM files WHERE pull_number = ?1 ORDER BY filename",
        )?;
        let rows = stmt
            .query_map(params![pr_number as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(filename, raw)| {
                let mut file: File =
                    decode(raw, &format!("file {filename} of PR #{pr_number}"))?;
                file.pull_number = pr_number;
                Ok(file)
            })
            .collect()
    }

    /// Sync state for `repo`; `None` means the repo was never synced.
    pub fn get_sync_metadata(&self, repo: &str) -> Result<Option<SyncMetadata>, CacheError> {
        let meta = self
            .conn
            .query_row(
                r#"
                SELECT repo, last_sync_at, last_pr_number, total_prs, open_prs, closed_prs
                FROM sync_metadata WHERE repo = ?1
                "#,
                params![repo],
                |row| {
                    Ok(SyncMetadata {
                        repo: row.get(0)?,
                        last_sync_at: from_millis(row.get(1)?),
                        last_pr_number: row.get::<_, i64>(2)? as u64,
                        total_prs: row.get::<_, i64>(3)? as u64,
                        open_prs: row.get::<_, i64>(4)? as u64,
                        closed_prs: row.get::<_, i64>(5)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    pub fn save_sync_metadata(&self, meta: &SyncMetadata) -> Result<(), CacheError> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO sync_metadata
            (repo, last_sync_at, last_pr_number, total_prs, open_prs, closed_prs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                meta.repo,
                to_millis(meta.last_sync_at),
                meta.last_pr_number as i64,
                meta.total_prs as i64,
                meta.open_prs as i64,
                meta.closed_prs as i64,
            ],
        )?;
        Ok(())
    }

    pub fn stats(&self, repo: &str) -> Result<CacheStats, CacheError> {
        let count = |sql: &str| -> Result<u64, CacheError> {
            Ok(self.conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
        };

        Ok(CacheStats {
            total_prs: count("SELECT COUNT(*) FROM pulls")?,
            open_prs: count("SELECT COUNT(*) FROM pulls WHERE state = 'open'")?,
            closed_prs: count("SELECT COUNT(*) FROM pulls WHERE state = 'closed'")?,
            total_reviews: count("SELECT COUNT(*) FROM reviews")?,
            total_comments: count("SELECT COUNT(*) FROM comments")?,
            total_files: count("SELECT COUNT(*) FROM files")?,
            last_pr_number: count("SELECT COALESCE(MAX(number), 0) FROM pulls")?,
            last_sync: self.get_sync_metadata(repo)?.map(|m| m.last_sync_at),
        })
    }

    /// Delete every cached PR, review, comment and file, plus the sync row
    /// for `repo` (all sync rows when `repo` is empty).
    ///
    /// Entity tables carry no repo column, so rows from every repo go.
    #[instrument(skip(self))]
    pub fn clear(&mut self, repo: &str) -> Result<(), CacheError> {
        let tx = self.conn.transaction()?;
        for table in ["pulls", "reviews", "comments", "files"] {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        if repo.is_empty() {
            tx.execute("DELETE FROM sync_metadata", [])?;
        } else {
            tx.execute("DELETE FROM sync_metadata WHERE repo = ?1", params![repo])?;
        }
        tx.commit()?;
        info!("cache cleared");
        Ok(())
    }
}

fn logins(users: &[User]) -> Vec<&str> {
    users.iter().map(|u| u.login.as_str()).collect()
}

fn encode<T: serde::Serialize + ?Sized>(value: &T, resource: &str) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|source| CacheError::Serialization {
        resource: resource.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(raw: &str, resource: &str) -> Result<T, CacheError> {
    serde_json::from_str(raw).map_err(|source| CacheError::Serialization {
        resource: resource.to_string(),
        source,
    })
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
