use rusqlite::{params, Connection};

/// Bot login substrings seeded into a fresh cache.
pub const DEFAULT_BOT_PATTERNS: &[(&str, &str)] = &[
    ("dependabot", "Dependency updates"),
    ("renovate", "Dependency updates"),
    ("snyk", "Security scanning"),
    ("codecov", "Code coverage"),
    ("github-actions", "GitHub Actions bot"),
    ("vercel", "Vercel deployment bot"),
    ("netlify", "Netlify deployment bot"),
];

/// Create tables and indexes if missing, then seed bot patterns.
///
/// Timestamps are stored as Unix milliseconds so range filters and ordering
/// are plain integer comparisons. `raw_json` holds the full record.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS pulls (
            id                  INTEGER NOT NULL,
            number              INTEGER PRIMARY KEY,
            title               TEXT NOT NULL,
            state               TEXT NOT NULL,
            author              TEXT NOT NULL,
            author_type         TEXT NOT NULL,
            author_is_bot       INTEGER NOT NULL,
            assignees           TEXT NOT NULL,
            requested_reviewers TEXT NOT NULL,
            labels              TEXT NOT NULL,
            created_at          INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL,
            merged_at           INTEGER,
            last_fetched_at     INTEGER NOT NULL,
            raw_json            TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pulls_updated_at ON pulls(updated_at);

        CREATE TABLE IF NOT EXISTS reviews (
            id              INTEGER PRIMARY KEY,
            pull_number     INTEGER NOT NULL,
            reviewer        TEXT NOT NULL,
            reviewer_type   TEXT NOT NULL,
            reviewer_is_bot INTEGER NOT NULL,
            state           TEXT NOT NULL,
            submitted_at    INTEGER,
            raw_json        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_reviews_pull_number ON reviews(pull_number);

        CREATE TABLE IF NOT EXISTS comments (
            id             INTEGER PRIMARY KEY,
            pull_number    INTEGER NOT NULL,
            review_id      INTEGER,
            author         TEXT NOT NULL,
            author_type    TEXT NOT NULL,
            author_is_bot  INTEGER NOT NULL,
            body           TEXT NOT NULL,
            path           TEXT,
            line           INTEGER,
            side           TEXT,
            diff_hunk      TEXT,
            reactions      TEXT,
            created_at     INTEGER NOT NULL,
            updated_at     INTEGER NOT NULL,
            in_reply_to_id INTEGER,
            raw_json       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_comments_pull_number ON comments(pull_number);

        CREATE TABLE IF NOT EXISTS files (
            pull_number INTEGER NOT NULL,
            filename    TEXT NOT NULL,
            status      TEXT NOT NULL,
            additions   INTEGER NOT NULL,
            deletions   INTEGER NOT NULL,
            patch       TEXT,
            raw_json    TEXT NOT NULL,
            PRIMARY KEY (pull_number, filename)
        );

        CREATE TABLE IF NOT EXISTS sync_metadata (
            repo           TEXT PRIMARY KEY,
            last_sync_at   INTEGER NOT NULL,
            last_pr_number INTEGER NOT NULL,
            total_prs      INTEGER NOT NULL,
            open_prs       INTEGER NOT NULL,
            closed_prs     INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bot_patterns (
            pattern     TEXT PRIMARY KEY,
            description TEXT NOT NULL
        );
        "#,
    )?;

    for (pattern, description) in DEFAULT_BOT_PATTERNS {
        conn.execute(
            "INSERT OR IGNORE INTO bot_patterns (pattern, description) VALUES (?1, ?2)",
            params![pattern, description],
        )?;
    }

    Ok(())
}
