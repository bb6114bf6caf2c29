use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A GitHub account as it appears on PRs, reviews and comments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    /// Account type reported by GitHub ("User", "Bot", "Organization")
    #[serde(rename = "type")]
    pub account_type: String,
    /// Derived when the record is written to the cache, never sent by GitHub
    #[serde(default)]
    pub is_bot: bool,
}

impl User {
    pub fn new(login: impl Into<String>, account_type: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            account_type: account_type.into(),
            is_bot: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub color: String,
}

/// Aggregate counters for a pull request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestStats {
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
    pub comments: u64,
    pub review_comments: u64,
    pub reviews: u64,
}

/// A pull request plus, once reloaded from the cache, its child records.
///
/// The PR number is unique per repository and is the join key for reviews,
/// comments and files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    pub number: u64,
    pub title: String,
    /// "open" or "closed"
    pub state: String,
    pub author: User,
    #[serde(default)]
    pub assignees: Vec<User>,
    #[serde(default)]
    pub requested_reviewers: Vec<User>,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    pub stats: PullRequestStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviews: Vec<Review>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
}

/// A formal review submitted on a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: u64,
    /// Restored from the indexed column on read
    #[serde(skip)]
    pub pull_number: u64,
    pub reviewer: User,
    pub state: String,
    /// Absent for pending reviews
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Either an issue-level PR comment or an inline code comment.
///
/// Code comments carry a file path (and usually line, side and diff hunk);
/// issue comments carry none of those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    #[serde(rename = "pr_number")]
    pub pull_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_id: Option<u64>,
    pub author: User,
    pub body: String,
    #[serde(rename = "file_path", default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_hunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to_id: Option<u64>,
    /// Sparse reaction counts; `None` when every count is zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<BTreeMap<String, u64>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    /// True for inline comments attached to a file in the diff.
    pub fn is_code_comment(&self) -> bool {
        self.path.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// A file touched by a pull request. Identity is (pull_number, filename).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Restored from the indexed column on read
    #[serde(skip)]
    pub pull_number: u64,
    pub filename: String,
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
    /// Unified diff text; GitHub omits it for binary or very large files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

/// Per-repository bookkeeping of the last successful full fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub repo: String,
    pub last_sync_at: DateTime<Utc>,
    pub last_pr_number: u64,
    pub total_prs: u64,
    pub open_prs: u64,
    pub closed_prs: u64,
}

/// Diff context attached to exported code comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeContext {
    pub diff_hunk: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before_lines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_line: Option<String>,
}

impl CodeContext {
    const BEFORE_LINES: usize = 3;

    /// Build context from a GitHub diff hunk. GitHub trims review-comment
    /// hunks so that the last line is the one being commented on.
    pub fn from_diff_hunk(diff_hunk: &str) -> Self {
        let body: Vec<&str> = diff_hunk
            .lines()
            .filter(|line| !line.starts_with("@@"))
            .collect();

        let (target_line, before_lines) = match body.split_last() {
            Some((last, rest)) => {
                let skip = rest.len().saturating_sub(Self::BEFORE_LINES);
                (
                    Some((*last).to_string()),
                    rest[skip..].iter().map(|l| (*l).to_string()).collect(),
                )
            }
            None => (None, Vec::new()),
        };

        Self {
            diff_hunk: diff_hunk.to_string(),
            before_lines,
            target_line,
        }
    }
}
