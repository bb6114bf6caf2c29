use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{CodeContext, File, Label, PullRequestStats, Review, User};

/// One JSONL line: a PR with its reviews, comments and files.
#[derive(Debug, Serialize)]
pub struct ExportPullRequest<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub number: u64,
    pub title: &'a str,
    pub state: &'a str,
    pub author: &'a User,
    #[serde(skip_serializing_if = "is_empty")]
    pub assignees: &'a [User],
    #[serde(skip_serializing_if = "is_empty")]
    pub requested_reviewers: &'a [User],
    #[serde(skip_serializing_if = "is_empty")]
    pub labels: &'a [Label],
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    pub stats: PullRequestStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ExportFile<'a>>,
    #[serde(skip_serializing_if = "is_empty")]
    pub reviews: &'a [Review],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<ExportComment<'a>>,
}

/// File entry; `patch` is only present when diffs are requested.
#[derive(Debug, Serialize)]
pub struct ExportFile<'a> {
    pub filename: &'a str,
    pub status: &'a str,
    pub additions: u64,
    pub deletions: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<&'a str>,
}

impl<'a> ExportFile<'a> {
    pub fn new(file: &'a File, include_patch: bool) -> Self {
        Self {
            filename: &file.filename,
            status: &file.status,
            additions: file.additions,
            deletions: file.deletions,
            patch: file.patch.as_deref().filter(|_| include_patch),
        }
    }
}

/// Comment entry tagged as `code_comment` or `issue_comment`.
#[derive(Debug, Serialize)]
pub struct ExportComment<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub pr_number: u64,
    pub comment_id: u64,
    pub author: &'a User,
    pub body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_context: Option<CodeContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reactions: Option<&'a BTreeMap<String, u64>>,
    pub created_at: DateTime<Utc>,
    /// Only present when the comment was edited after creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn is_empty<T>(items: &&[T]) -> bool {
    items.is_empty()
}
