//! Wire shapes of the GitHub REST responses we consume, and their
//! conversion into domain records. Fields GitHub may omit are defaulted.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::models::{Comment, File, Label, PullRequest, PullRequestStats, Review, User};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub login: String,
    #[serde(rename = "type", default)]
    pub account_type: String,
}

impl From<ApiUser> for User {
    fn from(user: ApiUser) -> Self {
        User::new(user.login, user.account_type)
    }
}

fn user_or_ghost(user: Option<ApiUser>) -> User {
    user.map(User::from).unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiLabel {
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// Pull request as returned by both the list and the single-PR endpoint.
/// The list endpoint omits the size counters, which then default to zero.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPullRequest {
    pub id: u64,
    pub number: u64,
    #[serde(default)]
    pub title: String,
    pub state: String,
    pub user: Option<ApiUser>,
    #[serde(default)]
    pub assignees: Vec<ApiUser>,
    #[serde(default)]
    pub requested_reviewers: Vec<ApiUser>,
    #[serde(default)]
    pub labels: Vec<ApiLabel>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub changed_files: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub review_comments: u64,
}

impl From<ApiPullRequest> for PullRequest {
    fn from(pr: ApiPullRequest) -> Self {
        PullRequest {
            id: pr.id,
            number: pr.number,
            title: pr.title,
            state: pr.state,
            author: user_or_ghost(pr.user),
            assignees: pr.assignees.into_iter().map(User::from).collect(),
            requested_reviewers: pr.requested_reviewers.into_iter().map(User::from).collect(),
            labels: pr
                .labels
                .into_iter()
                .map(|l| Label {
                    name: l.name,
                    color: l.color,
                })
                .collect(),
            created_at: pr.created_at,
            updated_at: pr.updated_at,
            merged_at: pr.merged_at,
            stats: PullRequestStats {
                additions: pr.additions,
                deletions: pr.deletions,
                changed_files: pr.changed_files,
                comments: pr.comments,
                review_comments: pr.review_comments,
                reviews: 0,
            },
            files: Vec::new(),
            reviews: Vec::new(),
            comments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiReview {
    pub id: u64,
    pub user: Option<ApiUser>,
    pub state: String,
    pub body: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl ApiReview {
    pub fn into_review(self, pull_number: u64) -> Review {
        Review {
            id: self.id,
            pull_number,
            reviewer: user_or_ghost(self.user),
            state: self.state,
            submitted_at: self.submitted_at,
            body: self.body.filter(|b| !b.is_empty()),
        }
    }
}

/// Reaction rollup attached to comments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiReactions {
    #[serde(rename = "+1", default)]
    pub plus_one: u64,
    #[serde(rename = "-1", default)]
    pub minus_one: u64,
    #[serde(default)]
    pub laugh: u64,
    #[serde(default)]
    pub confused: u64,
    #[serde(default)]
    pub heart: u64,
    #[serde(default)]
    pub hooray: u64,
    #[serde(default)]
    pub rocket: u64,
    #[serde(default)]
    pub eyes: u64,
}

impl ApiReactions {
    /// Non-zero counts keyed by reaction symbol, or `None` if all are zero.
    pub fn into_sparse(self) -> Option<BTreeMap<String, u64>> {
        let counts: BTreeMap<String, u64> = [
            ("+1", self.plus_one),
            ("-1", self.minus_one),
            ("laugh", self.laugh),
            ("confused", self.confused),
            ("heart", self.heart),
            ("hooray", self.hooray),
            ("rocket", self.rocket),
            ("eyes", self.eyes),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(kind, count)| (kind.to_string(), count))
        .collect();

        (!counts.is_empty()).then_some(counts)
    }
}

fn sparse_reactions(reactions: Option<ApiReactions>) -> Option<BTreeMap<String, u64>> {
    reactions.and_then(ApiReactions::into_sparse)
}

/// PR-level comment from the issues API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiIssueComment {
    pub id: u64,
    pub user: Option<ApiUser>,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reactions: Option<ApiReactions>,
}

impl ApiIssueComment {
    pub fn into_comment(self, pull_number: u64) -> Comment {
        Comment {
            id: self.id,
            pull_number,
            review_id: None,
            author: user_or_ghost(self.user),
            body: self.body.unwrap_or_default(),
            path: None,
            line: None,
            side: None,
            diff_hunk: None,
            in_reply_to_id: None,
            reactions: sparse_reactions(self.reactions),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Inline code comment from the pull request review comments API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiReviewComment {
    pub id: u64,
    pub pull_request_review_id: Option<u64>,
    pub user: Option<ApiUser>,
    #[serde(default)]
    pub body: Option<String>,
    pub path: String,
    pub line: Option<u64>,
    pub side: Option<String>,
    pub diff_hunk: Option<String>,
    pub in_reply_to_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reactions: Option<ApiReactions>,
}

impl ApiReviewComment {
    pub fn into_comment(self, pull_number: u64) -> Comment {
        Comment {
            id: self.id,
            pull_number,
            review_id: self.pull_request_review_id,
            author: user_or_ghost(self.user),
            body: self.body.unwrap_or_default(),
            path: Some(self.path),
            line: self.line,
            side: self.side.filter(|s| !s.is_empty()),
            diff_hunk: self.diff_hunk.filter(|h| !h.is_empty()),
            in_reply_to_id: self.in_reply_to_id,
            reactions: sparse_reactions(self.reactions),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiFile {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    pub patch: Option<String>,
}

impl ApiFile {
    pub fn into_file(self, pull_number: u64) -> File {
        File {
            pull_number,
            filename: self.filename,
            status: self.status,
            additions: self.additions,
            deletions: self.deletions,
            patch: self.patch,
        }
    }
}
