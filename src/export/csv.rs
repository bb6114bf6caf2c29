use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use super::{create_file, ExportError, Exporter};
use crate::models::{Comment, File, Label, PullRequest, Review, User};

const MAX_TEXT_LEN: usize = 200;
const LIST_SEPARATOR: &str = ";";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const HEADER: &[&str] = &[
    "number",
    "title",
    "state",
    "author",
    "author_type",
    "author_is_bot",
    "assignees",
    "requested_reviewers",
    "labels",
    "created_at",
    "updated_at",
    "merged_at",
    "additions",
    "deletions",
    "changed_files",
    "comments",
    "review_comments",
    "reviews",
    "review_states",
    "comment_authors",
    "file_paths",
];

/// One header row, then one flat row per PR. Multi-valued cells are joined
/// with `;`.
pub struct CsvExporter {
    path: PathBuf,
    include_diffs: bool,
}

impl CsvExporter {
    pub fn new(path: PathBuf, include_diffs: bool) -> Self {
        Self {
            path,
            include_diffs,
        }
    }

    fn header(&self) -> Vec<&'static str> {
        let mut header = HEADER.to_vec();
        if self.include_diffs {
            header.push("diff_summary");
        }
        header
    }

    fn row(&self, pr: &PullRequest) -> Vec<String> {
        let mut row = vec![
            pr.number.to_string(),
            sanitize_text(&pr.title),
            pr.state.clone(),
            pr.author.login.clone(),
            pr.author.account_type.clone(),
            pr.author.is_bot.to_string(),
            join_logins(&pr.assignees),
            join_logins(&pr.requested_reviewers),
            join_labels(&pr.labels),
            format_time(pr.created_at),
            format_time(pr.updated_at),
            pr.merged_at.map(format_time).unwrap_or_default(),
            pr.stats.additions.to_string(),
            pr.stats.deletions.to_string(),
            pr.stats.changed_files.to_string(),
            pr.stats.comments.to_string(),
            pr.stats.review_comments.to_string(),
            pr.stats.reviews.to_string(),
            review_states(&pr.reviews),
            comment_authors(&pr.comments),
            file_paths(&pr.files),
        ];
        if self.include_diffs {
            row.push(diff_summary(&pr.files));
        }
        row
    }
}

impl Exporter for CsvExporter {
    #[instrument(skip(self, prs), fields(path = %self.path.display(), prs = prs.len()))]
    fn export(&self, prs: &[PullRequest]) -> Result<(), ExportError> {
        let mut writer = ::csv::Writer::from_writer(create_file(&self.path)?);
        writer.write_record(self.header())?;
        for pr in prs {
            writer.write_record(self.row(pr))?;
        }
        writer.flush().map_err(ExportError::Flush)?;
        debug!("csv export written");
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Flatten whitespace control characters and cap the length, appending
/// "..." when truncated.
pub fn sanitize_text(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if matches!(c, '\n' | '\t' | '\r') { ' ' } else { c })
        .collect();

    if cleaned.chars().count() > MAX_TEXT_LEN {
        let mut truncated: String = cleaned.chars().take(MAX_TEXT_LEN).collect();
        truncated.push_str("...");
        truncated
    } else {
        cleaned
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn join_logins(users: &[User]) -> String {
    users
        .iter()
        .map(|u| u.login.as_str())
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

fn join_labels(labels: &[Label]) -> String {
    labels
        .iter()
        .map(|l| l.name.as_str())
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

/// `STATE:count` pairs ordered by state name.
fn review_states(reviews: &[Review]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for review in reviews {
        *counts.entry(review.state.as_str()).or_default() += 1;
    }
    counts
        .iter()
        .map(|(state, count)| format!("{state}:{count}"))
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

/// Distinct comment author logins in first-seen order.
fn comment_authors(comments: &[Comment]) -> String {
    let mut seen = HashSet::new();
    comments
        .iter()
        .map(|c| c.author.login.as_str())
        .filter(|login| seen.insert(*login))
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

fn file_paths(files: &[File]) -> String {
    files
        .iter()
        .map(|f| f.filename.as_str())
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

/// `filename:<N>_lines` for each file with patch text.
fn diff_summary(files: &[File]) -> String {
    files
        .iter()
        .filter_map(|f| {
            let patch = f.patch.as_deref().filter(|p| !p.is_empty())?;
            Some(format!("{}:{}_lines", f.filename, patch.split('\n').count()))
        })
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}
