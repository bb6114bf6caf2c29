use chrono::{Duration, NaiveDate};

use crate::export::ExportFormat;

/// Filters that shape the default output filename.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameOptions {
    pub pr_number: Option<u64>,
    pub limit: Option<u64>,
    pub all: bool,
    pub since: Option<NaiveDate>,
}

/// Default export filename for `repo`.
///
/// `owner/repo` becomes `owner-repo`; a PR number wins outright
/// (`owner-repo-pr-7.jsonl`), otherwise a recency limit and a since month
/// are appended in that order (`owner-repo-prs-recent-50-2024-01.csv`).
pub fn generate_filename(repo: &str, format: ExportFormat, options: &FilenameOptions) -> String {
    let clean_repo = repo.replace('/', "-");

    if let Some(number) = options.pr_number {
        return format!("{clean_repo}-pr-{number}.{format}");
    }

    let mut parts = vec![format!("{clean_repo}-prs")];
    if let Some(limit) = options.limit.filter(|l| *l > 0 && !options.all) {
        parts.push(format!("recent-{limit}"));
    }
    if let Some(since) = options.since {
        parts.push(since.format("%Y-%m").to_string());
    }

    format!("{}.{format}", parts.join("-"))
}

/// Human-readable byte count with binary (1024) steps.
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b < KB => format!("{b} B"),
        b if b < MB => format!("{:.1} KB", b as f64 / KB as f64),
        b if b < GB => format!("{:.1} MB", b as f64 / MB as f64),
        b => format!("{:.1} GB", b as f64 / GB as f64),
    }
}

/// "N minutes ago" under an hour, "N hours ago" under a day, else days.
pub fn describe_cache_age(elapsed: Duration) -> String {
    if elapsed < Duration::hours(1) {
        format!("{} minutes ago", elapsed.num_minutes().max(0))
    } else if elapsed < Duration::days(1) {
        format!("{} hours ago", elapsed.num_hours())
    } else {
        format!("{} days ago", elapsed.num_days())
    }
}
