use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use super::types::{ExportComment, ExportFile, ExportPullRequest};
use super::{create_file, ExportError, Exporter};
use crate::models::{CodeContext, Comment, PullRequest};

/// One JSON object per line, one line per PR.
pub struct JsonlExporter {
    path: PathBuf,
    include_diffs: bool,
}

impl JsonlExporter {
    pub fn new(path: PathBuf, include_diffs: bool) -> Self {
        Self {
            path,
            include_diffs,
        }
    }

    fn transform_pr<'a>(&self, pr: &'a PullRequest) -> ExportPullRequest<'a> {
        ExportPullRequest {
            kind: "pull",
            number: pr.number,
            title: &pr.title,
            state: &pr.state,
            author: &pr.author,
            assignees: &pr.assignees,
            requested_reviewers: &pr.requested_reviewers,
            labels: &pr.labels,
            created_at: pr.created_at,
            updated_at: pr.updated_at,
            merged_at: pr.merged_at,
            stats: pr.stats,
            files: pr
                .files
                .iter()
                .map(|f| ExportFile::new(f, self.include_diffs))
                .collect(),
            reviews: &pr.reviews,
            comments: pr.comments.iter().map(|c| self.transform_comment(c)).collect(),
        }
    }

    fn transform_comment<'a>(&self, comment: &'a Comment) -> ExportComment<'a> {
        let is_code = comment.is_code_comment();
        let code_context = comment
            .diff_hunk
            .as_deref()
            .filter(|hunk| is_code && self.include_diffs && !hunk.is_empty())
            .map(CodeContext::from_diff_hunk);

        ExportComment {
            kind: if is_code { "code_comment" } else { "issue_comment" },
            pr_number: comment.pull_number,
            comment_id: comment.id,
            author: &comment.author,
            body: &comment.body,
            file_path: comment.path.as_deref().filter(|_| is_code),
            line: comment.line.filter(|_| is_code),
            side: comment.side.as_deref().filter(|_| is_code),
            code_context,
            in_reply_to_id: comment.in_reply_to_id,
            reactions: comment.reactions.as_ref(),
            created_at: comment.created_at,
            updated_at: (comment.updated_at != comment.created_at).then_some(comment.updated_at),
        }
    }
}

impl Exporter for JsonlExporter {
    #[instrument(skip(self, prs), fields(path = %self.path.display(), prs = prs.len()))]
    fn export(&self, prs: &[PullRequest]) -> Result<(), ExportError> {
        let mut writer = BufWriter::new(create_file(&self.path)?);

        for pr in prs {
            let record = self.transform_pr(pr);
            serde_json::to_writer(&mut writer, &record).map_err(|source| {
                ExportError::Serialize {
                    number: pr.number,
                    source,
                }
            })?;
            writer
                .write_all(b"\n")
                .map_err(|source| ExportError::Write {
                    number: pr.number,
                    source,
                })?;
        }

        writer.flush().map_err(ExportError::Flush)?;
        debug!("jsonl export written");
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn export_lines(prs: &[PullRequest], include_diffs: bool) -> Vec<Value> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let exporter = JsonlExporter::new(path.clone(), include_diffs);
        exporter.export(prs).unwrap();
        std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_one_line_per_pr_with_type_tag() {
        let prs = vec![
            pull_request(2, "2024-01-03T00:00:00Z"),
            pull_request(1, "2024-01-02T00:00:00Z"),
        ];
        let lines = export_lines(&prs, false);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "pull");
        assert_eq!(lines[0]["number"], 2);
        assert_eq!(lines[1]["number"], 1);
        assert_eq!(lines[0]["author"]["login"], "alice");
        assert!(lines[0]["stats"].is_object());
        assert!(lines[0].get("merged_at").is_none());
        assert!(lines[0].get("comments").is_none());
    }

    #[test]
    fn test_issue_comment_omits_code_fields() {
        let mut pr = pull_request(1, "2024-01-02T00:00:00Z");
        pr.comments.push(issue_comment(10, 1, "bob"));
        let lines = export_lines(&[pr], true);

        let comment = &lines[0]["comments"][0];
        assert_eq!(comment["type"], "issue_comment");
        assert_eq!(comment["comment_id"], 10);
        assert_eq!(comment["pr_number"], 1);
        for field in ["file_path", "line", "side", "code_context", "updated_at"] {
            assert!(comment.get(field).is_none(), "{field} should be absent");
        }
    }

    #[test]
    fn test_code_comment_context_depends_on_include_diffs() {
        let mut pr = pull_request(1, "2024-01-02T00:00:00Z");
        pr.comments.push(code_comment(11, 1, "carol"));

        let without = export_lines(std::slice::from_ref(&pr), false);
        let comment = &without[0]["comments"][0];
        assert_eq!(comment["type"], "code_comment");
        assert_eq!(comment["file_path"], "src/lib.rs");
        assert_eq!(comment["line"], 3);
        assert_eq!(comment["side"], "RIGHT");
        assert!(comment.get("code_context").is_none());

        let with = export_lines(&[pr], true);
        let context = &with[0]["comments"][0]["code_context"];
        assert_eq!(context["diff_hunk"], "@@ -1,2 +1,3 @@\n a\n+b");
        assert_eq!(context["target_line"], "+b");
        assert_eq!(context["before_lines"][0], " a");
    }

    #[test]
    fn test_updated_at_only_when_edited() {
        let mut pr = pull_request(1, "2024-01-02T00:00:00Z");
        let mut edited = issue_comment(12, 1, "dave");
        edited.updated_at = at("2024-01-05T00:00:00Z");
        edited.reactions = Some(BTreeMap::from([("laugh".to_string(), 2)]));
        pr.comments.push(edited);

        let lines = export_lines(&[pr], false);
        let comment = &lines[0]["comments"][0];
        assert_eq!(comment["updated_at"], "2024-01-05T00:00:00Z");
        assert_eq!(comment["reactions"]["laugh"], 2);
    }

    #[test]
    fn test_file_patch_only_with_diffs() {
        let mut pr = pull_request(1, "2024-01-02T00:00:00Z");
        pr.files.push(file(1, "src/main.rs", Some("@@ -1 +1 @@\n-a\n+b")));
        pr.reviews.push(review(5, 1, "erin", "APPROVED"));

        let without = export_lines(std::slice::from_ref(&pr), false);
        let f = &without[0]["files"][0];
        assert_eq!(f["filename"], "src/main.rs");
        assert_eq!(f["status"], "modified");
        assert_eq!(f["additions"], 1);
        assert_eq!(f["deletions"], 1);
        assert!(f.get("patch").is_none());
        assert_eq!(without[0]["reviews"][0]["state"], "APPROVED");

        let with = export_lines(&[pr], true);
        assert_eq!(with[0]["files"][0]["patch"], "@@ -1 +1 @@\n-a\n+b");
    }

    #[test]
    fn test_empty_input_writes_empty_file() {
        let lines = export_lines(&[], false);
        assert!(lines.is_empty());
    }
}
