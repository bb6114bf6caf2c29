use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::cache::{CacheError, Store};
use crate::config::{Config, ConfigError};
use crate::export::{new_exporter, ExportError, ExportFormat, ExportOptions};
use crate::github::{GitHubClient, GitHubError};
use crate::models::PullRequest;
use crate::ui::{describe_cache_age, format_file_size, generate_filename, FilenameOptions, ProgressSink};

const CONFIGURED_PATTERN: &str = "configured in .pr-export.toml";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("GitHub token not found: set GITHUB_TOKEN or [github] token in .pr-export.toml")]
    MissingToken,

    #[error("Failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// What to fetch for one repository and how to write it out.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub repo: String,
    pub format: ExportFormat,
    /// Keep only the N most recently updated PRs. Ignored with `all`.
    pub limit: Option<u64>,
    pub all: bool,
    pub include_diffs: bool,
    pub refetch: bool,
    pub since: Option<NaiveDate>,
    pub pr_number: Option<u64>,
    pub output: Option<PathBuf>,
    pub clear_cache: bool,
}

impl AnalyzeOptions {
    fn validate(&self) -> Result<(), ServiceError> {
        if self.limit == Some(0) {
            return Err(ServiceError::InvalidOptions(
                "--limit must be at least 1".to_string(),
            ));
        }
        if self.pr_number == Some(0) {
            return Err(ServiceError::InvalidOptions(
                "--pr must be a positive PR number".to_string(),
            ));
        }
        Ok(())
    }

    fn since_threshold(&self) -> Option<DateTime<Utc>> {
        self.since
            .map(|date| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeOutcome {
    pub exported: usize,
    pub path: PathBuf,
    pub size: u64,
}

/// Runs the fetch, reload and export pipeline against one cache database.
pub struct Service {
    config: Config,
    token: String,
    store: Store,
    progress: Box<dyn ProgressSink>,
}

impl Service {
    /// Validate the token, open the cache and load bot patterns, including
    /// any extra ones from the config file.
    pub fn new(config: Config, progress: Box<dyn ProgressSink>) -> Result<Self, ServiceError> {
        let token = config
            .github_token()
            .ok_or(ServiceError::MissingToken)?
            .to_string();

        let location = &config.cache.location;
        std::fs::create_dir_all(location).map_err(|source| ServiceError::CacheDir {
            path: location.clone(),
            source,
        })?;

        let mut store = Store::open(&config.cache_db())?;
        for pattern in &config.bots.extra_patterns {
            if store.add_bot_pattern(pattern, CONFIGURED_PATTERN)? {
                debug!(pattern = %pattern, "registered bot pattern");
            }
        }
        store.refresh_bot_patterns()?;

        Ok(Self {
            config,
            token,
            store,
            progress,
        })
    }

    /// Fetch, reload and export. Any failure is reported through the
    /// progress sink before being returned.
    pub async fn analyze(&mut self, options: &AnalyzeOptions) -> Result<AnalyzeOutcome, ServiceError> {
        match self.run(options).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.progress.show_error(&err.to_string()).await;
                Err(err)
            }
        }
    }

    #[instrument(skip(self, options), fields(repo = %options.repo))]
    async fn run(&mut self, options: &AnalyzeOptions) -> Result<AnalyzeOutcome, ServiceError> {
        options.validate()?;
        self.progress
            .start_section(&format!("Analyzing {}", options.repo));

        if options.clear_cache {
            self.store.clear(&options.repo)?;
        }

        let (found, status) = self.cache_status(options)?;
        self.progress.show_cache_status(found, &status);

        let fetch_since = options.since_threshold();
        debug!(since = ?fetch_since, pr = ?options.pr_number, "fetch scope");

        self.progress.start_fetching();
        self.progress.show_progress("Pull requests").await;
        let client = GitHubClient::new(&self.config, &self.token, &self.store, &options.repo)?;
        let summary = client
            .fetch_pull_requests(fetch_since, options.pr_number)
            .await?;
        self.progress.stop_progress(summary.pull_requests).await;
        self.progress.show_step("Reviews", summary.reviews);
        self.progress.show_step("Comments", summary.comments);
        self.progress.show_step("Files", summary.files);

        let prs = self.load_pull_requests(options)?;
        self.progress.show_step("Loaded from cache", prs.len());

        let path = options.output.clone().unwrap_or_else(|| {
            PathBuf::from(generate_filename(
                &options.repo,
                options.format,
                &FilenameOptions {
                    pr_number: options.pr_number,
                    limit: options.limit,
                    all: options.all,
                    since: options.since,
                },
            ))
        });

        let exporter = new_exporter(ExportOptions {
            format: options.format,
            path: path.clone(),
            include_diffs: options.include_diffs,
        });
        exporter.export(&prs)?;
        let size = exporter.file_size()?;

        info!(exported = prs.len(), path = %path.display(), size, "export complete");
        self.progress.show_success(
            prs.len(),
            &path.display().to_string(),
            &format_file_size(size),
        );

        Ok(AnalyzeOutcome {
            exported: prs.len(),
            path,
            size,
        })
    }

    /// PR count and freshness line for the repo's own sync row.
    fn cache_status(&self, options: &AnalyzeOptions) -> Result<(u64, String), ServiceError> {
        let stats = self.store.stats(&options.repo)?;
        debug!(
            prs = stats.total_prs,
            open = stats.open_prs,
            closed = stats.closed_prs,
            reviews = stats.total_reviews,
            comments = stats.total_comments,
            files = stats.total_files,
            last_pr = stats.last_pr_number,
            "cache contents"
        );

        if options.refetch {
            return Ok((0, "forced refresh".to_string()));
        }
        let Some(meta) = self.store.get_sync_metadata(&options.repo)? else {
            return Ok((0, "no cache".to_string()));
        };

        let age = describe_cache_age(Utc::now() - meta.last_sync_at);
        let status = if self.config.is_cache_stale(meta.last_sync_at) {
            format!("{age}, stale")
        } else {
            age
        };
        Ok((meta.total_prs, status))
    }

    /// Rebuild the PR graph from the cache, newest update first.
    fn load_pull_requests(&self, options: &AnalyzeOptions) -> Result<Vec<PullRequest>, ServiceError> {
        let mut prs = match options.pr_number {
            Some(number) => vec![self.store.get_pull_request(number)?],
            None => self.store.get_pull_requests(options.since_threshold())?,
        };

        if !options.all {
            if let Some(limit) = options.limit {
                prs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            }
        }

        for pr in &mut prs {
            pr.reviews = self.store.get_reviews(pr.number)?;
            pr.comments = self.store.get_comments(pr.number)?;
            pr.files = self.store.get_files(pr.number)?;
            pr.stats.reviews = pr.reviews.len() as u64;
        }

        Ok(prs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_support::pull_request;
    use crate::models::SyncMetadata;
    use crate::ui::SilentProgress;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_pr(number: u64, updated_at: &str) -> Value {
        json!({
            "id": 1000 + number,
            "number": number,
            "title": format!("PR {number}"),
            "state": "open",
            "user": { "login": "alice", "type": "User" },
            "assignees": [],
            "requested_reviewers": [],
            "labels": [],
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": updated_at,
            "merged_at": null
        })
    }

    fn test_config(server: &MockServer, dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.github.api_url = server.uri();
        config.github.token = Some("test-token".to_string());
        config.cache.location = dir.path().join("cache");
        config
    }

    async fn mount_pr_details(server: &MockServer, number: u64, filename: &str) {
        for endpoint in [
            format!("/repos/owner/repo/pulls/{number}/reviews"),
            format!("/repos/owner/repo/issues/{number}/comments"),
            format!("/repos/owner/repo/pulls/{number}/comments"),
        ] {
            Mock::given(method("GET"))
                .and(path(endpoint))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
                .mount(server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path(format!("/repos/owner/repo/pulls/{number}/files")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "filename": filename,
                "status": "modified",
                "additions": 2,
                "deletions": 1,
                "patch": "@@ -1 +1,2 @@\n-a\n+b\n+c"
            }])))
            .mount(server)
            .await;
    }

    async fn mount_listing(server: &MockServer, prs: Value, expected: u64) {
        Mock::given(method("GET"))
            .and(path("/repos/owner/repo/pulls"))
            .and(query_param("state", "all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(prs))
            .expect(expected)
            .mount(server)
            .await;
    }

    fn options(dir: &TempDir, format: ExportFormat) -> AnalyzeOptions {
        AnalyzeOptions {
            repo: "owner/repo".to_string(),
            format,
            limit: Some(100),
            output: Some(dir.path().join(format!("out.{format}"))),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache.location = dir.path().join("cache");
        let err = Service::new(config, Box::new(SilentProgress)).err().unwrap();
        assert!(matches!(err, ServiceError::MissingToken));
        assert!(!dir.path().join("cache").exists());
    }

    #[test]
    fn test_since_threshold_is_utc_midnight() {
        let options = AnalyzeOptions {
            since: NaiveDate::from_ymd_opt(2024, 1, 15),
            ..Default::default()
        };
        assert_eq!(
            options.since_threshold().unwrap().to_rfc3339(),
            "2024-01-15T00:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_zero_limit_is_invalid() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let mut service = Service::new(test_config(&server, &dir), Box::new(SilentProgress)).unwrap();

        let mut opts = options(&dir, ExportFormat::Csv);
        opts.limit = Some(0);
        let err = service.analyze(&opts).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOptions(_)));
    }

    #[tokio::test]
    async fn test_two_prs_exported_as_csv() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        mount_listing(
            &server,
            json!([
                api_pr(2, "2024-01-03T00:00:00Z"),
                api_pr(1, "2024-01-02T00:00:00Z")
            ]),
            1,
        )
        .await;
        mount_pr_details(&server, 1, "src/one.rs").await;
        mount_pr_details(&server, 2, "src/two.rs").await;

        let mut service = Service::new(test_config(&server, &dir), Box::new(SilentProgress)).unwrap();
        let opts = options(&dir, ExportFormat::Csv);
        let outcome = service.analyze(&opts).await.unwrap();

        assert_eq!(outcome.exported, 2);
        assert_eq!(outcome.size, std::fs::metadata(&outcome.path).unwrap().len());

        let mut reader = ::csv::Reader::from_path(&outcome.path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert!(!headers.iter().any(|h| h == "diff_summary"));
        let paths = headers.iter().position(|h| h == "file_paths").unwrap();
        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "2");
        assert_eq!(&rows[0][paths], "src/two.rs");
        assert_eq!(&rows[1][paths], "src/one.rs");
    }

    #[tokio::test]
    async fn test_plain_run_after_since_run_exports_every_pr() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        mount_listing(
            &server,
            json!([
                api_pr(3, "2024-02-20T00:00:00Z"),
                api_pr(2, "2024-01-10T00:00:00Z")
            ]),
            2,
        )
        .await;
        mount_pr_details(&server, 3, "src/three.rs").await;
        mount_pr_details(&server, 2, "src/two.rs").await;

        let mut service = Service::new(test_config(&server, &dir), Box::new(SilentProgress)).unwrap();
        let mut opts = options(&dir, ExportFormat::Jsonl);
        opts.since = NaiveDate::from_ymd_opt(2024, 2, 1);
        assert_eq!(service.analyze(&opts).await.unwrap().exported, 1);

        // The since run recorded a sync; a plain run still walks everything.
        opts.since = None;
        let outcome = service.analyze(&opts).await.unwrap();
        assert_eq!(outcome.exported, 2);
        assert_eq!(service.store.get_files(2).unwrap()[0].filename, "src/two.rs");
    }

    #[tokio::test]
    async fn test_cache_status_uses_the_repos_own_sync_row() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let service = Service::new(test_config(&server, &dir), Box::new(SilentProgress)).unwrap();

        service
            .store
            .save_pull_request(&pull_request(1, "2024-01-02T00:00:00Z"))
            .unwrap();
        let sync = |repo: &str, total_prs: u64| SyncMetadata {
            repo: repo.to_string(),
            last_sync_at: Utc::now() - chrono::Duration::hours(2),
            last_pr_number: 1,
            total_prs,
            open_prs: total_prs,
            closed_prs: 0,
        };
        service.store.save_sync_metadata(&sync("other/repo", 1)).unwrap();

        let opts = options(&dir, ExportFormat::Jsonl);
        assert_eq!(service.cache_status(&opts).unwrap(), (0, "no cache".to_string()));

        service.store.save_sync_metadata(&sync("owner/repo", 5)).unwrap();
        assert_eq!(service.cache_status(&opts).unwrap(), (5, "2 hours ago".to_string()));

        let refetch = AnalyzeOptions {
            refetch: true,
            ..opts
        };
        assert_eq!(
            service.cache_status(&refetch).unwrap(),
            (0, "forced refresh".to_string())
        );
    }

    #[tokio::test]
    async fn test_single_pr_reloads_only_that_pr() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        mount_listing(
            &server,
            json!([
                api_pr(2, "2024-01-03T00:00:00Z"),
                api_pr(1, "2024-01-02T00:00:00Z")
            ]),
            1,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/repo/pulls/1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(api_pr(1, "2024-01-02T00:00:00Z")),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_pr_details(&server, 1, "src/one.rs").await;
        mount_pr_details(&server, 2, "src/two.rs").await;

        let mut service = Service::new(test_config(&server, &dir), Box::new(SilentProgress)).unwrap();
        service
            .analyze(&options(&dir, ExportFormat::Jsonl))
            .await
            .unwrap();

        let mut opts = options(&dir, ExportFormat::Jsonl);
        opts.pr_number = Some(1);
        let outcome = service.analyze(&opts).await.unwrap();
        assert_eq!(outcome.exported, 1);

        let line = std::fs::read_to_string(&outcome.path).unwrap();
        let record: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(record["number"], 1);
        assert_eq!(record["files"][0]["filename"], "src/one.rs");
        assert_eq!(record["stats"]["reviews"], 0);
    }

    #[tokio::test]
    async fn test_limit_keeps_most_recent_unless_all() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        mount_listing(
            &server,
            json!([
                api_pr(3, "2024-01-04T00:00:00Z"),
                api_pr(2, "2024-01-03T00:00:00Z"),
                api_pr(1, "2024-01-02T00:00:00Z")
            ]),
            2,
        )
        .await;
        for number in 1..=3 {
            mount_pr_details(&server, number, "src/lib.rs").await;
        }

        let mut service = Service::new(test_config(&server, &dir), Box::new(SilentProgress)).unwrap();
        let mut opts = options(&dir, ExportFormat::Jsonl);
        opts.limit = Some(2);
        opts.refetch = true;
        assert_eq!(service.analyze(&opts).await.unwrap().exported, 2);

        opts.all = true;
        assert_eq!(service.analyze(&opts).await.unwrap().exported, 3);
    }

    #[tokio::test]
    async fn test_api_failure_surfaces_as_github_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        Mock::given(method("GET"))
            .and(path("/repos/owner/repo/pulls"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut service = Service::new(test_config(&server, &dir), Box::new(SilentProgress)).unwrap();
        let opts = options(&dir, ExportFormat::Csv);
        let err = service.analyze(&opts).await.unwrap_err();
        assert!(matches!(err, ServiceError::GitHub(GitHubError::Authentication)));
        assert!(!opts.output.unwrap().exists());
    }
}
