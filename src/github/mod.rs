pub mod types;

use chrono::{DateTime, Utc};
use http::{StatusCode, Uri};
use octocrab::{Octocrab, Page};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::cache::{CacheError, Store};
use crate::config::Config;
use crate::models::{Comment, PullRequest, SyncMetadata};
use types::{ApiFile, ApiIssueComment, ApiPullRequest, ApiReview, ApiReviewComment};

const DETAIL_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub authentication failed: please check your token")]
    Authentication,

    #[error("GitHub API rate limit exceeded or forbidden access")]
    RateLimitOrForbidden,

    #[error("Repository not found: {owner}/{repo}")]
    RepositoryNotFound { owner: String, repo: String },

    #[error("GitHub API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("GitHub API request failed: {0}")]
    Http(#[from] octocrab::Error),

    #[error("Invalid GitHub API URL {url}: {message}")]
    InvalidApiUrl { url: String, message: String },

    #[error("Invalid repository format: {0} (expected owner/repo)")]
    InvalidRepository(String),

    #[error("Saving {resource}: {source}")]
    Persist {
        resource: String,
        #[source]
        source: CacheError,
    },

    #[error("Fetching details for PR {number}: {source}")]
    Details {
        number: u64,
        #[source]
        source: Box<GitHubError>,
    },
}

/// Counts of records persisted by one fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub pull_requests: usize,
    pub reviews: usize,
    pub comments: usize,
    pub files: usize,
    /// True when the since-threshold ended the listing before the last page
    pub stopped_at_threshold: bool,
}

/// Walks the GitHub REST API for one repository and writes every record to
/// the cache as soon as it is received.
pub struct GitHubClient<'a> {
    octocrab: Octocrab,
    store: &'a Store,
    owner: String,
    repo: String,
    batch_size: u32,
}

impl<'a> GitHubClient<'a> {
    pub fn new(
        config: &Config,
        token: &str,
        store: &'a Store,
        repo_path: &str,
    ) -> Result<Self, GitHubError> {
        let (owner, repo) = parse_repo(repo_path)?;
        Ok(Self {
            octocrab: build_octocrab_client(token, &config.github.api_url)?,
            store,
            owner,
            repo,
            batch_size: config.fetch.batch_size.max(1),
        })
    }

    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Populate the cache from the API.
    ///
    /// With `pr_number` only that PR and its details are fetched. Otherwise
    /// PRs are listed newest-update first; the first PR updated before
    /// `since` ends the whole fetch. Sync metadata is written after any
    /// listing fetch that completes.
    #[instrument(skip(self), fields(owner = %self.owner, repo = %self.repo))]
    pub async fn fetch_pull_requests(
        &self,
        since: Option<DateTime<Utc>>,
        pr_number: Option<u64>,
    ) -> Result<FetchSummary, GitHubError> {
        if let Some(number) = pr_number {
            return self.fetch_single_pr(number).await;
        }

        let mut summary = FetchSummary::default();
        let params = vec![
            ("state", "all".to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
            ("per_page", self.batch_size.to_string()),
        ];
        let mut page: Option<Page<ApiPullRequest>> =
            Some(self.first_page(&self.repo_path("pulls"), &params).await?);
        let mut page_no = 0usize;

        'pages: while let Some(current) = page.take() {
            page_no += 1;
            debug!(page = page_no, items = current.items.len(), "received PR page");
            let next = current.next.clone();

            for api_pr in current.items {
                if since.is_some_and(|threshold| api_pr.updated_at < threshold) {
                    debug!(pr = api_pr.number, "reached since threshold, stopping");
                    summary.stopped_at_threshold = true;
                    break 'pages;
                }
                self.persist_pr(api_pr.into(), &mut summary).await?;
            }

            page = self.next_page(&next).await?;
        }

        self.record_sync()?;
        info!(
            pull_requests = summary.pull_requests,
            reviews = summary.reviews,
            comments = summary.comments,
            files = summary.files,
            "fetch complete"
        );
        Ok(summary)
    }

    async fn fetch_single_pr(&self, number: u64) -> Result<FetchSummary, GitHubError> {
        let api_pr = self
            .octocrab
            .get::<ApiPullRequest, _, _>(self.repo_path(&format!("pulls/{number}")), None::<&()>)
            .await
            .map_err(|error| self.map_octocrab_error(error))?;

        let mut summary = FetchSummary::default();
        self.persist_pr(api_pr.into(), &mut summary).await?;
        Ok(summary)
    }

    async fn persist_pr(
        &self,
        pr: PullRequest,
        summary: &mut FetchSummary,
    ) -> Result<(), GitHubError> {
        let number = pr.number;
        self.store
            .save_pull_request(&pr)
            .map_err(|source| GitHubError::Persist {
                resource: format!("PR {number}"),
                source,
            })?;
        summary.pull_requests += 1;

        self.fetch_pr_details(number, summary)
            .await
            .map_err(|source| GitHubError::Details {
                number,
                source: Box::new(source),
            })
    }

    async fn fetch_pr_details(
        &self,
        number: u64,
        summary: &mut FetchSummary,
    ) -> Result<(), GitHubError> {
        summary.reviews += self.fetch_reviews(number).await?;
        summary.comments += self.fetch_comments(number).await?;
        summary.files += self.fetch_files(number).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn fetch_reviews(&self, pr_number: u64) -> Result<usize, GitHubError> {
        let route = self.repo_path(&format!("pulls/{pr_number}/reviews"));
        self.walk_pages(&route, |api_review: ApiReview| {
            let review = api_review.into_review(pr_number);
            self.store
                .save_review(&review)
                .map_err(|source| GitHubError::Persist {
                    resource: format!("review {}", review.id),
                    source,
                })
        })
        .await
    }

    /// Issue-level comments and inline review comments, stored as one kind.
    #[instrument(skip(self))]
    pub async fn fetch_comments(&self, pr_number: u64) -> Result<usize, GitHubError> {
        let issue_route = self.repo_path(&format!("issues/{pr_number}/comments"));
        let issue = self
            .walk_pages(&issue_route, |api_comment: ApiIssueComment| {
                self.save_comment(api_comment.into_comment(pr_number))
            })
            .await?;

        let review_route = self.repo_path(&format!("pulls/{pr_number}/comments"));
        let review = self
            .walk_pages(&review_route, |api_comment: ApiReviewComment| {
                self.save_comment(api_comment.into_comment(pr_number))
            })
            .await?;

        Ok(issue + review)
    }

    fn save_comment(&self, comment: Comment) -> Result<(), GitHubError> {
        self.store
            .save_comment(&comment)
            .map_err(|source| GitHubError::Persist {
                resource: format!("comment {}", comment.id),
                source,
            })
    }

    #[instrument(skip(self))]
    pub async fn fetch_files(&self, pr_number: u64) -> Result<usize, GitHubError> {
        let route = self.repo_path(&format!("pulls/{pr_number}/files"));
        self.walk_pages(&route, |api_file: ApiFile| {
            let file = api_file.into_file(pr_number);
            self.store
                .save_file(&file)
                .map_err(|source| GitHubError::Persist {
                    resource: format!("file {}", file.filename),
                    source,
                })
        })
        .await
    }

    fn record_sync(&self) -> Result<(), GitHubError> {
        let repo = self.repository();
        let persist = |source| GitHubError::Persist {
            resource: format!("sync metadata for {repo}"),
            source,
        };
        let stats = self.store.stats(&repo).map_err(persist)?;
        self.store
            .save_sync_metadata(&SyncMetadata {
                repo: repo.clone(),
                last_sync_at: Utc::now(),
                last_pr_number: stats.last_pr_number,
                total_prs: stats.total_prs,
                open_prs: stats.open_prs,
                closed_prs: stats.closed_prs,
            })
            .map_err(persist)
    }

    fn repo_path(&self, rest: &str) -> String {
        format!("/repos/{}/{}/{}", self.owner, self.repo, rest)
    }

    /// Persist every item of a detail collection one page at a time.
    async fn walk_pages<T, F>(&self, route: &str, mut persist: F) -> Result<usize, GitHubError>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Result<(), GitHubError>,
    {
        let params = vec![("per_page", DETAIL_PAGE_SIZE.to_string())];
        let mut page: Option<Page<T>> = Some(self.first_page(route, &params).await?);
        let mut saved = 0;

        while let Some(current) = page.take() {
            let next = current.next.clone();
            for item in current.items {
                persist(item)?;
                saved += 1;
            }
            page = self.next_page(&next).await?;
        }

        Ok(saved)
    }

    async fn first_page<T, P>(&self, route: &str, params: &P) -> Result<Page<T>, GitHubError>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        self.octocrab
            .get::<Page<T>, _, _>(route, Some(params))
            .await
            .map_err(|error| self.map_octocrab_error(error))
    }

    /// Follow the page's `rel="next"` link, if GitHub sent one.
    async fn next_page<T: DeserializeOwned>(
        &self,
        next: &Option<Uri>,
    ) -> Result<Option<Page<T>>, GitHubError> {
        self.octocrab
            .get_page::<T>(next)
            .await
            .map_err(|error| self.map_octocrab_error(error))
    }

    fn map_octocrab_error(&self, error: octocrab::Error) -> GitHubError {
        let octocrab::Error::GitHub { source, .. } = &error else {
            return GitHubError::Http(error);
        };
        match source.status_code {
            StatusCode::UNAUTHORIZED => GitHubError::Authentication,
            StatusCode::FORBIDDEN => GitHubError::RateLimitOrForbidden,
            StatusCode::NOT_FOUND => GitHubError::RepositoryNotFound {
                owner: self.owner.clone(),
                repo: self.repo.clone(),
            },
            status => GitHubError::Api {
                status,
                message: source.message.clone(),
            },
        }
    }
}

/// Authenticated client rooted at `api_url`, which may be a GitHub
/// Enterprise base.
fn build_octocrab_client(token: &str, api_url: &str) -> Result<Octocrab, GitHubError> {
    let invalid = |message: String| GitHubError::InvalidApiUrl {
        url: api_url.to_string(),
        message,
    };
    let base_uri: Uri = api_url
        .trim_end_matches('/')
        .parse()
        .map_err(|error: http::uri::InvalidUri| invalid(error.to_string()))?;

    Ok(Octocrab::builder()
        .personal_token(token.to_string())
        .base_uri(base_uri)
        .map_err(|error| invalid(error.to_string()))?
        .build()?)
}

/// Split `owner/repo` into its two non-empty halves.
pub fn parse_repo(repo_path: &str) -> Result<(String, String), GitHubError> {
    match repo_path.split('/').collect::<Vec<_>>().as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(GitHubError::InvalidRepository(repo_path.to_string())),
    }
}
