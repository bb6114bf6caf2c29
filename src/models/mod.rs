pub mod types;

pub use types::{
    CodeContext, Comment, File, Label, PullRequest, PullRequestStats, Review, SyncMetadata, User,
};
