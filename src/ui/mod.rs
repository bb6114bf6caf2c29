pub mod filename;
pub mod progress;

pub use filename::{describe_cache_age, format_file_size, generate_filename, FilenameOptions};
pub use progress::{ProgressDisplay, ProgressSink, SilentProgress};
