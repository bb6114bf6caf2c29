use async_trait::async_trait;
use colored::Colorize;
use std::io::Write;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const SPINNER_TICK: Duration = Duration::from_millis(100);

/// Terminal feedback for a run. Purely cosmetic: nothing in the fetch or
/// export path depends on what a sink does.
#[async_trait]
pub trait ProgressSink: Send {
    fn start_section(&mut self, title: &str);

    /// `found` PRs from the repo's last sync, with `status` describing
    /// freshness ("no cache" and "forced refresh" come with zero).
    fn show_cache_status(&mut self, found: u64, status: &str);

    fn start_fetching(&mut self);

    /// Begin an in-flight step; replaces any running one.
    async fn show_progress(&mut self, label: &str);

    /// Finish the in-flight step, reporting `count` items.
    async fn stop_progress(&mut self, count: usize);

    /// A step that already finished.
    fn show_step(&mut self, label: &str, count: usize);

    fn show_success(&mut self, count: usize, filename: &str, size: &str);

    async fn show_error(&mut self, message: &str);
}

fn step_line(label: &str, mark: String, count: usize) -> String {
    format!(
        "│  ├─ {} {} {}",
        format!("{label}................").bright_black(),
        mark,
        count.to_string().white().bold()
    )
}

struct Spinner {
    label: String,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Tree-style colored output on stdout with an animated spinner for the
/// in-flight step.
#[derive(Default)]
pub struct ProgressDisplay {
    spinner: Option<Spinner>,
}

impl ProgressDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    async fn halt_spinner(&mut self) -> Option<String> {
        let spinner = self.spinner.take()?;
        let _ = spinner.stop.send(());
        let _ = spinner.handle.await;
        Some(spinner.label)
    }
}

#[async_trait]
impl ProgressSink for ProgressDisplay {
    fn start_section(&mut self, title: &str) {
        println!("┌─ 🔍 {}", title.white().bold());
        println!("│");
    }

    fn show_cache_status(&mut self, found: u64, status: &str) {
        println!("├─ 📋 {}", "Checking cache...".bright_black());
        if found > 0 {
            println!(
                "│  {} Found {} cached {}",
                "✓".green(),
                format!("{found} PRs").white().bold(),
                format!("(last sync: {status})").bright_black()
            );
        } else {
            println!("│  {} {}", "○".bright_black(), status.bright_black());
        }
        println!("│");
    }

    fn start_fetching(&mut self) {
        println!("├─ 📡 {}", "Fetching from GitHub...".bright_black());
    }

    async fn show_progress(&mut self, label: &str) {
        if let Some(previous) = self.halt_spinner().await {
            println!("\r{}", step_line(&previous, "…".bright_black().to_string(), 0));
        }

        let (stop, mut stopped) = oneshot::channel();
        let task_label = label.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SPINNER_TICK);
            for frame in SPINNER_FRAMES.iter().cycle() {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        print!("\r{}", step_line(&task_label, frame.cyan().to_string(), 0));
                        let _ = std::io::stdout().flush();
                    }
                }
            }
        });

        self.spinner = Some(Spinner {
            label: label.to_string(),
            stop,
            handle,
        });
    }

    async fn stop_progress(&mut self, count: usize) {
        if let Some(label) = self.halt_spinner().await {
            println!("\r{}", step_line(&label, "✓".green().to_string(), count));
        }
    }

    fn show_step(&mut self, label: &str, count: usize) {
        println!("{}", step_line(label, "✓".green().to_string(), count));
    }

    fn show_success(&mut self, count: usize, filename: &str, size: &str) {
        println!("│");
        println!(
            "└─ ✅ Exported {} → {} {}",
            format!("{count} PRs").white().bold(),
            filename.cyan(),
            format!("({size})").bright_black()
        );
        println!();
        println!(
            "🎉 Analysis ready! Try: {}",
            format!("duckdb -c \"SELECT * FROM '{filename}'\"").bright_black()
        );
    }

    async fn show_error(&mut self, message: &str) {
        self.halt_spinner().await;
        println!("│");
        println!("└─ ❌ Error: {}", message.red());
    }
}

/// Sink that discards everything, for tests and non-interactive use.
#[derive(Debug, Default)]
pub struct SilentProgress;

#[async_trait]
impl ProgressSink for SilentProgress {
    fn start_section(&mut self, _title: &str) {}
    fn show_cache_status(&mut self, _found: u64, _status: &str) {}
    fn start_fetching(&mut self) {}
    async fn show_progress(&mut self, _label: &str) {}
    async fn stop_progress(&mut self, _count: usize) {}
    fn show_step(&mut self, _label: &str, _count: usize) {}
    fn show_success(&mut self, _count: usize, _filename: &str, _size: &str) {}
    async fn show_error(&mut self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spinner_stops_cleanly() {
        let mut display = ProgressDisplay::new();
        display.show_progress("Recent PRs").await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        display.show_progress("Reviews").await;
        display.stop_progress(3).await;
        assert!(display.spinner.is_none());
    }

    #[tokio::test]
    async fn test_error_halts_running_spinner() {
        let mut display = ProgressDisplay::new();
        display.show_progress("Files").await;
        display.show_error("boom").await;
        assert!(display.spinner.is_none());
    }

    #[tokio::test]
    async fn test_stop_without_spinner_is_noop() {
        let mut display = ProgressDisplay::new();
        display.stop_progress(0).await;
        assert!(display.spinner.is_none());
    }
}
