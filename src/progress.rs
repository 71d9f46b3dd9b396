use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const FRAMES: [char; 4] = ['-', '/', '|', '\\'];

/// Cosmetic activity indicator on stdout.
///
/// Runs as its own task and shares nothing with the sweep except the
/// done flag. Log output goes to stderr, so the two never share a stream.
pub struct Spinner {
    done: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Spinner {
    pub fn start(interval: Duration) -> Self {
        Self::start_with(interval, std::io::stdout())
    }

    /// Starts a spinner only when `enabled` and stdout is a terminal.
    pub fn on_terminal(enabled: bool, interval: Duration) -> Option<Self> {
        (enabled && std::io::stdout().is_terminal()).then(|| Self::start(interval))
    }

    pub fn start_with<W: Write + Send + 'static>(interval: Duration, mut out: W) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let task = tokio::spawn(async move {
            let mut frames = FRAMES.iter().cycle();
            while !flag.load(Ordering::Relaxed) {
                if let Some(frame) = frames.next() {
                    // Output errors are not worth stopping a sweep for.
                    let _ = write!(out, "{}\u{8}", frame);
                    let _ = out.flush();
                }
                tokio::time::sleep(interval).await;
            }
            let _ = write!(out, " \u{8}");
            let _ = out.flush();
        });
        Self { done, task }
    }

    pub async fn stop(self) {
        self.done.store(true, Ordering::Relaxed);
        let _ = self.task.await;
    }
}
