mod tail;

pub use tail::LogTail;

use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::WatcherError;

/// Result type for watcher operations
pub type WatcherResult<T> = Result<T, WatcherError>;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Line(String),
    Error(WatcherError),
}

/// Read a log once, including an unterminated last line.
pub fn read_all_lines(path: &Path) -> WatcherResult<Vec<String>> {
    let mut tail = LogTail::new(path);
    let mut lines = tail.read_new_lines()?;
    lines.extend(tail.flush_partial());
    Ok(lines)
}

/// Dedicated worker that owns the `LogTail`. Every tick means "check for new
/// content"; ticks come from the notify callback and the poll thread alike.
fn start_tail_worker(path: PathBuf, tx: mpsc::UnboundedSender<LogEvent>) -> std_mpsc::Sender<()> {
    let (tick_tx, tick_rx) = std_mpsc::channel::<()>();

    std::thread::spawn(move || {
        let mut tail = LogTail::new(&path);
        while tick_rx.recv().is_ok() {
            if tx.is_closed() {
                break;
            }
            if !path.exists() {
                continue;
            }
            let lines = match tail.read_new_lines() {
                Ok(lines) => lines,
                Err(e) => {
                    if tx.send(LogEvent::Error(e.into())).is_err() {
                        return;
                    }
                    continue;
                }
            };
            for line in lines {
                if tx.send(LogEvent::Line(line)).is_err() {
                    return;
                }
            }
        }
        debug!(path = %path.display(), "tail worker stopped");
    });

    tick_tx
}

/// Live follower of one log file. Lines arrive in file order.
///
/// Dropping the follower stops the watcher and, on their next wake-up, the
/// worker threads.
pub struct LogFollower {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<LogEvent>,
}

impl LogFollower {
    /// Start following `path`, beginning with its current contents.
    ///
    /// The parent directory is watched so a log created after startup is
    /// still picked up. A 200 ms poll backs up filesystems where inotify
    /// misses appends.
    ///
    /// # Imperative Shell
    /// Spawns the watcher, the poll thread and the tail worker.
    pub fn start(path: &Path) -> WatcherResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let tail_worker = start_tail_worker(path.to_path_buf(), tx);

        let file_name = path.file_name().map(|n| n.to_os_string());
        let tail_worker_watcher = tail_worker.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) if event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) => {
                    let _ = tail_worker_watcher.send(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "watch error"),
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;

        let watch_root = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&watch_root, RecursiveMode::NonRecursive)?;

        // Initial read of what is already there.
        let _ = tail_worker.send(());

        std::thread::spawn(move || loop {
            std::thread::sleep(POLL_INTERVAL);
            if tail_worker.send(()).is_err() {
                return;
            }
        });

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Next line or read error. `None` once the worker has stopped.
    pub async fn next(&mut self) -> Option<LogEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_all_lines_includes_unterminated_last_line() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "one\ntwo").unwrap();
        file.flush().unwrap();

        assert_eq!(read_all_lines(file.path()).unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn test_read_all_lines_missing_file() {
        let err = read_all_lines(Path::new("/nonexistent/log.jsonl")).unwrap_err();
        assert!(matches!(err, WatcherError::Io(_)));
    }
}
