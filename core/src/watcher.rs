//! In-memory pub/sub over file changes. Tools report mutations through the
//! file-change middleware; anything interested (UI bridges, indexers)
//! subscribes with a path glob.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::RwLock;

use wildmatch::WildMatch;

use steward_protocol::FileChange;

pub type FileChangeListener = Arc<dyn Fn(&FileChange) + Send + Sync>;

struct Subscription {
    id: u64,
    pattern: WildMatch,
    listener: FileChangeListener,
}

struct WatcherState {
    next_id: u64,
    subscriptions: Vec<Subscription>,
    history: VecDeque<FileChange>,
}

pub struct FileWatcher {
    state: RwLock<WatcherState>,
    max_history: usize,
}

impl Default for FileWatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl FileWatcher {
    pub fn new(max_history: usize) -> Self {
        Self {
            state: RwLock::new(WatcherState {
                next_id: 1,
                subscriptions: Vec::new(),
                history: VecDeque::with_capacity(max_history.min(64)),
            }),
            max_history,
        }
    }

    /// Subscribe to changes whose path matches `glob`. Returns a handle for
    /// `unsubscribe`.
    pub fn subscribe(&self, glob: &str, listener: FileChangeListener) -> u64 {
        let Ok(mut state) = self.state.write() else {
            return 0;
        };
        let id = state.next_id;
        state.next_id += 1;
        state.subscriptions.push(Subscription {
            id,
            pattern: WildMatch::new(glob),
            listener,
        });
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        if let Ok(mut state) = self.state.write() {
            state.subscriptions.retain(|sub| sub.id != id);
        }
    }

    /// Record the change and fan it out. Matching listeners are collected
    /// under the lock but invoked outside it, so a slow subscriber cannot
    /// block new notifications.
    pub fn notify(&self, change: FileChange) {
        let listeners: Vec<FileChangeListener> = {
            let Ok(mut state) = self.state.write() else {
                return;
            };
            if state.history.len() == self.max_history {
                state.history.pop_front();
            }
            state.history.push_back(change.clone());

            let path = change.path.to_string_lossy();
            state
                .subscriptions
                .iter()
                .filter(|sub| sub.pattern.matches(&path))
                .map(|sub| Arc::clone(&sub.listener))
                .collect()
        };
        for listener in listeners {
            listener(&change);
        }
    }

    /// The most recent changes, oldest first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<FileChange> {
        match self.state.read() {
            Ok(state) => {
                let skip = state.history.len().saturating_sub(limit);
                state.history.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use std::path::PathBuf;
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use steward_protocol::FileChangeKind;

    fn change(path: &str) -> FileChange {
        FileChange {
            path: PathBuf::from(path),
            kind: FileChangeKind::Modified,
            old_path: None,
            size: 1,
            modified_at: Utc::now(),
            tool_name: "write_file".to_string(),
            call_id: "c1".to_string(),
        }
    }

    #[test]
    fn only_matching_globs_are_notified() {
        let watcher = FileWatcher::new(8);
        let hits: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        watcher.subscribe(
            "src/*.rs",
            Arc::new(move |c| {
                if let Ok(mut guard) = sink.lock() {
                    guard.push(c.path.clone());
                }
            }),
        );

        watcher.notify(change("src/main.rs"));
        watcher.notify(change("README.md"));

        let seen = hits.lock().expect("lock").clone();
        assert_eq!(seen, vec![PathBuf::from("src/main.rs")]);
    }

    #[test]
    fn history_is_bounded_and_drops_oldest() {
        let watcher = FileWatcher::new(3);
        for i in 0..5 {
            watcher.notify(change(&format!("f{i}.txt")));
        }
        let recent = watcher.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].path, PathBuf::from("f2.txt"));
        assert_eq!(recent[2].path, PathBuf::from("f4.txt"));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let watcher = FileWatcher::new(8);
        let hits: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&hits);
        let id = watcher.subscribe(
            "*",
            Arc::new(move |_| {
                if let Ok(mut guard) = sink.lock() {
                    *guard += 1;
                }
            }),
        );
        watcher.notify(change("a.txt"));
        watcher.unsubscribe(id);
        watcher.notify(change("b.txt"));
        assert_eq!(*hits.lock().expect("lock"), 1);
    }
}
