use walkdir::{WalkDir, DirEntry};
use std::path::{Path, PathBuf};
use crossbeam::channel::Sender;
use anyhow::Result;

/// Sends every visible regular file under `root` to `tx`.
/// Returns how many paths were queued; stops early once the receiver is gone.
pub fn scan_directory(root: &Path, tx: Sender<PathBuf>) -> Result<usize> {
    let walker = WalkDir::new(root).sort_by_file_name().into_iter();
    let mut queued = 0;

    for entry in walker.filter_entry(|e| e.depth() == 0 || !is_hidden(e)) {
        let entry = entry?;
        if entry.file_type().is_file() {
            if tx.send(entry.into_path()).is_err() {
                break;
            }
            queued += 1;
        }
    }
    Ok(queued)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name()
         .to_str()
         .map(|s| s.starts_with('.'))
         .unwrap_or(false)
}
