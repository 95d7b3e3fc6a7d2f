//! Store directory walk
//!
//! Lists a store's directory tree against a prefix. The traversal keeps an
//! explicit worklist instead of recursing, and visits entries depth-first
//! in name order so the output is stable.
//!
//! An entry is considered only when it lies on the path toward, at, or
//! below the prefix. In directory mode a directory whose key already starts
//! with the prefix is reported as a directory and not descended into; any
//! other directory on the path is descended into. This yields exactly one
//! level of directories below the prefix.

use blobs_common::{ListBlobEntry, ListResponse};
use chrono::{DateTime, SecondsFormat, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

struct WalkEntry {
    path: PathBuf,
    key: String,
    is_dir: bool,
}

/// Whether `key` lies on the path toward, at, or below `prefix`
fn on_prefix_path(key: &str, prefix: &str) -> bool {
    if key.len() >= prefix.len() {
        key.starts_with(prefix)
    } else {
        prefix.starts_with(key)
    }
}

fn child_key(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Read a directory's children, sorted by name, as worklist entries
async fn read_children(dir: &Path, key: &str) -> io::Result<Vec<WalkEntry>> {
    let mut children = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        // Keys are UTF-8; anything else was not written by this server
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        children.push(WalkEntry {
            key: child_key(key, &name),
            is_dir: entry.file_type().await?.is_dir(),
            path: entry.path(),
        });
    }
    children.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(children)
}

fn blob_entry(key: String, metadata: &std::fs::Metadata) -> ListBlobEntry {
    let last_modified = metadata
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Millis, true));

    ListBlobEntry {
        // No versioning on disk: every listing mints a fresh ETag
        etag: format!("\"{}\"", uuid::Uuid::new_v4()),
        key,
        size: Some(metadata.len()),
        last_modified,
    }
}

/// Walk the tree rooted at `root` and build one list page
///
/// A missing root lists as empty.
pub async fn walk(root: &Path, prefix: &str, directories: bool) -> io::Result<ListResponse> {
    let mut page = ListResponse::default();
    let mut found_directories = Vec::new();

    let mut worklist = match read_children(root, "").await {
        Ok(children) => children,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(page),
        Err(e) => return Err(e),
    };
    worklist.reverse();

    while let Some(entry) = worklist.pop() {
        if !on_prefix_path(&entry.key, prefix) {
            continue;
        }

        if entry.is_dir {
            if directories && entry.key.starts_with(prefix) {
                found_directories.push(entry.key);
                continue;
            }
            let mut children = match read_children(&entry.path, &entry.key).await {
                Ok(children) => children,
                // Pruned by a concurrent delete
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            children.reverse();
            worklist.extend(children);
            continue;
        }

        if entry.key.starts_with(prefix) {
            match fs::metadata(&entry.path).await {
                Ok(metadata) => page.blobs.push(blob_entry(entry.key, &metadata)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }

    if directories {
        page.directories = Some(found_directories);
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tree(keys: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for key in keys {
            let path = dir.path().join(key);
            fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            fs::write(&path, key.as_bytes()).await.unwrap();
        }
        dir
    }

    fn keys(page: &ListResponse) -> Vec<&str> {
        page.blobs.iter().map(|b| b.key.as_str()).collect()
    }

    #[test]
    fn test_on_prefix_path() {
        assert!(on_prefix_path("a", "a/b"));
        assert!(on_prefix_path("a/b/c", "a/b"));
        assert!(on_prefix_path("anything", ""));
        assert!(!on_prefix_path("b", "a/b"));
        assert!(!on_prefix_path("ab", "a/"));
    }

    #[tokio::test]
    async fn test_walk_all_keys_in_order() {
        let dir = tree(&["d/e", "a/c", "a/b", "z"]).await;
        let page = walk(dir.path(), "", false).await.unwrap();

        assert_eq!(keys(&page), vec!["a/b", "a/c", "d/e", "z"]);
        assert_eq!(page.directories, None);
        assert!(page.next_cursor.is_none());
        assert_eq!(page.blobs[0].size, Some(3));
        assert!(page.blobs[0].last_modified.is_some());
    }

    #[tokio::test]
    async fn test_walk_prefix_filter() {
        let dir = tree(&[
            "coldplay/parachutes/shiver",
            "coldplay/parachutes/spies",
            "phoenix/united/too-young",
            "coldplayer",
        ])
        .await;

        let page = walk(dir.path(), "coldplay/", false).await.unwrap();
        assert_eq!(
            keys(&page),
            vec!["coldplay/parachutes/shiver", "coldplay/parachutes/spies"]
        );

        let page = walk(dir.path(), "coldplay", false).await.unwrap();
        assert_eq!(keys(&page).len(), 3);
    }

    #[tokio::test]
    async fn test_walk_directories() {
        let dir = tree(&["a/b", "a/c", "d/e"]).await;

        let root = walk(dir.path(), "", true).await.unwrap();
        assert!(root.blobs.is_empty());
        assert_eq!(root.directories, Some(vec!["a".to_string(), "d".to_string()]));

        let nested = walk(dir.path(), "a/", true).await.unwrap();
        assert_eq!(keys(&nested), vec!["a/b", "a/c"]);
        assert_eq!(nested.directories, Some(vec![]));
    }

    #[tokio::test]
    async fn test_walk_directories_one_level_below_prefix() {
        let dir = tree(&["music/rock/coldplay/shiver", "music/pop/x", "music/top"]).await;

        let page = walk(dir.path(), "music/", true).await.unwrap();
        assert_eq!(keys(&page), vec!["music/top"]);
        assert_eq!(
            page.directories,
            Some(vec!["music/pop".to_string(), "music/rock".to_string()])
        );

        let page = walk(dir.path(), "music/ro", true).await.unwrap();
        assert!(page.blobs.is_empty());
        assert_eq!(page.directories, Some(vec!["music/rock".to_string()]));
    }

    #[tokio::test]
    async fn test_walk_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let page = walk(&dir.path().join("nope"), "", true).await.unwrap();
        assert_eq!(page, ListResponse::default());
    }
}
