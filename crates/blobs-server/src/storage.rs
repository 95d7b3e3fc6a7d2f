//! Filesystem storage
//!
//! Layout under the root directory:
//!
//! ```text
//! entries/{site}/{store}/{key segments...}    blob bytes
//! metadata/{site}/{store}/{key segments...}   JSON metadata record
//! {scratch}/                                  in-flight writes
//! ```
//!
//! The two trees are parallel so that metadata and existence checks never
//! open the data file.

use crate::error::{Result, ServerError};
use crate::walk;
use blobs_common::{BlobKey, BlobSource, ListResponse, Metadata};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tracing::{debug, warn};

const ENTRIES_DIR: &str = "entries";
const METADATA_DIR: &str = "metadata";

/// Attempts at moving a scratch file into place when a concurrent delete
/// prunes its directory in between
const COMMIT_ATTEMPTS: usize = 3;

#[cfg(windows)]
const SEPARATORS: [char; 2] = ['/', '\\'];
#[cfg(not(windows))]
const SEPARATORS: [char; 1] = ['/'];

/// Missing file, or a blob where a directory of the path was expected
fn is_absent(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Metadata record stored next to a blob
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredMetadata {
    #[serde(default)]
    pub metadata: Metadata,
    /// Expiry time in epoch milliseconds, as sent by the writer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl StoredMetadata {
    fn is_empty(&self) -> bool {
        self.metadata.is_empty() && self.expires_at.is_none()
    }
}

/// An open blob ready to be streamed
#[derive(Debug)]
pub struct StoredBlob {
    pub file: File,
    pub size: u64,
    pub metadata: StoredMetadata,
}

/// Address of a blob: site, store and key
#[derive(Clone, Debug)]
pub struct BlobPath<'a> {
    pub site: &'a str,
    pub store: &'a str,
    pub key: &'a BlobKey,
}

/// Check that a name is usable as a single path component
fn check_component(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(SEPARATORS) {
        return Err(ServerError::bad_request(format!("invalid {kind}: {name:?}")));
    }
    Ok(())
}

/// Filesystem-backed blob storage
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    scratch: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, scratch_dir: &str) -> Self {
        let root = root.into();
        let scratch = root.join(scratch_dir);
        Self { root, scratch }
    }

    /// Root directory of the storage
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_root(&self, tree: &str, site: &str, store: &str) -> Result<PathBuf> {
        check_component("site ID", site)?;
        check_component("store name", store)?;
        Ok(self.root.join(tree).join(site).join(store))
    }

    fn blob_file(&self, tree: &str, blob: &BlobPath<'_>) -> Result<PathBuf> {
        let mut path = self.store_root(tree, blob.site, blob.store)?;
        for segment in blob.key.segments() {
            check_component("key segment", segment)?;
            path.push(segment);
        }
        Ok(path)
    }

    /// Write a blob
    ///
    /// The body goes to a scratch file first and is renamed into place once
    /// fully received, so readers never see a partial blob. Metadata is
    /// written after the data is committed. Concurrent writers to one key
    /// are not serialized: the last rename wins.
    pub async fn put(
        &self,
        blob: &BlobPath<'_>,
        source: BlobSource,
        metadata: StoredMetadata,
    ) -> Result<u64> {
        let data_path = self.blob_file(ENTRIES_DIR, blob)?;
        let metadata_path = self.blob_file(METADATA_DIR, blob)?;

        fs::create_dir_all(&self.scratch).await?;
        let temp_path = self.scratch.join(uuid::Uuid::new_v4().to_string());

        let written = match write_temp(&temp_path, source).await {
            Ok(written) => written,
            Err(e) => {
                remove_best_effort(&temp_path).await;
                return Err(e.into());
            }
        };

        if let Err(e) = commit(&temp_path, &data_path).await {
            remove_best_effort(&temp_path).await;
            return Err(e.into());
        }
        debug!("committed {} bytes to {}", written, data_path.display());

        if metadata.is_empty() {
            remove_best_effort(&metadata_path).await;
        } else {
            if let Some(parent) = metadata_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let json = serde_json::to_vec(&metadata).map_err(blobs_common::Error::from)?;
            fs::write(&metadata_path, json).await?;
        }

        Ok(written)
    }

    /// Open a blob for reading; `None` when there is no blob at the key
    ///
    /// A key that only exists as a prefix of other keys is not a blob.
    pub async fn get(&self, blob: &BlobPath<'_>) -> Result<Option<StoredBlob>> {
        let data_path = self.blob_file(ENTRIES_DIR, blob)?;
        let Some(size) = file_size(&data_path).await? else {
            return Ok(None);
        };

        let file = match File::open(&data_path).await {
            Ok(file) => file,
            // Deleted between the stat and the open
            Err(e) if is_absent(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let metadata = self.read_metadata(blob).await?;

        Ok(Some(StoredBlob {
            file,
            size,
            metadata,
        }))
    }

    /// Read a blob's metadata without opening its data
    pub async fn head(&self, blob: &BlobPath<'_>) -> Result<Option<(u64, StoredMetadata)>> {
        let data_path = self.blob_file(ENTRIES_DIR, blob)?;
        let Some(size) = file_size(&data_path).await? else {
            return Ok(None);
        };
        Ok(Some((size, self.read_metadata(blob).await?)))
    }

    /// Delete a blob; returns whether it existed
    ///
    /// Metadata removal is best-effort. Directories left empty are pruned so
    /// that an empty store disappears.
    pub async fn delete(&self, blob: &BlobPath<'_>) -> Result<bool> {
        let data_path = self.blob_file(ENTRIES_DIR, blob)?;
        let metadata_path = self.blob_file(METADATA_DIR, blob)?;

        let existed = match fs::remove_file(&data_path).await {
            Ok(()) => true,
            Err(e) if is_absent(&e) => false,
            Err(e) => {
                // A directory at this path is a prefix, not a blob
                let is_dir = fs::metadata(&data_path).await.is_ok_and(|m| m.is_dir());
                if !is_dir {
                    return Err(e.into());
                }
                false
            }
        };
        remove_best_effort(&metadata_path).await;

        self.prune(ENTRIES_DIR, &data_path).await;
        self.prune(METADATA_DIR, &metadata_path).await;
        Ok(existed)
    }

    /// List a store in one page
    pub async fn list(
        &self,
        site: &str,
        store: &str,
        prefix: &str,
        directories: bool,
    ) -> Result<ListResponse> {
        let root = self.store_root(ENTRIES_DIR, site, store)?;
        Ok(walk::walk(&root, prefix, directories).await?)
    }

    async fn read_metadata(&self, blob: &BlobPath<'_>) -> Result<StoredMetadata> {
        let metadata_path = self.blob_file(METADATA_DIR, blob)?;
        match fs::read(&metadata_path).await {
            Ok(bytes) => {
                Ok(serde_json::from_slice(&bytes).map_err(blobs_common::Error::from)?)
            }
            Err(e) if is_absent(&e) => Ok(StoredMetadata::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove empty directories from `path`'s parent up to `{tree}/{site}`
    async fn prune(&self, tree: &str, path: &Path) {
        let stop = self.root.join(tree);
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == stop || dir.parent() == Some(stop.as_path()) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

async fn write_temp(path: &Path, source: BlobSource) -> io::Result<u64> {
    let mut file = File::create(path).await?;
    let written = source.write_to(&mut file).await?;
    file.sync_all().await?;
    Ok(written)
}

/// Move a fully written scratch file into place
///
/// A delete pruning the parent directories between their creation and the
/// rename sends the commit round again.
async fn commit(temp_path: &Path, data_path: &Path) -> io::Result<()> {
    let mut attempt = 1;
    loop {
        match place(temp_path, data_path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound && attempt < COMMIT_ATTEMPTS => {
                debug!("{} vanished during commit, retrying", data_path.display());
                attempt += 1;
            }
            // Scratch on another filesystem: copy, then drop the scratch file
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                fs::copy(temp_path, data_path).await?;
                return fs::remove_file(temp_path).await;
            }
            result => return result,
        }
    }
}

async fn place(temp_path: &Path, data_path: &Path) -> io::Result<()> {
    if let Some(parent) = data_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(temp_path, data_path).await
}

/// Size of a regular file; `None` when missing or not a file
async fn file_size(path: &Path) -> io::Result<Option<u64>> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
        Ok(_) => Ok(None),
        Err(e) if is_absent(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn remove_best_effort(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use futures::stream;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "tmp");
        (dir, storage)
    }

    fn key(key: &str) -> BlobKey {
        BlobKey::new(key).unwrap()
    }

    fn path(key: &BlobKey) -> BlobPath<'_> {
        BlobPath {
            site: "site",
            store: "store",
            key,
        }
    }

    async fn read(blob: StoredBlob) -> String {
        let mut text = String::new();
        let mut file = blob.file;
        file.read_to_string(&mut text).await.unwrap();
        text
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (dir, storage) = storage();
        let key = key("coldplay/parachutes/shiver");
        let metadata = StoredMetadata {
            metadata: json!({ "track": 1 }).as_object().cloned().unwrap(),
            expires_at: Some(42),
        };

        let written = storage
            .put(&path(&key), BlobSource::from("so I look in your direction"), metadata.clone())
            .await
            .unwrap();
        assert_eq!(written, 27);

        assert!(
            dir.path()
                .join("entries/site/store/coldplay/parachutes/shiver")
                .is_file()
        );
        assert!(
            dir.path()
                .join("metadata/site/store/coldplay/parachutes/shiver")
                .is_file()
        );

        let blob = storage.get(&path(&key)).await.unwrap().unwrap();
        assert_eq!(blob.size, 27);
        assert_eq!(blob.metadata, metadata);
        assert_eq!(read(blob).await, "so I look in your direction");

        let (size, head) = storage.head(&path(&key)).await.unwrap().unwrap();
        assert_eq!(size, 27);
        assert_eq!(head, metadata);
    }

    #[tokio::test]
    async fn test_prefix_is_not_a_blob() {
        let (_dir, storage) = storage();
        let child = key("parent/child");
        storage
            .put(&path(&child), BlobSource::from("v"), StoredMetadata::default())
            .await
            .unwrap();

        let parent = key("parent");
        assert!(storage.get(&path(&parent)).await.unwrap().is_none());
        assert!(storage.head(&path(&parent)).await.unwrap().is_none());
        assert!(!storage.delete(&path(&parent)).await.unwrap());
        assert!(storage.get(&path(&child)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_previous_value() {
        let (dir, storage) = storage();
        let key = key("k");
        storage
            .put(&path(&key), BlobSource::from("old"), StoredMetadata::default())
            .await
            .unwrap();

        let broken = BlobSource::from_stream(stream::iter(vec![
            Ok(Bytes::from_static(b"new")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]));
        assert!(
            storage
                .put(&path(&key), broken, StoredMetadata::default())
                .await
                .is_err()
        );

        let blob = storage.get(&path(&key)).await.unwrap().unwrap();
        assert_eq!(read(blob).await, "old");
        let scratch: Vec<_> = std::fs::read_dir(dir.path().join("tmp")).unwrap().collect();
        assert!(scratch.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_clears_metadata() {
        let (_dir, storage) = storage();
        let key = key("k");
        let metadata = StoredMetadata {
            metadata: json!({ "a": 1 }).as_object().cloned().unwrap(),
            expires_at: None,
        };
        storage
            .put(&path(&key), BlobSource::from("1"), metadata)
            .await
            .unwrap();
        storage
            .put(&path(&key), BlobSource::from("2"), StoredMetadata::default())
            .await
            .unwrap();

        let (_, head) = storage.head(&path(&key)).await.unwrap().unwrap();
        assert!(head.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_prunes() {
        let (dir, storage) = storage();
        let key = key("a/b/c");
        storage
            .put(&path(&key), BlobSource::from("v"), StoredMetadata::default())
            .await
            .unwrap();

        assert!(storage.delete(&path(&key)).await.unwrap());
        assert!(!storage.delete(&path(&key)).await.unwrap());
        assert!(storage.get(&path(&key)).await.unwrap().is_none());
        assert!(!dir.path().join("entries/site/store").exists());
        assert!(dir.path().join("entries/site").exists());

        let page = storage.list("site", "store", "", true).await.unwrap();
        assert!(page.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_paths() {
        let (_dir, storage) = storage();
        let dotted = key("a/../../escape");
        let err = storage
            .put(&path(&dotted), BlobSource::from("v"), StoredMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));

        let err = storage.list("site", "..", "", false).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_blob_as_parent_reads_as_absent() {
        let (_dir, storage) = storage();
        let parent = key("a");
        storage
            .put(&path(&parent), BlobSource::from("v"), StoredMetadata::default())
            .await
            .unwrap();

        let child = key("a/b");
        assert!(storage.get(&path(&child)).await.unwrap().is_none());
        assert!(storage.head(&path(&child)).await.unwrap().is_none());
        assert!(!storage.delete(&path(&child)).await.unwrap());
        assert!(storage.get(&path(&parent)).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_write_survives_concurrent_prune() {
        let (_dir, storage) = storage();
        let storage = Arc::new(storage);

        for i in 0..50 {
            let doomed = key(&format!("dir{i}/a"));
            let kept = key(&format!("dir{i}/b"));
            storage
                .put(&path(&doomed), BlobSource::from("a"), StoredMetadata::default())
                .await
                .unwrap();

            let deleter = {
                let storage = storage.clone();
                let doomed = doomed.clone();
                tokio::spawn(async move { storage.delete(&path(&doomed)).await })
            };
            let writer = {
                let storage = storage.clone();
                let kept = kept.clone();
                tokio::spawn(async move {
                    storage
                        .put(&path(&kept), BlobSource::from("b"), StoredMetadata::default())
                        .await
                })
            };

            assert!(deleter.await.unwrap().unwrap());
            assert_eq!(writer.await.unwrap().unwrap(), 1);
            let blob = storage.get(&path(&kept)).await.unwrap().unwrap();
            assert_eq!(read(blob).await, "b");
        }
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn test_backslash_is_a_plain_character() {
        let (dir, storage) = storage();
        let key = key("windows\\path");
        storage
            .put(&path(&key), BlobSource::from("v"), StoredMetadata::default())
            .await
            .unwrap();

        assert!(dir.path().join("entries/site/store/windows\\path").is_file());
        assert!(storage.get(&path(&key)).await.unwrap().is_some());
    }
}
