//! Append-only vector index with exact squared-Euclidean search.
//!
//! Vectors are addressed by a dense id equal to their insertion position.
//! Ids are never reused: the persisted file carries the vector count, so a
//! reopened index continues the sequence where it stopped.
//!
//! # File format
//!
//! ```text
//! magic "ACVX" | version u32 | dim u32 | count u64 | count × dim f32   (all little-endian)
//! ```
//!
//! The first `add` writes the file through a temporary sibling, fsyncs it,
//! renames it into place and fsyncs the directory. Later adds write only the
//! new vectors after the recorded payload, fsync, then bump the header count
//! and fsync again. The count is the commit point: bytes past it are leftovers
//! of an interrupted append, ignored on open and overwritten by the next add.
//! Writers take an exclusive lock; concurrent searches share a read lock and
//! never observe a half-applied `add`.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"ACVX";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const COUNT_OFFSET: u64 = 12;

pub type VectorId = i64;

pub struct VectorIndex {
    path: PathBuf,
    dim: usize,
    vectors: RwLock<Vec<f32>>,
}

impl VectorIndex {
    /// Load the index at `path`, or start an empty one of dimension `dim`.
    ///
    /// Fails with [`Error::IndexDimensionMismatch`] if the persisted index was
    /// written with another dimension.
    pub async fn open(path: impl AsRef<Path>, dim: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if dim == 0 {
            return Err(Error::Config("vector index dimension must be > 0".into()));
        }

        let vectors = match tokio::fs::read(&path).await {
            Ok(bytes) => decode(&bytes, dim)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            dim,
            count = vectors.len() / dim,
            "opened vector index"
        );

        Ok(Self {
            path,
            dim,
            vectors: RwLock::new(vectors),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of vectors stored (the next id to be assigned).
    pub async fn len(&self) -> usize {
        self.vectors.read().await.len() / self.dim
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Append vectors and persist. Returns ids `[prior, prior + n)`.
    pub async fn add(&self, vectors: &[Vec<f32>]) -> Result<Vec<VectorId>> {
        for v in vectors {
            if v.len() != self.dim {
                return Err(Error::IndexDimensionMismatch {
                    expected: self.dim,
                    found: v.len(),
                });
            }
        }

        let mut guard = self.vectors.write().await;
        let prior = guard.len() / self.dim;
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        append(&self.path, self.dim, prior, vectors).await?;
        guard.reserve(vectors.len() * self.dim);
        for v in vectors {
            guard.extend_from_slice(v);
        }

        let ids: Vec<VectorId> = (prior..prior + vectors.len())
            .map(|i| i as VectorId)
            .collect();
        debug!(first = prior, added = vectors.len(), "appended vectors");
        Ok(ids)
    }

    /// Up to `k` nearest vectors by squared Euclidean distance, closest first.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(VectorId, f32)>> {
        if query.len() != self.dim {
            return Err(Error::IndexDimensionMismatch {
                expected: self.dim,
                found: query.len(),
            });
        }

        let guard = self.vectors.read().await;
        if guard.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(VectorId, f32)> = guard
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(i, v)| (i as VectorId, squared_l2(query, v)))
            .filter(|(_, d)| d.is_finite())
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into floats.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn decode(bytes: &[u8], dim: usize) -> Result<Vec<f32>> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(Error::IndexCorrupt("missing header".into()));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VERSION {
        return Err(Error::IndexCorrupt(format!("unsupported version {}", version)));
    }
    let stored_dim = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    if stored_dim != dim {
        return Err(Error::IndexDimensionMismatch {
            expected: dim,
            found: stored_dim,
        });
    }
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = u64::from_le_bytes(count_bytes);

    let expected = usize::try_from(count)
        .ok()
        .and_then(|c| c.checked_mul(dim))
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::IndexCorrupt(format!("vector count {} overflows", count)))?;

    let payload = &bytes[HEADER_LEN..];
    if payload.len() < expected {
        return Err(Error::IndexCorrupt(format!(
            "expected {} vectors of dim {}, found {} payload bytes",
            count,
            dim,
            payload.len()
        )));
    }
    if payload.len() > expected {
        warn!(
            extra_bytes = payload.len() - expected,
            "ignoring bytes past the recorded vector count"
        );
    }
    Ok(blob_to_vec(&payload[..expected]))
}

fn header(dim: usize, count: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&(dim as u32).to_le_bytes());
    bytes.extend_from_slice(&count.to_le_bytes());
    bytes
}

/// Persist `tail` after the first `prior` vectors already on disk.
async fn append(path: &Path, dim: usize, prior: usize, tail: &[Vec<f32>]) -> Result<()> {
    let count = (prior + tail.len()) as u64;
    let mut payload = Vec::with_capacity(tail.len() * dim * 4);
    for v in tail {
        payload.extend_from_slice(&vec_to_blob(v));
    }

    if prior == 0 {
        let mut bytes = header(dim, count);
        bytes.extend_from_slice(&payload);
        return write_new(path, &bytes).await;
    }

    let offset = (HEADER_LEN + prior * dim * 4) as u64;
    let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(&payload).await?;
    file.flush().await?;
    file.set_len(offset + payload.len() as u64).await?;
    file.sync_data().await?;

    file.seek(SeekFrom::Start(COUNT_OFFSET)).await?;
    file.write_all(&count.to_le_bytes()).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}

async fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("idx.tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    sync_parent(path).await
}

/// Make a rename durable by syncing the directory entry.
#[cfg(unix)]
async fn sync_parent(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tokio::fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn v(xs: &[f32]) -> Vec<f32> {
        xs.to_vec()
    }

    #[tokio::test]
    async fn fresh_index_assigns_sequential_ids() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path().join("v.idx"), 2).await.unwrap();

        let first = index
            .add(&[v(&[0.0, 0.0]), v(&[1.0, 0.0]), v(&[0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(first, vec![0, 1, 2]);

        let second = index.add(&[v(&[2.0, 2.0]), v(&[3.0, 3.0])]).await.unwrap();
        assert_eq!(second, vec![3, 4]);
        assert_eq!(index.len().await, 5);
    }

    #[tokio::test]
    async fn reopen_continues_id_sequence() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("v.idx");
        {
            let index = VectorIndex::open(&path, 3).await.unwrap();
            index
                .add(&[v(&[1.0, 2.0, 3.0]), v(&[4.0, 5.0, 6.0])])
                .await
                .unwrap();
        }

        let reopened = VectorIndex::open(&path, 3).await.unwrap();
        assert_eq!(reopened.len().await, 2);
        let ids = reopened.add(&[v(&[7.0, 8.0, 9.0])]).await.unwrap();
        assert_eq!(ids, vec![2]);

        let hits = reopened.search(&[4.0, 5.0, 6.0], 1).await.unwrap();
        assert_eq!(hits, vec![(1, 0.0)]);
    }

    #[tokio::test]
    async fn reopen_with_other_dimension_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.idx");
        VectorIndex::open(&path, 4)
            .await
            .unwrap()
            .add(&[v(&[1.0, 1.0, 1.0, 1.0])])
            .await
            .unwrap();

        let err = VectorIndex::open(&path, 8).await.err().unwrap();
        assert!(matches!(
            err,
            Error::IndexDimensionMismatch {
                expected: 8,
                found: 4
            }
        ));
    }

    #[tokio::test]
    async fn truncated_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.idx");
        VectorIndex::open(&path, 2)
            .await
            .unwrap()
            .add(&[v(&[1.0, 1.0])])
            .await
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let err = VectorIndex::open(&path, 2).await.err().unwrap();
        assert!(matches!(err, Error::IndexCorrupt(_)));
    }

    #[tokio::test]
    async fn overflowing_count_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.idx");
        let mut bytes = header(2, u64::MAX);
        bytes.extend_from_slice(&vec_to_blob(&[1.0, 1.0]));
        std::fs::write(&path, bytes).unwrap();

        let err = VectorIndex::open(&path, 2).await.err().unwrap();
        assert!(matches!(err, Error::IndexCorrupt(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn repeated_appends_reopen_intact() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.idx");
        let index = VectorIndex::open(&path, 2).await.unwrap();
        for i in 0..6 {
            let x = i as f32;
            index.add(&[v(&[x, 0.0]), v(&[0.0, x])]).await.unwrap();
        }

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, (HEADER_LEN + 12 * 2 * 4) as u64);

        let reopened = VectorIndex::open(&path, 2).await.unwrap();
        assert_eq!(reopened.len().await, 12);
        assert_eq!(reopened.search(&[5.0, 0.0], 1).await.unwrap(), vec![(10, 0.0)]);
        assert_eq!(reopened.search(&[0.0, 3.0], 1).await.unwrap(), vec![(7, 0.0)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn later_appends_write_in_place() {
        use std::os::unix::fs::MetadataExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.idx");
        let index = VectorIndex::open(&path, 2).await.unwrap();
        index.add(&[v(&[1.0, 1.0])]).await.unwrap();
        let inode = std::fs::metadata(&path).unwrap().ino();

        index.add(&[v(&[2.0, 2.0])]).await.unwrap();
        index.add(&[v(&[3.0, 3.0])]).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().ino(), inode);
        assert!(!path.with_extension("idx.tmp").exists());
    }

    #[tokio::test]
    async fn interrupted_append_tail_is_ignored_then_overwritten() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.idx");
        VectorIndex::open(&path, 2)
            .await
            .unwrap()
            .add(&[v(&[1.0, 1.0])])
            .await
            .unwrap();

        // Payload written but count never bumped.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&vec_to_blob(&[9.0, 9.0, 9.0]));
        std::fs::write(&path, &bytes).unwrap();

        let reopened = VectorIndex::open(&path, 2).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(reopened.add(&[v(&[2.0, 2.0])]).await.unwrap(), vec![1]);

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, (HEADER_LEN + 2 * 2 * 4) as u64);
        let again = VectorIndex::open(&path, 2).await.unwrap();
        assert_eq!(again.search(&[2.0, 2.0], 1).await.unwrap(), vec![(1, 0.0)]);
    }

    #[tokio::test]
    async fn empty_index_search_returns_nothing() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path().join("v.idx"), 2).await.unwrap();
        for k in [0, 1, 5, 100] {
            assert!(index.search(&[0.5, 0.5], k).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn exact_match_has_zero_distance() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path().join("v.idx"), 3).await.unwrap();
        index.add(&[v(&[0.25, -1.5, 3.0])]).await.unwrap();

        let hits = index.search(&[0.25, -1.5, 3.0], 5).await.unwrap();
        assert_eq!(hits, vec![(0, 0.0)]);
    }

    #[tokio::test]
    async fn search_orders_by_squared_distance() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path().join("v.idx"), 2).await.unwrap();
        index
            .add(&[v(&[10.0, 0.0]), v(&[1.0, 0.0]), v(&[3.0, 0.0])])
            .await
            .unwrap();

        let hits = index.search(&[0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits, vec![(1, 1.0), (2, 9.0)]);
    }

    #[tokio::test]
    async fn wrong_length_vectors_rejected() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path().join("v.idx"), 2).await.unwrap();
        assert!(matches!(
            index.add(&[v(&[1.0, 2.0, 3.0])]).await,
            Err(Error::IndexDimensionMismatch { .. })
        ));
        assert!(index.is_empty().await);
        assert!(index.search(&[1.0], 1).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_adds_never_share_ids() {
        let tmp = TempDir::new().unwrap();
        let index = Arc::new(VectorIndex::open(tmp.path().join("v.idx"), 2).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                let x = i as f32;
                index.add(&[vec![x, x], vec![x, -x]]).await.unwrap()
            }));
        }

        let mut all: Vec<VectorId> = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort();
        assert_eq!(all, (0..16).collect::<Vec<_>>());

        let reopened = VectorIndex::open(index.path(), 2).await.unwrap();
        assert_eq!(reopened.len().await, 16);
    }
}
