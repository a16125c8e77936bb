//! Self-describing on-disk index snapshots
//!
//! Layout of a snapshot file:
//!
//! ```text
//! magic (8 bytes) | header_len (u32 LE) | header | body sha-256 (32 bytes) | body
//! ```
//!
//! The header records `(model_id, dimension, count)` so a snapshot is
//! rejected up front when the configured embedding model changed. The body
//! is the bincode-encoded entry list, integrity-checked against the stored
//! digest before any entry is trusted.
//!
//! Snapshots are written atomically (temp file in the same directory, then
//! rename into place) under `snapshot-{generation}.kvx`, with a `current`
//! pointer file naming the newest generation. Generations beyond the three
//! newest are pruned.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{SearchError, SearchResult};
use crate::index::IndexEntry;

/// Magic bytes identifying a KPATH vector snapshot, version 1.
const MAGIC: &[u8; 8] = b"KPVXSNP1";

/// File extension for snapshot files.
const EXT: &str = "kvx";

/// Generations retained on disk.
const KEEP_GENERATIONS: usize = 3;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    model_id: String,
    dimension: u32,
    count: u64,
}

/// A decoded, integrity-checked snapshot.
#[derive(Debug)]
pub struct Snapshot {
    /// Embedding model that produced the vectors
    pub model_id: String,
    /// Vector dimension
    pub dimension: usize,
    /// The persisted entries
    pub entries: Vec<IndexEntry>,
}

/// Manages the snapshot directory: atomic writes, generation discovery,
/// integrity-checked loads, pruning.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Create a store rooted at `dir` (created lazily on first write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The snapshot directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, generation: u64) -> PathBuf {
        self.dir.join(format!("snapshot-{generation}.{EXT}"))
    }

    /// Write a snapshot for `generation` atomically and repoint `current`.
    ///
    /// # Errors
    /// Returns `Io` on filesystem failures and `Serialization` when
    /// encoding fails; the previous snapshot remains intact either way.
    pub fn write(
        &self,
        generation: u64,
        model_id: &str,
        dimension: usize,
        entries: &[IndexEntry],
    ) -> SearchResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let header = bincode::serialize(&SnapshotHeader {
            model_id: model_id.to_owned(),
            dimension: u32::try_from(dimension)
                .map_err(|_| SearchError::Serialization("dimension exceeds u32".to_owned()))?,
            count: entries.len() as u64,
        })?;
        let body = bincode::serialize(entries)?;
        let digest = Sha256::digest(&body);

        let path = self.snapshot_path(generation);
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(MAGIC)?;
            file.write_all(
                &u32::try_from(header.len())
                    .map_err(|_| SearchError::Serialization("oversized header".to_owned()))?
                    .to_le_bytes(),
            )?;
            file.write_all(&header)?;
            file.write_all(&digest)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        self.write_current(generation)?;
        self.prune();

        tracing::info!(
            generation,
            entries = entries.len(),
            path = %path.display(),
            "vector snapshot written"
        );
        Ok(path)
    }

    fn write_current(&self, generation: u64) -> SearchResult<()> {
        let current = self.dir.join("current");
        let tmp = self.dir.join("current.tmp");
        fs::write(&tmp, format!("snapshot-{generation}.{EXT}\n"))?;
        fs::rename(&tmp, &current)?;
        Ok(())
    }

    /// Load the newest snapshot compatible with `(model_id, dimension)`.
    ///
    /// The generation named by `current` is tried first, then older ones in
    /// descending order. Corrupt or incompatible files are skipped with a
    /// warning. Returns `None` when nothing usable exists.
    ///
    /// # Errors
    /// Returns `Io` only for directory-level failures; per-file problems
    /// degrade to skips.
    pub fn load_latest(
        &self,
        model_id: &str,
        dimension: usize,
    ) -> SearchResult<Option<(u64, Snapshot)>> {
        let mut generations = self.generations()?;
        if generations.is_empty() {
            return Ok(None);
        }
        generations.sort_unstable_by(|a, b| b.cmp(a));

        // Prefer the generation the pointer file names
        if let Some(current) = self.current_generation()
            && let Some(pos) = generations.iter().position(|&g| g == current)
        {
            generations.swap(0, pos);
        }

        for generation in generations {
            match self.load_file(&self.snapshot_path(generation)) {
                Ok(snapshot) => {
                    if snapshot.model_id == model_id && snapshot.dimension == dimension {
                        return Ok(Some((generation, snapshot)));
                    }
                    tracing::warn!(
                        generation,
                        found_model = %snapshot.model_id,
                        found_dimension = snapshot.dimension,
                        "snapshot incompatible with configuration, skipping"
                    );
                }
                Err(err) => {
                    tracing::warn!(generation, %err, "snapshot unreadable, skipping");
                }
            }
        }
        Ok(None)
    }

    fn load_file(&self, path: &Path) -> SearchResult<Snapshot> {
        let data = fs::read(path)?;
        if data.len() < MAGIC.len() + 4 + 32 || &data[..MAGIC.len()] != MAGIC {
            return Err(SearchError::Serialization("bad snapshot magic".to_owned()));
        }

        let mut offset = MAGIC.len();
        let header_len = u32::from_le_bytes(
            data[offset..offset + 4]
                .try_into()
                .map_err(|_| SearchError::Serialization("truncated header length".to_owned()))?,
        ) as usize;
        offset += 4;
        if data.len() < offset + header_len + 32 {
            return Err(SearchError::Serialization("truncated snapshot".to_owned()));
        }

        let header: SnapshotHeader = bincode::deserialize(&data[offset..offset + header_len])?;
        offset += header_len;

        let stored_digest = &data[offset..offset + 32];
        offset += 32;
        let body = &data[offset..];
        let digest = Sha256::digest(body);
        if digest.as_slice() != stored_digest {
            return Err(SearchError::Serialization(
                "snapshot body hash mismatch".to_owned(),
            ));
        }

        let entries: Vec<IndexEntry> = bincode::deserialize(body)?;
        if entries.len() as u64 != header.count {
            return Err(SearchError::Serialization(format!(
                "snapshot count mismatch: header {} vs body {}",
                header.count,
                entries.len()
            )));
        }

        Ok(Snapshot {
            model_id: header.model_id,
            dimension: header.dimension as usize,
            entries,
        })
    }

    /// The newest generation present on disk, or 0 when none exist.
    #[must_use]
    pub fn latest_generation(&self) -> u64 {
        self.generations()
            .ok()
            .and_then(|g| g.into_iter().max())
            .unwrap_or(0)
    }

    fn current_generation(&self) -> Option<u64> {
        let name = fs::read_to_string(self.dir.join("current")).ok()?;
        parse_generation(name.trim())
    }

    fn generations(&self) -> SearchResult<Vec<u64>> {
        let mut found = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(err) => {
                // An unreadable snapshot directory degrades to a cold
                // build; it must not block startup
                tracing::warn!(dir = %self.dir.display(), %err, "snapshot dir unreadable");
                return Ok(found);
            }
        };
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str()
                && let Some(generation) = parse_generation(name)
            {
                found.push(generation);
            }
        }
        Ok(found)
    }

    /// Delete generations beyond the newest [`KEEP_GENERATIONS`].
    fn prune(&self) {
        let Ok(mut generations) = self.generations() else {
            return;
        };
        generations.sort_unstable_by(|a, b| b.cmp(a));
        for &generation in generations.iter().skip(KEEP_GENERATIONS) {
            let path = self.snapshot_path(generation);
            if let Err(err) = fs::remove_file(&path) {
                tracing::warn!(generation, %err, "failed to prune old snapshot");
            }
        }
    }
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix("snapshot-")?
        .strip_suffix(&format!(".{EXT}"))?
        .parse()
        .ok()
}
