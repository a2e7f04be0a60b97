use crate::common::{AttendanceError, ImportError, Result};
use crate::core::recognizer::Embedding;
use crate::storage::artifact;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const STORE_MAGIC: &[u8; 4] = b"RCEM";
const STORE_VERSION: u32 = 1;
const SNAPSHOT_VERSION: u32 = 1;

/// Opaque reference to an enrolled person. Display data lives in the roster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for IdentityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Immutable view of every identity's embeddings.
///
/// The store hands these out behind an `Arc`; a recognition pass keeps using
/// the one it was given even if an enrollment publishes a newer index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingIndex {
    identities: BTreeMap<IdentityKey, Vec<Embedding>>,
    generation: u64,
}

impl EmbeddingIndex {
    pub fn from_map(identities: BTreeMap<IdentityKey, Vec<Embedding>>) -> Self {
        let identities = identities.into_iter().filter(|(_, e)| !e.is_empty()).collect();
        Self {
            identities,
            generation: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn embedding_count(&self) -> usize {
        self.identities.values().map(Vec::len).sum()
    }

    /// Bumped every time the store publishes a new index.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Embedding width, taken from the first stored embedding.
    pub fn dimension(&self) -> Option<usize> {
        self.identities.values().flatten().next().map(Vec::len)
    }

    pub fn embeddings_for(&self, identity: &IdentityKey) -> Option<&[Embedding]> {
        self.identities.get(identity).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IdentityKey, &[Embedding])> {
        self.identities.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn identities(&self) -> impl Iterator<Item = &IdentityKey> {
        self.identities.keys()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentRating {
    Good,
    NeedsImprovement,
    Insufficient,
}

impl EnrollmentRating {
    pub fn from_count(count: usize) -> Self {
        match count {
            c if c >= 20 => Self::Good,
            c if c >= 10 => Self::NeedsImprovement,
            _ => Self::Insufficient,
        }
    }
}

impl fmt::Display for EnrollmentRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "Good"),
            Self::NeedsImprovement => write!(f, "Needs improvement"),
            Self::Insufficient => write!(f, "Insufficient"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityStatus {
    pub identity: IdentityKey,
    pub embedding_count: usize,
    pub rating: EnrollmentRating,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSummary {
    pub identities: usize,
    pub embeddings: usize,
    pub average_per_identity: f32,
}

/// Portable JSON export: parallel `ids` / `encodings` lists, one entry per embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSnapshot {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub ids: Vec<IdentityKey>,
    pub encodings: Vec<Embedding>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub identities: usize,
    pub embeddings: usize,
    pub backup: Option<PathBuf>,
}

pub struct EmbeddingStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    current: RwLock<Arc<EmbeddingIndex>>,
}

impl EmbeddingStore {
    /// Opens the store at `path`. A missing or corrupt artifact yields an
    /// empty store and a warning, never an error.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let index = load_index(&path);
        Self {
            path,
            write_lock: Mutex::new(()),
            current: RwLock::new(Arc::new(index)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current read-consistent index. Cheap; holds the lock only to clone the `Arc`.
    pub fn snapshot(&self) -> Arc<EmbeddingIndex> {
        self.current.read().clone()
    }

    /// Re-reads the artifact from disk and publishes it.
    pub fn reload(&self) -> Arc<EmbeddingIndex> {
        let _guard = self.write_lock.lock();
        let generation = self.current.read().generation;
        let mut index = load_index(&self.path);
        index.generation = generation + 1;
        let index = Arc::new(index);
        *self.current.write() = index.clone();
        index
    }

    /// Appends `embeddings` to `identity` and persists before publishing.
    /// Returns the identity's new embedding count.
    pub fn append(&self, identity: &IdentityKey, embeddings: Vec<Embedding>) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let base = self.snapshot();

        if embeddings.is_empty() {
            return Ok(base.embeddings_for(identity).map_or(0, <[Embedding]>::len));
        }

        let expected = base.dimension().unwrap_or(embeddings[0].len());
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
            return Err(AttendanceError::Storage(format!(
                "embedding has {} dimensions, store uses {}",
                bad.len(),
                expected
            )));
        }

        let mut next = (*base).clone();
        let entry = next.identities.entry(identity.clone()).or_default();
        entry.extend(embeddings);
        let count = entry.len();

        self.publish(next)?;
        tracing::info!("Stored {} embeddings for {}", count, identity);
        Ok(count)
    }

    /// Replaces the whole store, keeping a `.backup` of the previous artifact.
    pub fn replace_all(&self, index: EmbeddingIndex) -> Result<Option<PathBuf>> {
        let _guard = self.write_lock.lock();
        let backup = artifact::backup(&self.path)?;
        self.publish(index)?;
        Ok(backup)
    }

    /// Removes every embedding of `identity`. Returns how many were removed.
    pub fn purge(&self, identity: &IdentityKey) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let mut next = (*self.snapshot()).clone();
        let removed = next.identities.remove(identity).map_or(0, |e| e.len());
        if removed > 0 {
            self.publish(next)?;
            tracing::info!("Purged {} embeddings for {}", removed, identity);
        }
        Ok(removed)
    }

    pub fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.publish(EmbeddingIndex::default())?;
        tracing::info!("Embedding store reset");
        Ok(())
    }

    /// Writes `next` to disk, then swaps it in. Caller holds `write_lock`.
    fn publish(&self, mut next: EmbeddingIndex) -> Result<()> {
        artifact::write_artifact(&self.path, STORE_MAGIC, STORE_VERSION, &next.identities)?;
        next.generation = self.current.read().generation + 1;
        *self.current.write() = Arc::new(next);
        Ok(())
    }

    pub fn export_snapshot(&self) -> EmbeddingSnapshot {
        let index = self.snapshot();
        let mut ids = Vec::with_capacity(index.embedding_count());
        let mut encodings = Vec::with_capacity(index.embedding_count());
        for (identity, embeddings) in index.iter() {
            for embedding in embeddings {
                ids.push(identity.clone());
                encodings.push(embedding.clone());
            }
        }

        EmbeddingSnapshot {
            version: SNAPSHOT_VERSION,
            created_at: Utc::now(),
            ids,
            encodings,
        }
    }

    pub fn export_json(&self, path: &Path) -> Result<()> {
        let snapshot = self.export_snapshot();
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| AttendanceError::Storage(format!("Failed to serialize export: {}", e)))?;
        fs::write(path, json)?;
        tracing::info!("Exported {} embeddings to {}", snapshot.encodings.len(), path.display());
        Ok(())
    }

    /// Validates an untrusted snapshot file completely, then replaces the store.
    pub fn import_json(&self, path: &Path, max_bytes: u64) -> Result<ImportSummary> {
        let size = fs::metadata(path)?.len();
        if size > max_bytes {
            return Err(ImportError::TooLarge { size, limit: max_bytes }.into());
        }

        let bytes = fs::read(path)?;
        let index = parse_snapshot(&bytes, max_bytes)?;
        let summary = ImportSummary {
            identities: index.identity_count(),
            embeddings: index.embedding_count(),
            backup: None,
        };

        let backup = self.replace_all(index)?;
        tracing::info!(
            "Imported {} embeddings for {} identities from {}",
            summary.embeddings,
            summary.identities,
            path.display()
        );
        Ok(ImportSummary { backup, ..summary })
    }

    pub fn summary(&self) -> StoreSummary {
        let index = self.snapshot();
        let identities = index.identity_count();
        let embeddings = index.embedding_count();
        StoreSummary {
            identities,
            embeddings,
            average_per_identity: if identities == 0 {
                0.0
            } else {
                embeddings as f32 / identities as f32
            },
        }
    }

    pub fn identity_status(&self, identity: &IdentityKey) -> IdentityStatus {
        let count = self.snapshot().embeddings_for(identity).map_or(0, <[Embedding]>::len);
        IdentityStatus {
            identity: identity.clone(),
            embedding_count: count,
            rating: EnrollmentRating::from_count(count),
        }
    }

    pub fn statuses(&self) -> Vec<IdentityStatus> {
        self.snapshot()
            .iter()
            .map(|(identity, embeddings)| IdentityStatus {
                identity: identity.clone(),
                embedding_count: embeddings.len(),
                rating: EnrollmentRating::from_count(embeddings.len()),
            })
            .collect()
    }
}

fn load_index(path: &Path) -> EmbeddingIndex {
    if !path.exists() {
        tracing::info!("No embedding store at {}, starting empty", path.display());
        return EmbeddingIndex::default();
    }

    match artifact::read_artifact::<BTreeMap<IdentityKey, Vec<Embedding>>>(path, STORE_MAGIC, STORE_VERSION) {
        Ok(map) => {
            let index = EmbeddingIndex::from_map(map);
            tracing::debug!(
                "Loaded {} embeddings for {} identities",
                index.embedding_count(),
                index.identity_count()
            );
            index
        }
        Err(e) => {
            tracing::warn!(
                "Embedding store {} is unreadable ({}); treating it as empty",
                path.display(),
                e
            );
            EmbeddingIndex::default()
        }
    }
}

/// Parses and validates an untrusted snapshot without touching any store.
///
/// Checks run in order: size ceiling, JSON syntax, root is a mapping,
/// `ids` / `encodings` are lists, equal lengths, then each embedding's
/// dimensions and values.
pub fn parse_snapshot(bytes: &[u8], max_bytes: u64) -> std::result::Result<EmbeddingIndex, ImportError> {
    if bytes.len() as u64 > max_bytes {
        return Err(ImportError::TooLarge {
            size: bytes.len() as u64,
            limit: max_bytes,
        });
    }

    let root: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ImportError::Malformed(e.to_string()))?;
    let object = root.as_object().ok_or(ImportError::NotAMapping)?;

    let ids = object
        .get("ids")
        .and_then(|v| v.as_array())
        .ok_or(ImportError::MissingField("ids"))?;
    let encodings = object
        .get("encodings")
        .and_then(|v| v.as_array())
        .ok_or(ImportError::MissingField("encodings"))?;

    if ids.len() != encodings.len() {
        return Err(ImportError::CardinalityMismatch {
            identities: ids.len(),
            embeddings: encodings.len(),
        });
    }

    let mut map: BTreeMap<IdentityKey, Vec<Embedding>> = BTreeMap::new();
    let mut expected_dim: Option<usize> = None;

    for (index, (id, encoding)) in ids.iter().zip(encodings).enumerate() {
        let key = match id {
            serde_json::Value::String(s) => IdentityKey::new(s.clone()),
            serde_json::Value::Number(n) => IdentityKey::new(n.to_string()),
            _ => return Err(ImportError::MissingField("ids")),
        };

        let values = encoding.as_array().ok_or(ImportError::MissingField("encodings"))?;
        let expected = *expected_dim.get_or_insert(values.len());
        if values.is_empty() || values.len() != expected {
            return Err(ImportError::InconsistentDimensions {
                index,
                expected,
                found: values.len(),
            });
        }

        let mut embedding = Vec::with_capacity(values.len());
        for value in values {
            let v = value.as_f64().ok_or(ImportError::MissingField("encodings"))? as f32;
            if !v.is_finite() {
                return Err(ImportError::NonFiniteValue(index));
            }
            embedding.push(v);
        }

        map.entry(key).or_default().push(embedding);
    }

    Ok(EmbeddingIndex::from_map(map))
}
