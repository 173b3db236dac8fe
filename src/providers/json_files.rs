use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    decision::{
        error::{DecisionError, data_unavailable},
        ports::{PermissionPort, ProfilePort},
    },
    types::{CustomerId, CustomerProfile, EventRecord, PermissionMatrix},
};

/// Raw records per customer, then per category.
type ProfileIndex = BTreeMap<CustomerId, BTreeMap<String, Vec<Value>>>;

/// Reads customer records from `<category>.json` files in one directory.
///
/// A file holds either an array of records or an object with a `data` array. With the cache on
/// (the default) the directory is read and indexed by customer on the first fetch and served from
/// memory until [`clear_cache`](Self::clear_cache). With it off, every fetch reads the files again.
#[derive(Debug)]
pub struct JsonDirectoryProfileProvider {
    dir: PathBuf,
    skipped: BTreeSet<PathBuf>,
    cache_enabled: bool,
    index: Mutex<Option<Arc<ProfileIndex>>>,
    loads: AtomicUsize,
}

impl JsonDirectoryProfileProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            skipped: BTreeSet::new(),
            cache_enabled: true,
            index: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    /// Leaves one file out of the scan, e.g. a permissions file kept alongside the data. Matched
    /// by resolved path, so a same-named file in another directory does not hide a category.
    pub fn skip_file(mut self, path: impl AsRef<Path>) -> Self {
        self.skipped.insert(path.as_ref().to_path_buf());
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drops the indexed records; the next fetch reads the directory again.
    pub async fn clear_cache(&self) {
        *self.index.lock().await = None;
        tracing::debug!(target: "providers", dir = %self.dir.display(), "profile_cache_cleared");
    }

    /// How many times the directory has been read and indexed.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    async fn profile_index(&self) -> Result<Arc<ProfileIndex>, DecisionError> {
        if !self.cache_enabled {
            return self.load_index().await.map(Arc::new);
        }

        // Held across the load so concurrent first fetches read the files once.
        let mut cached = self.index.lock().await;
        if let Some(index) = cached.as_ref() {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(self.load_index().await?);
        *cached = Some(Arc::clone(&index));
        Ok(index)
    }

    async fn load_index(&self) -> Result<ProfileIndex, DecisionError> {
        self.loads.fetch_add(1, Ordering::Relaxed);

        let mut index = ProfileIndex::new();
        let mut records_seen = 0;
        for (category, path) in self.category_files().await? {
            let content = tokio::fs::read_to_string(&path).await.map_err(|err| {
                data_unavailable(format!("cannot read {}: {}", path.display(), err))
            })?;
            let document: Value = serde_json::from_str(&content).map_err(|err| {
                data_unavailable(format!("malformed json in {}: {}", path.display(), err))
            })?;

            for record in records_of(&path, document)? {
                let Some(customer_id) = record.get("customer_id").and_then(Value::as_str) else {
                    continue;
                };
                index
                    .entry(customer_id.to_string())
                    .or_default()
                    .entry(category.clone())
                    .or_default()
                    .push(record);
                records_seen += 1;
            }
        }

        tracing::debug!(
            target: "providers",
            dir = %self.dir.display(),
            customers = index.len(),
            records = records_seen,
            "profile_index_loaded"
        );
        Ok(index)
    }

    async fn category_files(&self) -> Result<Vec<(String, PathBuf)>, DecisionError> {
        let mut skipped = BTreeSet::new();
        for path in &self.skipped {
            skipped.insert(resolved(path).await);
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|err| {
            data_unavailable(format!(
                "cannot read profile directory {}: {}",
                self.dir.display(),
                err
            ))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|err| {
            data_unavailable(format!(
                "cannot list profile directory {}: {}",
                self.dir.display(),
                err
            ))
        })? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if skipped.contains(&resolved(&path).await) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                files.push((stem.to_string(), path.clone()));
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Canonical form when the path exists, the path as given otherwise.
async fn resolved(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

fn records_of(path: &Path, document: Value) -> Result<Vec<Value>, DecisionError> {
    match document {
        Value::Array(records) => Ok(records),
        Value::Object(mut object) => match object.remove("data") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(data_unavailable(format!(
                "{} must hold an array or an object with a data array",
                path.display()
            ))),
        },
        _ => Err(data_unavailable(format!(
            "{} must hold an array or an object with a data array",
            path.display()
        ))),
    }
}

#[async_trait]
impl ProfilePort for JsonDirectoryProfileProvider {
    async fn fetch_profile(&self, customer_id: &str) -> Result<CustomerProfile, DecisionError> {
        let index = self.profile_index().await?;
        let mut profile = CustomerProfile::new(customer_id);

        if let Some(categories) = index.get(customer_id) {
            for (category, records) in categories {
                let records = records
                    .iter()
                    .map(|record| {
                        serde_json::from_value::<EventRecord>(record.clone()).map_err(|err| {
                            data_unavailable(format!(
                                "malformed record in {}.json: {}",
                                category, err
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                profile = profile.with_records(category.clone(), records);
            }
        }

        tracing::debug!(
            target: "providers",
            customer_id = %customer_id,
            records = profile.record_count(),
            categories = profile.records.len(),
            "profile_loaded"
        );
        Ok(profile)
    }
}

/// Consent matrices loaded once from a JSON array file.
#[derive(Debug, Clone, Default)]
pub struct JsonPermissionProvider {
    matrices: BTreeMap<CustomerId, PermissionMatrix>,
}

impl JsonPermissionProvider {
    /// A missing file yields a provider that knows no customers, so every lookup is absent.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DecisionError> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    target: "providers",
                    path = %path.display(),
                    "permissions_file_missing"
                );
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(data_unavailable(format!(
                    "cannot read {}: {}",
                    path.display(),
                    err
                )));
            }
        };

        let matrices: Vec<PermissionMatrix> = serde_json::from_str(&content).map_err(|err| {
            data_unavailable(format!("malformed permissions in {}: {}", path.display(), err))
        })?;
        Ok(Self::from_matrices(matrices))
    }

    pub fn from_matrices(matrices: impl IntoIterator<Item = PermissionMatrix>) -> Self {
        Self {
            matrices: matrices
                .into_iter()
                .map(|matrix| (matrix.customer_id.clone(), matrix))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }
}

#[async_trait]
impl PermissionPort for JsonPermissionProvider {
    async fn fetch_permissions(
        &self,
        customer_id: &str,
    ) -> Result<Option<PermissionMatrix>, DecisionError> {
        Ok(self.matrices.get(customer_id).cloned())
    }
}
