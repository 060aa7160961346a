//! Persisted record of deployed resources
//!
//! `.stratus/state.json` holds one entry per resource key with the provider
//! id, the generated attributes and the configuration it was last applied
//! with. The engine diffs against the declared configuration, so the file is
//! what makes repeated runs idempotent.

use crate::error::{CloudError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const FORMAT_VERSION: u32 = 1;
const STATE_DIR: &str = ".stratus";
const STATE_FILE: &str = "state.json";
const BACKUP_FILE: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Locks older than this are treated as abandoned
const STALE_LOCK_HOURS: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    /// Keyed by `kind:name`
    pub resources: BTreeMap<String, ResourceState>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_resource(&self, key: &str) -> Option<&ResourceState> {
        self.resources.get(key)
    }

    pub fn set_resource(&mut self, key: String, resource: ResourceState) {
        self.resources.insert(key, resource);
        self.updated_at = Utc::now();
    }

    pub fn remove_resource(&mut self, key: &str) -> Option<ResourceState> {
        let removed = self.resources.remove(key)?;
        self.updated_at = Utc::now();
        Some(removed)
    }

    /// Entries whose resource type is `kind`
    pub fn resources_of_type<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a ResourceState)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == kind)
    }

    /// A generated attribute (`id`, `arn`, `dnsName`, ...) of a recorded resource
    pub fn attribute(&self, key: &str, attribute: &str) -> Option<&Value> {
        self.resources.get(key)?.attributes.get(attribute)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// One recorded resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Provider-assigned identifier
    pub id: String,
    pub resource_type: String,
    pub status: ResourceStatus,
    pub attributes: BTreeMap<String, Value>,

    /// Properties as declared, placeholders still unresolved. Diffing this
    /// against the next declaration decides between no-op, update and replace.
    #[serde(default)]
    pub declared: Value,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            status: ResourceStatus::Pending,
            attributes: BTreeMap::new(),
            declared: Value::Null,
            depends_on: Vec::new(),
            parent: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Record what the resource was applied with
    pub fn with_declaration(
        mut self,
        declared: Value,
        depends_on: Vec<String>,
        parent: Option<String>,
    ) -> Self {
        self.declared = declared;
        self.depends_on = depends_on;
        self.parent = parent;
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
        self.updated_at = Utc::now();
    }

    /// Typed view of an attribute; `None` when missing or of another shape
    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        T::deserialize(self.attributes.get(key)?).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Requested but not yet confirmed by the provider
    Pending,
    Running,
    Failed,
}

impl ResourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads and writes the state directory of one project
pub struct StateManager {
    dir: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            dir: project_root.as_ref().join(STATE_DIR),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Load the recorded state; a missing file is an empty state
    pub async fn load(&self) -> Result<GlobalState> {
        let path = self.path(STATE_FILE);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no state at {}, starting empty", path.display());
                return Ok(GlobalState::new());
            }
            Err(e) => return Err(e.into()),
        };

        let state: GlobalState = serde_json::from_str(&content)?;
        if state.version > FORMAT_VERSION {
            return Err(CloudError::StateError(format!(
                "{} was written by a newer stratus (format {}, this build reads up to {})",
                path.display(),
                state.version,
                FORMAT_VERSION
            )));
        }

        tracing::debug!(resources = state.resources.len(), "state loaded");
        Ok(state)
    }

    /// Write the state, keeping the previous file as a backup
    ///
    /// The new content goes to a temporary file first and is renamed into
    /// place, so a crash mid-write never leaves a truncated state file.
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path(STATE_FILE);
        if fs::try_exists(&path).await? {
            fs::copy(&path, self.path(BACKUP_FILE)).await?;
        }

        let staging = self.path(&format!("{}.tmp", STATE_FILE));
        fs::write(&staging, serde_json::to_vec_pretty(state)?).await?;
        fs::rename(&staging, &path).await?;

        tracing::debug!(resources = state.resources.len(), "state saved");
        Ok(())
    }

    /// Take the exclusive lock on this project's state
    ///
    /// A lock held for longer than an hour is considered abandoned and is
    /// taken over with a warning.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        fs::create_dir_all(&self.dir).await?;
        let lock_path = self.path(LOCK_FILE);

        if let Some(existing) = read_lock(&lock_path).await? {
            if Utc::now() - existing.acquired_at < Duration::hours(STALE_LOCK_HOURS) {
                return Err(CloudError::LockError(format!(
                    "state is locked by {} (pid {}) since {}",
                    existing.holder, existing.pid, existing.acquired_at
                )));
            }
            tracing::warn!(
                holder = %existing.holder,
                since = %existing.acquired_at,
                "taking over stale state lock"
            );
            match fs::remove_file(&lock_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let info = LockInfo {
            token: uuid::Uuid::new_v4().to_string(),
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        // The lock only becomes visible fully written: hard_link fails if
        // another process published one since the check above.
        let tmp_path = self.path(&format!("{LOCK_FILE}.{}.tmp", info.token));
        fs::write(&tmp_path, serde_json::to_vec_pretty(&info)?).await?;
        let linked = fs::hard_link(&tmp_path, &lock_path).await;
        fs::remove_file(&tmp_path).await?;
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CloudError::LockError(
                    "state was locked by another process".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(token = %info.token, "state lock acquired");
        Ok(StateLock {
            path: Some(lock_path),
            token: info.token,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    token: String,
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Current lock holder, if any
///
/// A lock file that does not parse is still a held lock; its holder is
/// unknown and its age is taken from the file's modification time.
async fn read_lock(path: &Path) -> Result<Option<LockInfo>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(info) => Ok(Some(info)),
        Err(e) => {
            let modified = fs::metadata(path).await?.modified()?;
            tracing::warn!(error = %e, path = %path.display(), "state lock is unreadable");
            Ok(Some(LockInfo {
                token: String::new(),
                holder: "unknown".to_string(),
                pid: 0,
                acquired_at: DateTime::<Utc>::from(modified),
            }))
        }
    }
}

/// Held state lock; removed on `release` or, failing that, on drop
pub struct StateLock {
    path: Option<PathBuf>,
    token: String,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };
        // Leave a lock that was taken over by someone else alone.
        match read_lock(&path).await? {
            Some(info) if info.token == self.token => {
                fs::remove_file(&path).await?;
                tracing::debug!("state lock released");
            }
            _ => tracing::warn!("state lock was no longer ours at release"),
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
