//! Per-group membership sets persisted to a single JSON file.
//!
//! The store answers "is this sender in this category for this group?" and
//! keeps two categories: senders who opted out of auto-translation, and
//! senders who have already seen the "answered privately" notice.
//!
//! Reads are served from memory. Mutations are serialized by an async lock
//! around the modify-then-persist sequence, and the file write runs on the
//! blocking thread pool so a slow disk never stalls the dispatcher.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Group (chat) identifier.
pub type GroupId = i64;
/// Subject (sender) identifier.
pub type SubjectId = i64;

/// Errors raised on the persistence path.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The blocking write task panicked or was cancelled
    #[error("Persistence task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Kind of membership tracked by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Senders opted out of auto-translation for a group
    ExcludedSenders,
    /// Senders already told that the bot answered them privately
    Informed,
}

impl Category {
    /// Every known category.
    pub const ALL: [Self; 2] = [Self::ExcludedSenders, Self::Informed];

    /// Key used in the persisted file.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExcludedSenders => "excluded_senders",
            Self::Informed => "informed",
        }
    }

    /// Parse a persisted key; unknown keys yield `None`.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == key)
    }
}

type GroupSets = HashMap<GroupId, HashSet<SubjectId>>;
type SessionMap = HashMap<Category, GroupSets>;

/// On-disk layout. Ordered maps keep the file stable between saves.
type PersistedSessions = BTreeMap<String, BTreeMap<GroupId, BTreeSet<SubjectId>>>;

/// File-backed membership store shared by the pipeline and the commands.
pub struct SessionStore {
    path: PathBuf,
    sessions: RwLock<SessionMap>,
    write_lock: Mutex<()>,
}

impl SessionStore {
    /// Create an empty store backed by `path`. Nothing is read yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sessions: RwLock::new(empty_sessions()),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store backed by `path` and load whatever is persisted there.
    ///
    /// The parent directory is created if missing. Failures are logged and
    /// the store starts empty.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self::new(path);
        if let Some(dir) = store.path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                error!("Failed to create storage directory {}: {e}", dir.display());
            }
        }
        store.load();
        store
    }

    /// Location of the persisted file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace in-memory state with the persisted file.
    ///
    /// A missing file means an empty store. A corrupt or unreadable file is
    /// logged and also treated as empty. Unknown categories are skipped.
    pub fn load(&self) {
        let loaded = match read_sessions(&self.path) {
            Ok(Some(sessions)) => {
                info!("Loaded sessions from {}", self.path.display());
                sessions
            }
            Ok(None) => {
                debug!("No sessions file at {}, starting empty", self.path.display());
                empty_sessions()
            }
            Err(e) => {
                error!("Failed to load sessions from {}: {e}", self.path.display());
                empty_sessions()
            }
        };

        *self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner) = loaded;
    }

    /// Add `subject` to the set for (`category`, `group`).
    ///
    /// Returns `true` if the subject was not present before. The file is
    /// rewritten only when membership changed.
    pub async fn add(&self, category: Category, group: GroupId, subject: SubjectId) -> bool {
        let _guard = self.write_lock.lock().await;
        let inserted = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            sessions
                .entry(category)
                .or_default()
                .entry(group)
                .or_default()
                .insert(subject)
        };
        if inserted {
            debug!(
                category = category.as_str(),
                group, subject, "Session member added"
            );
            self.persist().await;
        }
        inserted
    }

    /// Remove `subject` from the set for (`category`, `group`).
    ///
    /// Returns `true` if the subject was present. Absent groups or subjects
    /// are a no-op.
    pub async fn remove(&self, category: Category, group: GroupId, subject: SubjectId) -> bool {
        let _guard = self.write_lock.lock().await;
        let removed = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            let groups = sessions.entry(category).or_default();
            let removed = groups
                .get_mut(&group)
                .is_some_and(|members| members.remove(&subject));
            if groups.get(&group).is_some_and(HashSet::is_empty) {
                groups.remove(&group);
            }
            removed
        };
        if removed {
            debug!(
                category = category.as_str(),
                group, subject, "Session member removed"
            );
            self.persist().await;
        }
        removed
    }

    /// Whether `subject` is in the set for (`category`, `group`).
    #[must_use]
    pub fn exists(&self, category: Category, group: GroupId, subject: SubjectId) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .and_then(|groups| groups.get(&group))
            .is_some_and(|members| members.contains(&subject))
    }

    /// Members of (`category`, `group`), sorted.
    #[must_use]
    pub fn members(&self, category: Category, group: GroupId) -> Vec<SubjectId> {
        let mut members: Vec<SubjectId> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .and_then(|groups| groups.get(&group))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }

    /// Persist the current state. Errors are logged, never returned.
    pub async fn save(&self) {
        let _guard = self.write_lock.lock().await;
        self.persist().await;
    }

    /// Write a snapshot to disk; the caller holds `write_lock`.
    async fn persist(&self) {
        if let Err(e) = self.write_snapshot().await {
            error!("Failed to save sessions to {}: {e}", self.path.display());
        }
    }

    async fn write_snapshot(&self) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec_pretty(&self.snapshot())?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes)).await??;
        Ok(())
    }

    fn snapshot(&self) -> PersistedSessions {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Category::ALL
            .into_iter()
            .map(|category| {
                let groups = sessions
                    .get(&category)
                    .map(|groups| {
                        groups
                            .iter()
                            .filter(|(_, members)| !members.is_empty())
                            .map(|(group, members)| (*group, members.iter().copied().collect()))
                            .collect()
                    })
                    .unwrap_or_default();
                (category.as_str().to_string(), groups)
            })
            .collect()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("path", &self.path)
            .field("sessions", &self.snapshot())
            .finish_non_exhaustive()
    }
}

fn empty_sessions() -> SessionMap {
    Category::ALL
        .into_iter()
        .map(|category| (category, GroupSets::new()))
        .collect()
}

fn read_sessions(path: &Path) -> Result<Option<SessionMap>, SessionError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let persisted: PersistedSessions = serde_json::from_slice(&raw)?;
    let mut sessions = empty_sessions();
    for (key, groups) in persisted {
        let Some(category) = Category::from_key(&key) else {
            warn!("Ignoring unknown session category '{key}'");
            continue;
        };
        let target = sessions.entry(category).or_default();
        for (group, members) in groups {
            if !members.is_empty() {
                target.insert(group, members.into_iter().collect());
            }
        }
    }
    Ok(Some(sessions))
}

/// Write through a sibling temp file and rename over the target, so an
/// interrupted write never leaves a truncated store behind.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), SessionError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
