use chrono::Utc;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::run::{WorkflowRun, STATE_SCHEMA_VERSION};

const STATE_SUFFIX: &str = ".state.json";
const LOCK_SUFFIX: &str = ".lock";

/// Errors that can occur during state persistence operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No workflow run recorded for workspace {workspace}")]
    NotFound { workspace: String },

    #[error("State file {path} is corrupt: {reason}")]
    StateCorruption { path: PathBuf, reason: String },

    #[error("Workspace {workspace} is locked by another invocation ({holder})")]
    LockContention { workspace: String, holder: String },
}

/// File system store of workflow runs, one JSON file per workspace.
#[derive(Debug, Clone)]
pub struct StateStore {
    directory: PathBuf,
    max_history_entries: usize,
}

impl StateStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_history_entries: 200,
        }
    }

    pub fn with_max_history_entries(mut self, max: usize) -> Self {
        self.max_history_entries = max;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn state_file_path(&self, workspace: &str) -> PathBuf {
        self.directory.join(format!("{workspace}{STATE_SUFFIX}"))
    }

    fn lock_file_path(&self, workspace: &str) -> PathBuf {
        self.directory.join(format!("{workspace}{LOCK_SUFFIX}"))
    }

    /// Loads the run keyed by `workspace`.
    pub async fn load(&self, workspace: &str) -> Result<WorkflowRun, StoreError> {
        let path = self.state_file_path(workspace);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    workspace: workspace.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let run: WorkflowRun =
            serde_json::from_str(&contents).map_err(|e| StoreError::StateCorruption {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if run.version != STATE_SCHEMA_VERSION {
            return Err(StoreError::StateCorruption {
                path,
                reason: format!(
                    "schema version {} (expected {STATE_SCHEMA_VERSION})",
                    run.version
                ),
            });
        }
        if run.name() != workspace {
            return Err(StoreError::StateCorruption {
                path,
                reason: format!("file records workspace {}", run.name()),
            });
        }

        debug!(
            workspace = %workspace,
            state = %run.state,
            run_id = %run.run_id,
            "Workflow run loaded"
        );
        Ok(run)
    }

    /// Like `load`, but a missing file is `Ok(None)`.
    pub async fn try_load(&self, workspace: &str) -> Result<Option<WorkflowRun>, StoreError> {
        match self.load(workspace).await {
            Ok(run) => Ok(Some(run)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persists the run. The previous file is replaced atomically: the new
    /// content is written and synced to a temp file, then renamed over it.
    pub async fn save(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        fs::create_dir_all(&self.directory).await?;

        let mut to_save = run.clone();
        to_save.prune_history(self.max_history_entries);
        let serialized =
            serde_json::to_string_pretty(&to_save).map_err(|e| StoreError::StateCorruption {
                path: self.state_file_path(run.name()),
                reason: format!("cannot serialize run: {e}"),
            })?;

        let state_file = self.state_file_path(run.name());
        let temp_file = self
            .directory
            .join(format!(".{}{STATE_SUFFIX}.tmp", run.name()));

        let mut file = fs::File::create(&temp_file).await?;
        file.write_all(serialized.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_file, &state_file).await?;

        info!(
            workspace = %run.name(),
            state = %run.state,
            file = ?state_file,
            "Workflow state saved"
        );
        Ok(())
    }

    /// Every run in the store, ordered by workspace name.
    pub async fn list(&self) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(name) = file_name.strip_suffix(STATE_SUFFIX) {
                names.push(name.to_string());
            }
        }
        names.sort();

        let mut runs = Vec::with_capacity(names.len());
        for name in names {
            runs.push(self.load(&name).await?);
        }
        Ok(runs)
    }

    /// Resolves the run that owns `workspace`, either as its own workspace or
    /// as the previous workspace it replaces.
    pub async fn find_for_target(&self, workspace: &str) -> Result<WorkflowRun, StoreError> {
        if let Some(run) = self.try_load(workspace).await? {
            return Ok(run);
        }
        self.find_replacing(workspace)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                workspace: workspace.to_string(),
            })
    }

    /// The newest run whose previous workspace is `workspace`.
    pub async fn find_replacing(&self, workspace: &str) -> Result<Option<WorkflowRun>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|run| run.previous_name() == Some(workspace))
            .max_by_key(|run| run.started_at))
    }

    /// Opens (creating if needed) the lock file for `workspace`. Call
    /// `WorkspaceLock::acquire` to take the exclusive lock.
    pub fn open_lock(&self, workspace: &str) -> Result<WorkspaceLock, StoreError> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.lock_file_path(workspace);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(WorkspaceLock {
            workspace: workspace.to_string(),
            path,
            lock: RwLock::new(file),
        })
    }
}

/// Advisory exclusive lock on one workspace's state, held for a whole run.
pub struct WorkspaceLock {
    workspace: String,
    path: PathBuf,
    lock: RwLock<File>,
}

impl WorkspaceLock {
    /// Takes the lock without waiting; contention fails fast naming the holder.
    pub fn acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>, StoreError> {
        let holder_path = self.path.clone();
        let workspace = self.workspace.clone();
        let mut guard = self.lock.try_write().map_err(|_| StoreError::LockContention {
            holder: std::fs::read_to_string(&holder_path)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "unknown holder".to_string()),
            workspace: workspace.clone(),
        })?;

        let holder = format!(
            "pid {} on {} since {}",
            std::process::id(),
            hostname::get().unwrap_or_default().to_string_lossy(),
            Utc::now().to_rfc3339()
        );
        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;
        guard.write_all(holder.as_bytes())?;
        guard.flush()?;

        debug!(workspace = %workspace, holder = %holder, "Workspace lock acquired");
        Ok(guard)
    }
}
