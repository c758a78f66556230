use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Entity, PersistenceGateway};
use crate::assemble::{Posting, User};
use crate::config::Settings;
use crate::error::PersistError;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// What happens to a dead-letter file once its entity has been replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessedAction {
    #[default]
    Move,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub replayed: usize,
    pub failed: usize,
    /// Files that could not be read or decoded.
    pub skipped: usize,
}

/// Dead-letter files waiting for replay, in replay order.
#[derive(Debug, Default)]
pub struct Pending {
    pub users: Vec<PathBuf>,
    pub postings: Vec<PathBuf>,
}

impl Pending {
    pub fn len(&self) -> usize {
        self.users.len() + self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Backup directory of entities the gateway refused, one JSON file each,
/// named `<EntityType><id>.json`.
#[derive(Debug, Clone)]
pub struct DeadLetterStore {
    dir: PathBuf,
    processed_dir: PathBuf,
    on_success: ProcessedAction,
}

impl DeadLetterStore {
    pub fn new(dir: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>, on_success: ProcessedAction) -> Self {
        Self {
            dir: dir.into(),
            processed_dir: processed_dir.into(),
            on_success,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.backup_dir.clone(),
            settings.processed_dir.clone(),
            settings.processed_on_success,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name<E: Entity>(entity: &E) -> String {
        format!("{}{}.json", E::KIND, entity.entity_id())
    }

    /// Write `entity` atomically: readers see either no file or the whole file.
    /// An existing backup of the same entity is replaced.
    pub fn write<E: Entity>(&self, entity: &E) -> Result<PathBuf, PersistError> {
        fs::create_dir_all(&self.dir)?;
        let name = Self::file_name(entity);
        let target = self.dir.join(&name);
        let tmp = self.dir.join(format!(
            ".{}.{}-{}.tmp",
            name,
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let json = serde_json::to_vec_pretty(entity)?;
        let written = fs::write(&tmp, json).and_then(|_| fs::rename(&tmp, &target));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(target)
    }

    pub fn pending(&self) -> Result<Pending, PersistError> {
        let mut pending = Pending::default();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(pending),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") {
                continue;
            }
            if name.starts_with(User::KIND) {
                pending.users.push(entry.path());
            } else if name.starts_with(Posting::KIND) {
                pending.postings.push(entry.path());
            }
        }
        pending.users.sort();
        pending.postings.sort();
        Ok(pending)
    }

    /// Resubmit every backup, users before postings. Replayed files are moved
    /// or deleted; failed ones stay for the next attempt.
    pub fn replay(&self, gateway: &dyn PersistenceGateway) -> Result<ReplayStats, PersistError> {
        let pending = self.pending()?;
        let mut stats = ReplayStats::default();
        for path in &pending.users {
            self.replay_one::<User>(path, |u| gateway.save_user(u), &mut stats)?;
        }
        for path in &pending.postings {
            self.replay_one::<Posting>(path, |p| gateway.save_posting(p), &mut stats)?;
        }
        info!(
            replayed = stats.replayed,
            failed = stats.failed,
            skipped = stats.skipped,
            "dead-letter replay finished"
        );
        Ok(stats)
    }

    fn replay_one<E: Entity>(
        &self,
        path: &Path,
        save: impl Fn(&E) -> Result<(), PersistError>,
        stats: &mut ReplayStats,
    ) -> Result<(), PersistError> {
        let entity: E = match read_entity(path) {
            Ok(entity) => entity,
            Err(e) => {
                warn!(file = %path.display(), "unreadable dead-letter file: {}", e);
                stats.skipped += 1;
                return Ok(());
            }
        };

        match save(&entity) {
            Ok(()) => {
                self.settle(path)?;
                stats.replayed += 1;
            }
            Err(e) => {
                warn!(entity = E::KIND, id = %entity.entity_id(), "replay failed: {}", e);
                stats.failed += 1;
            }
        }
        Ok(())
    }

    /// Apply the configured [`ProcessedAction`] to a replayed file.
    pub fn settle(&self, path: &Path) -> Result<(), PersistError> {
        match self.on_success {
            ProcessedAction::Delete => fs::remove_file(path)?,
            ProcessedAction::Move => {
                fs::create_dir_all(&self.processed_dir)?;
                let name = path.file_name().ok_or_else(|| {
                    PersistError::Backend(format!("not a dead-letter file: {}", path.display()))
                })?;
                fs::rename(path, self.processed_dir.join(name))?;
            }
        }
        Ok(())
    }
}

fn read_entity<E: Entity>(path: &Path) -> Result<E, PersistError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
