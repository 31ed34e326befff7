use std::path::Path;
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::HARD_STATE_FILE;
use crate::utils::file_io::create_dir_if_not_exist;
use crate::utils::file_io::encode_checksummed;
use crate::utils::file_io::read_checksummed_file;
use crate::utils::file_io::remove_file_if_exists;
use crate::utils::file_io::temp_path_of;
use crate::utils::file_io::write_atomic;
use crate::HardState;
use crate::PeerId;
use crate::Result;
use crate::StableStorage;
use crate::StorageError;
use crate::StorageUri;

/// Term and vote kept in one checksummed file, replaced atomically on every
/// update.
#[derive(Debug)]
pub struct FileStableStorage {
    dir: PathBuf,
    sync: bool,
    hard_state: RwLock<Option<HardState>>,
}

impl FileStableStorage {
    pub fn new(
        dir: impl Into<PathBuf>,
        sync: bool,
    ) -> Self {
        Self {
            dir: dir.into(),
            sync,
            hard_state: RwLock::new(None),
        }
    }

    pub fn from_uri(uri: &StorageUri) -> Result<Self> {
        Ok(Self::new(uri.dir()?, uri.sync()?))
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(HARD_STATE_FILE)
    }

    fn load(path: &Path) -> Result<HardState> {
        match read_checksummed_file(path)? {
            None => Ok(HardState::default()),
            Some(bytes) => bincode::deserialize(&bytes).map_err(|e| {
                StorageError::corruption(path.display().to_string(), format!("undecodable hard state: {e}")).into()
            }),
        }
    }

    fn current(&self) -> Result<HardState> {
        (*self.hard_state.read())
            .ok_or_else(|| StorageError::InvalidArgument("stable storage used before init".to_string()).into())
    }

    /// Apply `update` and persist the result before publishing it.
    fn update(
        &self,
        update: impl FnOnce(&mut HardState),
    ) -> Result<()> {
        let mut guard = self.hard_state.write();
        let mut next = (*guard).ok_or_else(|| StorageError::InvalidArgument("stable storage used before init".to_string()))?;
        update(&mut next);

        let bytes = bincode::serialize(&next)?;
        write_atomic(&self.path(), &encode_checksummed(&bytes), self.sync)?;
        debug!(term = next.current_term, voted_for = ?next.voted_for, "persisted hard state");
        *guard = Some(next);
        Ok(())
    }
}

impl StableStorage for FileStableStorage {
    fn init(&self) -> Result<()> {
        create_dir_if_not_exist(&self.dir)?;
        let path = self.path();

        let temp = temp_path_of(&path);
        if temp.exists() {
            warn!(?temp, "ignoring leftover hard state temp file");
            remove_file_if_exists(&temp)?;
        }

        let hard_state = Self::load(&path)?;
        info!(?path, term = hard_state.current_term, voted_for = ?hard_state.voted_for, "stable storage ready");
        *self.hard_state.write() = Some(hard_state);
        Ok(())
    }

    fn set_term(
        &self,
        term: u64,
    ) -> Result<()> {
        self.update(|s| {
            if s.current_term != term {
                s.voted_for = None;
            }
            s.current_term = term;
        })
    }

    fn get_term(&self) -> Result<u64> {
        self.current().map(|s| s.current_term)
    }

    fn set_votedfor(
        &self,
        peer_id: &PeerId,
    ) -> Result<()> {
        let peer_id = *peer_id;
        self.update(|s| s.voted_for = Some(peer_id))
    }

    fn get_votedfor(&self) -> Result<Option<PeerId>> {
        self.current().map(|s| s.voted_for)
    }

    fn set_term_and_votedfor(
        &self,
        term: u64,
        peer_id: &PeerId,
    ) -> Result<()> {
        let peer_id = *peer_id;
        self.update(|s| {
            s.current_term = term;
            s.voted_for = Some(peer_id);
        })
    }
}
