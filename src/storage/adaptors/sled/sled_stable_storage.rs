use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::debug;
use tracing::error;
use tracing::instrument;

use super::open_sled_db;
use super::SledOptions;
use crate::constants::HARD_STATE_KEY;
use crate::constants::SLED_STABLE_DB;
use crate::constants::SLED_STABLE_TREE;
use crate::HardState;
use crate::PeerId;
use crate::Result;
use crate::StableStorage;
use crate::StorageError;
use crate::StorageUri;

/// Term and vote kept as one bincode value under a single key.
#[derive(Debug)]
pub struct SledStableStorage {
    root: PathBuf,
    options: SledOptions,
    state: RwLock<Option<SledStableState>>,
}

#[derive(Debug)]
struct SledStableState {
    db: sled::Db,
    tree: sled::Tree,
    hard_state: HardState,
}

impl SledStableStorage {
    pub fn new(
        root: impl Into<PathBuf>,
        options: SledOptions,
    ) -> Self {
        Self {
            root: root.into(),
            options,
            state: RwLock::new(None),
        }
    }

    pub fn from_uri(uri: &StorageUri) -> Result<Self> {
        Ok(Self::new(uri.dir()?, SledOptions::from_uri(uri)?))
    }

    fn current(&self) -> Result<HardState> {
        self.state
            .read()
            .as_ref()
            .map(|s| s.hard_state)
            .ok_or_else(|| StorageError::InvalidArgument("stable storage used before init".to_string()).into())
    }

    /// Persist `f(current)` and only then make it visible.
    fn update(
        &self,
        f: impl FnOnce(&mut HardState),
    ) -> Result<()> {
        let mut guard = self.state.write();
        let state = guard
            .as_mut()
            .ok_or_else(|| StorageError::InvalidArgument("stable storage used before init".to_string()))?;

        let mut next = state.hard_state;
        f(&mut next);
        state.tree.insert(HARD_STATE_KEY, bincode::serialize(&next)?)?;
        if self.options.sync {
            state.tree.flush()?;
        }
        state.hard_state = next;
        Ok(())
    }
}

impl StableStorage for SledStableStorage {
    #[instrument(skip(self), fields(root = ?self.root))]
    fn init(&self) -> Result<()> {
        let db = open_sled_db(&self.root.join(SLED_STABLE_DB), &self.options)?;
        let tree = db.open_tree(SLED_STABLE_TREE)?;
        let hard_state = match tree.get(HARD_STATE_KEY)? {
            Some(bytes) => bincode::deserialize::<HardState>(&bytes)
                .map_err(|e| StorageError::corruption(SLED_STABLE_TREE, format!("undecodable hard state: {e}")))?,
            None => HardState::default(),
        };
        debug!(?hard_state, "sled stable storage ready");
        *self.state.write() = Some(SledStableState { db, tree, hard_state });
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
        Ok(self.current()?.current_term)
    }

    fn set_votedfor(
        &self,
        peer: &PeerId,
    ) -> Result<()> {
        self.update(|s| s.voted_for = Some(*peer))
    }

    fn get_votedfor(&self) -> Result<Option<PeerId>> {
        Ok(self.current()?.voted_for)
    }

    fn set_term_and_votedfor(
        &self,
        term: u64,
        peer: &PeerId,
    ) -> Result<()> {
        self.update(|s| {
            s.current_term = term;
            s.voted_for = Some(*peer);
        })
    }
}

impl Drop for SledStableStorage {
    fn drop(&mut self) {
        if let Some(state) = self.state.read().as_ref() {
            if let Err(e) = state.db.flush() {
                error!("Failed to flush sled stable state on drop: {}", e);
            }
        }
    }
}
