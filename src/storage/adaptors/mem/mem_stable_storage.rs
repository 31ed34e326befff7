use parking_lot::RwLock;
use tracing::trace;

use crate::HardState;
use crate::PeerId;
use crate::Result;
use crate::StableStorage;

#[derive(Debug, Default)]
pub struct MemoryStableStorage {
    name: String,
    hard_state: RwLock<HardState>,
}

impl MemoryStableStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hard_state: RwLock::new(HardState::default()),
        }
    }

    pub fn hard_state(&self) -> HardState {
        *self.hard_state.read()
    }
}

impl StableStorage for MemoryStableStorage {
    fn init(&self) -> Result<()> {
        trace!(name = %self.name, "memory stable storage ready");
        Ok(())
    }

    fn set_term(
        &self,
        term: u64,
    ) -> Result<()> {
        let mut state = self.hard_state.write();
        if state.current_term != term {
            state.voted_for = None;
        }
        state.current_term = term;
        Ok(())
    }

    fn get_term(&self) -> Result<u64> {
        Ok(self.hard_state.read().current_term)
    }

    fn set_votedfor(
        &self,
        peer_id: &PeerId,
    ) -> Result<()> {
        self.hard_state.write().voted_for = Some(*peer_id);
        Ok(())
    }

    fn get_votedfor(&self) -> Result<Option<PeerId>> {
        Ok(self.hard_state.read().voted_for)
    }

    fn set_term_and_votedfor(
        &self,
        term: u64,
        peer_id: &PeerId,
    ) -> Result<()> {
        *self.hard_state.write() = HardState {
            current_term: term,
            voted_for: Some(*peer_id),
        };
        Ok(())
    }
}
