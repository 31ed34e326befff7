#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use super::PeerId;
use crate::Result;

/// Durable voting state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub current_term: u64,
    /// `None` = no vote cast in `current_term`
    pub voted_for: Option<PeerId>,
}

/// Term and vote that must be durable before the node acts on them.
///
/// Every setter is durable on return and setters are atomic with respect to
/// each other: after a crash the store holds the whole old pair or the whole
/// new pair.
#[cfg_attr(test, automock)]
pub trait StableStorage: Send + Sync + 'static {
    fn init(&self) -> Result<()>;

    /// Moving to a different term clears the vote in the same write.
    fn set_term(
        &self,
        term: u64,
    ) -> Result<()>;

    fn get_term(&self) -> Result<u64>;

    fn set_votedfor(
        &self,
        peer_id: &PeerId,
    ) -> Result<()>;

    fn get_votedfor(&self) -> Result<Option<PeerId>>;

    /// Single durable write of both fields.
    fn set_term_and_votedfor(
        &self,
        term: u64,
        peer_id: &PeerId,
    ) -> Result<()>;
}
