use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use super::Configuration;
use crate::Result;
use crate::StorageError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Application command, opaque to storage
    Data,
    /// Membership change; payload is a serialized [`Configuration`]
    Configuration,
    /// Empty entry a new leader appends at the start of its term
    NoOp,
}

/// One slot of the replicated log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub entry_type: EntryType,
    pub payload: Bytes,
}

impl LogEntry {
    pub fn data(
        index: u64,
        term: u64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            index,
            term,
            entry_type: EntryType::Data,
            payload: payload.into(),
        }
    }

    pub fn no_op(
        index: u64,
        term: u64,
    ) -> Self {
        Self {
            index,
            term,
            entry_type: EntryType::NoOp,
            payload: Bytes::new(),
        }
    }

    pub fn configuration(
        index: u64,
        term: u64,
        configuration: &Configuration,
    ) -> Result<Self> {
        Ok(Self {
            index,
            term,
            entry_type: EntryType::Configuration,
            payload: Bytes::from(bincode::serialize(configuration)?),
        })
    }

    pub fn is_configuration(&self) -> bool {
        self.entry_type == EntryType::Configuration
    }

    /// Membership carried by a configuration entry, `None` for other types.
    pub fn decode_configuration(&self) -> Result<Option<Configuration>> {
        if !self.is_configuration() {
            return Ok(None);
        }
        bincode::deserialize(&self.payload).map(Some).map_err(|e| {
            StorageError::corruption(
                format!("log entry {}", self.index),
                format!("undecodable configuration payload: {e}"),
            )
            .into()
        })
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
