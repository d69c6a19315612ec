use crate::case::VariableKind;
use crate::token::Token;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Variable display name -> coordinator-assigned identifier, one mapping per
/// variable kind. Built once on the coordinator and broadcast verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelSyncObject {
    pub binary_variable_ids: BTreeMap<String, Token>,
    pub integer_variable_ids: BTreeMap<String, Token>,
    pub real_variable_ids: BTreeMap<String, Token>,
}

impl ModelSyncObject {
    pub fn mapping(&self, kind: VariableKind) -> &BTreeMap<String, Token> {
        match kind {
            VariableKind::Binary => &self.binary_variable_ids,
            VariableKind::Integer => &self.integer_variable_ids,
            VariableKind::Real => &self.real_variable_ids,
        }
    }

    pub fn mapping_mut(&mut self, kind: VariableKind) -> &mut BTreeMap<String, Token> {
        match kind {
            VariableKind::Binary => &mut self.binary_variable_ids,
            VariableKind::Integer => &mut self.integer_variable_ids,
            VariableKind::Real => &mut self.real_variable_ids,
        }
    }

    pub fn len(&self) -> usize {
        self.binary_variable_ids.len() + self.integer_variable_ids.len() + self.real_variable_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deterministic digest of all three mappings.
    ///
    /// Both sides log it after synchronization so a mismatch is visible in the
    /// coordinator and worker logs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (label, map) in [
            ("binary", &self.binary_variable_ids),
            ("integer", &self.integer_variable_ids),
            ("real", &self.real_variable_ids),
        ] {
            hasher.update(label.as_bytes());
            for (name, id) in map {
                hasher.update(name.as_bytes());
                hasher.update([0u8]);
                hasher.update(id.to_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}
