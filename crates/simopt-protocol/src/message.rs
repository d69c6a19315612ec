use crate::case::Case;
use crate::sync::ModelSyncObject;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;

/// Process rank. Rank 0 is the coordinator, workers are 1..size.
pub type Rank = usize;

pub const COORDINATOR: Rank = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Tag {
    Terminate,
    CaseUnevaluated,
    CaseEvalSuccess,
    CaseEvalInvalid,
    CaseEvalTimeout,
    ModelSync,
}

impl Tag {
    pub fn code(self) -> i32 {
        match self {
            Self::Terminate => 0,
            Self::CaseUnevaluated => 1,
            Self::CaseEvalSuccess => 2,
            Self::CaseEvalInvalid => 3,
            Self::CaseEvalTimeout => 4,
            Self::ModelSync => 5,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(Self::Terminate),
            1 => Ok(Self::CaseUnevaluated),
            2 => Ok(Self::CaseEvalSuccess),
            3 => Ok(Self::CaseEvalInvalid),
            4 => Ok(Self::CaseEvalTimeout),
            5 => Ok(Self::ModelSync),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }

    /// Whether a message with this tag must carry a case payload.
    pub fn carries_case(self) -> bool {
        matches!(
            self,
            Self::CaseUnevaluated | Self::CaseEvalSuccess | Self::CaseEvalInvalid
        )
    }

    pub fn is_result(self) -> bool {
        matches!(
            self,
            Self::CaseEvalSuccess | Self::CaseEvalInvalid | Self::CaseEvalTimeout
        )
    }
}

/// Which tags a receiver is prepared to handle at a given point of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    /// Worker waiting for the one-time MODEL_SYNC broadcast.
    ModelSync,
    /// Worker waiting for an assignment or shutdown.
    Assignment,
    /// Coordinator waiting for results.
    Collecting,
    /// Coordinator waiting for termination acknowledgements.
    ShuttingDown,
}

impl Phase {
    pub fn accepts(self, tag: Tag) -> bool {
        match self {
            Self::ModelSync => tag == Tag::ModelSync,
            Self::Assignment => matches!(tag, Tag::CaseUnevaluated | Tag::Terminate),
            Self::Collecting => tag.is_result(),
            Self::ShuttingDown => tag == Tag::Terminate || tag.is_result(),
        }
    }

    pub fn check(self, tag: Tag) -> Result<(), ProtocolError> {
        if self.accepts(tag) {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedTag { tag, phase: self })
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unrecognized message tag: {0}")]
    UnknownTag(i32),

    #[error("Message with tag {tag} from rank {sender} is missing its payload")]
    MissingPayload { tag: Tag, sender: Rank },

    #[error("Tag {tag} is not legal in phase '{phase}'")]
    UnexpectedTag { tag: Tag, phase: Phase },

    #[error("Payload decoding failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Transport unit: tag code, routing and an optional JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: i32,
    pub source: Rank,
    pub destination: Rank,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Envelope {
    pub fn tag(&self) -> Result<Tag, ProtocolError> {
        Tag::from_code(self.tag)
    }

    pub fn model_sync(
        mso: &ModelSyncObject,
        source: Rank,
        destination: Rank,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            tag: Tag::ModelSync.code(),
            source,
            destination,
            payload: Some(serde_json::to_value(mso)?),
        })
    }

    pub fn into_model_sync(self) -> Result<ModelSyncObject, ProtocolError> {
        Phase::ModelSync.check(self.tag()?)?;
        let sender = self.source;
        let payload = self.payload.ok_or(ProtocolError::MissingPayload {
            tag: Tag::ModelSync,
            sender,
        })?;
        Ok(serde_json::from_value(payload)?)
    }

    /// One line of JSON, newline terminated.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// A case-protocol message. MODEL_SYNC travels through
/// [`Envelope::model_sync`] instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub tag: Tag,
    pub case: Option<Case>,
    pub source: Rank,
    pub destination: Rank,
}

impl Message {
    pub fn new(tag: Tag, case: Option<Case>, source: Rank, destination: Rank) -> Self {
        Self {
            tag,
            case,
            source,
            destination,
        }
    }

    pub fn terminate(source: Rank, destination: Rank) -> Self {
        Self::new(Tag::Terminate, None, source, destination)
    }

    pub fn into_envelope(self) -> Result<Envelope, ProtocolError> {
        if self.tag == Tag::ModelSync {
            return Err(ProtocolError::UnexpectedTag {
                tag: self.tag,
                phase: Phase::Collecting,
            });
        }
        if self.tag.carries_case() && self.case.is_none() {
            return Err(ProtocolError::MissingPayload {
                tag: self.tag,
                sender: self.source,
            });
        }
        let payload = match self.case {
            Some(c) if self.tag.carries_case() => Some(serde_json::to_value(&c)?),
            _ => None,
        };
        Ok(Envelope {
            tag: self.tag.code(),
            source: self.source,
            destination: self.destination,
            payload,
        })
    }

    /// Decodes the tag and, for case-bearing tags, rebuilds the case.
    pub fn from_envelope(env: Envelope, phase: Phase) -> Result<Self, ProtocolError> {
        let tag = env.tag()?;
        phase.check(tag)?;
        let case = if tag.carries_case() {
            let payload = env.payload.ok_or(ProtocolError::MissingPayload {
                tag,
                sender: env.source,
            })?;
            Some(serde_json::from_value::<Case>(payload)?)
        } else {
            None
        };
        Ok(Self {
            tag,
            case,
            source: env.source,
            destination: env.destination,
        })
    }
}

/// First line on every stream connection: the rank assigned to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub rank: Rank,
    pub size: usize,
}
