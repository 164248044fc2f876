use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::message::{ChatMessage, Role};

/// One continuation: the input turns echoed back, followed by the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSequence {
    pub generated_text: Vec<ChatMessage>,
}

/// What a generator returns for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationResponse {
    pub sequences: Vec<GeneratedSequence>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseShapeError {
    #[error("generation response contains no sequences")]
    NoSequences,
    #[error("generated_text has {found} entries, expected at least 2")]
    MissingReply { found: usize },
    #[error("expected an assistant turn after the question, found role {found:?}")]
    UnexpectedRole { found: Role },
}

impl GenerationResponse {
    pub fn single(generated_text: Vec<ChatMessage>) -> Self {
        Self {
            sequences: vec![GeneratedSequence { generated_text }],
        }
    }

    /// The assistant reply: second turn of the first sequence.
    pub fn answer(&self) -> Result<&str, ResponseShapeError> {
        let first = self
            .sequences
            .first()
            .ok_or(ResponseShapeError::NoSequences)?;

        let reply = first
            .generated_text
            .get(1)
            .ok_or(ResponseShapeError::MissingReply {
                found: first.generated_text.len(),
            })?;

        if reply.role != Role::Assistant {
            return Err(ResponseShapeError::UnexpectedRole { found: reply.role });
        }

        Ok(reply.content.as_str())
    }
}
