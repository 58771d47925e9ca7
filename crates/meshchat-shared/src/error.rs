use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Unknown action '{0}'.")]
    UnknownType(String),
}

impl ProtocolError {
    /// Whether the input was not a usable envelope at all, as opposed to a
    /// well-formed envelope of an unrecognized type.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ProtocolError::UnknownType(_))
    }
}
