use thiserror::Error;

#[derive(Debug, Error)]
pub enum NerError {
    #[error("pop from empty {stack} stack")]
    EmptyStack { stack: &'static str },

    #[error("{action} requested with an empty buffer")]
    EmptyBuffer { action: String },

    #[error("unknown action id: {0}")]
    UnknownActionId(usize),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("unknown word id: {0}")]
    UnknownWordId(u32),

    #[error("gold actions exhausted at step {step}")]
    GoldExhausted { step: usize },

    #[error("gold actions left over: consumed {consumed} of {supplied}")]
    GoldTrailing { consumed: usize, supplied: usize },

    #[error("gold action {action} is not legal at step {step}")]
    IllegalGold { step: usize, action: String },

    #[error("decode made no progress at step {step}")]
    Stalled { step: usize },

    #[error("stack layers out of lockstep: layer1 {layer1}, layer2 {layer2}")]
    LayerMismatch { layer1: usize, layer2: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid tag sequence: {0}")]
    InvalidTags(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, NerError>;
