//! transition_ner
//!
//! Transition-based named-entity recognition over stack-LSTM state.
//!
//! - Tokens are loaded onto a buffer and consumed by SHIFT, OUT and
//!   REDUCE-<type> actions until buffer and stack are both empty.
//! - Buffer, stack, output and action history are [`SummaryStack`]s whose top
//!   always carries an LSTM summary of their contents.
//! - A [`Driver`] performs one transition per call; an [`ActionScorer`] ranks
//!   legal actions and an [`ActionPolicy`] picks the one that advances state
//!   (teacher-forced for training, greedy for inference).
//! - A REDUCE composes the stack contents into one entity through forward and
//!   backward entity LSTMs ([`EntityComposer`]).
//!
//! Token encoding beyond a plain word lookup, vocabulary building and the
//! training loop live outside this crate.

pub mod batch;
pub mod composer;
pub mod config;
pub mod decode;
pub mod embed;
pub mod error;
pub mod model;
pub mod scorer;
pub mod spans;
pub mod stack;
pub mod transition;
pub mod vocab;

pub use batch::{BatchTrace, Lane};
pub use composer::{ComposedEntity, EntityComposer};
pub use config::NerConfig;
pub use decode::{
    ActionPolicy, Choice, DecodeFrame, DecodeMode, DecodeTrace, Driver, FrameState, Greedy,
    Scored, StepOutcome, StepResult, TeacherForced,
};
pub use embed::{Lexicon, Token, TokenEncoder, WordEmbedder};
pub use error::{NerError, Result};
pub use model::TransitionNer;
pub use scorer::{ActionScorer, MlpScorer, StateFeatures};
pub use spans::{oracle_actions, spans_from_actions, spans_from_bio, EntitySpan};
pub use stack::{
    DropoutHook, StackCell, StackFrame, StackItem, StackLstm, SummaryStack, TwoLayerStackLstm,
};
pub use transition::TransitionSystem;
pub use vocab::{Action, ActionVocab};
