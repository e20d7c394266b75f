//! Action legality.
//!
//! Legality depends on stack and buffer occupancy only:
//!
//! | buffer | stack | legal                     |
//! |--------|-------|---------------------------|
//! | > 0    | > 0   | SHIFT, every REDUCE-<t>   |
//! | > 0    | 0     | SHIFT, OUT                |
//! | 0      | > 0   | every REDUCE-<t>          |
//! | 0      | 0     | terminal (OUT by the rule) |

use crate::vocab::{Action, ActionVocab};

#[derive(Debug, Clone)]
pub struct TransitionSystem {
    vocab: ActionVocab,
}

impl TransitionSystem {
    pub fn new(vocab: ActionVocab) -> Self {
        Self { vocab }
    }

    pub fn vocab(&self) -> &ActionVocab {
        &self.vocab
    }

    pub fn legal_actions(&self, stack_len: usize, buffer_len: usize) -> Vec<Action> {
        let mut legal = Vec::with_capacity(self.vocab.len());
        if buffer_len > 0 {
            legal.push(Action::Shift);
        }
        if stack_len > 0 {
            legal.extend(self.vocab.reduce_actions());
        } else {
            legal.push(Action::Out);
        }
        legal
    }

    pub fn is_terminal(stack_len: usize, buffer_len: usize) -> bool {
        stack_len == 0 && buffer_len == 0
    }

    /// Strictly decreases on every legal step: SHIFT -1, OUT -2, REDUCE -|stack|.
    pub fn progress(stack_len: usize, buffer_len: usize) -> usize {
        2 * buffer_len + stack_len
    }
}
