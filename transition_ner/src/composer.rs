//! Entity composition on REDUCE.
//!
//! The whole stack is popped into a span. The forward entity LSTM reads it in
//! pop order (most recently shifted token first), the backward one in reverse,
//! and the two summaries (forward first) form the entity representation. The
//! entity text follows the forward reading order. Both entity LSTMs are reset
//! before returning so nothing leaks into the next entity.

use candle_core::{Module, Tensor};
use candle_nn::Linear;
use tracing::debug;

use crate::error::{NerError, Result};
use crate::stack::{DropoutHook, StackItem, SummaryStack};

/// What one REDUCE produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedEntity {
    pub entity_type: String,
    pub text: String,
    pub width: usize,
}

pub struct EntityComposer<'m> {
    forward: Box<dyn SummaryStack<()> + 'm>,
    backward: Box<dyn SummaryStack<()> + 'm>,
    projection: &'m Linear,
    dropout: DropoutHook,
}

impl<'m> EntityComposer<'m> {
    pub fn new(
        forward: Box<dyn SummaryStack<()> + 'm>,
        backward: Box<dyn SummaryStack<()> + 'm>,
        projection: &'m Linear,
        dropout: DropoutHook,
    ) -> Self {
        Self {
            forward,
            backward,
            projection,
            dropout,
        }
    }

    /// Pop `stack` into one entity and push its projected representation onto `output`.
    pub fn reduce(
        &mut self,
        stack: &mut dyn SummaryStack<StackItem>,
        output: &mut dyn SummaryStack<StackItem>,
        relation: &Tensor,
        entity_type: &str,
    ) -> Result<ComposedEntity> {
        if stack.is_empty() {
            return Err(NerError::EmptyStack { stack: "stack" });
        }

        let mut span = Vec::with_capacity(stack.len());
        while !stack.is_empty() {
            span.push(stack.pop()?);
        }

        let text = if span.len() > 1 {
            let mut text = String::new();
            for member in span.iter() {
                self.forward.push(&member.repr, ())?;
                text.push_str(&member.label);
                text.push(' ');
            }
            for member in span.iter().rev() {
                self.backward.push(&member.repr, ())?;
            }
            text
        } else {
            let member = &span[0];
            self.forward.push(&member.repr, ())?;
            self.backward.push(&member.repr, ())?;
            member.label.clone()
        };

        let joined = Tensor::cat(&[self.forward.embedding(), self.backward.embedding()], 1);
        self.forward.clear();
        self.backward.clear();
        let entity_repr = self.dropout.apply(&joined?)?;

        let projected = self
            .projection
            .forward(&Tensor::cat(&[&entity_repr, relation], 1)?)?;
        output.push(
            &projected,
            StackItem::entity(entity_repr, text.clone(), entity_type),
        )?;

        debug!(entity_type, text = %text, width = span.len(), "reduce");
        Ok(ComposedEntity {
            entity_type: entity_type.to_string(),
            text,
            width: span.len(),
        })
    }

    /// Both entity LSTMs are empty between reductions.
    pub fn is_reset(&self) -> bool {
        self.forward.is_empty() && self.backward.is_empty()
    }
}
