//! Stack LSTMs.
//!
//! A stack whose top always exposes a recurrent summary of everything pushed
//! beneath it. Summaries are computed once at push time and stored per frame,
//! so push and pop are O(1) and popping restores the previous summary for free.
//!
//! - [`StackLstm`] runs one LSTM cell.
//! - [`TwoLayerStackLstm`] runs two cells in series and keeps both layers in lockstep.
//! - [`StackCell`] owns the cell parameters and opens fresh stacks over them.

use candle_core::Tensor;
use candle_nn::rnn::{LSTMConfig, LSTMState, LSTM, RNN};
use candle_nn::{Dropout, VarBuilder};
use tracing::trace;

use crate::error::{NerError, Result};

/// Stochastic regularization applied to the previous top summary right before
/// a new element is combined with it. Identity unless training.
#[derive(Debug, Clone)]
pub struct DropoutHook {
    dropout: Dropout,
    p: f32,
    train: bool,
}

impl DropoutHook {
    pub fn new(p: f32, train: bool) -> Self {
        Self {
            dropout: Dropout::new(p),
            p,
            train,
        }
    }

    pub fn inactive() -> Self {
        Self::new(0.0, false)
    }

    pub fn is_active(&self) -> bool {
        self.train && self.p > 0.0
    }

    pub fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        if !self.is_active() {
            return Ok(xs.clone());
        }
        Ok(self.dropout.forward(xs, true)?)
    }
}

/// Representation plus surface text carried by token and entity frames.
#[derive(Debug, Clone)]
pub struct StackItem {
    pub repr: Tensor,
    pub label: String,
    /// Entity type name for composed entities, `None` for plain tokens.
    pub entity_type: Option<String>,
}

impl StackItem {
    pub fn token(repr: Tensor, label: impl Into<String>) -> Self {
        Self {
            repr,
            label: label.into(),
            entity_type: None,
        }
    }

    pub fn entity(repr: Tensor, label: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            repr,
            label: label.into(),
            entity_type: Some(entity_type.into()),
        }
    }

    pub fn is_entity(&self) -> bool {
        self.entity_type.is_some()
    }
}

/// Recurrent state at push time plus the pushed payload.
#[derive(Debug, Clone)]
pub struct StackFrame<P> {
    pub state: LSTMState,
    pub payload: P,
}

/// Common surface of the stack variants.
pub trait SummaryStack<P> {
    /// Combine `item` with the current top summary and push the result.
    fn push(&mut self, item: &Tensor, payload: P) -> Result<()>;

    /// Remove the top frame and return its payload. Fails on an empty stack.
    fn pop(&mut self) -> Result<P>;

    /// Summary of the top frame, or the designated empty value.
    fn embedding(&self) -> Tensor;

    /// Drop every frame, top first, back to the freshly constructed state.
    fn clear(&mut self);

    /// Number of pushed frames; the initial state is not counted.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single-cell stack LSTM.
#[derive(Debug)]
pub struct StackLstm<'m, P> {
    name: &'static str,
    cell: &'m LSTM,
    hook: DropoutHook,
    initial: LSTMState,
    empty: Tensor,
    frames: Vec<StackFrame<P>>,
}

impl<'m, P> StackLstm<'m, P> {
    pub fn new(name: &'static str, cell: &'m LSTM, empty: Tensor, hook: DropoutHook) -> Result<Self> {
        let initial = cell.zero_state(1)?;
        Ok(Self {
            name,
            cell,
            hook,
            initial,
            empty,
            frames: Vec::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn top_state(&self) -> &LSTMState {
        self.frames
            .last()
            .map(|f| &f.state)
            .unwrap_or(&self.initial)
    }

    /// Payloads from bottom to top.
    pub fn payloads(&self) -> impl DoubleEndedIterator<Item = &P> {
        self.frames.iter().map(|f| &f.payload)
    }
}

impl<P> SummaryStack<P> for StackLstm<'_, P> {
    fn push(&mut self, item: &Tensor, payload: P) -> Result<()> {
        let top = self.top_state();
        let h = self.hook.apply(&top.h)?;
        let state = self.cell.step(item, &LSTMState::new(h, top.c.clone()))?;
        self.frames.push(StackFrame { state, payload });
        trace!(stack = self.name, len = self.frames.len(), "push");
        Ok(())
    }

    fn pop(&mut self) -> Result<P> {
        self.frames
            .pop()
            .map(|f| f.payload)
            .ok_or(NerError::EmptyStack { stack: self.name })
    }

    fn embedding(&self) -> Tensor {
        match self.frames.last() {
            Some(frame) => frame.state.h.clone(),
            None => self.empty.clone(),
        }
    }

    fn clear(&mut self) {
        while self.frames.pop().is_some() {}
    }

    fn len(&self) -> usize {
        self.frames.len()
    }
}

/// Two cells in series: layer 1 reads the pushed item, layer 2 reads layer 1's
/// new summary. Payloads live on layer 2.
#[derive(Debug)]
pub struct TwoLayerStackLstm<'m, P> {
    name: &'static str,
    lower: &'m LSTM,
    upper: &'m LSTM,
    hook: DropoutHook,
    lower_initial: LSTMState,
    upper_initial: LSTMState,
    empty: Tensor,
    layer1: Vec<LSTMState>,
    layer2: Vec<StackFrame<P>>,
}

impl<'m, P> TwoLayerStackLstm<'m, P> {
    pub fn new(
        name: &'static str,
        lower: &'m LSTM,
        upper: &'m LSTM,
        empty: Tensor,
        hook: DropoutHook,
    ) -> Result<Self> {
        Ok(Self {
            name,
            lower,
            upper,
            hook,
            lower_initial: lower.zero_state(1)?,
            upper_initial: upper.zero_state(1)?,
            empty,
            layer1: Vec::new(),
            layer2: Vec::new(),
        })
    }

    fn check_lockstep(&self) -> Result<()> {
        if self.layer1.len() != self.layer2.len() {
            return Err(NerError::LayerMismatch {
                layer1: self.layer1.len(),
                layer2: self.layer2.len(),
            });
        }
        Ok(())
    }
}

impl<P> SummaryStack<P> for TwoLayerStackLstm<'_, P> {
    fn push(&mut self, item: &Tensor, payload: P) -> Result<()> {
        self.check_lockstep()?;

        let top1 = self.layer1.last().unwrap_or(&self.lower_initial);
        let h1 = self.hook.apply(&top1.h)?;
        let state1 = self.lower.step(item, &LSTMState::new(h1, top1.c.clone()))?;

        let top2 = self
            .layer2
            .last()
            .map(|f| &f.state)
            .unwrap_or(&self.upper_initial);
        let h2 = self.hook.apply(&top2.h)?;
        let state2 = self.upper.step(&state1.h, &LSTMState::new(h2, top2.c.clone()))?;

        self.layer1.push(state1);
        self.layer2.push(StackFrame {
            state: state2,
            payload,
        });
        trace!(stack = self.name, len = self.layer2.len(), "push");
        Ok(())
    }

    fn pop(&mut self) -> Result<P> {
        self.check_lockstep()?;
        if self.layer2.is_empty() {
            return Err(NerError::EmptyStack { stack: self.name });
        }
        self.layer1.pop();
        self.layer2
            .pop()
            .map(|f| f.payload)
            .ok_or(NerError::EmptyStack { stack: self.name })
    }

    fn embedding(&self) -> Tensor {
        match self.layer2.last() {
            Some(frame) => frame.state.h.clone(),
            None => self.empty.clone(),
        }
    }

    fn clear(&mut self) {
        while self.layer2.pop().is_some() {
            self.layer1.pop();
        }
        self.layer1.clear();
    }

    fn len(&self) -> usize {
        self.layer2.len()
    }
}

/// LSTM parameters behind one of the model's stacks.
#[derive(Debug, Clone)]
pub enum StackCell {
    Single(LSTM),
    TwoLayer { lower: LSTM, upper: LSTM },
}

impl StackCell {
    pub fn new(in_dim: usize, hidden_dim: usize, layers: usize, vb: VarBuilder) -> Result<Self> {
        let lower = candle_nn::lstm(in_dim, hidden_dim, LSTMConfig::default(), vb.clone())?;
        if layers < 2 {
            return Ok(StackCell::Single(lower));
        }
        let config = LSTMConfig {
            layer_idx: 1,
            ..Default::default()
        };
        let upper = candle_nn::lstm(hidden_dim, hidden_dim, config, vb)?;
        Ok(StackCell::TwoLayer { lower, upper })
    }

    /// Open a fresh, empty stack over these parameters.
    pub fn open<'m, P: 'm>(
        &'m self,
        name: &'static str,
        empty: &Tensor,
        hook: DropoutHook,
    ) -> Result<Box<dyn SummaryStack<P> + 'm>> {
        Ok(match self {
            StackCell::Single(cell) => Box::new(StackLstm::new(name, cell, empty.clone(), hook)?),
            StackCell::TwoLayer { lower, upper } => Box::new(TwoLayerStackLstm::new(
                name,
                lower,
                upper,
                empty.clone(),
                hook,
            )?),
        })
    }
}
