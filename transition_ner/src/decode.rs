//! Decode controller.
//!
//! - A [`Driver`] owns one sequence's stacks and performs exactly **one**
//!   transition per [`Driver::step`] call.
//! - The scoring capability ([`ActionScorer`]) is consulted only when more than
//!   one action is legal.
//! - The [`ActionPolicy`] decides which action actually advances the state:
//!   [`TeacherForced`] applies the gold action, [`Greedy`] applies the argmax.
//!
//! Every step returns a uniform [`StepResult`] envelope.

use candle_core::Tensor;
use tracing::{debug, instrument};

use crate::composer::{ComposedEntity, EntityComposer};
use crate::embed::Token;
use crate::error::{NerError, Result};
use crate::model::TransitionNer;
use crate::scorer::{argmax, ActionScorer, StateFeatures};
use crate::stack::{StackItem, SummaryStack};
use crate::transition::TransitionSystem;
use crate::vocab::{Action, ActionVocab};

#[derive(Debug, Clone, Copy)]
pub enum DecodeMode<'g> {
    /// Teacher forcing over the supplied gold actions, dropout active.
    Train { gold: &'g [Action] },
    /// Greedy decoding, no gold labels.
    Predict,
}

impl DecodeMode<'_> {
    pub fn is_training(&self) -> bool {
        matches!(self, DecodeMode::Train { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Decode,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Advanced,
    Finished,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub outcome: StepOutcome,
    pub action: Option<Action>,
    /// Whether the scorer was consulted for this step.
    pub scored: bool,
    pub entity: Option<ComposedEntity>,
}

impl StepResult {
    pub fn advanced(action: Action, scored: bool, entity: Option<ComposedEntity>) -> Self {
        Self {
            outcome: StepOutcome::Advanced,
            action: Some(action),
            scored,
            entity,
        }
    }

    pub fn finished() -> Self {
        Self {
            outcome: StepOutcome::Finished,
            action: None,
            scored: false,
            entity: None,
        }
    }
}

/// Restricted log-distribution for one scored step.
#[derive(Debug, Clone)]
pub struct Scored {
    pub log_probs: Tensor,
    pub values: Vec<f32>,
}

/// A policy's verdict for one step.
#[derive(Debug, Clone)]
pub struct Choice {
    /// The action that advances the state.
    pub applied: Action,
    /// The model's own pick (argmax, or the only legal action).
    pub predicted: Action,
    /// Log-probability of the gold action on scored training steps.
    pub gold_log_prob: Option<Tensor>,
}

/// Policy oracle. Must never execute. Called once per non-terminal step.
pub trait ActionPolicy {
    fn is_training(&self) -> bool;

    fn choose(&mut self, step: usize, legal: &[Action], scored: Option<&Scored>) -> Result<Choice>;

    /// Called once the terminal state is reached after `steps` transitions.
    fn finish(&self, _steps: usize) -> Result<()> {
        Ok(())
    }
}

fn model_pick(step: usize, legal: &[Action], scored: Option<&Scored>) -> Result<Action> {
    let index = match scored {
        Some(s) => argmax(&s.values),
        None => Some(0),
    };
    index
        .and_then(|i| legal.get(i).copied())
        .ok_or(NerError::Stalled { step })
}

/// Advance with the supervised action; accumulate its log-probability.
#[derive(Debug, Clone)]
pub struct TeacherForced<'g> {
    gold: &'g [Action],
    vocab: &'g ActionVocab,
}

impl<'g> TeacherForced<'g> {
    pub fn new(gold: &'g [Action], vocab: &'g ActionVocab) -> Self {
        Self { gold, vocab }
    }
}

impl ActionPolicy for TeacherForced<'_> {
    fn is_training(&self) -> bool {
        true
    }

    fn choose(&mut self, step: usize, legal: &[Action], scored: Option<&Scored>) -> Result<Choice> {
        let gold = *self.gold.get(step).ok_or(NerError::GoldExhausted { step })?;
        let position = legal
            .iter()
            .position(|&a| a == gold)
            .ok_or_else(|| NerError::IllegalGold {
                step,
                action: self.vocab.name(gold),
            })?;

        let gold_log_prob = match scored {
            Some(s) => Some(s.log_probs.get(position)?),
            None => None,
        };
        Ok(Choice {
            applied: gold,
            predicted: model_pick(step, legal, scored)?,
            gold_log_prob,
        })
    }

    fn finish(&self, steps: usize) -> Result<()> {
        if steps != self.gold.len() {
            return Err(NerError::GoldTrailing {
                consumed: steps,
                supplied: self.gold.len(),
            });
        }
        Ok(())
    }
}

/// Advance with the model's own argmax.
#[derive(Debug, Clone, Copy, Default)]
pub struct Greedy;

impl ActionPolicy for Greedy {
    fn is_training(&self) -> bool {
        false
    }

    fn choose(&mut self, step: usize, legal: &[Action], scored: Option<&Scored>) -> Result<Choice> {
        let predicted = model_pick(step, legal, scored)?;
        Ok(Choice {
            applied: predicted,
            predicted,
            gold_log_prob: None,
        })
    }
}

/// Everything one decode produced.
#[derive(Debug, Clone)]
pub struct DecodeTrace {
    /// The model's pick at every step.
    pub predicted: Vec<Action>,
    /// The action that advanced the state at every step.
    pub applied: Vec<Action>,
    /// Negative summed gold log-probability over scored steps; `None` when no
    /// step was scored or when decoding greedily.
    pub loss: Option<Tensor>,
    /// Steps where the model's pick equals the applied action.
    pub correct: usize,
    pub scored_steps: usize,
    pub entities: Vec<ComposedEntity>,
    /// Output payloads, left to right.
    pub output: Vec<StackItem>,
}

impl DecodeTrace {
    pub fn steps(&self) -> usize {
        self.applied.len()
    }

    pub fn loss_value(&self) -> Result<Option<f32>> {
        match &self.loss {
            Some(loss) => Ok(Some(loss.to_scalar::<f32>()?)),
            None => Ok(None),
        }
    }
}

/// Per-sequence state: the four live stacks, the entity composer and the
/// running trace. Created at decode start, dropped at decode end.
pub struct DecodeFrame<'m> {
    pub state: FrameState,
    pub step: usize,
    buffer: Box<dyn SummaryStack<StackItem> + 'm>,
    stack: Box<dyn SummaryStack<StackItem> + 'm>,
    output: Box<dyn SummaryStack<StackItem> + 'm>,
    history: Box<dyn SummaryStack<Action> + 'm>,
    composer: EntityComposer<'m>,
    predicted: Vec<Action>,
    applied: Vec<Action>,
    losses: Vec<Tensor>,
    correct: usize,
    scored_steps: usize,
    entities: Vec<ComposedEntity>,
}

impl<'m> DecodeFrame<'m> {
    fn open(model: &'m TransitionNer, train: bool) -> Result<Self> {
        let hook = model.hook(train);
        let empty = &model.empty;
        Ok(Self {
            state: FrameState::Decode,
            step: 0,
            buffer: model.buffer_cell.open("buffer", empty, hook.clone())?,
            stack: model.stack_cell.open("stack", empty, hook.clone())?,
            output: model.output_cell.open("output", empty, hook.clone())?,
            history: model.action_cell.open("history", empty, hook.clone())?,
            composer: EntityComposer::new(
                model.entity_forward_cell.open("entity_forward", empty, hook.clone())?,
                model.entity_backward_cell.open("entity_backward", empty, hook.clone())?,
                &model.entity_to_output,
                hook,
            ),
            predicted: Vec::new(),
            applied: Vec::new(),
            losses: Vec::new(),
            correct: 0,
            scored_steps: 0,
            entities: Vec::new(),
        })
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn applied(&self) -> &[Action] {
        &self.applied
    }

    fn features(&self) -> StateFeatures {
        StateFeatures {
            buffer: self.buffer.embedding(),
            stack: self.stack.embedding(),
            output: self.output.embedding(),
            history: self.history.embedding(),
        }
    }
}

/// Drives one sequence from a full buffer to the terminal state.
pub struct Driver<'m, S, P>
where
    S: ActionScorer,
    P: ActionPolicy,
{
    model: &'m TransitionNer,
    pub frame: DecodeFrame<'m>,
    pub scorer: S,
    pub policy: P,
}

impl<'m, S, P> Driver<'m, S, P>
where
    S: ActionScorer,
    P: ActionPolicy,
{
    /// Open fresh stacks and load `tokens` into the buffer, first token on top.
    pub fn new(model: &'m TransitionNer, tokens: &[Token], scorer: S, policy: P) -> Result<Self> {
        let mut frame = DecodeFrame::open(model, policy.is_training())?;
        for token in tokens.iter().rev() {
            frame
                .buffer
                .push(&token.repr, StackItem::token(token.repr.clone(), token.text.clone()))?;
        }
        Ok(Self {
            model,
            frame,
            scorer,
            policy,
        })
    }

    pub fn step(&mut self) -> Result<StepResult> {
        if self.frame.state == FrameState::Finished {
            return Ok(StepResult::finished());
        }

        let step = self.frame.step;
        let (stack_len, buffer_len) = (self.frame.stack.len(), self.frame.buffer.len());
        if TransitionSystem::is_terminal(stack_len, buffer_len) {
            self.policy.finish(step)?;
            self.frame.state = FrameState::Finished;
            return Ok(StepResult::finished());
        }

        let legal = self.model.system().legal_actions(stack_len, buffer_len);
        let scored = if legal.len() > 1 {
            let vocab = self.model.vocab();
            let ids: Vec<u32> = legal.iter().map(|&a| vocab.id(a) as u32).collect();
            let log_probs = self
                .scorer
                .score(&self.frame.features(), &ids, self.policy.is_training())?;
            let values = log_probs.to_vec1::<f32>()?;
            Some(Scored { log_probs, values })
        } else {
            None
        };

        let choice = self.policy.choose(step, &legal, scored.as_ref())?;
        let entity = self.execute(choice.applied)?;

        let frame = &mut self.frame;
        if let Some(log_prob) = choice.gold_log_prob {
            frame.losses.push(log_prob);
        }
        if scored.is_some() {
            frame.scored_steps += 1;
        }
        if choice.predicted == choice.applied {
            frame.correct += 1;
        }
        frame.predicted.push(choice.predicted);
        frame.applied.push(choice.applied);
        if let Some(entity) = &entity {
            frame.entities.push(entity.clone());
        }

        let before = TransitionSystem::progress(stack_len, buffer_len);
        let after = TransitionSystem::progress(frame.stack.len(), frame.buffer.len());
        if after >= before {
            return Err(NerError::Stalled { step });
        }
        frame.step += 1;

        debug!(
            step,
            action = %self.model.vocab().display(choice.applied),
            scored = scored.is_some(),
            "step"
        );
        Ok(StepResult::advanced(choice.applied, scored.is_some(), entity))
    }

    fn execute(&mut self, action: Action) -> Result<Option<ComposedEntity>> {
        let vocab = self.model.vocab();
        let frame = &mut self.frame;
        match action {
            Action::Shift | Action::Out if frame.buffer.is_empty() => {
                return Err(NerError::EmptyBuffer {
                    action: vocab.name(action),
                });
            }
            Action::Reduce(_) if frame.stack.is_empty() => {
                return Err(NerError::EmptyStack { stack: "stack" });
            }
            _ => {}
        }

        let (action_repr, relation) = self.model.action_inputs(action, self.policy.is_training())?;
        frame.history.push(&action_repr, action)?;

        match action {
            Action::Shift => {
                let token = frame.buffer.pop()?;
                frame.stack.push(&token.repr.clone(), token)?;
                Ok(None)
            }
            Action::Out => {
                let token = frame.buffer.pop()?;
                frame.output.push(&token.repr.clone(), token)?;
                Ok(None)
            }
            Action::Reduce(_) => {
                let kind = vocab
                    .entity_type(action)
                    .ok_or_else(|| NerError::UnknownAction(vocab.name(action)))?;
                let entity = frame.composer.reduce(
                    frame.stack.as_mut(),
                    frame.output.as_mut(),
                    &relation,
                    kind,
                )?;
                Ok(Some(entity))
            }
        }
    }

    /// Step until the terminal state and collect the trace.
    pub fn run_to_completion(mut self) -> Result<DecodeTrace> {
        loop {
            let r = self.step()?;
            if r.outcome == StepOutcome::Finished {
                break;
            }
        }
        self.into_trace()
    }

    fn into_trace(self) -> Result<DecodeTrace> {
        let mut frame = self.frame;
        let loss = if frame.losses.is_empty() {
            None
        } else {
            Some(Tensor::stack(frame.losses.as_slice(), 0)?.sum_all()?.neg()?)
        };

        let mut output = Vec::with_capacity(frame.output.len());
        while !frame.output.is_empty() {
            output.push(frame.output.pop()?);
        }
        output.reverse();

        Ok(DecodeTrace {
            predicted: frame.predicted,
            applied: frame.applied,
            loss,
            correct: frame.correct,
            scored_steps: frame.scored_steps,
            entities: frame.entities,
            output,
        })
    }
}

impl TransitionNer {
    /// Decode one sequence with the model's own scorer.
    #[instrument(skip_all, fields(tokens = tokens.len(), train = mode.is_training()))]
    pub fn decode(&self, tokens: &[Token], mode: DecodeMode<'_>) -> Result<DecodeTrace> {
        self.decode_with(tokens, mode, &self.scorer)
    }

    /// Decode one sequence with a caller-supplied scorer.
    pub fn decode_with<S: ActionScorer>(
        &self,
        tokens: &[Token],
        mode: DecodeMode<'_>,
        scorer: S,
    ) -> Result<DecodeTrace> {
        match mode {
            DecodeMode::Train { gold } => {
                let policy = TeacherForced::new(gold, self.vocab());
                Driver::new(self, tokens, scorer, policy)?.run_to_completion()
            }
            DecodeMode::Predict => Driver::new(self, tokens, scorer, Greedy)?.run_to_completion(),
        }
    }
}
