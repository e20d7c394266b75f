//! Conversions between action sequences and labeled entity spans.

use crate::error::{NerError, Result};
use crate::vocab::{Action, ActionVocab};

/// Half-open token range `[start, end)` labeled with an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntitySpan {
    pub start: usize,
    pub end: usize,
    pub kind: String,
}

impl EntitySpan {
    pub fn new(start: usize, end: usize, kind: impl Into<String>) -> Self {
        Self {
            start,
            end,
            kind: kind.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Replay `actions` over `n_tokens` positions and collect the REDUCE spans.
pub fn spans_from_actions(
    actions: &[Action],
    vocab: &ActionVocab,
    n_tokens: usize,
) -> Result<Vec<EntitySpan>> {
    let mut next = 0;
    let mut open: Option<usize> = None;
    let mut spans = Vec::new();

    for &action in actions {
        match action {
            Action::Shift | Action::Out if next >= n_tokens => {
                return Err(NerError::EmptyBuffer {
                    action: vocab.name(action),
                });
            }
            Action::Shift => {
                open.get_or_insert(next);
                next += 1;
            }
            Action::Out => next += 1,
            Action::Reduce(_) => {
                let start = open.take().ok_or(NerError::EmptyStack { stack: "stack" })?;
                let kind = vocab
                    .entity_type(action)
                    .ok_or_else(|| NerError::UnknownAction(vocab.name(action)))?;
                spans.push(EntitySpan::new(start, next, kind));
            }
        }
    }
    Ok(spans)
}

/// Gold action sequence for a span annotation: entity tokens are shifted and
/// reduced with their type, everything else goes straight out.
pub fn oracle_actions(
    n_tokens: usize,
    spans: &[EntitySpan],
    vocab: &ActionVocab,
) -> Result<Vec<Action>> {
    let mut sorted: Vec<&EntitySpan> = spans.iter().collect();
    sorted.sort_by_key(|s| s.start);

    let mut actions = Vec::with_capacity(n_tokens + spans.len());
    let mut next = 0;
    for span in sorted {
        if span.is_empty() || span.start < next || span.end > n_tokens {
            return Err(NerError::InvalidTags(format!(
                "span {}..{} overlaps or exceeds {} tokens",
                span.start, span.end, n_tokens
            )));
        }
        actions.extend(std::iter::repeat(Action::Out).take(span.start - next));
        actions.extend(std::iter::repeat(Action::Shift).take(span.len()));
        actions.push(vocab.reduce(&span.kind)?);
        next = span.end;
    }
    actions.extend(std::iter::repeat(Action::Out).take(n_tokens - next));
    Ok(actions)
}

/// Read BIO / IOB tags (`B-PER`, `I-PER`, `O`) into spans. An `I-` tag that
/// does not continue a span of the same type opens a new one.
pub fn spans_from_bio<S: AsRef<str>>(tags: &[S]) -> Result<Vec<EntitySpan>> {
    let mut spans: Vec<EntitySpan> = Vec::new();
    let mut current: Option<EntitySpan> = None;

    for (i, tag) in tags.iter().enumerate() {
        let tag = tag.as_ref();
        if tag == "O" {
            spans.extend(current.take());
            continue;
        }
        let (prefix, kind) = tag
            .split_once('-')
            .filter(|(_, kind)| !kind.is_empty())
            .ok_or_else(|| NerError::InvalidTags(format!("malformed tag {tag:?} at {i}")))?;
        match prefix {
            "B" => {
                spans.extend(current.take());
                current = Some(EntitySpan::new(i, i + 1, kind));
            }
            "I" => match current.as_mut() {
                Some(span) if span.kind == kind => span.end = i + 1,
                _ => {
                    spans.extend(current.take());
                    current = Some(EntitySpan::new(i, i + 1, kind));
                }
            },
            _ => {
                return Err(NerError::InvalidTags(format!(
                    "unknown tag prefix {prefix:?} at {i}"
                )))
            }
        }
    }
    spans.extend(current);
    Ok(spans)
}
