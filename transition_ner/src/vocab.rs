//! Closed action inventory and its id/name tables.

use std::collections::HashMap;
use std::fmt;

use crate::error::{NerError, Result};

const SHIFT: &str = "SHIFT";
const OUT: &str = "OUT";
const REDUCE_PREFIX: &str = "REDUCE-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Move the buffer's top token onto the stack.
    Shift,
    /// Move the buffer's top token straight to the output.
    Out,
    /// Close the stack as an entity; holds the entity type index.
    Reduce(usize),
}

impl Action {
    pub fn is_reduce(self) -> bool {
        matches!(self, Action::Reduce(_))
    }
}

/// Action vocabulary built once from the entity-type list.
///
/// Ids are dense: SHIFT = 0, OUT = 1, REDUCE-<type i> = 2 + i.
#[derive(Debug, Clone)]
pub struct ActionVocab {
    entity_types: Vec<String>,
    type_index: HashMap<String, usize>,
}

impl ActionVocab {
    pub fn new<S: AsRef<str>>(entity_types: &[S]) -> Self {
        let entity_types: Vec<String> = entity_types.iter().map(|t| t.as_ref().to_string()).collect();
        let type_index = entity_types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Self {
            entity_types,
            type_index,
        }
    }

    /// Size of the action space.
    pub fn len(&self) -> usize {
        self.entity_types.len() + 2
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn entity_types(&self) -> &[String] {
        &self.entity_types
    }

    pub fn id(&self, action: Action) -> usize {
        match action {
            Action::Shift => 0,
            Action::Out => 1,
            Action::Reduce(kind) => 2 + kind,
        }
    }

    pub fn action(&self, id: usize) -> Result<Action> {
        match id {
            0 => Ok(Action::Shift),
            1 => Ok(Action::Out),
            n if n - 2 < self.entity_types.len() => Ok(Action::Reduce(n - 2)),
            n => Err(NerError::UnknownActionId(n)),
        }
    }

    pub fn reduce(&self, entity_type: &str) -> Result<Action> {
        self.type_index
            .get(entity_type)
            .map(|&i| Action::Reduce(i))
            .ok_or_else(|| NerError::UnknownEntityType(entity_type.to_string()))
    }

    /// Every REDUCE action, in entity-type order.
    pub fn reduce_actions(&self) -> impl Iterator<Item = Action> + '_ {
        (0..self.entity_types.len()).map(Action::Reduce)
    }

    pub fn entity_type(&self, action: Action) -> Option<&str> {
        match action {
            Action::Reduce(kind) => self.entity_types.get(kind).map(String::as_str),
            _ => None,
        }
    }

    pub fn name(&self, action: Action) -> String {
        match action {
            Action::Shift => SHIFT.to_string(),
            Action::Out => OUT.to_string(),
            Action::Reduce(kind) => match self.entity_types.get(kind) {
                Some(t) => format!("{REDUCE_PREFIX}{t}"),
                None => format!("{REDUCE_PREFIX}#{kind}"),
            },
        }
    }

    pub fn parse(&self, name: &str) -> Result<Action> {
        match name {
            SHIFT => Ok(Action::Shift),
            OUT => Ok(Action::Out),
            _ => match name.strip_prefix(REDUCE_PREFIX) {
                Some(kind) => self.reduce(kind),
                None => Err(NerError::UnknownAction(name.to_string())),
            },
        }
    }

    pub fn parse_all<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Action>> {
        names.iter().map(|n| self.parse(n.as_ref())).collect()
    }

    /// Borrowing display helper.
    pub fn display(&self, action: Action) -> ActionName<'_> {
        ActionName { vocab: self, action }
    }
}

pub struct ActionName<'a> {
    vocab: &'a ActionVocab,
    action: Action,
}

impl fmt::Display for ActionName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.vocab.name(self.action))
    }
}
