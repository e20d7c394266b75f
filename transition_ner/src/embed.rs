//! Token representations.
//!
//! The decoder treats token vectors as opaque; anything implementing
//! [`TokenEncoder`] can feed it. [`WordEmbedder`] is the plain word-lookup
//! encoder, keyed by a [`Lexicon`].

use std::collections::HashMap;

use candle_core::{Module, Tensor};
use candle_nn::{Embedding, VarBuilder};

use crate::error::{NerError, Result};
use crate::stack::DropoutHook;

/// One input token: surface text plus its `(1, token_dim)` representation.
#[derive(Debug, Clone)]
pub struct Token {
    pub text: String,
    pub repr: Tensor,
}

impl Token {
    pub fn new(text: impl Into<String>, repr: Tensor) -> Self {
        Self {
            text: text.into(),
            repr,
        }
    }
}

pub trait TokenEncoder {
    fn encode(&self, words: &[&str], train: bool) -> Result<Vec<Token>>;
}

/// Word to id table. Id 0 is reserved for unknown words.
#[derive(Debug, Clone)]
pub struct Lexicon {
    words: Vec<String>,
    index: HashMap<String, u32>,
}

impl Lexicon {
    pub const UNK: u32 = 0;
    const UNK_WORD: &'static str = "<unk>";

    pub fn new() -> Self {
        let mut lexicon = Self {
            words: Vec::new(),
            index: HashMap::new(),
        };
        lexicon.insert(Self::UNK_WORD);
        lexicon
    }

    pub fn from_sentences<'a, I, S>(sentences: I) -> Self
    where
        I: IntoIterator<Item = &'a [S]>,
        S: AsRef<str> + 'a,
    {
        let mut lexicon = Self::new();
        for sentence in sentences {
            for word in sentence {
                lexicon.insert(word.as_ref());
            }
        }
        lexicon
    }

    pub fn insert(&mut self, word: &str) -> u32 {
        if let Some(&id) = self.index.get(word) {
            return id;
        }
        let id = self.words.len() as u32;
        self.words.push(word.to_string());
        self.index.insert(word.to_string(), id);
        id
    }

    pub fn id(&self, word: &str) -> u32 {
        self.index.get(word).copied().unwrap_or(Self::UNK)
    }

    pub fn word(&self, id: u32) -> Result<&str> {
        self.words
            .get(id as usize)
            .map(String::as_str)
            .ok_or(NerError::UnknownWordId(id))
    }

    /// Known words, not counting the reserved unknown entry.
    pub fn len(&self) -> usize {
        self.words.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows needed in an embedding table indexed by this lexicon's ids.
    pub fn vocab_size(&self) -> usize {
        self.words.len()
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::new()
    }
}

/// Dropout-regularized word embedding lookup.
#[derive(Debug, Clone)]
pub struct WordEmbedder {
    lexicon: Lexicon,
    embedding: Embedding,
    dropout: f32,
}

impl WordEmbedder {
    pub fn new(lexicon: Lexicon, token_dim: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        let embedding = candle_nn::embedding(lexicon.vocab_size(), token_dim, vb)?;
        Ok(Self {
            lexicon,
            embedding,
            dropout,
        })
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }
}

impl TokenEncoder for WordEmbedder {
    fn encode(&self, words: &[&str], train: bool) -> Result<Vec<Token>> {
        if words.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<u32> = words.iter().map(|w| self.lexicon.id(w)).collect();
        let ids = Tensor::new(ids.as_slice(), self.embedding.embeddings().device())?;
        let reprs = self.embedding.forward(&ids)?;
        let reprs = DropoutHook::new(self.dropout, train).apply(&reprs)?;

        words
            .iter()
            .enumerate()
            .map(|(i, w)| Ok(Token::new(*w, reprs.narrow(0, i, 1)?)))
            .collect()
    }
}
