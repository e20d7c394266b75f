use std::cell::Cell;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use transition_ner::{
    oracle_actions, spans_from_actions, spans_from_bio, Action, ActionScorer, DecodeMode, Driver,
    Greedy, Lane, Lexicon, MlpScorer, NerConfig, NerError, StateFeatures, StepOutcome,
    TeacherForced, Token, TokenEncoder, TransitionNer, WordEmbedder,
};

struct Fixture {
    _varmap: VarMap,
    model: TransitionNer,
    embedder: WordEmbedder,
}

fn fixture(config: NerConfig) -> Fixture {
    let sentences: [&[&str]; 2] = [
        &["John", "Smith", "lives", "in", "New", "York"],
        &["Acme", "hired", "Mary"],
    ];
    let lexicon = Lexicon::from_sentences(sentences);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = TransitionNer::new(&config, vb.pp("ner")).unwrap();
    let embedder =
        WordEmbedder::new(lexicon, config.token_dim, config.dropout, vb.pp("words")).unwrap();
    Fixture {
        _varmap: varmap,
        model,
        embedder,
    }
}

fn tokens(f: &Fixture, words: &[&str]) -> Vec<Token> {
    f.embedder.encode(words, false).unwrap()
}

fn gold(f: &Fixture, tags: &[&str]) -> Vec<Action> {
    let spans = spans_from_bio(tags).unwrap();
    oracle_actions(tags.len(), &spans, f.model.vocab()).unwrap()
}

struct CountingScorer<'a> {
    inner: &'a MlpScorer,
    calls: Cell<usize>,
}

impl ActionScorer for CountingScorer<'_> {
    fn score(
        &self,
        features: &StateFeatures,
        legal_ids: &[u32],
        train: bool,
    ) -> transition_ner::Result<Tensor> {
        self.calls.set(self.calls.get() + 1);
        assert!(legal_ids.len() > 1, "scored a forced step");
        self.inner.score(features, legal_ids, train)
    }
}

/// Puts half the mass on the first legal action and spreads the rest evenly.
struct FirstLegalScorer;

impl FirstLegalScorer {
    fn log_probs(n: usize) -> Vec<f32> {
        let rest = (0.5 / (n - 1) as f32).ln();
        std::iter::once(0.5f32.ln())
            .chain(std::iter::repeat(rest).take(n - 1))
            .collect()
    }
}

impl ActionScorer for FirstLegalScorer {
    fn score(
        &self,
        features: &StateFeatures,
        legal_ids: &[u32],
        _train: bool,
    ) -> transition_ner::Result<Tensor> {
        let values = Self::log_probs(legal_ids.len());
        Ok(Tensor::new(values.as_slice(), features.buffer.device())?)
    }
}

#[test]
fn test_teacher_forcing_applies_gold_over_argmax() {
    let f = fixture(NerConfig::tiny());
    let toks = tokens(&f, &["John", "Smith", "lives"]);
    let v = f.model.vocab();
    let gold = v.parse_all(&["SHIFT", "SHIFT", "REDUCE-PER", "OUT"]).unwrap();

    let trace = f
        .model
        .decode_with(&toks, DecodeMode::Train { gold: &gold }, FirstLegalScorer)
        .unwrap();

    assert_eq!(trace.applied, gold);
    assert_eq!(trace.predicted, vec![Action::Shift; 4]);
    assert_eq!(trace.scored_steps, 4);
    // Only the two SHIFT steps agree with the argmax.
    assert_eq!(trace.correct, 2);

    // Legal sets: {SHIFT, OUT}, {SHIFT, 4 REDUCEs}, {SHIFT, 4 REDUCEs}, {SHIFT, OUT}.
    let gold_log_probs = [
        FirstLegalScorer::log_probs(2)[0],
        FirstLegalScorer::log_probs(5)[0],
        FirstLegalScorer::log_probs(5)[1],
        FirstLegalScorer::log_probs(2)[1],
    ];
    let expected: f32 = -gold_log_probs.iter().sum::<f32>();
    let loss = trace.loss_value().unwrap().unwrap();
    assert!((loss - expected).abs() < 1e-5, "loss {loss}, expected {expected}");
    assert!((loss - 6.0 * std::f32::consts::LN_2).abs() < 1e-4);
}

#[test]
fn test_teacher_forced_person_span() {
    let f = fixture(NerConfig::tiny());
    let toks = tokens(&f, &["John", "Smith", "lives"]);
    let v = f.model.vocab();
    let gold = v.parse_all(&["SHIFT", "SHIFT", "REDUCE-PER", "OUT"]).unwrap();

    let trace = f.model.decode(&toks, DecodeMode::Train { gold: &gold }).unwrap();

    assert_eq!(trace.applied, gold);
    assert_eq!(trace.steps(), 3 + 1);
    assert_eq!(trace.entities.len(), 1);
    assert_eq!(trace.entities[0].text, "Smith John ");
    assert_eq!(trace.entities[0].entity_type, "PER");

    let labels: Vec<&str> = trace.output.iter().map(|o| o.label.as_str()).collect();
    assert_eq!(labels, vec!["Smith John ", "lives"]);
    assert!(trace.output[0].is_entity());
    assert!(!trace.output[1].is_entity());

    let loss = trace.loss_value().unwrap().expect("scored steps produce a loss");
    assert!(loss >= 0.0);
    assert!(trace.correct <= trace.steps());
}

#[test]
fn test_step_count_matches_tokens_plus_reduces() {
    let f = fixture(NerConfig::tiny());
    let words = ["John", "Smith", "lives", "in", "New", "York"];
    let tags = ["B-PER", "I-PER", "O", "O", "B-LOC", "I-LOC"];
    let toks = tokens(&f, &words);
    let gold = gold(&f, &tags);

    let trace = f.model.decode(&toks, DecodeMode::Train { gold: &gold }).unwrap();
    let reduces = trace.applied.iter().filter(|a| a.is_reduce()).count();
    assert_eq!(reduces, 2);
    assert_eq!(trace.steps(), words.len() + reduces);
    assert_eq!(
        spans_from_actions(&trace.applied, f.model.vocab(), words.len()).unwrap(),
        spans_from_bio(&tags).unwrap()
    );
    assert_eq!(trace.output.len(), words.len() - 4 + 2);
}

#[test]
fn test_greedy_decode_reaches_terminal_state() {
    let f = fixture(NerConfig::tiny());
    let words = ["Acme", "hired", "Mary", "in", "York"];
    let toks = tokens(&f, &words);

    let trace = f.model.decode(&toks, DecodeMode::Predict).unwrap();
    let reduces = trace.applied.iter().filter(|a| a.is_reduce()).count();

    assert_eq!(trace.steps(), words.len() + reduces);
    assert!(trace.loss.is_none());
    assert_eq!(trace.predicted, trace.applied);
    assert_eq!(trace.correct, trace.steps());
    assert!(spans_from_actions(&trace.applied, f.model.vocab(), words.len()).is_ok());

    let again = f.model.decode(&toks, DecodeMode::Predict).unwrap();
    assert_eq!(again.applied, trace.applied);
}

#[test]
fn test_empty_sentence_reports_no_loss() {
    let f = fixture(NerConfig::tiny());
    let trace = f.model.decode(&[], DecodeMode::Train { gold: &[] }).unwrap();
    assert_eq!(trace.steps(), 0);
    assert!(trace.loss.is_none());
    assert_eq!(trace.loss_value().unwrap(), None);
}

#[test]
fn test_forced_steps_skip_the_scorer() {
    let config = NerConfig {
        entity_types: vec!["PER".into()],
        ..NerConfig::tiny()
    };
    let f = fixture(config);
    let toks = tokens(&f, &["John", "Smith"]);
    let gold = f.model.vocab().parse_all(&["SHIFT", "SHIFT", "REDUCE-PER"]).unwrap();
    let scorer = CountingScorer {
        inner: f.model.scorer(),
        calls: Cell::new(0),
    };

    let trace = f
        .model
        .decode_with(&toks, DecodeMode::Train { gold: &gold }, &scorer)
        .unwrap();

    // The final REDUCE is the only legal action once the buffer is empty.
    assert_eq!(trace.steps(), 3);
    assert_eq!(scorer.calls.get(), 2);
    assert_eq!(trace.scored_steps, 2);
    assert!(trace.correct >= 1);
}

#[test]
fn test_gold_length_mismatch_surfaces() {
    let f = fixture(NerConfig::tiny());
    let toks = tokens(&f, &["John", "lives"]);
    let v = f.model.vocab();

    let short = v.parse_all(&["OUT"]).unwrap();
    let err = f.model.decode(&toks, DecodeMode::Train { gold: &short }).unwrap_err();
    assert!(matches!(err, NerError::GoldExhausted { step: 1 }));

    let long = v.parse_all(&["OUT", "OUT", "OUT"]).unwrap();
    let err = f.model.decode(&toks, DecodeMode::Train { gold: &long }).unwrap_err();
    assert!(matches!(
        err,
        NerError::GoldTrailing {
            consumed: 2,
            supplied: 3
        }
    ));
}

#[test]
fn test_illegal_gold_fails_fast() {
    let f = fixture(NerConfig::tiny());
    let toks = tokens(&f, &["John", "lives"]);
    let gold = f.model.vocab().parse_all(&["OUT", "REDUCE-PER", "OUT"]).unwrap();

    let err = f.model.decode(&toks, DecodeMode::Train { gold: &gold }).unwrap_err();
    assert!(matches!(err, NerError::IllegalGold { step: 1, .. }));
}

#[test]
fn test_driver_steps_one_transition_at_a_time() {
    let f = fixture(NerConfig::tiny());
    let toks = tokens(&f, &["New", "York"]);
    let gold = f.model.vocab().parse_all(&["SHIFT", "SHIFT", "REDUCE-LOC"]).unwrap();
    let policy = TeacherForced::new(&gold, f.model.vocab());
    let mut driver = Driver::new(&f.model, &toks, f.model.scorer(), policy).unwrap();

    assert_eq!(driver.frame.buffer_len(), 2);
    let mut seen = Vec::new();
    loop {
        let r = driver.step().unwrap();
        if r.outcome == StepOutcome::Finished {
            break;
        }
        seen.push(r.action.unwrap());
        assert_eq!(driver.frame.history_len(), seen.len());
        if let Some(entity) = r.entity {
            assert_eq!(entity.text, "York New ");
        }
    }
    assert_eq!(seen, gold);
    assert_eq!(driver.frame.output_len(), 1);
    assert_eq!(driver.step().unwrap().outcome, StepOutcome::Finished);

    let trace = driver.run_to_completion().unwrap();
    assert_eq!(trace.steps(), 3);
}

#[test]
fn test_two_layer_stacks_decode() {
    let config = NerConfig {
        stack_layers: 2,
        ..NerConfig::tiny()
    };
    let f = fixture(config);
    let toks = tokens(&f, &["Mary", "lives", "in", "New", "York"]);
    let gold = gold(&f, &["B-PER", "O", "O", "B-LOC", "I-LOC"]);

    let trace = f.model.decode(&toks, DecodeMode::Train { gold: &gold }).unwrap();
    assert_eq!(trace.steps(), 5 + 2);
    assert_eq!(trace.entities[0].text, "Mary");
    assert_eq!(trace.entities[1].text, "York New ");

    let greedy = Driver::new(&f.model, &toks, f.model.scorer(), Greedy)
        .unwrap()
        .run_to_completion()
        .unwrap();
    assert!(greedy.steps() >= toks.len());
}

#[test]
fn test_batch_lanes_match_sequential_decodes() {
    let config = NerConfig {
        dropout: 0.0,
        ..NerConfig::tiny()
    };
    let f = fixture(config);
    let first = tokens(&f, &["John", "Smith", "lives"]);
    let second = tokens(&f, &["Acme", "hired", "Mary"]);
    let second_gold = gold(&f, &["B-ORG", "O", "B-PER"]);

    let batch = f
        .model
        .decode_batch(&[Lane::predict(&first), Lane::train(&second, &second_gold)])
        .unwrap();
    assert_eq!(batch.lanes.len(), 2);

    let solo_first = f.model.decode(&first, DecodeMode::Predict).unwrap();
    let solo_second = f
        .model
        .decode(&second, DecodeMode::Train { gold: &second_gold })
        .unwrap();
    assert_eq!(batch.lanes[0].applied, solo_first.applied);
    assert_eq!(batch.lanes[1].applied, second_gold);

    let batch_loss = batch.loss.unwrap().to_scalar::<f32>().unwrap();
    let solo_loss = solo_second.loss_value().unwrap().unwrap();
    assert!((batch_loss - solo_loss).abs() < 1e-5);
    assert_eq!(batch.correct, solo_first.correct + solo_second.correct);
}

#[test]
fn test_predict_only_batch_has_no_loss() {
    let f = fixture(NerConfig::tiny());
    let toks = tokens(&f, &["Mary"]);
    let batch = f.model.decode_batch(&[Lane::predict(&toks)]).unwrap();
    assert!(batch.loss.is_none());
}
