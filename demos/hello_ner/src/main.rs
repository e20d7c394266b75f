use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use tracing::info;
use tracing_subscriber::EnvFilter;
use transition_ner::{
    oracle_actions, spans_from_actions, spans_from_bio, DecodeMode, Driver, Greedy, Lexicon,
    NerConfig, StepOutcome, TokenEncoder, TransitionNer, WordEmbedder,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let words = ["John", "Smith", "lives", "in", "New", "York"];
    let tags = ["B-PER", "I-PER", "O", "O", "B-LOC", "I-LOC"];

    // Untrained weights: the demo shows the mechanics, not accuracy.
    let config = NerConfig::tiny();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = TransitionNer::new(&config, vb.pp("ner"))?;
    let lexicon = Lexicon::from_sentences([&words[..]]);
    let embedder = WordEmbedder::new(lexicon, config.token_dim, config.dropout, vb.pp("words"))?;

    println!("== hello ner ==");

    let gold = oracle_actions(words.len(), &spans_from_bio(&tags)?, model.vocab())?;
    let tokens = embedder.encode(&words, true)?;
    let trace = model.decode(&tokens, DecodeMode::Train { gold: &gold })?;
    info!(steps = trace.steps(), correct = trace.correct, "teacher-forced pass");
    println!(
        "teacher-forced: loss={:?} correct={}/{}",
        trace.loss_value()?,
        trace.correct,
        trace.steps()
    );

    let tokens = embedder.encode(&words, false)?;
    let mut driver = Driver::new(&model, &tokens, model.scorer(), Greedy)?;
    loop {
        let r = driver.step()?;
        match r.outcome {
            StepOutcome::Advanced => {
                let action = r.action.map(|a| model.vocab().name(a)).unwrap_or_default();
                match r.entity {
                    Some(entity) => println!(
                        "advanced: {action} -> {} [{}]",
                        entity.text.trim_end(),
                        entity.entity_type
                    ),
                    None => println!(
                        "advanced: {action} buffer={} stack={} scored={}",
                        driver.frame.buffer_len(),
                        driver.frame.stack_len(),
                        r.scored
                    ),
                }
            }
            StepOutcome::Finished => {
                println!("finished: state={:?}", driver.frame.state);
                break;
            }
        }
    }

    let trace = driver.run_to_completion()?;
    for span in spans_from_actions(&trace.applied, model.vocab(), words.len())? {
        println!(
            "span {}..{} {} = {}",
            span.start,
            span.end,
            span.kind,
            words[span.start..span.end].join(" ")
        );
    }
    Ok(())
}
