use clap::Parser;
use tracing_subscriber::EnvFilter;

use tokenlens::tokenizer::{load_tokenizer_json, load_vocab_and_merges};
use tokenlens::{BpeTokenizer, Result};

#[derive(Parser, Debug)]
#[command(name = "tokenlens")]
#[command(about = "Byte-level BPE tokenizer inspector")]
struct Args {
    /// Path to a HuggingFace tokenizer.json
    #[arg(long, conflicts_with_all = ["vocab", "merges"])]
    tokenizer_json: Option<String>,

    /// Path to vocab.json
    #[arg(long, requires = "merges")]
    vocab: Option<String>,

    /// Path to merges.txt
    #[arg(long, requires = "vocab")]
    merges: Option<String>,

    /// Text to tokenize
    prompt: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let resources = match (&args.tokenizer_json, &args.vocab, &args.merges) {
        (Some(path), _, _) => load_tokenizer_json(path)?,
        (None, Some(vocab), Some(merges)) => load_vocab_and_merges(vocab, merges)?,
        _ => {
            eprintln!("provide either --tokenizer-json or --vocab with --merges");
            std::process::exit(2);
        }
    };

    let tokenizer = BpeTokenizer::new(resources)?;
    let tokens = tokenizer.tokenize_with_offsets(&args.prompt);

    println!("{} tokens", tokens.len());
    for token in &tokens {
        println!(
            "{:>6}  {:>3}..{:<3}  {:?}",
            token.id, token.start, token.end, token.text
        );
    }

    Ok(())
}
