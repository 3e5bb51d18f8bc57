//! # llrefine CLI
//!
//! Usage:
//!   llrefine summarize [--variant advanced] [--threshold 7] [--file PATH | TEXT...]
//!   llrefine chat [--k 3] [--inject-context]
//!   llrefine index [--rebuild]
//!   llrefine stages [--variant standard]
//!
//! Examples:
//!   llrefine summarize
//!   llrefine --provider openai --model gpt-4o summarize --file article.txt
//!   llrefine -v chat --k 5

mod telemetry;

use clap::{Parser, Subcommand};
use llrefine_agent::{ChatConfig, ChatLoop, Summarizer, SummarizerConfig};
use llrefine_core::{
    BuildOutcome, Config, CorpusSource, Embedder, Error, LlmProvider, OllamaProvider,
    OpenAIProvider, PipelineOutput, PipelineSpec, ProviderError, ProviderType, Result, Retriever,
    Store, UsageTracker, Variant, VectorIndex,
};
use std::path::PathBuf;

const DEFAULT_TEXT: &str = "The Taj Mahal, located in Agra, Uttar Pradesh, was commissioned by Shah Jahan in memory of Mumtaz Mahal.";

#[derive(Parser, Debug)]
#[command(name = "llrefine")]
#[command(author, version, about = "llrefine - summarize, critique and refine with local or hosted LLMs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./llrefine.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model for all language-model calls
    #[arg(long, global = true)]
    model: Option<String>,

    /// Backend: ollama or openai
    #[arg(long, global = true)]
    provider: Option<ProviderType>,

    /// Backend base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Show each stage and debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show the final answer
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the summarization pipeline
    Summarize {
        /// basic, standard or advanced
        #[arg(long)]
        variant: Option<Variant>,

        /// Second rewrite runs when the aggregate score is below this
        #[arg(long)]
        threshold: Option<f64>,

        /// Read the source text from a file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Print the full output as JSON
        #[arg(long)]
        json: bool,

        /// Source text (default: a sample sentence)
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Ask questions against the indexed corpus
    Chat {
        /// Records retrieved per question
        #[arg(short, long)]
        k: Option<usize>,

        /// Add retrieved records to the prompt
        #[arg(long)]
        inject_context: bool,
    },
    /// Build the persisted index and print its manifest
    Index {
        /// Wipe the persisted index and rebuild from the corpus
        #[arg(long)]
        rebuild: bool,
    },
    /// Show the stages of a pipeline
    Stages {
        #[arg(long)]
        variant: Option<Variant>,
    },
}

/// Fold command-line flags into the loaded config.
fn apply_overrides(config: &mut Config, cli: &Cli) -> Result<()> {
    if let Some(kind) = cli.provider {
        config.provider.kind = kind;
    }
    if let Some(model) = &cli.model {
        config.provider.model = Some(model.clone());
    }
    if let Some(url) = &cli.base_url {
        config.provider.base_url = Some(url.clone());
    }

    match &cli.command {
        Commands::Summarize {
            variant, threshold, ..
        } => {
            if let Some(variant) = variant {
                config.pipeline.variant = *variant;
            }
            if let Some(threshold) = threshold {
                config.pipeline.threshold = *threshold;
            }
        }
        Commands::Stages { variant } => {
            if let Some(variant) = variant {
                config.pipeline.variant = *variant;
            }
        }
        Commands::Chat { k, inject_context } => {
            if let Some(k) = k {
                config.retrieval.k = *k;
            }
            if *inject_context {
                config.retrieval.inject_context = true;
            }
        }
        Commands::Index { .. } => {}
    }

    config.validate()
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::discover(cli.config.as_deref())?;
    telemetry::init(config.log_level.as_deref(), cli.verbose);
    apply_overrides(&mut config, &cli)?;

    if let Commands::Stages { .. } = cli.command {
        return show_stages(&config, cli.verbose);
    }

    let provider_config = config.provider.to_provider_config()?;
    tracing::debug!(
        provider = %provider_config.provider_type,
        model = ?provider_config.default_model,
        "backend selected"
    );

    match provider_config.provider_type {
        ProviderType::Ollama => {
            execute(&cli, &config, || OllamaProvider::new(provider_config.clone())).await
        }
        ProviderType::OpenAI => {
            execute(&cli, &config, || OpenAIProvider::new(provider_config.clone())).await
        }
    }
}

async fn execute<P, F>(cli: &Cli, config: &Config, make: F) -> Result<()>
where
    P: LlmProvider + Embedder,
    F: Fn() -> std::result::Result<P, ProviderError>,
{
    let build = || make().map_err(|e| e.into_error("cli::provider"));

    match &cli.command {
        Commands::Summarize {
            file, json, text, ..
        } => {
            let source = read_source(file.as_ref(), text)?;
            summarize(build()?, config, &source, cli, *json).await
        }
        Commands::Chat { .. } => chat(build()?, build()?, config, cli.quiet).await,
        Commands::Index { rebuild } => index(build()?, config, *rebuild, cli.quiet).await,
        Commands::Stages { .. } => show_stages(config, cli.verbose),
    }
}

fn read_source(file: Option<&PathBuf>, text: &[String]) -> Result<String> {
    if let Some(path) = file {
        return std::fs::read_to_string(path).map_err(|e| {
            Error::from(e)
                .with_operation("cli::read_source")
                .with_context("path", path.display().to_string())
        });
    }
    if text.is_empty() {
        Ok(DEFAULT_TEXT.to_string())
    } else {
        Ok(text.join(" "))
    }
}

// ============================================================================
// summarize
// ============================================================================

async fn summarize<P: LlmProvider>(
    provider: P,
    config: &Config,
    source: &str,
    cli: &Cli,
    json: bool,
) -> Result<()> {
    let spec = PipelineSpec::for_variant(config.pipeline.variant, config.pipeline.threshold)?;

    if !cli.quiet && !json {
        println!("llrefine - {} ({})\n", spec.name, spec.description);
    }

    let summarizer_config = SummarizerConfig {
        verbose: cli.verbose && !cli.quiet && !json,
        max_retries: config.pipeline.max_retries,
        ..Default::default()
    };
    let mut summarizer = Summarizer::with_config(provider, spec, summarizer_config);
    let output = summarizer.run(source).await?;

    if json {
        let rendered = serde_json::to_string_pretty(&output).map_err(|e| {
            Error::serialization_failed(format!("failed to render output: {}", e))
                .with_operation("cli::summarize")
        })?;
        println!("{}", rendered);
        return Ok(());
    }

    if cli.quiet {
        println!("{}", output.final_text);
        return Ok(());
    }

    print_trace(&output);
    println!("\n--- FINAL SUMMARY ({}) ---\n", output.refinement.label());
    println!("{}", output.final_text);
    print_usage(summarizer.usage());
    Ok(())
}

fn print_trace(output: &PipelineOutput) {
    println!("Stages:");
    for (i, result) in output.trace.iter().enumerate() {
        println!(
            "  {}. {:<26} {:<15} {} chars",
            i + 1,
            result.agent,
            result.stage.as_str(),
            result.output.len()
        );
        if let Some(verdict) = result.verdict {
            println!("       verdict: {}", verdict);
        }
        if let Some(report) = result.critique {
            println!(
                "       accuracy {:.1}, clarity {:.1}, conciseness {:.1} -> {:.2} ({})",
                report.accuracy, report.clarity, report.conciseness, report.aggregate, report.priority
            );
        }
    }

    if let Some(gate) = &output.gate {
        let aggregate = gate
            .aggregate
            .map(|a| format!("{:.2}", a))
            .unwrap_or_else(|| "unscored".to_string());
        println!(
            "\nRefinement gate: {} < {:.1}? {}",
            aggregate,
            gate.threshold,
            if gate.second_pass { "yes, second rewrite ran" } else { "no" }
        );
    }

    if !output.failures.is_empty() {
        println!("\nWarnings:");
        for failure in &output.failures {
            println!("  - {}", failure);
        }
    }
}

fn print_usage(usage: &UsageTracker) {
    if usage.total_calls == 0 {
        return;
    }
    println!(
        "\nTokens: {} prompt + {} completion over {} calls",
        usage.total_prompt_tokens, usage.total_completion_tokens, usage.total_calls
    );
}

// ============================================================================
// chat / index
// ============================================================================

fn corpus_source(config: &Config) -> CorpusSource {
    CorpusSource::new(
        config.retrieval.corpus_path.clone(),
        config.retrieval.text_column.clone(),
    )
}

fn open_store(config: &Config) -> Store {
    Store::file(&config.retrieval.persist_dir, config.retrieval.collection.clone())
}

async fn chat<P: LlmProvider, E: Embedder>(
    provider: P,
    embedder: E,
    config: &Config,
    quiet: bool,
) -> Result<()> {
    let mut store = open_store(config);
    let (index, outcome) =
        VectorIndex::open_or_build(&mut store, &embedder, &corpus_source(config)).await?;

    if !quiet {
        println!(
            "Index {} ({} records, {}). Type 'exit' or 'quit' to leave.\n",
            match outcome {
                BuildOutcome::Built => "built",
                BuildOutcome::Loaded => "loaded",
            },
            index.len(),
            store.location()
        );
    }

    let retriever = Retriever::new(embedder, index).with_k(config.retrieval.k)?;
    let chat_config = ChatConfig::default()
        .with_inject_context(config.retrieval.inject_context)
        .with_model(config.provider.model.clone());
    let chat = ChatLoop::with_config(provider, retriever, chat_config);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    chat.run(stdin, tokio::io::stdout()).await?;
    Ok(())
}

async fn index<E: Embedder>(embedder: E, config: &Config, rebuild: bool, quiet: bool) -> Result<()> {
    let mut store = open_store(config);
    let source = corpus_source(config);

    let (index, outcome) = if rebuild {
        let index = VectorIndex::rebuild(&mut store, &embedder, &source).await?;
        (index, BuildOutcome::Built)
    } else {
        VectorIndex::open_or_build(&mut store, &embedder, &source).await?
    };

    if !quiet {
        println!(
            "{} index at {}",
            match outcome {
                BuildOutcome::Built => "Built",
                BuildOutcome::Loaded => "Loaded existing",
            },
            store.location()
        );
    }
    let manifest = serde_json::to_string_pretty(index.manifest())
        .map_err(|e| Error::serialization_failed(e.to_string()).with_operation("cli::index"))?;
    println!("{}", manifest);
    Ok(())
}

// ============================================================================
// stages
// ============================================================================

fn show_stages(config: &Config, verbose: bool) -> Result<()> {
    let spec = PipelineSpec::for_variant(config.pipeline.variant, config.pipeline.threshold)?;

    println!("{} ({})", spec.name, config.pipeline.variant);
    println!("{}\n", spec.description);

    let mut stages: Vec<_> = spec.stages().iter().collect();
    if let Some(gate) = spec.gate() {
        stages.push(&gate.stage);
    }

    for (i, stage) in stages.iter().enumerate() {
        let conditional = spec
            .gate()
            .filter(|g| g.stage.id == stage.id)
            .map(|g| format!("  [only if aggregate < {:.1}]", g.threshold))
            .unwrap_or_default();
        println!("  {}. {:<26} {}{}", i + 1, stage.name(), stage.description, conditional);
        if let Some(marker) = &stage.output_marker {
            println!("       output under: {}", marker);
        }
        if verbose {
            for line in stage.instruction.lines() {
                println!("       | {}", line);
            }
            println!();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llrefine_core::ErrorKind;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("llrefine").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_summarize_flags_override_config() {
        let cli = parse(&[
            "--provider", "openai", "--model", "gpt-4o", "summarize", "--variant", "standard",
            "--threshold", "8.5", "Some", "text",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli).unwrap();

        assert_eq!(config.provider.kind, ProviderType::OpenAI);
        assert_eq!(config.provider.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.pipeline.variant, Variant::Standard);
        assert_eq!(config.pipeline.threshold, 8.5);

        let Commands::Summarize { text, .. } = &cli.command else {
            panic!("expected summarize");
        };
        assert_eq!(read_source(None, text).unwrap(), "Some text");
    }

    #[test]
    fn test_chat_flags() {
        let cli = parse(&["chat", "--k", "5", "--inject-context", "-v"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli).unwrap();
        assert_eq!(config.retrieval.k, 5);
        assert!(config.retrieval.inject_context);
        assert!(cli.verbose);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let cli = parse(&["summarize", "--threshold", "42"]);
        let err = apply_overrides(&mut Config::default(), &cli).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        assert!(Cli::try_parse_from(["llrefine", "summarize", "--variant", "extreme"]).is_err());
        assert!(Cli::try_parse_from(["llrefine", "--provider", "bard", "chat"]).is_err());
    }

    #[test]
    fn test_default_and_file_source() {
        assert_eq!(read_source(None, &[]).unwrap(), DEFAULT_TEXT);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("article.txt");
        std::fs::write(&path, "From a file.").unwrap();
        assert_eq!(read_source(Some(&path), &[]).unwrap(), "From a file.");

        let err = read_source(Some(&dir.path().join("missing.txt")), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_every_variant_shows() {
        for variant in [Variant::Basic, Variant::Standard, Variant::Advanced] {
            let mut config = Config::default();
            config.pipeline.variant = variant;
            show_stages(&config, false).unwrap();
        }
    }
}
