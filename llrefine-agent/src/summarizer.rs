//! Summarizer - drives a [`PipelineRun`] against a live provider

use llrefine_core::{
    Error, LlmProvider, PipelineOutput, PipelineSpec, Result, StageRequest, Step, UsageTracker,
};
use std::time::Duration;

/// Configuration for the summarizer
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Print each stage request and output
    pub verbose: bool,
    /// Extra attempts for retryable backend errors, per stage
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further attempt
    pub retry_backoff: Duration,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            max_retries: 0,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Runs a pipeline to completion, one awaited model call per stage
pub struct Summarizer<P: LlmProvider> {
    provider: P,
    spec: PipelineSpec,
    config: SummarizerConfig,
    usage: UsageTracker,
}

impl<P: LlmProvider> Summarizer<P> {
    pub fn new(provider: P, spec: PipelineSpec) -> Self {
        Self::with_config(provider, spec, SummarizerConfig::default())
    }

    pub fn with_config(provider: P, spec: PipelineSpec, config: SummarizerConfig) -> Self {
        Self {
            provider,
            spec,
            config,
            usage: UsageTracker::new(),
        }
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    /// Token usage accumulated over every run so far
    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Run the pipeline over `source`.
    pub async fn run(&mut self, source: &str) -> Result<PipelineOutput> {
        let Self {
            provider,
            spec,
            config,
            usage,
        } = self;

        if config.verbose {
            println!("Pipeline: {} ({})", spec.name, spec.description);
        }

        let mut run = spec.start(source);
        loop {
            match run.step() {
                Step::Done => break,
                Step::NeedsLlm(request) => {
                    if config.verbose {
                        println!("\n   [{}] {} chars of context", request.agent, request.context.len());
                    }

                    let text = call_stage(provider, config, usage, &request).await?;

                    if config.verbose {
                        println!("      -> {}", truncate(text.trim(), 120));
                    }

                    run.provide_output(text)
                        .map_err(|e| e.with_context("source_chars", source.len().to_string()))?;
                }
            }
        }

        let output = run.finish()?;
        if config.verbose {
            if let Some(gate) = &output.gate {
                println!(
                    "\n   Refinement gate: aggregate {} vs threshold {:.1} -> {}",
                    gate.aggregate.map(|a| format!("{:.2}", a)).unwrap_or_else(|| "n/a".into()),
                    gate.threshold,
                    if gate.second_pass { "second pass" } else { "done" }
                );
            }
        }
        Ok(output)
    }
}

/// One stage call with bounded retries for retryable failures.
async fn call_stage<P: LlmProvider>(
    provider: &P,
    config: &SummarizerConfig,
    usage: &mut UsageTracker,
    request: &StageRequest,
) -> Result<String> {
    let mut attempt = 0;
    loop {
        let result = provider
            .instruct(request.model.as_deref(), &request.instruction, &request.context)
            .await;

        let err = match result {
            Ok(response) => {
                usage.track(&response.model, &response.usage);
                tracing::debug!(
                    stage = request.agent,
                    model = %response.model,
                    chars = response.content.as_deref().map(str::len).unwrap_or(0),
                    "stage response"
                );
                let text = response.content.unwrap_or_default();
                // Advisory stages hand blank answers to the run, which records them.
                if !text.trim().is_empty() || request.stage.is_advisory() {
                    return Ok(text);
                }
                Error::inference_failed("provider returned no content")
                    .with_operation("summarizer::stage")
                    .with_context("stage", request.agent)
            }
            Err(e) => e
                .into_error("summarizer::stage")
                .with_context("stage", request.agent)
                .with_context("provider", provider.name()),
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= config.max_retries {
            return Err(err.persist());
        }

        let delay = config.retry_backoff * 2u32.saturating_pow(attempt);
        attempt += 1;
        tracing::warn!(
            stage = request.agent,
            attempt,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying stage"
        );
        tokio::time::sleep(delay).await;
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
