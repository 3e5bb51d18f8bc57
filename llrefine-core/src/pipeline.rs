//! # Critique-Refinement Pipeline
//!
//! A linear state machine over prompt stages with exactly one conditional fork:
//!
//! ```text
//! Summarize -> [FactCheck] -> Critique -> Rewrite -> (aggregate < threshold) SecondRewrite -> Done
//!                                                 \-> Done
//! ```
//!
//! The machine never performs I/O. A driver asks it what to do next with
//! [`PipelineRun::step`], calls the language model for a
//! [`Step::NeedsLlm`] request, and hands the text back through
//! [`PipelineRun::provide_output`]. Once [`Step::Done`] is reached,
//! [`PipelineRun::finish`] yields the [`PipelineOutput`].
//!
//! Failure policy:
//! - an empty summary or rewrite is fatal (`StageParseFailed`);
//! - an empty or unparseable critique is recorded, logged, and the gate falls
//!   back to "no second pass";
//! - the fact-check verdict is advisory; an empty or unparseable answer is
//!   recorded only.

use crate::error::{self, Error, ErrorKind, Result};
use crate::parse::{self, CritiqueReport, FactCheckVerdict};
use crate::stage::{Stage, StageId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default aggregate score below which the second rewrite runs
pub const DEFAULT_THRESHOLD: f64 = 7.0;

// ============================================================================
// Pipeline definition
// ============================================================================

/// The three stock pipelines, from a lone summarizer up to the scored,
/// fact-checked, conditionally double-refined chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Summarize
    Basic,
    /// Summarize -> Critique -> Rewrite
    Standard,
    /// Summarize -> FactCheck -> scored Critique -> Rewrite -> [SecondRewrite]
    #[default]
    Advanced,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Basic => "basic",
            Variant::Standard => "standard",
            Variant::Advanced => "advanced",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Variant::Basic),
            "standard" => Ok(Variant::Standard),
            "advanced" => Ok(Variant::Advanced),
            other => Err(Error::invalid_argument(format!(
                "unknown pipeline variant '{}' (expected basic, standard or advanced)",
                other
            ))),
        }
    }
}

/// The single conditional branch: run `stage` after the first rewrite when the
/// aggregate critique score is strictly below `threshold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementGate {
    pub threshold: f64,
    pub stage: Stage,
}

/// An ordered list of stages plus an optional refinement gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    pub description: String,
    /// Model for every stage; `None` uses the provider default
    pub model: Option<String>,
    stages: Vec<Stage>,
    scored_critique: bool,
    gate: Option<RefinementGate>,
}

impl PipelineSpec {
    /// Define a pipeline. The first stage must summarize and stage ids must
    /// strictly increase (Summarize < FactCheck < Critique < Rewrite).
    pub fn new(name: impl Into<String>, stages: Vec<Stage>) -> Result<Self> {
        match stages.first() {
            None => return Err(error::invalid_pipeline("pipeline has no stages")),
            Some(stage) if stage.id != StageId::Summarize => {
                return Err(error::invalid_pipeline(format!(
                    "first stage must be summarize, found {}",
                    stage.id
                )));
            }
            Some(_) => {}
        }

        for pair in stages.windows(2) {
            if pair[1].id <= pair[0].id {
                return Err(error::invalid_pipeline(format!(
                    "stage {} cannot follow {}",
                    pair[1].id, pair[0].id
                )));
            }
        }

        if stages.iter().any(|s| s.id == StageId::SecondRewrite) {
            return Err(error::invalid_pipeline(
                "second_rewrite only runs through a refinement gate",
            ));
        }

        Ok(Self {
            name: name.into(),
            description: String::new(),
            model: None,
            stages,
            scored_critique: false,
            gate: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Require numeric scores from the critique stage.
    pub fn scored(mut self) -> Result<Self> {
        if !self.has_stage(StageId::Critique) {
            return Err(error::invalid_pipeline("scored critique needs a critique stage"));
        }
        self.scored_critique = true;
        Ok(self)
    }

    /// Add the conditional second rewrite.
    pub fn with_refinement(mut self, threshold: f64, stage: Stage) -> Result<Self> {
        if !threshold.is_finite() || !(0.0..=parse::MAX_SCORE).contains(&threshold) {
            return Err(error::invalid_pipeline(format!(
                "refinement threshold {} outside [0, 10]",
                threshold
            )));
        }
        if stage.id != StageId::SecondRewrite {
            return Err(error::invalid_pipeline(format!(
                "refinement stage must be second_rewrite, found {}",
                stage.id
            )));
        }
        if !self.scored_critique {
            return Err(error::invalid_pipeline("refinement gate needs a scored critique"));
        }
        if self.stages.last().map(|s| s.id) != Some(StageId::Rewrite) {
            return Err(error::invalid_pipeline("refinement gate must follow a rewrite stage"));
        }
        self.gate = Some(RefinementGate { threshold, stage });
        Ok(self)
    }

    /// Build one of the stock pipelines.
    pub fn for_variant(variant: Variant, threshold: f64) -> Result<Self> {
        match variant {
            Variant::Basic => Self::new("summarizer_agent", vec![Stage::summarizer()]).map(|spec| {
                spec.with_description("Summarize")
            }),
            Variant::Standard => Ok(Self::new(
                "summarizer_pipeline",
                vec![Stage::summarizer(), Stage::critic(), Stage::rewriter()],
            )?
            .with_description("Pipeline: Summarize -> Critique -> Improve")),
            Variant::Advanced => Self::new(
                "summarizer_pipeline_advanced",
                vec![
                    Stage::formatted_summarizer(),
                    Stage::fact_checker(),
                    Stage::scoring_critic(),
                    Stage::feedback_rewriter(),
                ],
            )?
            .with_description(
                "Summarize -> Fact-Check -> Critique with Scoring -> Conditional Multi-Pass Rewriting",
            )
            .scored()?
            .with_refinement(threshold, Stage::secondary_rewriter()),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn gate(&self) -> Option<&RefinementGate> {
        self.gate.as_ref()
    }

    pub fn is_scored(&self) -> bool {
        self.scored_critique
    }

    pub fn has_stage(&self, id: StageId) -> bool {
        self.stages.iter().any(|s| s.id == id)
    }

    /// Stage path a run takes, given the gate outcome
    pub fn path(&self, second_pass: bool) -> Vec<StageId> {
        let mut path: Vec<StageId> = self.stages.iter().map(|s| s.id).collect();
        if second_pass {
            if let Some(gate) = &self.gate {
                path.push(gate.stage.id);
            }
        }
        path
    }

    /// Start a run over `source`.
    pub fn start(&self, source: impl Into<String>) -> PipelineRun<'_> {
        PipelineRun {
            spec: self,
            source: source.into(),
            cursor: Cursor::Main(0),
            trace: Vec::new(),
            critique: None,
            verdict: None,
            gate: None,
            failures: Vec::new(),
        }
    }
}

// ============================================================================
// Run state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Main(usize),
    Second,
    Done,
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending(StageId),
    Done,
}

/// What the driver should do next
#[derive(Debug, Clone)]
pub enum Step {
    NeedsLlm(StageRequest),
    Done,
}

/// One language-model call the driver must make
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: StageId,
    pub agent: &'static str,
    pub model: Option<String>,
    /// Sent as the system message
    pub instruction: String,
    /// Sent as the user message
    pub context: String,
}

/// Output of one executed stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageId,
    pub agent: String,
    /// Raw model output
    pub output: String,
    /// Text under the stage's output marker (or the whole output)
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critique: Option<CritiqueReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<FactCheckVerdict>,
}

/// A non-fatal parse failure recorded during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageId,
    pub agent: String,
    pub reason: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.agent, self.stage, self.reason)
    }
}

/// How the refinement gate was resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub threshold: f64,
    /// `None` when critique scores could not be parsed
    pub aggregate: Option<f64>,
    pub second_pass: bool,
}

/// How many rewrite passes produced the final artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Refinement {
    /// No rewrite stage ran
    None,
    Single,
    Double,
}

impl Refinement {
    pub fn label(&self) -> &'static str {
        match self {
            Refinement::None => "summary",
            Refinement::Single => "refined",
            Refinement::Double => "doubly-refined",
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub pipeline: String,
    /// Body of the last stage that ran
    pub final_text: String,
    pub refinement: Refinement,
    pub trace: Vec<StageResult>,
    pub critique: Option<CritiqueReport>,
    pub verdict: Option<FactCheckVerdict>,
    pub gate: Option<GateDecision>,
    pub failures: Vec<StageFailure>,
}

impl PipelineOutput {
    /// Stage ids in execution order
    pub fn path(&self) -> Vec<StageId> {
        self.trace.iter().map(|r| r.stage).collect()
    }

    pub fn is_doubly_refined(&self) -> bool {
        self.refinement == Refinement::Double
    }
}

/// One in-flight execution of a [`PipelineSpec`]
pub struct PipelineRun<'a> {
    spec: &'a PipelineSpec,
    source: String,
    cursor: Cursor,
    trace: Vec<StageResult>,
    critique: Option<CritiqueReport>,
    verdict: Option<FactCheckVerdict>,
    gate: Option<GateDecision>,
    failures: Vec<StageFailure>,
}

impl<'a> PipelineRun<'a> {
    pub fn spec(&self) -> &'a PipelineSpec {
        self.spec
    }

    pub fn trace(&self) -> &[StageResult] {
        &self.trace
    }

    pub fn failures(&self) -> &[StageFailure] {
        &self.failures
    }

    pub fn state(&self) -> RunState {
        match self.current_stage() {
            Some(stage) => RunState::Pending(stage.id),
            None => RunState::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        self.cursor == Cursor::Done
    }

    fn current_stage(&self) -> Option<&'a Stage> {
        match self.cursor {
            Cursor::Main(i) => self.spec.stages.get(i),
            Cursor::Second => self.spec.gate.as_ref().map(|g| &g.stage),
            Cursor::Done => None,
        }
    }

    /// Next action for the driver
    pub fn step(&self) -> Step {
        match self.current_stage() {
            Some(stage) => Step::NeedsLlm(StageRequest {
                stage: stage.id,
                agent: stage.name(),
                model: self.spec.model.clone(),
                instruction: stage.instruction.clone(),
                context: self.context_for(stage.id),
            }),
            None => Step::Done,
        }
    }

    /// Feed the model's answer for the pending stage and advance.
    pub fn provide_output(&mut self, output: impl Into<String>) -> Result<()> {
        let stage = self.current_stage().ok_or_else(|| {
            Error::invalid_argument("pipeline already complete")
                .with_operation("pipeline::provide_output")
        })?;
        let output = output.into();
        let body = parse::extract_body(&output, stage.output_marker.as_deref());
        let empty = body.is_empty();
        if empty && !stage.id.is_advisory() {
            return Err(error::empty_output(stage.name()).with_operation("pipeline::provide_output"));
        }

        let mut result = StageResult {
            stage: stage.id,
            agent: stage.name().to_string(),
            output,
            body,
            critique: None,
            verdict: None,
        };

        if empty {
            let err = error::empty_output(stage.name()).with_operation("pipeline::provide_output");
            self.record_failure(stage, err);
            self.trace.push(result);
            self.advance();
            return Ok(());
        }

        match stage.id {
            StageId::FactCheck => match parse::parse_verdict(stage.name(), &result.output) {
                Ok(verdict) => {
                    tracing::debug!(%verdict, "fact-check verdict");
                    result.verdict = Some(verdict);
                    self.verdict = Some(verdict);
                }
                Err(err) => self.record_failure(stage, err),
            },
            StageId::Critique if self.spec.scored_critique => {
                match parse::parse_critique(stage.name(), &result.output) {
                    Ok(report) => {
                        tracing::debug!(
                            aggregate = report.aggregate,
                            priority = %report.priority,
                            "critique scores"
                        );
                        result.critique = Some(report);
                        self.critique = Some(report);
                    }
                    Err(err) => self.record_failure(stage, err),
                }
            }
            _ => {}
        }

        self.trace.push(result);
        self.advance();
        Ok(())
    }

    /// Consume a finished run.
    pub fn finish(self) -> Result<PipelineOutput> {
        if let RunState::Pending(stage) = self.state() {
            return Err(Error::new(ErrorKind::Unexpected, "pipeline has not finished")
                .with_operation("pipeline::finish")
                .with_context("pending", stage.as_str()));
        }

        let final_text = self
            .trace
            .last()
            .map(|r| r.body.clone())
            .ok_or_else(|| Error::unexpected("finished pipeline has an empty trace"))?;

        let rewrites = self
            .trace
            .iter()
            .filter(|r| matches!(r.stage, StageId::Rewrite | StageId::SecondRewrite))
            .count();
        let refinement = match rewrites {
            0 => Refinement::None,
            1 => Refinement::Single,
            _ => Refinement::Double,
        };

        tracing::info!(
            pipeline = %self.spec.name,
            stages = self.trace.len(),
            refinement = refinement.label(),
            failures = self.failures.len(),
            "pipeline complete"
        );

        Ok(PipelineOutput {
            pipeline: self.spec.name.clone(),
            final_text,
            refinement,
            trace: self.trace,
            critique: self.critique,
            verdict: self.verdict,
            gate: self.gate,
            failures: self.failures,
        })
    }

    fn record_failure(&mut self, stage: &Stage, err: Error) {
        tracing::warn!(stage = stage.name(), error = %err, "stage output could not be parsed");
        self.failures.push(StageFailure {
            stage: stage.id,
            agent: stage.name().to_string(),
            reason: err.message().to_string(),
        });
    }

    fn advance(&mut self) {
        self.cursor = match self.cursor {
            Cursor::Main(i) if i + 1 < self.spec.stages.len() => Cursor::Main(i + 1),
            Cursor::Main(_) => self.decide_gate(),
            Cursor::Second | Cursor::Done => Cursor::Done,
        };
    }

    /// Evaluated exactly once, after the last main stage.
    fn decide_gate(&mut self) -> Cursor {
        let Some(gate) = &self.spec.gate else {
            return Cursor::Done;
        };

        let aggregate = self.critique.map(|c| c.aggregate);
        let second_pass = aggregate.is_some_and(|a| a < gate.threshold);

        tracing::info!(
            threshold = gate.threshold,
            aggregate = ?aggregate,
            second_pass,
            "refinement gate"
        );

        self.gate = Some(GateDecision {
            threshold: gate.threshold,
            aggregate,
            second_pass,
        });

        if second_pass {
            Cursor::Second
        } else {
            Cursor::Done
        }
    }

    fn latest(&self, id: StageId) -> Option<&StageResult> {
        self.trace.iter().rev().find(|r| r.stage == id)
    }

    /// User message for `stage`, built only from stages that already ran.
    fn context_for(&self, stage: StageId) -> String {
        let mut sections: Vec<(String, &str)> =
            vec![("ORIGINAL TEXT".to_string(), self.source.as_str())];

        let summary = self.latest(StageId::Summarize).map(|r| r.body.as_str());
        let advice = |id| {
            self.latest(id)
                .map(|r| r.output.trim())
                .filter(|text| !text.is_empty())
        };
        let fact_check = advice(StageId::FactCheck);
        let critique = advice(StageId::Critique);
        let rewrite = self.latest(StageId::Rewrite).map(|r| r.body.as_str());

        match stage {
            StageId::Summarize => {}
            StageId::FactCheck | StageId::Critique => {
                sections.extend(summary.map(|s| ("SUMMARY".to_string(), s)));
            }
            StageId::Rewrite => {
                sections.extend(summary.map(|s| ("SUMMARY".to_string(), s)));
                sections.extend(critique.map(|c| ("CRITIQUE".to_string(), c)));
                sections.extend(fact_check.map(|f| ("FACT-CHECK RESULTS".to_string(), f)));
            }
            StageId::SecondRewrite => {
                sections.extend(rewrite.map(|r| ("CURRENT SUMMARY (after first rewrite)".to_string(), r)));
                sections.extend(critique.map(|c| ("CRITIQUE".to_string(), c)));
                if let Some(report) = &self.critique {
                    sections.push((
                        format!(
                            "QUALITY SCORE {:.1}/10, PRIORITY {}",
                            report.aggregate, report.priority
                        ),
                        "",
                    ));
                }
            }
        }

        sections
            .iter()
            .map(|(title, body)| {
                if body.is_empty() {
                    format!("{}:", title)
                } else {
                    format!("{}:\n{}", title, body)
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
