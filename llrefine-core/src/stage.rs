//! # Pipeline Stages
//!
//! A stage is one prompt-defined role: an identifier, the agent name shown in
//! traces, and the fixed instruction sent as the system message. Stages are
//! built once when a pipeline is defined and never change afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which role a stage plays. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Summarize,
    FactCheck,
    Critique,
    Rewrite,
    SecondRewrite,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Summarize => "summarize",
            StageId::FactCheck => "fact_check",
            StageId::Critique => "critique",
            StageId::Rewrite => "rewrite",
            StageId::SecondRewrite => "second_rewrite",
        }
    }

    /// Agent name used in traces and error context
    pub fn agent_name(&self) -> &'static str {
        match self {
            StageId::Summarize => "summarizer_agent",
            StageId::FactCheck => "fact_checker_agent",
            StageId::Critique => "critic_agent",
            StageId::Rewrite => "rewriter_agent",
            StageId::SecondRewrite => "secondary_rewriter_agent",
        }
    }

    /// Later stages read this stage's output as advice but never build on its
    /// body, so an empty or unparseable answer is recorded and skipped.
    pub fn is_advisory(&self) -> bool {
        matches!(self, StageId::FactCheck | StageId::Critique)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role in the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub description: String,
    pub instruction: String,
    /// Header line the stage's body text follows, e.g. `SUMMARY:`
    pub output_marker: Option<String>,
}

impl Stage {
    pub fn new(id: StageId, description: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            instruction: instruction.into(),
            output_marker: None,
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.output_marker = Some(marker.into());
        self
    }

    pub fn name(&self) -> &'static str {
        self.id.agent_name()
    }

    // =========================================================================
    // Stock stages
    // =========================================================================

    /// Summarizer that answers in free form
    pub fn summarizer() -> Self {
        Self::new(
            StageId::Summarize,
            "Creates clear, concise summaries of text while preserving key information and context.",
            SUMMARIZER_INSTRUCTION,
        )
    }

    /// Summarizer that puts its answer under a `SUMMARY:` header
    pub fn formatted_summarizer() -> Self {
        Self::new(
            StageId::Summarize,
            "Creates clear, concise summaries of text while preserving key information and context.",
            format!("{}{}", SUMMARIZER_INSTRUCTION, SUMMARIZER_FORMAT),
        )
        .with_marker("SUMMARY:")
    }

    pub fn fact_checker() -> Self {
        Self::new(
            StageId::FactCheck,
            "Verifies factual accuracy between the summary and original text.",
            FACT_CHECKER_INSTRUCTION,
        )
    }

    /// Critic returning bullet points only
    pub fn critic() -> Self {
        Self::new(
            StageId::Critique,
            "Critiques summaries for clarity, conciseness, and factual accuracy.",
            CRITIC_INSTRUCTION,
        )
    }

    /// Critic returning 0-10 scores for accuracy, clarity and conciseness
    pub fn scoring_critic() -> Self {
        Self::new(
            StageId::Critique,
            "Critiques summaries with numeric scoring for accuracy, clarity, and conciseness.",
            SCORING_CRITIC_INSTRUCTION,
        )
    }

    pub fn rewriter() -> Self {
        Self::new(
            StageId::Rewrite,
            "Improves summaries based on critique feedback.",
            REWRITER_INSTRUCTION,
        )
    }

    /// Rewriter that consumes scores and fact-check results
    pub fn feedback_rewriter() -> Self {
        Self::new(
            StageId::Rewrite,
            "Improves summaries based on critique, scores, and fact-checking feedback.",
            FEEDBACK_REWRITER_INSTRUCTION,
        )
        .with_marker("IMPROVED SUMMARY:")
    }

    pub fn secondary_rewriter() -> Self {
        Self::new(
            StageId::SecondRewrite,
            "A second-pass rewriter for summaries that need additional refinement.",
            SECONDARY_REWRITER_INSTRUCTION,
        )
        .with_marker("FINAL REFINED SUMMARY:")
    }
}

// ============================================================================
// Instructions
// ============================================================================

const SUMMARIZER_INSTRUCTION: &str = "\
You are a text summarization expert who writes concise, informative summaries.
Your summaries:
  1. Capture the main points and key details
  2. Drop unnecessary information and redundancy
  3. Keep the original tone and context
  4. Are typically 25-30% of the length of the original text
  5. Stay factually accurate to the source material

While summarizing, prioritize:
  - The most important information
  - Logical flow and coherence
  - Clear, straightforward language
  - No personal opinions or interpretations

Adjust the length to the complexity of the original text and aim for maximum
value with minimum words.
";

const SUMMARIZER_FORMAT: &str = "
Output your summary in the following format:
SUMMARY:
[Your summary here]
";

const FACT_CHECKER_INSTRUCTION: &str = "\
You are a meticulous fact-checker. Compare the summary against the original text and:
  1. Identify factual discrepancies or misrepresentations
  2. Flag information present in the original but missing from the summary
  3. Highlight additions or interpretations not found in the original
  4. Verify that numbers, names, dates, and specific details are accurate

Output format:
FACT-CHECK STATUS: [PASS/NEEDS REVIEW/FAIL]

VERIFIED FACTS:
- [Fact: Accurate]

DISCREPANCIES FOUND:
- [Issue: Description]

MISSING KEY INFORMATION:
- [Missing point]

RECOMMENDATIONS:
- [Recommendation]
";

const CRITIC_INSTRUCTION: &str = "\
You are an expert editor. Review the summary and:
  1. Check whether the main points are accurately captured.
  2. Check whether the summary is concise and clear.
  3. Suggest improvements or edits where necessary.
  4. Keep factual correctness and the original tone.

Return the critique as bullet points and, if needed, a revised summary suggestion.
";

const SCORING_CRITIC_INSTRUCTION: &str = "\
You are an expert editor and evaluator. Review the summary and provide:

1. NUMERIC SCORES (0-10 scale):
   - Accuracy: how well it captures the original meaning
   - Clarity: how clear and understandable it is
   - Conciseness: how efficiently it conveys information

2. OVERALL QUALITY SCORE: the average of the three scores

3. DETAILED CRITIQUE as bullet points: what works, what needs improvement,
   specific suggestions

4. IMPROVEMENT PRIORITY: HIGH, MEDIUM, or LOW based on the overall score

Output format:
SCORES:
Accuracy: [X/10]
Clarity: [X/10]
Conciseness: [X/10]
Overall Quality: [X/10]

PRIORITY: [HIGH/MEDIUM/LOW]

CRITIQUE:
- [Point]

SUGGESTED IMPROVEMENTS:
- [Improvement]
";

const REWRITER_INSTRUCTION: &str = "\
You are a summary improvement expert. Use the original text and the critique to:
  1. Address every issue identified in the critique
  2. Keep factual accuracy with the original text
  3. Keep the summary concise and clear
  4. Present only the final improved summary
";

const FEEDBACK_REWRITER_INSTRUCTION: &str = "\
You are a summary improvement expert. Use ALL feedback provided to create an enhanced summary.

Review the original summary, the critique scores and feedback, and the
fact-checking results when available. Then write an improved summary that:
  - Addresses every issue raised in the critique
  - Corrects any factual discrepancies
  - Maintains or improves accuracy, clarity, and conciseness
  - Stays concise, clear, and faithful to the original text

Output format:
IMPROVED SUMMARY:
[Your enhanced summary here]

CHANGES MADE:
- [Change]

EXPECTED SCORE IMPROVEMENT:
- Accuracy: [Expected improvement]
- Clarity: [Expected improvement]
- Conciseness: [Expected improvement]
";

const SECONDARY_REWRITER_INSTRUCTION: &str = "\
You are performing a SECOND PASS refinement on a summary that still needs improvement.

The summary has been rewritten once but its quality score remained low. Focus on:
  1. Polish and refinement
  2. Eliminating any remaining issues
  3. Excellence in accuracy, clarity, and conciseness
  4. A production-ready result

Output format:
FINAL REFINED SUMMARY:
[Your polished summary here]

FINAL REFINEMENTS:
- [Refinement]
";
