//! # Stage Output Parsing
//!
//! Stages answer in free text. The parsers here pull out the structured
//! fields later stages and the refinement gate depend on: critique scores,
//! the fact-check verdict, and the body text under a section header.
//!
//! Score and verdict parsing is strict: a missing or non-numeric field is an
//! error, never a guessed value.

use crate::error::{self, Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Upper bound of every sub-score
pub const MAX_SCORE: f64 = 10.0;

/// Aggregate at or above this is `Priority::Low`
pub const LOW_PRIORITY_FLOOR: f64 = 8.0;

/// Aggregate at or above this (and below `LOW_PRIORITY_FLOOR`) is `Priority::Medium`
pub const MEDIUM_PRIORITY_FLOOR: f64 = 6.0;

static SCORE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s>*#\-]*(accuracy|clarity|conciseness)[ \t]*\**[ \t]*:[ \t]*\**[ \t]*(.*)$")
        .expect("valid score line pattern")
});

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[?\s*(-?\d+(?:\.\d+)?)").expect("valid number pattern")
});

static PRIORITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s>*#\-]*(?:improvement\s+)?priority\s*\**\s*:\s*\**\s*\[?\s*(high|medium|low)\b")
        .expect("valid priority pattern")
});

static VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s>*#\-]*fact[\s\-]?check\s+status\s*\**\s*:\s*\**\s*\[?\s*(pass|needs\s+review|fail)\b")
        .expect("valid verdict pattern")
});

static SECTION_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s>#*]*[A-Z][A-Z0-9 \-/()]*:\s*\**\s*$").expect("valid header pattern")
});

// ============================================================================
// Critique
// ============================================================================

/// How urgently a summary needs more work, derived from the aggregate score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Pure function of the aggregate score
    pub fn from_aggregate(aggregate: f64) -> Self {
        if aggregate >= LOW_PRIORITY_FLOOR {
            Priority::Low
        } else if aggregate >= MEDIUM_PRIORITY_FLOOR {
            Priority::Medium
        } else {
            Priority::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scores extracted from a scoring critic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CritiqueReport {
    pub accuracy: f64,
    pub clarity: f64,
    pub conciseness: f64,
    /// Mean of the three clamped sub-scores
    pub aggregate: f64,
    pub priority: Priority,
    /// Priority the critic wrote itself, if any. Informational only.
    pub stated_priority: Option<Priority>,
}

impl CritiqueReport {
    /// Clamp each sub-score to [0, 10] and derive aggregate and priority.
    pub fn new(accuracy: f64, clarity: f64, conciseness: f64) -> Self {
        let accuracy = clamp_score(accuracy);
        let clarity = clamp_score(clarity);
        let conciseness = clamp_score(conciseness);
        let aggregate = (accuracy + clarity + conciseness) / 3.0;
        Self {
            accuracy,
            clarity,
            conciseness,
            aggregate,
            priority: Priority::from_aggregate(aggregate),
            stated_priority: None,
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, MAX_SCORE)
    }
}

/// Parse `Accuracy`, `Clarity` and `Conciseness` scores out of critic output.
///
/// Accepts `Accuracy: 8`, `Accuracy: [8/10]`, `**Accuracy:** 7.5/10` and
/// similar. The first line for each label wins.
pub fn parse_critique(stage: &str, text: &str) -> Result<CritiqueReport> {
    let mut found: [Option<&str>; 3] = [None, None, None];

    for caps in SCORE_LINE_RE.captures_iter(text) {
        let slot = match caps[1].to_ascii_lowercase().as_str() {
            "accuracy" => 0,
            "clarity" => 1,
            _ => 2,
        };
        if found[slot].is_none() {
            found[slot] = caps.get(2).map(|m| m.as_str());
        }
    }

    let accuracy = score_value(stage, "Accuracy", found[0])?;
    let clarity = score_value(stage, "Clarity", found[1])?;
    let conciseness = score_value(stage, "Conciseness", found[2])?;

    let mut report = CritiqueReport::new(accuracy, clarity, conciseness);
    report.stated_priority = PRIORITY_RE
        .captures(text)
        .and_then(|caps| Priority::parse(&caps[1]));
    Ok(report)
}

fn score_value(stage: &str, label: &str, raw: Option<&str>) -> Result<f64> {
    let raw = raw.ok_or_else(|| error::missing_field(stage, &format!("{} score", label)))?;
    let raw = raw.trim();
    NUMBER_RE
        .captures(raw)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .ok_or_else(|| {
            Error::stage_parse_failed(stage, format!("non-numeric '{}' score: '{}'", label, raw))
                .with_context("field", label)
        })
}

// ============================================================================
// Fact check
// ============================================================================

/// Advisory verdict from the fact-checking stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCheckVerdict {
    Pass,
    NeedsReview,
    Fail,
}

impl FactCheckVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactCheckVerdict::Pass => "PASS",
            FactCheckVerdict::NeedsReview => "NEEDS REVIEW",
            FactCheckVerdict::Fail => "FAIL",
        }
    }
}

impl fmt::Display for FactCheckVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse the `FACT-CHECK STATUS:` line.
pub fn parse_verdict(stage: &str, text: &str) -> Result<FactCheckVerdict> {
    let caps = VERDICT_RE
        .captures(text)
        .ok_or_else(|| error::missing_field(stage, "FACT-CHECK STATUS"))?;

    let status = caps[1].to_ascii_lowercase();
    Ok(if status == "pass" {
        FactCheckVerdict::Pass
    } else if status == "fail" {
        FactCheckVerdict::Fail
    } else {
        FactCheckVerdict::NeedsReview
    })
}

// ============================================================================
// Section bodies
// ============================================================================

/// Text under `marker` up to the next all-caps section header.
///
/// Without a marker, or when the marker is absent, returns the whole trimmed
/// output. A marker followed by an empty section yields an empty string.
pub fn extract_body(text: &str, marker: Option<&str>) -> String {
    let Some(marker) = marker else {
        return text.trim().to_string();
    };
    let wanted = normalize_header(marker);

    let mut lines = text.lines();
    let mut body = Vec::new();
    let mut found = false;

    for line in lines.by_ref() {
        let cleaned = strip_emphasis(line);
        if cleaned.to_ascii_uppercase().starts_with(&wanted) {
            found = true;
            let inline = cleaned[wanted.len()..].trim();
            if !inline.is_empty() {
                body.push(inline.to_string());
            }
            break;
        }
    }

    if found {
        for line in lines {
            if SECTION_HEADER_RE.is_match(line) {
                break;
            }
            body.push(line.to_string());
        }
        return body.join("\n").trim().to_string();
    }

    text.trim().to_string()
}

/// Strip markdown emphasis and heading noise.
fn strip_emphasis(line: &str) -> String {
    line.trim()
        .trim_start_matches(['#', '>', ' '])
        .replace("**", "")
}

fn normalize_header(line: &str) -> String {
    strip_emphasis(line).to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const SCORED: &str = "\
SCORES:
Accuracy: [9/10]
Clarity: 8/10
Conciseness: 7
Overall Quality: [8/10]

PRIORITY: LOW

CRITIQUE:
- Names all key people
";

    #[test]
    fn test_parse_scored_critique() {
        let report = parse_critique("critic_agent", SCORED).unwrap();
        assert_eq!(report.accuracy, 9.0);
        assert_eq!(report.clarity, 8.0);
        assert_eq!(report.conciseness, 7.0);
        assert!((report.aggregate - 8.0).abs() < 1e-9);
        assert_eq!(report.priority, Priority::Low);
        assert_eq!(report.stated_priority, Some(Priority::Low));
    }

    #[test]
    fn test_parse_markdown_and_decimals() {
        let text = "**Accuracy:** 6.5/10\n- **Clarity**: 7.5 / 10\n* Conciseness: [5]\n";
        let report = parse_critique("critic_agent", text).unwrap();
        assert_eq!(report.accuracy, 6.5);
        assert_eq!(report.clarity, 7.5);
        assert_eq!(report.conciseness, 5.0);
        assert_eq!(report.priority, Priority::Medium);
        assert!(report.stated_priority.is_none());
    }

    #[test]
    fn test_scores_are_clamped() {
        let report = parse_critique("c", "Accuracy: 14\nClarity: -3\nConciseness: 10").unwrap();
        assert_eq!(report.accuracy, 10.0);
        assert_eq!(report.clarity, 0.0);
        assert!((report.aggregate - 20.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_score_names_field() {
        let err = parse_critique("critic_agent", "Accuracy: 8\nConciseness: 7").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StageParseFailed);
        assert!(err.message().contains("Clarity"));
        assert!(err.context().contains(&("stage", "critic_agent".to_string())));
    }

    #[test]
    fn test_non_numeric_score_is_rejected() {
        let err = parse_critique("critic_agent", "Accuracy: high\nClarity: 8\nConciseness: 7")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StageParseFailed);
        assert!(err.message().contains("non-numeric 'Accuracy'"));
    }

    #[test]
    fn test_priority_tiers() {
        assert_eq!(Priority::from_aggregate(10.0), Priority::Low);
        assert_eq!(Priority::from_aggregate(8.0), Priority::Low);
        assert_eq!(Priority::from_aggregate(7.99), Priority::Medium);
        assert_eq!(Priority::from_aggregate(6.0), Priority::Medium);
        assert_eq!(Priority::from_aggregate(5.99), Priority::High);
        assert_eq!(Priority::from_aggregate(0.0), Priority::High);
        assert!(Priority::High > Priority::Low);
    }

    #[test]
    fn test_parse_verdict() {
        let v = parse_verdict("fc", "FACT-CHECK STATUS: PASS\n\nVERIFIED FACTS:").unwrap();
        assert_eq!(v, FactCheckVerdict::Pass);
        let v = parse_verdict("fc", "**Fact-Check Status:** [NEEDS REVIEW]").unwrap();
        assert_eq!(v, FactCheckVerdict::NeedsReview);
        let v = parse_verdict("fc", "fact check status: fail").unwrap();
        assert_eq!(v, FactCheckVerdict::Fail);

        let err = parse_verdict("fc", "Looks good to me").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StageParseFailed);
    }

    #[test]
    fn test_extract_body_between_headers() {
        let text = "IMPROVED SUMMARY:\nThe Taj Mahal in Agra honours Mumtaz Mahal.\n\nCHANGES MADE:\n- tightened";
        assert_eq!(
            extract_body(text, Some("IMPROVED SUMMARY:")),
            "The Taj Mahal in Agra honours Mumtaz Mahal."
        );
    }

    #[test]
    fn test_extract_body_inline_and_markdown() {
        let text = "## **SUMMARY:** Shah Jahan built it.\nFor his wife.";
        assert_eq!(extract_body(text, Some("SUMMARY:")), "Shah Jahan built it.\nFor his wife.");
    }

    #[test]
    fn test_extract_body_falls_back_to_whole_text() {
        assert_eq!(extract_body("  plain answer \n", Some("SUMMARY:")), "plain answer");
        assert_eq!(extract_body(" text ", None), "text");
    }

    #[test]
    fn test_extract_body_empty_section() {
        assert_eq!(extract_body("SUMMARY:\n\nNOTES:\nx", Some("SUMMARY:")), "");
        assert_eq!(extract_body("SUMMARY:\n", Some("SUMMARY:")), "");
    }
}
