//! Analyzer and reasoner trait boundaries, plus the JSON coercion helpers
//! shared by any implementation that talks to an external model.
//!
//! The coercion pattern — try a fenced code block, then a generic code
//! block, then a brace-matching scan of the raw text, and fall back to an
//! empty result rather than erroring — is lifted directly from the
//! teacher's review output parser.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{PhaseName, RiskCategory, RiskLevel, RiskSource};
use crate::errors::PipelineError;

/// Raw findings produced by one analyzer phase, handed to the reasoner.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PhaseFindings {
    pub phase: String,
    /// Free-form observations, e.g. transcript lines, OCR'd captions, or
    /// scene descriptions, each optionally timestamped.
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

/// One analyzer per phase. Implementations shell out to, or call, an
/// external perceptual model; this crate ships a deterministic stub
/// suitable for tests and local runs without real media tooling.
#[async_trait]
pub trait PerceptualAnalyzer: Send + Sync {
    fn phase(&self) -> PhaseName;
    async fn analyze(&self, video_path: &Path) -> Result<PhaseFindings, PipelineError>;
}

/// A finding the risk reasoner attaches to a span of the video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFinding {
    pub start_sec: f64,
    pub end_sec: f64,
    pub category: RiskCategory,
    pub subcategory: String,
    pub score: f64,
    pub level: RiskLevel,
    pub rationale: String,
    pub source: RiskSource,
    pub evidence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RiskAssessment {
    pub findings: Vec<RiskFinding>,
    pub overall_score: f64,
    pub overall_level: RiskLevel,
}

/// Fuses per-phase findings into a single risk assessment. Implementations
/// typically call out to a reasoning model and parse its JSON response;
/// malformed output must degrade to an empty assessment, never an error,
/// per the corrupt-output handling policy.
#[async_trait]
pub trait RiskReasoner: Send + Sync {
    async fn evaluate(&self, findings: &[PhaseFindings]) -> RiskAssessment;
}

/// Extracts a JSON object from model output that may wrap it in a fenced
/// ```json block, a generic fenced block, or surround it with prose.
pub fn extract_json(output: &str) -> Option<String> {
    if let Some(start) = output.find("```json") {
        let after = &output[start + 7..];
        if let Some(end) = after.find("```") {
            return Some(after[..end].trim().to_string());
        }
    }
    if let Some(start) = output.find("```") {
        let after = &output[start + 3..];
        if let Some(end) = after.find("```") {
            let candidate = after[..end].trim();
            if candidate.starts_with('{') || candidate.starts_with('[') {
                return Some(candidate.to_string());
            }
        }
    }
    brace_match(output)
}

/// Scans for the first balanced `{...}` span, tolerating braces inside
/// string literals.
fn brace_match(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses reasoner output into a `RiskAssessment`, degrading to an empty
/// assessment (rather than an error) when the JSON is missing or
/// malformed — per the corrupt-output error-handling policy.
pub fn parse_risk_assessment(output: &str) -> RiskAssessment {
    let Some(json) = extract_json(output) else {
        return RiskAssessment::default();
    };
    serde_json::from_str::<RawAssessment>(&json)
        .ok()
        .map(RawAssessment::into_assessment)
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct RawAssessment {
    #[serde(default)]
    findings: Vec<RawFinding>,
    #[serde(default)]
    overall_score: f64,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    start_sec: f64,
    end_sec: f64,
    category: String,
    #[serde(default)]
    subcategory: String,
    score: f64,
    #[serde(default)]
    rationale: String,
    source: String,
    #[serde(default)]
    evidence: String,
}

impl RawAssessment {
    fn into_assessment(self) -> RiskAssessment {
        let findings: Vec<RiskFinding> = self
            .findings
            .into_iter()
            .filter_map(|f| {
                let category = RiskCategory::from_str(&f.category).ok()?;
                let source = RiskSource::from_str(&f.source).ok()?;
                Some(RiskFinding {
                    start_sec: f.start_sec,
                    end_sec: f.end_sec,
                    category,
                    subcategory: f.subcategory,
                    score: f.score,
                    level: level_from_score(f.score),
                    rationale: f.rationale,
                    source,
                    evidence: f.evidence,
                })
            })
            .collect();
        let overall_level = findings
            .iter()
            .map(|f| f.level)
            .max_by_key(risk_level_rank)
            .unwrap_or_default();
        RiskAssessment {
            findings,
            overall_score: self.overall_score,
            overall_level,
        }
    }
}

fn level_from_score(score: f64) -> RiskLevel {
    match score {
        s if s >= 75.0 => RiskLevel::High,
        s if s >= 40.0 => RiskLevel::Medium,
        s if s > 0.0 => RiskLevel::Low,
        _ => RiskLevel::None,
    }
}

fn risk_level_rank(level: &RiskLevel) -> u8 {
    match level {
        RiskLevel::None => 0,
        RiskLevel::Low => 1,
        RiskLevel::Medium => 2,
        RiskLevel::High => 3,
    }
}

/// Deterministic analyzer used in tests and local runs where no real
/// media-analysis backend is configured. Always reports no observations.
pub struct NullAnalyzer {
    phase: PhaseName,
}

impl NullAnalyzer {
    pub fn new(phase: PhaseName) -> Self {
        Self { phase }
    }
}

#[async_trait]
impl PerceptualAnalyzer for NullAnalyzer {
    fn phase(&self) -> PhaseName {
        self.phase
    }

    async fn analyze(&self, _video_path: &Path) -> Result<PhaseFindings, PipelineError> {
        Ok(PhaseFindings {
            phase: self.phase.as_str().to_string(),
            observations: Vec::new(),
        })
    }
}

/// Deterministic reasoner that reports no risk. Useful as the default
/// wiring until a real `RiskReasoner` backend is configured.
pub struct NullReasoner;

#[async_trait]
impl RiskReasoner for NullReasoner {
    async fn evaluate(&self, _findings: &[PhaseFindings]) -> RiskAssessment {
        RiskAssessment::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_fenced_code_block() {
        let text = "Here is my analysis:\n```json\n{\"overall_score\": 10}\n```\nDone.";
        let json = extract_json(text).unwrap();
        assert!(json.contains("overall_score"));
    }

    #[test]
    fn extracts_json_from_raw_braces_when_no_fence_present() {
        let text = "prefix {\"overall_score\": 5} suffix";
        let json = extract_json(text).unwrap();
        assert_eq!(json, r#"{"overall_score": 5}"#);
    }

    #[test]
    fn missing_json_degrades_to_none() {
        assert!(extract_json("no json here at all").is_none());
    }

    #[test]
    fn parse_risk_assessment_degrades_to_empty_on_malformed_output() {
        let assessment = parse_risk_assessment("the model rambled without any structure");
        assert!(assessment.findings.is_empty());
        assert_eq!(assessment.overall_level, RiskLevel::None);
    }

    #[test]
    fn parse_risk_assessment_extracts_findings_and_derives_level() {
        let output = r#"```json
        {
          "overall_score": 82.0,
          "findings": [
            {"start_sec": 1.0, "end_sec": 2.0, "category": "misleading", "subcategory": "claim",
             "score": 82.0, "rationale": "unverified claim", "source": "audio", "evidence": "..."}
          ]
        }
        ```"#;
        let assessment = parse_risk_assessment(output);
        assert_eq!(assessment.findings.len(), 1);
        assert_eq!(assessment.findings[0].level, RiskLevel::High);
        assert_eq!(assessment.overall_level, RiskLevel::High);
    }

    #[test]
    fn unknown_category_is_dropped_rather_than_erroring() {
        let output = r#"{"overall_score": 1, "findings": [{"start_sec": 0, "end_sec": 1, "category": "bogus", "score": 1, "source": "audio"}]}"#;
        let assessment = parse_risk_assessment(output);
        assert!(assessment.findings.is_empty());
    }

    #[tokio::test]
    async fn null_analyzer_reports_no_observations() {
        let analyzer = NullAnalyzer::new(PhaseName::Audio);
        let findings = analyzer.analyze(Path::new("/tmp/doesnotexist.mp4")).await.unwrap();
        assert!(findings.observations.is_empty());
    }
}
