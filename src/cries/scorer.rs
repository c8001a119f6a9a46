//! CRIES Scorer
//!
//! Scores a single prompt/response exchange on the five CRIES components.
//! Bad content degrades to a low score; nothing here fails on content.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::config::ReliabilityParams;
use crate::cries::snapshot::{clamp_round, Cries};
use crate::ledger::receipt::Receipt;
use crate::ledger::verify::ChainVerifier;

const IMPERATIVE_VERBS: [&str; 8] = [
    "analyze",
    "explain",
    "list",
    "describe",
    "summarize",
    "compare",
    "identify",
    "evaluate",
];

const ACTIONABILITY_MARKERS: [&str; 14] = [
    "step ", "next ", "should ", "can ", "will ", "recommend", "suggest", "1.", "2.", "first",
    "then", "finally", "action", "todo",
];

/// Reliability when a response carries no citations at all.
const UNCITED_RELIABILITY: f64 = 0.7;
const INJECTION_SCORE: f64 = 0.8;

static NUMBERED_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+\.\s+([^\n.]+)").expect("valid regex"));
static BULLET_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[•\-*]\s+([^\n.]+)").expect("valid regex"));
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("valid regex"));
static REFERENCE_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid regex"));
static KEYWORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w{4,}\b").expect("valid regex"));
static REQUEST_OPENER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(please |can you |could you |would you )").expect("valid regex"));
static INSTRUCTION_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(create |build |make |generate |write |analyze )").expect("valid regex")
});

static PII_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b\d{3}-\d{2}-\d{4}\b",                           // SSN
        r"\b\d{16}\b",                                      // card number
        r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b", // email
        r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b",                  // phone
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)ignore (previous|above|all) (instructions?|commands?|prompts?)",
        r"(?i)forget (everything|all|previous)",
        r"(?i)new (instructions?|commands?|system prompt)",
        r"(?i)<script>",
        r"(?i)eval\(",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub source_url: Option<String>,
    /// `Some(true)` verified, `Some(false)` failed, `None` unverified.
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Question,
    Instruction,
    Request,
    Unknown,
}

impl Intent {
    pub fn detect(prompt: &str) -> Self {
        if prompt.contains('?') {
            Intent::Question
        } else if REQUEST_OPENER.is_match(prompt) {
            Intent::Request
        } else if INSTRUCTION_OPENER.is_match(prompt) {
            Intent::Instruction
        } else {
            Intent::Unknown
        }
    }
}

/// External policy check feeding the Security score.
pub trait PolicyChecker: Send + Sync {
    /// Violation severity in [0, 1]; higher is worse.
    fn violation_score(&self, response: &str) -> f64;
}

/// Everything needed to score one exchange.
#[derive(Debug, Clone)]
pub struct ScoringInput<'a> {
    pub prompt: &'a str,
    pub response: &'a str,
    pub receipt: &'a Receipt,
    pub prev_receipt: Option<&'a Receipt>,
    pub citations: &'a [Citation],
}

#[derive(Clone)]
pub struct CriesScorer {
    reliability: ReliabilityParams,
    policy: Option<Arc<dyn PolicyChecker>>,
}

impl CriesScorer {
    pub fn new(reliability: ReliabilityParams) -> Self {
        Self {
            reliability,
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn PolicyChecker>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn score(&self, input: &ScoringInput<'_>) -> Cries {
        let cries = Cries {
            c: self.completeness(input.prompt, input.response),
            r: self.reliability(input.response, input.citations),
            i: self.integrity(input.receipt, input.prev_receipt),
            e: self.effectiveness(input.prompt, input.response),
            s: self.security(input.response),
        };
        debug!(
            "CRIES for receipt {}: C={} R={} I={} E={} S={}",
            input.receipt.receipt_id, cries.c, cries.r, cries.i, cries.e, cries.s
        );
        cries
    }

    /// Share of the prompt's required elements that the response addresses.
    pub fn completeness(&self, prompt: &str, response: &str) -> f64 {
        let required = extract_required_elements(prompt);
        if required.is_empty() {
            return length_ratio_completeness(prompt, response);
        }

        let response_lower = response.to_lowercase();
        let present = required
            .iter()
            .filter(|element| {
                element
                    .to_lowercase()
                    .split_whitespace()
                    .filter(|word| word.chars().count() > 3)
                    .any(|keyword| response_lower.contains(keyword))
            })
            .count();

        clamp_round(present as f64 / required.len() as f64)
    }

    /// `R0 - unverified_penalty * unverified_ratio - fail_penalty * failed_ratio`.
    pub fn reliability(&self, response: &str, citations: &[Citation]) -> f64 {
        let extracted;
        let citations = if citations.is_empty() {
            extracted = extract_citations(response);
            extracted.as_slice()
        } else {
            citations
        };

        if citations.is_empty() {
            return UNCITED_RELIABILITY;
        }

        let total = citations.len() as f64;
        let unverified = citations.iter().filter(|c| c.verified.is_none()).count() as f64;
        let failed = citations.iter().filter(|c| c.verified == Some(false)).count() as f64;

        let params = &self.reliability;
        clamp_round(
            params.r0
                - params.unverified_penalty * (unverified / total)
                - params.fail_penalty * (failed / total),
        )
    }

    /// Binary: 1.0 only when hash, structure and Lamport linkage all hold.
    pub fn integrity(&self, receipt: &Receipt, prev: Option<&Receipt>) -> f64 {
        if ChainVerifier::verify_receipt(receipt, prev).is_valid() {
            1.0
        } else {
            0.0
        }
    }

    /// `0.5 * task_completion + 0.3 * intent_alignment + 0.2 * actionability`.
    pub fn effectiveness(&self, prompt: &str, response: &str) -> f64 {
        let task_completion = task_completion(prompt, response);
        let intent_alignment = intent_alignment(prompt, response);
        let actionability = actionability(response);

        clamp_round(task_completion * 0.5 + intent_alignment * 0.3 + actionability * 0.2)
    }

    /// `1 - (pii_leak + injection + policy_violation) / 3`.
    pub fn security(&self, response: &str) -> f64 {
        let pii = pii_leak_score(response);
        let injection = injection_score(response);
        let policy = self
            .policy
            .as_ref()
            .map(|p| p.violation_score(response).clamp(0.0, 1.0))
            .unwrap_or(0.0);

        clamp_round(1.0 - (pii + injection + policy) / 3.0)
    }
}

/// Numbered items, bullet items and imperative verbs, deduplicated in order.
pub fn extract_required_elements(prompt: &str) -> Vec<String> {
    let mut elements: Vec<String> = Vec::new();

    for caps in NUMBERED_ITEM.captures_iter(prompt) {
        elements.push(caps[1].trim().to_string());
    }
    for caps in BULLET_ITEM.captures_iter(prompt) {
        elements.push(caps[1].trim().to_string());
    }

    let prompt_lower = prompt.to_lowercase();
    elements.extend(
        IMPERATIVE_VERBS
            .iter()
            .filter(|verb| prompt_lower.contains(*verb))
            .map(|verb| verb.to_string()),
    );

    let mut seen = HashSet::new();
    elements.retain(|e| seen.insert(e.clone()));
    elements
}

fn length_ratio_completeness(prompt: &str, response: &str) -> f64 {
    let prompt_len = prompt.chars().count();
    if prompt_len == 0 {
        return 0.9;
    }

    let ratio = response.chars().count() as f64 / prompt_len as f64;
    if ratio < 0.5 {
        0.3
    } else if ratio < 1.0 {
        0.6
    } else if ratio < 2.0 {
        0.8
    } else {
        0.9
    }
}

/// URLs and `[n]` reference markers, all unverified.
pub fn extract_citations(response: &str) -> Vec<Citation> {
    let urls = URL.find_iter(response).enumerate().map(|(idx, m)| Citation {
        id: format!("cite-{}", idx),
        text: m.as_str().to_string(),
        source_url: Some(m.as_str().to_string()),
        verified: None,
        confidence: None,
    });

    let refs = REFERENCE_MARKER
        .find_iter(response)
        .enumerate()
        .map(|(idx, m)| Citation {
            id: format!("ref-{}", idx),
            text: m.as_str().to_string(),
            source_url: None,
            verified: None,
            confidence: None,
        });

    urls.chain(refs).collect()
}

fn keywords(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    KEYWORD
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn task_completion(prompt: &str, response: &str) -> f64 {
    let prompt_keywords = keywords(prompt);
    let response_keywords = keywords(response);
    let overlap = prompt_keywords.intersection(&response_keywords).count();
    overlap as f64 / prompt_keywords.len().max(1) as f64
}

fn intent_alignment(prompt: &str, response: &str) -> f64 {
    match Intent::detect(prompt) {
        Intent::Question => {
            if response.contains('?') {
                0.9
            } else {
                0.7
            }
        }
        Intent::Instruction => {
            if response.chars().count() > 50 {
                0.8
            } else {
                0.5
            }
        }
        Intent::Request => {
            let lower = response.to_lowercase();
            if lower.contains("here") || lower.contains("following") {
                0.9
            } else {
                0.6
            }
        }
        Intent::Unknown => 0.7,
    }
}

fn actionability(response: &str) -> f64 {
    let lower = response.to_lowercase();
    let markers = ACTIONABILITY_MARKERS
        .iter()
        .filter(|marker| lower.contains(*marker))
        .count();
    (markers as f64 * 0.15).min(1.0)
}

fn pii_leak_score(response: &str) -> f64 {
    let matches: usize = PII_PATTERNS
        .iter()
        .map(|pattern| pattern.find_iter(response).count())
        .sum();
    (matches as f64 / 3.0).min(1.0)
}

fn injection_score(response: &str) -> f64 {
    if INJECTION_PATTERNS.iter().any(|pattern| pattern.is_match(response)) {
        INJECTION_SCORE
    } else {
        0.0
    }
}
