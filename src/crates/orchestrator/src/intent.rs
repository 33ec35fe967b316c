//! Intent extraction and the clarification dialogue.
//!
//! Extraction is keyword-driven: capability tags, workflow shape, and
//! complexity are scored from token hits against small curated tables. The
//! thresholds that decide when a request is too ambiguous to plan live in
//! [`crate::config::IntentPolicy`], not in this file.
//!
//! The dialogue is two-phase: an ambiguous first request gets a question
//! set back; the caller re-invokes with `clarifications` populated and the
//! answers fold into the extracted intent.

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::IntentPolicy;
use crate::types::{
    Clarification, ClarificationQuestion, Complexity, Constraints, Intent, QuestionKind,
    WorkflowType,
};

/// keyword fragment → capability tag
const CAPABILITY_KEYWORDS: &[(&str, &str)] = &[
    ("document", "document-analysis"),
    ("pdf", "document-loading"),
    ("upload", "document-loading"),
    ("summar", "summarization"),
    ("extract", "extraction"),
    ("analy", "analysis"),
    ("research", "research"),
    ("search", "web-search"),
    ("web", "web-search"),
    ("scrape", "web-search"),
    ("browse", "web-search"),
    ("database", "database-query"),
    ("sql", "database-query"),
    ("chat", "conversation"),
    ("q&a", "conversation"),
    ("question", "conversation"),
    ("answer", "conversation"),
    ("bot", "conversation"),
    ("code", "code-generation"),
    ("script", "code-generation"),
    ("program", "code-generation"),
    ("translate", "translation"),
    ("image", "vision"),
    ("picture", "vision"),
    ("photo", "vision"),
    ("vision", "vision"),
    ("email", "email-integration"),
    ("api", "api-integration"),
    ("write", "writing"),
    ("draft", "writing"),
];

/// Tags that consume data and therefore need a recognizable source.
const DATA_CONSUMING_TAGS: &[&str] = &[
    "document-analysis",
    "analysis",
    "summarization",
    "extraction",
    "research",
];

/// Tags that identify where data comes from.
const DATA_SOURCE_TAGS: &[&str] = &[
    "document-loading",
    "web-search",
    "database-query",
    "email-integration",
    "text-input",
];

const SIMPLE_KEYWORDS: &[&str] = &["simple", "basic", "quick", "single", "straightforward"];
const AGENT_KEYWORDS: &[&str] = &[
    "agent",
    "assistant",
    "autonomous",
    "tool",
    "monitor",
    "remember",
    "memory",
    "iterate",
];
const MULTI_AGENT_KEYWORDS: &[&str] = &[
    "team",
    "multi-agent",
    "multiple agents",
    "specialists",
    "collaborat",
    "orchestrat",
    "crew",
    "parallel",
];

/// Extraction result: the intent plus the ambiguity evidence behind it.
#[derive(Debug, Clone)]
pub struct ExtractedIntent {
    pub intent: Intent,
    /// Keyword hits that contributed capability evidence.
    pub signals: usize,
    /// Workflow type scores, best first, normalized to sum 1.
    pub type_scores: Vec<(WorkflowType, f64)>,
    /// A data-consuming capability appeared without any data source.
    pub missing_data_source: bool,
    /// Whether the clarification branch should fire for a first-phase
    /// request.
    pub ambiguous: bool,
}

/// Keyword-driven intent extractor with a tunable ambiguity policy.
#[derive(Debug, Clone)]
pub struct IntentExtractor {
    policy: IntentPolicy,
}

impl IntentExtractor {
    pub fn new(policy: IntentPolicy) -> Self {
        Self { policy }
    }

    /// Extract an intent from a query, its constraints, and any answered
    /// clarifications.
    pub fn extract(
        &self,
        query: &str,
        constraints: &Constraints,
        clarifications: &[Clarification],
    ) -> ExtractedIntent {
        let lower = query.to_lowercase();

        let mut capabilities: BTreeSet<String> = constraints.capabilities.clone();
        let mut signals = 0;
        for (keyword, tag) in CAPABILITY_KEYWORDS {
            if lower.contains(keyword) {
                capabilities.insert((*tag).to_string());
                signals += 1;
            }
        }

        let mut forced_type = None;
        for clarification in clarifications {
            signals += 1;
            apply_clarification(clarification, &mut capabilities, &mut forced_type);
        }

        let type_scores = self.score_workflow_types(&lower, capabilities.len());
        let workflow_type = forced_type.unwrap_or(type_scores[0].0);

        let missing_data_source = capabilities
            .iter()
            .any(|c| DATA_CONSUMING_TAGS.contains(&c.as_str()))
            && !capabilities
                .iter()
                .any(|c| DATA_SOURCE_TAGS.contains(&c.as_str()));

        let margin = type_scores[0].1 - type_scores.get(1).map(|(_, s)| *s).unwrap_or(0.0);
        let ambiguous = signals < self.policy.min_capability_signals
            || margin < self.policy.ambiguity_margin
            || missing_data_source;

        let complexity = classify_complexity(&lower, capabilities.len(), workflow_type);
        let special_requirements = special_requirements(&lower, constraints);

        debug!(
            signals,
            margin,
            missing_data_source,
            ?workflow_type,
            "intent extracted"
        );

        ExtractedIntent {
            intent: Intent {
                primary_goal: query.trim().to_string(),
                required_capabilities: capabilities,
                workflow_type,
                complexity,
                special_requirements,
            },
            signals,
            type_scores,
            missing_data_source,
            ambiguous,
        }
    }

    /// Build the question set for an ambiguous request.
    pub fn questions(&self, extracted: &ExtractedIntent) -> Vec<ClarificationQuestion> {
        let mut questions = Vec::new();

        if extracted.missing_data_source {
            questions.push(ClarificationQuestion {
                id: "data-source".into(),
                prompt: "Where does the data come from?".into(),
                kind: QuestionKind::SingleChoice,
                options: vec![
                    "pdf".into(),
                    "web".into(),
                    "database".into(),
                    "text".into(),
                ],
                required: true,
            });
        }

        let margin = extracted.type_scores[0].1
            - extracted.type_scores.get(1).map(|(_, s)| *s).unwrap_or(0.0);
        if margin < self.policy.ambiguity_margin {
            questions.push(ClarificationQuestion {
                id: "workflow-shape".into(),
                prompt: "How autonomous should the workflow be?".into(),
                kind: QuestionKind::SingleChoice,
                options: vec!["simple".into(), "agent".into(), "multi-agent".into()],
                required: false,
            });
        }

        if extracted.signals < self.policy.min_capability_signals || questions.is_empty() {
            questions.push(ClarificationQuestion {
                id: "goal-detail".into(),
                prompt: "What should the workflow accomplish, concretely?".into(),
                kind: QuestionKind::FreeText,
                options: Vec::new(),
                required: questions.is_empty(),
            });
        }

        questions
    }

    fn score_workflow_types(&self, lower: &str, capability_count: usize) -> Vec<(WorkflowType, f64)> {
        let hits = |keywords: &[&str]| keywords.iter().filter(|k| lower.contains(*k)).count() as f64;

        let simple = 1.0 + 0.75 * hits(SIMPLE_KEYWORDS);
        let mut agent = 0.3 + 0.75 * hits(AGENT_KEYWORDS);
        if capability_count >= 3 {
            agent += 0.4;
        }
        let multi = 0.1 + 1.0 * hits(MULTI_AGENT_KEYWORDS);

        let total = simple + agent + multi;
        let mut scores = vec![
            (WorkflowType::Simple, simple / total),
            (WorkflowType::Agent, agent / total),
            (WorkflowType::MultiAgent, multi / total),
        ];
        scores.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        scores
    }
}

impl Default for IntentExtractor {
    fn default() -> Self {
        Self::new(IntentPolicy::default())
    }
}

fn apply_clarification(
    clarification: &Clarification,
    capabilities: &mut BTreeSet<String>,
    forced_type: &mut Option<WorkflowType>,
) {
    match clarification.question_id.as_str() {
        "data-source" => {
            for value in &clarification.values {
                let tag = match value.to_lowercase().as_str() {
                    "pdf" | "document" | "file" => "document-loading",
                    "web" | "url" => "web-search",
                    "database" | "sql" => "database-query",
                    "email" => "email-integration",
                    _ => "text-input",
                };
                capabilities.insert(tag.to_string());
            }
        }
        "workflow-shape" => {
            if let Some(value) = clarification.values.first() {
                *forced_type = match value.to_lowercase().as_str() {
                    "simple" => Some(WorkflowType::Simple),
                    "agent" => Some(WorkflowType::Agent),
                    "multi-agent" | "multi" => Some(WorkflowType::MultiAgent),
                    _ => None,
                };
            }
        }
        // Free-text answers contribute capability evidence the same way the
        // original query does.
        _ => {
            for value in &clarification.values {
                let lower = value.to_lowercase();
                for (keyword, tag) in CAPABILITY_KEYWORDS {
                    if lower.contains(keyword) {
                        capabilities.insert((*tag).to_string());
                    }
                }
            }
        }
    }
}

fn classify_complexity(
    lower: &str,
    capability_count: usize,
    workflow_type: WorkflowType,
) -> Complexity {
    if workflow_type == WorkflowType::MultiAgent {
        return Complexity::High;
    }
    let score = capability_count as f64 + lower.len() as f64 / 80.0;
    if score < 2.0 {
        Complexity::Low
    } else if score < 4.0 {
        Complexity::Medium
    } else {
        Complexity::High
    }
}

fn special_requirements(lower: &str, constraints: &Constraints) -> BTreeSet<String> {
    let mut requirements = BTreeSet::new();
    if constraints.require_local || lower.contains("on-prem") || lower.contains("private") {
        requirements.insert("local-models".to_string());
    }
    if constraints.security_level == sandbox::SecurityLevel::High {
        requirements.insert("high-security".to_string());
    }
    if lower.contains("real-time") || lower.contains("realtime") || lower.contains("streaming") {
        requirements.insert("streaming".to_string());
    }
    requirements
}
