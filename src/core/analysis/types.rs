use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Summary,
    KeyPoints,
    Sentiment,
}

/// Requested analysis together with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Summary { max_words: usize },
    KeyPoints { count: usize },
    Sentiment,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Summary { .. } => OperationKind::Summary,
            Operation::KeyPoints { .. } => OperationKind::KeyPoints,
            Operation::Sentiment => OperationKind::Sentiment,
        }
    }

    fn cache_tag(&self) -> String {
        match self {
            Operation::Summary { max_words } => format!("summary:{max_words}"),
            Operation::KeyPoints { count } => format!("key_points:{count}"),
            Operation::Sentiment => "sentiment".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub title: String,
    pub content: String,
    pub operation: Operation,
}

impl AnalysisRequest {
    pub fn new(title: impl Into<String>, content: impl Into<String>, operation: Operation) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            operation,
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(self.operation.cache_tag().as_bytes());
        hasher.update(b"::");
        hasher.update(self.title.len().to_le_bytes());
        hasher.update(self.title.as_bytes());
        hasher.update(b"::");
        hasher.update(self.content.as_bytes());
        let bytes = hasher.finalize();
        CacheKey(format!("{bytes:x}"))
    }
}

/// SHA-256 over operation, parameters, title and content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().trim_matches(|ch: char| !ch.is_alphabetic()).to_lowercase();
        match lowered.as_str() {
            "positive" => Some(SentimentLabel::Positive),
            "negative" => Some(SentimentLabel::Negative),
            "neutral" | "mixed" => Some(SentimentLabel::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum AnalysisPayload {
    Summary { summary: String },
    KeyPoints { key_points: Vec<String> },
    Sentiment {
        label: SentimentLabel,
        confidence: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
}

impl AnalysisPayload {
    pub fn operation(&self) -> OperationKind {
        match self {
            AnalysisPayload::Summary { .. } => OperationKind::Summary,
            AnalysisPayload::KeyPoints { .. } => OperationKind::KeyPoints,
            AnalysisPayload::Sentiment { .. } => OperationKind::Sentiment,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum AnalysisSource {
    #[serde(rename = "AI")]
    Ai,
    Heuristic,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalysisResult {
    #[serde(flatten)]
    pub payload: AnalysisPayload,
    pub source: AnalysisSource,
    pub computed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(payload: AnalysisPayload, source: AnalysisSource) -> Self {
        Self {
            payload,
            source,
            computed_at: Utc::now(),
        }
    }

    pub fn operation(&self) -> OperationKind {
        self.payload.operation()
    }
}
