use std::sync::Arc;
use tracing::{debug, info, warn};

use super::heuristics;
use super::types::{AnalysisPayload, AnalysisRequest, AnalysisResult, AnalysisSource, Operation, SentimentLabel};
use crate::core::feed::normalize::truncate_chars;
use crate::core::llm::{BackendError, LlmBackend};

/// Characters of article content forwarded to the backend.
pub const CONTENT_WINDOW_CHARS: usize = 3_000;
pub const MAX_SUMMARY_WORDS: usize = 1_000;
pub const MAX_KEY_POINTS: usize = 50;
const DEFAULT_CONFIDENCE: f64 = 0.5;

const SYSTEM_PROMPT: &str = "You are a precise news analyst. Answer only in the requested format.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("analysis failed: {0}")]
    Internal(String),
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InvalidArgument(_) => "InvalidArgument",
            AnalysisError::Internal(_) => "Internal",
        }
    }
}

/// Produces summaries, key points and sentiment for one article.
///
/// With a backend configured every request tries it first; any backend
/// failure is logged and answered by [`heuristics`] instead, so callers only
/// ever see a lower-quality result tagged [`AnalysisSource::Heuristic`].
#[derive(Clone, Default)]
pub struct AnalysisService {
    backend: Option<Arc<dyn LlmBackend>>,
}

impl AnalysisService {
    pub fn new(backend: Option<Arc<dyn LlmBackend>>) -> Self {
        Self { backend }
    }

    pub fn name(&self) -> &'static str {
        "llm"
    }

    pub fn status(&self) -> String {
        match &self.backend {
            Some(backend) => format!("ready ({})", backend.model()),
            None => "disabled (heuristic only)".to_string(),
        }
    }

    pub fn ai_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn validate(&self, request: &AnalysisRequest) -> Result<(), AnalysisError> {
        match request.operation {
            Operation::Summary { max_words } if max_words == 0 || max_words > MAX_SUMMARY_WORDS => {
                Err(AnalysisError::InvalidArgument(format!(
                    "max_length must be between 1 and {MAX_SUMMARY_WORDS}, got {max_words}"
                )))
            }
            Operation::KeyPoints { count } if count == 0 || count > MAX_KEY_POINTS => {
                Err(AnalysisError::InvalidArgument(format!(
                    "num_points must be between 1 and {MAX_KEY_POINTS}, got {count}"
                )))
            }
            _ => Ok(()),
        }
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        self.validate(request)?;

        let Some(backend) = self.backend.as_deref() else {
            return Ok(heuristic(request));
        };
        if request.content.trim().is_empty() {
            debug!("empty content, skipping backend");
            return Ok(heuristic(request));
        }

        match try_backend(backend, request).await {
            Ok(payload) => {
                info!(
                    operation = ?request.operation.kind(),
                    model = backend.model(),
                    "backend analysis complete"
                );
                Ok(AnalysisResult::new(payload, AnalysisSource::Ai))
            }
            Err(error) => {
                warn!(
                    operation = ?request.operation.kind(),
                    kind = error.kind(),
                    error = %error,
                    "backend analysis failed, using heuristics"
                );
                Ok(heuristic(request))
            }
        }
    }
}

fn heuristic(request: &AnalysisRequest) -> AnalysisResult {
    let payload = match request.operation {
        Operation::Summary { max_words } => AnalysisPayload::Summary {
            summary: heuristics::summarize(&request.title, &request.content, max_words),
        },
        Operation::KeyPoints { count } => AnalysisPayload::KeyPoints {
            key_points: heuristics::key_points(&request.content, count),
        },
        Operation::Sentiment => {
            let (label, confidence) = heuristics::sentiment(&request.content);
            AnalysisPayload::Sentiment {
                label,
                confidence,
                explanation: Some(heuristics::sentiment_explanation(&request.content)),
            }
        }
    };
    AnalysisResult::new(payload, AnalysisSource::Heuristic)
}

async fn try_backend(
    backend: &dyn LlmBackend,
    request: &AnalysisRequest,
) -> Result<AnalysisPayload, BackendError> {
    let prompt = build_prompt(request);
    let reply = backend.complete(SYSTEM_PROMPT, &prompt).await?;
    parse_reply(request.operation, &reply)
}

pub fn build_prompt(request: &AnalysisRequest) -> String {
    let window = truncate_chars(&request.content, CONTENT_WINDOW_CHARS);
    match request.operation {
        Operation::Summary { max_words } => format!(
            "Article Title: {}\n\nArticle Content: {window}\n\n\
             Please provide a concise summary of this article in at most {max_words} words. \
             Focus on the main points and key information.",
            request.title
        ),
        Operation::KeyPoints { count } => format!(
            "Article Title: {}\n\nArticle Content: {window}\n\n\
             Extract the {count} most important key points from this article. \
             Return them as a numbered list, with each point on a new line.\n\nKey Points:",
            request.title
        ),
        Operation::Sentiment => format!(
            "Analyze the sentiment of the following article.\n\n\
             Article Title: {}\n\nContent: {window}\n\n\
             Format your response as:\n\
             Sentiment: [positive/negative/neutral]\n\
             Confidence: [0-100]\n\
             Explanation: [brief explanation]",
            request.title
        ),
    }
}

/// Maps a raw backend reply onto the payload shape of `operation`.
pub fn parse_reply(operation: Operation, reply: &str) -> Result<AnalysisPayload, BackendError> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(BackendError::Malformed("empty reply".to_string()));
    }
    match operation {
        Operation::Summary { max_words } => Ok(AnalysisPayload::Summary {
            summary: heuristics::truncate_words(reply, max_words),
        }),
        Operation::KeyPoints { count } => {
            let key_points: Vec<String> = reply
                .lines()
                .filter_map(strip_list_marker)
                .take(count)
                .collect();
            if key_points.is_empty() {
                return Err(BackendError::Malformed("no list items in reply".to_string()));
            }
            Ok(AnalysisPayload::KeyPoints { key_points })
        }
        Operation::Sentiment => parse_sentiment(reply),
    }
}

/// Text of a numbered (`1.`, `2)`) or bulleted (`-`, `*`, `•`) line. The
/// marker must be followed by whitespace, so `1.5 million` is prose.
fn strip_list_marker(line: &str) -> Option<String> {
    let line = line.trim();
    let rest = if let Some(rest) = line.strip_prefix(['-', '*', '•']) {
        rest
    } else {
        let digits = line.len() - line.trim_start_matches(|ch: char| ch.is_ascii_digit()).len();
        if digits == 0 {
            return None;
        }
        line[digits..].strip_prefix(['.', ')', ':'])?
    };
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let point = rest.trim().trim_matches('*').trim();
    (!point.is_empty()).then(|| point.to_string())
}

fn parse_sentiment(reply: &str) -> Result<AnalysisPayload, BackendError> {
    let mut label = None;
    let mut confidence = None;
    let mut explanation = None;
    for line in reply.lines() {
        let line = line.trim().trim_start_matches(['*', '-']).trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim().trim_matches('*').to_lowercase().as_str() {
            "sentiment" => label = SentimentLabel::parse(value),
            "confidence" => confidence = parse_confidence(value),
            "explanation" => {
                explanation = Some(value.trim().to_string()).filter(|text| !text.is_empty())
            }
            _ => {}
        }
    }

    let label = label.ok_or_else(|| BackendError::Malformed("no sentiment label in reply".to_string()))?;
    Ok(AnalysisPayload::Sentiment {
        label,
        confidence: confidence.unwrap_or(DEFAULT_CONFIDENCE),
        explanation,
    })
}

/// Reads the first number in `raw`. A decimal no greater than 1 is already a
/// fraction; anything else is a 0-100 percentage.
fn parse_confidence(raw: &str) -> Option<f64> {
    let start = raw.find(|ch: char| ch.is_ascii_digit())?;
    let number: String = raw[start..]
        .chars()
        .take_while(|ch| ch.is_ascii_digit() || *ch == '.')
        .collect();
    let number = number.trim_end_matches('.');
    let value: f64 = number.parse().ok()?;
    let fraction = if number.contains('.') && value <= 1.0 {
        value
    } else {
        value / 100.0
    };
    Some(fraction.clamp(0.0, 1.0))
}
