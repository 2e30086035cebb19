//! Deterministic text analysis used when no AI backend is configured and as
//! the fallback when the backend fails.

use std::collections::{HashMap, HashSet};

use super::types::SentimentLabel;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "and", "any", "are", "because",
    "been", "before", "being", "below", "between", "both", "but", "can", "could", "did", "does",
    "doing", "down", "during", "each", "even", "few", "for", "from", "further", "had", "has",
    "have", "having", "her", "here", "hers", "herself", "him", "himself", "his", "how", "into",
    "its", "itself", "just", "more", "most", "much", "must", "myself", "nor", "not", "now", "off",
    "once", "only", "other", "our", "ours", "ourselves", "out", "over", "own", "said", "same",
    "says", "she", "should", "since", "some", "such", "than", "that", "the", "their", "theirs",
    "them", "themselves", "then", "there", "these", "they", "this", "those", "through", "too",
    "under", "until", "very", "was", "were", "what", "when", "where", "which", "while", "who",
    "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself", "yourselves",
];

const POSITIVE_WORDS: &[&str] = &[
    "achieve", "achievement", "advance", "amazing", "beautiful", "benefit", "best", "better",
    "boost", "breakthrough", "bright", "celebrate", "clean", "confident", "delight", "easy",
    "effective", "efficient", "encouraging", "excellent", "exciting", "fantastic", "fast",
    "favorable", "gain", "gains", "good", "great", "growth", "happy", "healthy", "help", "helpful",
    "hope", "impressive", "improve", "improved", "improvement", "innovative", "love", "optimistic",
    "outstanding", "perfect", "pleased", "popular", "positive", "profit", "progress", "record",
    "recover", "recovery", "reliable", "robust", "safe", "simple", "solid", "strong", "succeed",
    "success", "successful", "support", "surge", "thrive", "triumph", "upgrade", "win", "wins",
    "wonderful",
];

const NEGATIVE_WORDS: &[&str] = &[
    "abuse", "angry", "attack", "awful", "bad", "ban", "bankrupt", "broken", "bug", "collapse",
    "concern", "conflict", "crash", "crisis", "damage", "danger", "dangerous", "dead", "death",
    "decline", "defeat", "deficit", "delay", "difficult", "disaster", "drop", "fail", "failed",
    "failure", "fall", "fear", "fraud", "harm", "hate", "horrible", "hurt", "illegal",
    "injury", "kill", "lawsuit", "layoff", "layoffs", "lose", "loss", "losses", "negative",
    "outage", "panic", "plunge", "poor", "problem", "recession", "risk", "sad", "scandal",
    "slow", "slump", "struggle", "terrible", "threat", "trouble", "ugly", "unsafe", "violence",
    "vulnerability", "war", "weak", "worse", "worst",
];

/// Splits text into trimmed, verbatim sentences.
///
/// A sentence ends at `.`, `!` or `?` (with any closing quotes or brackets)
/// followed by whitespace or the end of text, or at a line break.
pub fn split_sentences(content: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = content.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        let mut end = None;
        if ch == '\n' {
            end = Some(index);
        } else if matches!(ch, '.' | '!' | '?') {
            let mut boundary = index + ch.len_utf8();
            while let Some(&(next_index, next)) = chars.peek() {
                if matches!(next, '.' | '!' | '?' | '"' | '\'' | ')' | ']' | '”' | '’') {
                    boundary = next_index + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            match chars.peek() {
                None => end = Some(boundary),
                Some(&(_, next)) if next.is_whitespace() => end = Some(boundary),
                _ => {}
            }
        }

        if let Some(end) = end {
            push_sentence(&mut sentences, &content[start..end]);
            start = end;
        }
    }
    push_sentence(&mut sentences, &content[start..]);
    sentences
}

fn push_sentence<'a>(sentences: &mut Vec<&'a str>, raw: &'a str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed);
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Leading sentences of `content` that fit in `max_words`.
///
/// Content already within budget is returned unchanged. Whole sentences are
/// taken while they fit; only when the very first sentence is too long is it
/// cut to exactly `max_words` words, marked with a trailing `...`.
pub fn summarize(_title: &str, content: &str, max_words: usize) -> String {
    if word_count(content) <= max_words {
        return content.to_string();
    }

    let mut picked: Vec<&str> = Vec::new();
    let mut used = 0;
    for sentence in split_sentences(content) {
        let words = word_count(sentence);
        if used + words > max_words {
            if picked.is_empty() {
                return truncate_words(sentence, max_words);
            }
            break;
        }
        picked.push(sentence);
        used += words;
    }
    picked.join(" ")
}

/// First `max_words` words of `text`, with `...` glued to the last one when
/// anything was cut.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return words.join(" ");
    }
    let mut truncated = words[..max_words].join(" ");
    if !truncated.is_empty() {
        truncated.push_str("...");
    }
    truncated
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn is_significant(token: &str) -> bool {
    token.chars().count() >= 3 && !STOPWORDS.contains(&token)
}

/// The `count` highest-scoring sentences, in the order they appear.
///
/// A sentence scores the summed document frequency of its significant words;
/// ties go to the earlier sentence.
pub fn key_points(content: &str, count: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let sentences: Vec<&str> = split_sentences(content)
        .into_iter()
        .filter(|sentence| seen.insert(*sentence))
        .collect();

    let mut frequencies: HashMap<String, usize> = HashMap::new();
    for token in tokens(content).filter(|token| is_significant(token)) {
        *frequencies.entry(token).or_default() += 1;
    }

    let mut ranked: Vec<(usize, usize)> = sentences
        .iter()
        .enumerate()
        .map(|(position, sentence)| {
            let score = tokens(sentence)
                .filter(|token| is_significant(token))
                .map(|token| frequencies.get(&token).copied().unwrap_or_default())
                .sum();
            (position, score)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(count);
    ranked.sort_by_key(|(position, _)| *position);

    ranked
        .into_iter()
        .map(|(position, _)| sentences[position].to_string())
        .collect()
}

/// Lexicon vote over the words of `content`; confidence is the winning
/// margin relative to all matched words.
pub fn sentiment(content: &str) -> (SentimentLabel, f64) {
    let (positive, negative) = lexicon_counts(content);
    let label = match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => SentimentLabel::Positive,
        std::cmp::Ordering::Less => SentimentLabel::Negative,
        std::cmp::Ordering::Equal => SentimentLabel::Neutral,
    };
    let margin = positive.abs_diff(negative) as f64;
    let confidence = (margin / (positive + negative).max(1) as f64).clamp(0.0, 1.0);
    (label, confidence)
}

/// Matched (positive, negative) lexicon words in `content`.
pub fn lexicon_counts(content: &str) -> (usize, usize) {
    tokens(content).fold((0, 0), |(positive, negative), token| {
        if POSITIVE_WORDS.contains(&token.as_str()) {
            (positive + 1, negative)
        } else if NEGATIVE_WORDS.contains(&token.as_str()) {
            (positive, negative + 1)
        } else {
            (positive, negative)
        }
    })
}

pub fn sentiment_explanation(content: &str) -> String {
    let (positive, negative) = lexicon_counts(content);
    format!("Keyword estimate: {positive} positive and {negative} negative terms matched")
}
