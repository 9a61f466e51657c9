//! Punctuation-aware text segmentation for backends that synthesize piecewise.

use std::time::Duration;

const ABBREVIATIONS: &[&str] = &[
    "Dr.", "Mr.", "Mrs.", "Ms.", "Prof.", "etc.", "vs.", "e.g.", "i.e.", "a.m.", "p.m.", "Inc.", "Ltd.", "Corp.",
];

fn is_abbreviation(chars: &[char], i: usize) -> bool {
    // Only a period followed directly by a non-space can be inside an abbreviation.
    if i < 2 || i + 1 >= chars.len() || chars[i + 1] == ' ' {
        return false;
    }
    let start = i.saturating_sub(4);
    let context: String = chars[start..=i].iter().collect();
    ABBREVIATIONS.iter().any(|abbr| context.ends_with(abbr))
}

fn is_number_comma(chars: &[char], i: usize) -> bool {
    if i == 0 || i + 1 >= chars.len() {
        return false;
    }
    let (prev, next) = (chars[i - 1], chars[i + 1]);
    (prev.is_ascii_digit() && next.is_ascii_digit()) || (prev.is_whitespace() && i > 1 && chars[i - 2].is_ascii_digit())
}

/// Split text after sentence endings, commas, semicolons and colons.
///
/// Commas inside numbers ("1,000") and periods inside common abbreviations do
/// not split. The trailing space after a break stays with its segment.
pub fn split_at_pauses(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();

    let mut i = 0;
    while i < chars.len() {
        current.push(chars[i]);

        let breaks = match chars[i] {
            '.' | '!' | '?' => !is_abbreviation(&chars, i),
            ',' => !is_number_comma(&chars, i),
            ';' | ':' => true,
            _ => false,
        };

        if breaks {
            if chars.get(i + 1) == Some(&' ') {
                current.push(' ');
                i += 1;
            }
            segments.push(std::mem::take(&mut current));
        }
        i += 1;
    }

    if !current.trim().is_empty() {
        segments.push(current);
    }
    if segments.is_empty() {
        segments.push(text.to_string());
    }
    segments
}

/// Silence to insert after a segment, chosen by its closing punctuation.
pub fn pause_after(segment: &str) -> Duration {
    let trimmed = segment.trim_end();
    let millis = if trimmed.ends_with(['.', '!', '?']) {
        400
    } else if trimmed.ends_with([';', ':']) {
        250
    } else if trimmed.ends_with(',') {
        150
    } else {
        100
    };
    Duration::from_millis(millis)
}

/// Number of silent samples for `pause` at `sample_rate`.
pub fn pause_samples(pause: Duration, sample_rate: u32) -> usize {
    (pause.as_millis() * u128::from(sample_rate) / 1000) as usize
}

/// Segment text for streaming: split at pauses, then cap every segment at
/// `chunk_budget` words. Blank segments are dropped.
pub fn chunk_for_streaming(text: &str, chunk_budget: usize) -> Vec<String> {
    let budget = chunk_budget.max(1);
    let mut chunks = Vec::new();

    for segment in split_at_pauses(text) {
        let words: Vec<&str> = segment.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        if words.len() <= budget {
            chunks.push(segment.trim().to_string());
            continue;
        }
        chunks.extend(words.chunks(budget).map(|group| group.join(" ")));
    }
    chunks
}
