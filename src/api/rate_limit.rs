use aho_corasick::AhoCorasick;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::OnceLock;
use std::time::Duration;

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "429",
    "usage limit",
];

/// Words that mark a bare `429` as an HTTP status rather than a line number.
const STATUS_WORDS: &[&str] = &["http", "status", "code", "error"];

/// Backoff used when the signal carries no reset time.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);
pub const MIN_WAIT: Duration = Duration::from_secs(10);
pub const MAX_WAIT: Duration = Duration::from_secs(6 * 60 * 60);
const RESET_BUFFER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub is_rate_limit: bool,
    pub reset_time: Option<DateTime<Utc>>,
}

fn matcher() -> Option<&'static AhoCorasick> {
    static MATCHER: OnceLock<Option<AhoCorasick>> = OnceLock::new();
    MATCHER
        .get_or_init(|| {
            AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(RATE_LIMIT_PATTERNS)
                .ok()
        })
        .as_ref()
}

pub fn check_line(text: &str) -> RateLimitInfo {
    check_line_at(text, Utc::now())
}

/// Scan one diagnostic line for a provider throttle signal. `now` anchors
/// relative hints such as `retry after 30 seconds`.
pub fn check_line_at(text: &str, now: DateTime<Utc>) -> RateLimitInfo {
    if !mentions_rate_limit(text) {
        return RateLimitInfo::default();
    }

    let reset_time = epoch_suffix(text)
        .or_else(|| rfc3339_after_reset(text))
        .or_else(|| retry_after(text, now));

    RateLimitInfo {
        is_rate_limit: true,
        reset_time,
    }
}

pub fn wait_time(info: &RateLimitInfo) -> Duration {
    wait_time_at(info, Utc::now())
}

/// How long to pause before retrying. Zero when `info` is not a rate limit.
pub fn wait_time_at(info: &RateLimitInfo, now: DateTime<Utc>) -> Duration {
    if !info.is_rate_limit {
        return Duration::ZERO;
    }
    match info.reset_time {
        Some(reset) => {
            let remaining = (reset - now).to_std().unwrap_or(Duration::ZERO);
            (remaining + RESET_BUFFER).clamp(MIN_WAIT, MAX_WAIT)
        }
        None => DEFAULT_BACKOFF,
    }
}

fn mentions_rate_limit(text: &str) -> bool {
    let Some(matcher) = matcher() else {
        return false;
    };
    matcher.find_iter(text).any(|found| {
        RATE_LIMIT_PATTERNS[found.pattern().as_usize()] != "429"
            || is_status_code(text, found.start(), found.end())
    })
}

// `HTTP 429`, `status: 429`, `API Error: 429`. Never `main.rs:429:5`.
fn is_status_code(text: &str, start: usize, end: usize) -> bool {
    let bytes = text.as_bytes();
    let open_before = start.checked_sub(1).map_or(true, |idx| {
        bytes[idx].is_ascii_whitespace() || matches!(bytes[idx], b'(' | b'[' | b'=')
    });
    let open_after = bytes.get(end).map_or(true, |byte| {
        byte.is_ascii_whitespace() || matches!(byte, b')' | b']' | b',' | b';')
    });
    if !open_before || !open_after {
        return false;
    }
    let head = text[..start]
        .trim_end_matches(|ch: char| ch.is_whitespace() || matches!(ch, ':' | '=' | '(' | '['));
    let word = head
        .rsplit(|ch: char| ch.is_whitespace() || matches!(ch, '(' | '[' | '"'))
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    STATUS_WORDS.iter().any(|status| word.starts_with(status))
}

// "Claude AI usage limit reached|1760000000"
fn epoch_suffix(text: &str) -> Option<DateTime<Utc>> {
    let (_, rest) = text.rsplit_once('|')?;
    let digits: String = rest
        .trim()
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    let value: i64 = digits.parse().ok()?;
    if value >= 1_000_000_000_000 {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

fn rfc3339_after_reset(text: &str) -> Option<DateTime<Utc>> {
    let mut seen_reset = false;
    for token in text.split_whitespace() {
        if token.to_ascii_lowercase().starts_with("reset") {
            seen_reset = true;
            continue;
        }
        if !seen_reset {
            continue;
        }
        let candidate = token.trim_matches(|ch: char| matches!(ch, ',' | ';' | '(' | ')' | '"' | '\''));
        let candidate = candidate.strip_suffix('.').unwrap_or(candidate);
        if let Ok(parsed) = DateTime::parse_from_rfc3339(candidate) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    None
}

fn retry_after(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = text.to_ascii_lowercase();
    let start = ["retry-after", "retry after"]
        .iter()
        .find_map(|marker| lower.find(marker).map(|idx| idx + marker.len()))?;
    let digits: String = lower[start..]
        .trim_start_matches(|ch: char| ch == ':' || ch.is_whitespace())
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    let seconds: i64 = digits.parse().ok()?;
    now.checked_add_signed(chrono::Duration::try_seconds(seconds)?)
}
