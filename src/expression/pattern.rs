use crate::core::{Result, UmiError};
use lru::LruCache;
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

lazy_static::lazy_static! {
    static ref COMPILED: Mutex<LruCache<(String, bool), Arc<LikePattern>>> =
        Mutex::new(LruCache::new(NonZeroUsize::new(256).unwrap_or(NonZeroUsize::MIN)));
}

/// A LIKE pattern (`%` any run, `_` one character, `\` escapes) reduced to
/// the cheapest test that decides it.
#[derive(Debug)]
enum LikePattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Regex(Regex),
}

impl LikePattern {
    fn compile(pattern: &str, case_sensitive: bool) -> Result<Self> {
        let fold = |s: &str| if case_sensitive { s.to_string() } else { s.to_lowercase() };

        if !pattern.contains(['_', '\\']) {
            let rest = pattern.trim_start_matches('%');
            let inner = rest.trim_end_matches('%');
            if !inner.contains('%') {
                let leading = rest.len() < pattern.len();
                let trailing = inner.len() < rest.len();
                return Ok(match (leading, trailing) {
                    (false, false) => Self::Exact(fold(inner)),
                    (false, true) => Self::Prefix(fold(inner)),
                    (true, false) => Self::Suffix(fold(inner)),
                    (true, true) => Self::Contains(fold(inner)),
                });
            }
        }

        let mut source = String::from("^");
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '%' => source.push_str(".*"),
                '_' => source.push('.'),
                '\\' => match chars.next() {
                    Some(escaped) => source.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4]))),
                    None => source.push_str(r"\\"),
                },
                c => source.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        source.push('$');

        RegexBuilder::new(&source)
            .case_insensitive(!case_sensitive)
            .dot_matches_new_line(true)
            .build()
            .map(Self::Regex)
            .map_err(|e| UmiError::UnexpectedValue(format!("Invalid LIKE pattern '{}': {}", pattern, e)))
    }

    fn matches(&self, text: &str, case_sensitive: bool) -> bool {
        if let Self::Regex(regex) = self {
            return regex.is_match(text);
        }
        let text = if case_sensitive {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(text.to_lowercase())
        };
        match self {
            Self::Exact(s) => *text == **s,
            Self::Prefix(s) => text.starts_with(s.as_str()),
            Self::Suffix(s) => text.ends_with(s.as_str()),
            Self::Contains(s) => text.contains(s.as_str()),
            Self::Regex(_) => false,
        }
    }
}

/// Whether `text` matches the LIKE `pattern`. Compiled patterns are cached.
pub fn eval_like(text: &str, pattern: &str, case_sensitive: bool) -> Result<bool> {
    let key = (pattern.to_string(), case_sensitive);
    let cached = COMPILED.lock()?.get(&key).cloned();
    let compiled = match cached {
        Some(compiled) => compiled,
        None => {
            let compiled = Arc::new(LikePattern::compile(pattern, case_sensitive)?);
            COMPILED.lock()?.put(key, Arc::clone(&compiled));
            compiled
        }
    };
    Ok(compiled.matches(text, case_sensitive))
}
