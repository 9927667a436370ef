//! Prioritized pattern matching
//!
//! A [`PatternSet`] is compiled once per configuration and evaluated for
//! every inbound message. Evaluation is a single ordered scan: patterns are
//! stable-sorted by priority, so the first hit is the lowest priority number
//! and, among equal priorities, the first declared.
//!
//! Substring patterns are compiled to escaped, case-insensitive expressions
//! so every match reports a byte span in the original message. Patterns that
//! fail to compile never match and never raise; they are reported once as a
//! [`CompileWarning`].

use std::fmt::Display;

use regex::{Regex, RegexBuilder};

/// Upper bound on compiled regex program size.
pub const REGEX_SIZE_LIMIT: usize = 1024 * 1024;

/// Default maximum pattern length in characters.
pub const DEFAULT_MAX_PATTERN_LENGTH: usize = 1000;

// ============================================================================
// Types
// ============================================================================

/// An authored pattern with its label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern<L> {
    /// Substring or regular expression
    pub text: String,
    /// Whether `text` is a regular expression
    pub is_regex: bool,
    /// Lower numbers are evaluated first
    pub priority: i32,
    /// What a match means
    pub label: L,
}

impl<L> Pattern<L> {
    /// Creates a case-insensitive substring pattern.
    pub fn substring(text: impl Into<String>, priority: i32, label: L) -> Self {
        Self {
            text: text.into(),
            is_regex: false,
            priority,
            label,
        }
    }

    /// Creates a regular expression pattern.
    pub fn regex(text: impl Into<String>, priority: i32, label: L) -> Self {
        Self {
            text: text.into(),
            is_regex: true,
            priority,
            label,
        }
    }
}

/// Byte range of a match within the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSpan {
    /// Inclusive start offset
    pub start: usize,
    /// Exclusive end offset
    pub end: usize,
}

impl MatchSpan {
    /// Returns the matched slice of `message`.
    #[must_use]
    pub fn slice<'m>(&self, message: &'m str) -> &'m str {
        message.get(self.start..self.end).unwrap_or_default()
    }
}

/// The winning pattern for a message.
#[derive(Debug, Clone, Copy)]
pub struct PatternMatch<'a, L> {
    /// The pattern that matched
    pub pattern: &'a Pattern<L>,
    /// Where it matched
    pub span: MatchSpan,
}

/// A pattern that could not be compiled and will never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileWarning {
    /// Display form of the pattern's label
    pub label: String,
    /// Pattern text as authored
    pub text: String,
    /// Why compilation failed
    pub reason: String,
}

impl Display for CompileWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pattern {:?} for {} never matches: {}",
            self.text, self.label, self.reason
        )
    }
}

/// Limits applied while compiling patterns.
#[derive(Debug, Clone, Copy)]
pub struct MatcherLimits {
    /// Patterns longer than this (in characters) are invalid
    pub max_pattern_length: usize,
}

impl Default for MatcherLimits {
    fn default() -> Self {
        Self {
            max_pattern_length: DEFAULT_MAX_PATTERN_LENGTH,
        }
    }
}

// ============================================================================
// Compilation
// ============================================================================

/// Compiles a single pattern text.
///
/// # Errors
///
/// Returns a human-readable reason when the text is empty (substring only),
/// too long, or not a valid regular expression.
pub fn compile_text(text: &str, is_regex: bool, limits: &MatcherLimits) -> Result<Regex, String> {
    let length = text.chars().count();
    if length > limits.max_pattern_length {
        return Err(format!(
            "pattern is {length} characters long (maximum: {})",
            limits.max_pattern_length
        ));
    }

    if is_regex {
        RegexBuilder::new(text)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| e.to_string())
    } else {
        if text.trim().is_empty() {
            return Err("empty substring pattern would match every message".to_string());
        }
        RegexBuilder::new(&regex::escape(text))
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone)]
struct CompiledPattern<L> {
    pattern: Pattern<L>,
    matcher: Option<Regex>,
}

/// An ordered, compiled set of labeled patterns.
#[derive(Debug, Clone)]
pub struct PatternSet<L> {
    patterns: Vec<CompiledPattern<L>>,
    warnings: Vec<CompileWarning>,
}

impl<L> Default for PatternSet<L> {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl<L: Display> PatternSet<L> {
    /// Compiles `patterns`, keeping declaration order among equal priorities.
    pub fn compile(patterns: impl IntoIterator<Item = Pattern<L>>, limits: &MatcherLimits) -> Self {
        let mut warnings = Vec::new();
        let mut compiled: Vec<CompiledPattern<L>> = patterns
            .into_iter()
            .map(|pattern| {
                let matcher = match compile_text(&pattern.text, pattern.is_regex, limits) {
                    Ok(regex) => Some(regex),
                    Err(reason) => {
                        tracing::warn!(
                            label = %pattern.label,
                            pattern = %pattern.text,
                            %reason,
                            "pattern disabled"
                        );
                        warnings.push(CompileWarning {
                            label: pattern.label.to_string(),
                            text: pattern.text.clone(),
                            reason,
                        });
                        None
                    }
                };
                CompiledPattern { pattern, matcher }
            })
            .collect();

        // sort_by_key is stable: ties keep declaration order
        compiled.sort_by_key(|c| c.pattern.priority);

        Self {
            patterns: compiled,
            warnings,
        }
    }
}

impl<L> PatternSet<L> {
    /// Returns the highest-priority pattern matching `message`, if any.
    #[must_use]
    pub fn find(&self, message: &str) -> Option<PatternMatch<'_, L>> {
        self.patterns.iter().find_map(|compiled| {
            let found = compiled.matcher.as_ref()?.find(message)?;
            Some(PatternMatch {
                pattern: &compiled.pattern,
                span: MatchSpan {
                    start: found.start(),
                    end: found.end(),
                },
            })
        })
    }

    /// Returns every match in evaluation order.
    pub fn find_all<'a>(&'a self, message: &'a str) -> impl Iterator<Item = PatternMatch<'a, L>> {
        self.patterns.iter().filter_map(move |compiled| {
            let found = compiled.matcher.as_ref()?.find(message)?;
            Some(PatternMatch {
                pattern: &compiled.pattern,
                span: MatchSpan {
                    start: found.start(),
                    end: found.end(),
                },
            })
        })
    }

    /// Patterns that failed to compile.
    #[must_use]
    pub fn warnings(&self) -> &[CompileWarning] {
        &self.warnings
    }

    /// Number of patterns, including disabled ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Returns `true` if the set holds no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
