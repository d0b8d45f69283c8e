// crates/seqrun-core/src/args.rs
// ============================================================================
// Module: seqrun Argument Sanitizer
// Description: Whitelist/blacklist/dangerlist filtering of free-form tool args.
// Purpose: Reject unknown or forbidden tags and detect structure-changing tags.
// Dependencies: crate::tool
// ============================================================================

//! ## Overview
//! Free-form argument strings are tokenized on whitespace and walked left to
//! right. A token's bare tag is the text before any `=`. Whitelisted tags are
//! kept together with their follow-on tokens; every other tag is collected as
//! unknown or blacklisted and reported in a single error once the whole string
//! has been scanned.
//!
//! Output tokens are re-joined with single spaces, so sanitizing an already
//! sanitized string yields it unchanged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use crate::error::ValidationError;
use crate::tool::ArgArity;
use crate::tool::ArgsPolicy;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Result of a successful sanitization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedArgs {
    /// Accepted tokens joined by single spaces.
    text: String,
    /// Accepted tags that are also dangerlisted, in first-seen order.
    dangerous: Vec<String>,
}

impl SanitizedArgs {
    /// Returns the sanitized argument string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns the dangerlisted tags that were accepted.
    #[must_use]
    pub fn dangerous_tags(&self) -> &[String] {
        &self.dangerous
    }

    /// Returns true when the job specification must be downgraded.
    #[must_use]
    pub fn is_dangerous(&self) -> bool {
        !self.dangerous.is_empty()
    }

    /// Human-readable summary of the final argument string.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.text.is_empty() {
            "no custom arguments".to_string()
        } else {
            format!("custom arguments: {}", self.text)
        }
    }

    /// Consumes the value and returns the sanitized string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for SanitizedArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// ============================================================================
// SECTION: Sanitizer
// ============================================================================

/// Returns the bare tag of a token (the text before the first `=`).
#[must_use]
pub fn bare_tag(token: &str) -> &str {
    token.split_once('=').map_or(token, |(tag, _)| tag)
}

/// Sanitizes `raw` against `policy`.
///
/// A [`ArgArity::Fixed`] tag keeps up to `n` follow-on tokens; an inline
/// `--tag=value` counts as the first one. A [`ArgArity::Variadic`] tag keeps
/// tokens until the next tag the policy knows about (whitelisted or
/// blacklisted), or the end of the string.
///
/// # Errors
///
/// Returns [`ValidationError::Arguments`] listing every unknown and every
/// blacklisted tag found in the string.
pub fn sanitize(raw: &str, policy: &ArgsPolicy) -> Result<SanitizedArgs, ValidationError> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let mut kept: Vec<&str> = Vec::with_capacity(tokens.len());
    let mut dangerous: Vec<String> = Vec::new();
    let mut unknown: Vec<String> = Vec::new();
    let mut blacklisted: Vec<String> = Vec::new();

    let mut index = 0;
    while index < tokens.len() {
        let token = tokens[index];
        let tag = bare_tag(token);
        index += 1;

        let Some(arity) = policy.whitelist.get(tag) else {
            let bucket =
                if policy.blacklist.contains(tag) { &mut blacklisted } else { &mut unknown };
            push_unique(bucket, tag);
            continue;
        };

        kept.push(token);
        if policy.dangerlist.contains(tag) {
            push_unique(&mut dangerous, tag);
        }

        match *arity {
            ArgArity::Fixed(count) => {
                let inline = usize::from(tag.len() < token.len());
                let wanted = count.saturating_sub(inline);
                let end = index.saturating_add(wanted).min(tokens.len());
                kept.extend_from_slice(&tokens[index .. end]);
                index = end;
            }
            ArgArity::Variadic => {
                while index < tokens.len() && !is_known_tag(policy, tokens[index]) {
                    kept.push(tokens[index]);
                    index += 1;
                }
            }
        }
    }

    if !unknown.is_empty() || !blacklisted.is_empty() {
        return Err(ValidationError::Arguments {
            unknown,
            blacklisted,
        });
    }

    Ok(SanitizedArgs {
        text: kept.join(" "),
        dangerous,
    })
}

/// Returns true when the token's bare tag is whitelisted or blacklisted.
fn is_known_tag(policy: &ArgsPolicy, token: &str) -> bool {
    let tag = bare_tag(token);
    policy.whitelist.contains_key(tag) || policy.blacklist.contains(tag)
}

/// Appends `tag` when it is not already present.
fn push_unique(bucket: &mut Vec<String>, tag: &str) {
    if !bucket.iter().any(|existing| existing == tag) {
        bucket.push(tag.to_string());
    }
}

#[cfg(test)]
mod tests;
