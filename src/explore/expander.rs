use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{Result, TunerError};
use crate::explore::constants::NAMESPACE_ROOT;
use crate::models::{ChoiceDescriptor, DimensionSelectionPolicy, ExpandedChoiceOrder};

/// fnmatch-style pattern (`*`, `?`, `[...]`, `[!...]`) over dimension names.
///
/// A leading `##` is ignored on both sides, so `##*` matches `A` and
/// `##flags#O*` matches both `##flags#O3` and `flags#O3`.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let translated = glob_to_regex(strip_root(pattern))?;
        let regex = Regex::new(&translated).map_err(|e| {
            TunerError::contract(format!("invalid dimension pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(strip_root(name))
    }
}

/// Compile a list of patterns; literal names become exact-match globs.
pub fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<GlobPattern>> {
    patterns.iter().map(|p| GlobPattern::new(p.as_ref())).collect()
}

pub fn matches_any(patterns: &[GlobPattern], name: &str) -> bool {
    patterns.iter().any(|p| p.matches(name))
}

pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Catalog key a literal dimension name refers to.
///
/// An exact key wins; otherwise the name is retried with the `##` root added
/// or removed. Unknown names come back unchanged.
pub fn resolve_name(name: &str, catalog: &BTreeMap<String, ChoiceDescriptor>) -> String {
    if catalog.contains_key(name) {
        return name.to_string();
    }
    let alternate = match name.strip_prefix(NAMESPACE_ROOT) {
        Some(rest) => rest.to_string(),
        None => format!("{}{}", NAMESPACE_ROOT, name),
    };
    if catalog.contains_key(&alternate) {
        alternate
    } else {
        name.to_string()
    }
}

fn strip_root(name: &str) -> &str {
    name.strip_prefix(NAMESPACE_ROOT).unwrap_or(name)
}

fn glob_to_regex(pattern: &str) -> Result<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut j = i + 1;
                let negate = chars.get(j) == Some(&'!');
                if negate {
                    j += 1;
                }
                let body_start = j;
                // A `]` right after the opening bracket is literal.
                if chars.get(j) == Some(&']') {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(TunerError::contract(format!(
                        "unclosed character class in dimension pattern '{}'",
                        pattern
                    )));
                }

                out.push('[');
                if negate {
                    out.push('^');
                }
                for &c in &chars[body_start..j] {
                    if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push(']');
                i = j;
            }
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
        i += 1;
    }

    out.push('$');
    Ok(out)
}

/// Catalog keys ordered by `(sort, name)`.
fn sorted_catalog(catalog: &BTreeMap<String, ChoiceDescriptor>) -> Vec<(&str, &ChoiceDescriptor)> {
    let mut entries: Vec<(&str, &ChoiceDescriptor)> =
        catalog.iter().map(|(k, v)| (k.as_str(), v)).collect();
    // BTreeMap iteration is already name-ordered; the sort is stable.
    entries.sort_by(|a, b| a.1.sort_order.total_cmp(&b.1.sort_order));
    entries
}

/// Pad `policies` so every group of `order` has one.
///
/// A single group without any explicit policy gets one unconstrained policy
/// (the "just explore everything randomly" default).
pub fn effective_policies(
    order: &[Vec<String>],
    policies: &[DimensionSelectionPolicy],
) -> Vec<DimensionSelectionPolicy> {
    let mut effective = policies.to_vec();
    if effective.len() < order.len() {
        effective.resize(order.len(), DimensionSelectionPolicy::default());
    }
    effective
}

/// Expand wildcard dimension groups against the choice catalog.
///
/// Glob patterns are matched against catalog keys in `(sort, name)` order and
/// filtered by the group's tag policy; literal names bypass the policy and
/// are resolved with [`resolve_name`].
/// A group matching nothing stays empty.
pub fn expand(
    order: &[Vec<String>],
    policies: &[DimensionSelectionPolicy],
    catalog: &BTreeMap<String, ChoiceDescriptor>,
) -> Result<ExpandedChoiceOrder> {
    let sorted = sorted_catalog(catalog);
    let unconstrained = DimensionSelectionPolicy::default();

    order
        .iter()
        .enumerate()
        .map(|(g, group)| {
            let policy = policies.get(g).unwrap_or(&unconstrained);
            let mut dims: Vec<String> = Vec::new();

            for pattern in group {
                if is_glob(pattern) {
                    let glob = GlobPattern::new(pattern)?;
                    for (name, desc) in &sorted {
                        if glob.matches(name)
                            && policy.admits(&desc.tags)
                            && !dims.iter().any(|d| d == name)
                        {
                            dims.push(name.to_string());
                        }
                    }
                } else {
                    let name = resolve_name(pattern, catalog);
                    if !dims.contains(&name) {
                        dims.push(name);
                    }
                }
            }

            Ok(dims)
        })
        .collect()
}
