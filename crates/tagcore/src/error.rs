use thiserror::Error;

use crate::rules::RuleKind;

/// Configuration errors reported while merging rule fragments.
///
/// These are raised synchronously by [`RuleSet::merge`](crate::RuleSet::merge)
/// and [`fragment_from_json`](crate::fragment_from_json); a fragment that
/// fails validation leaves the rule set untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("malformed {kind} rules at `{path}`: expected {expected}")]
    Malformed {
        kind: RuleKind,
        path: String,
        expected: &'static str,
    },

    #[error("{kind} rules contain an empty tag name")]
    EmptyTag { kind: RuleKind },

    #[error("{kind} rules for <{tag}> contain an empty attribute name")]
    EmptyAttribute { kind: RuleKind, tag: String },

    #[error("`all` removes whole tags and is only valid in deny rules (found under <{tag}>)")]
    AllInAllow { tag: String },

    #[error("`all` cannot be used under the pseudo-tag `any`; whole-tag denial needs a tag name")]
    AllUnderAnyTag,
}

pub type Result<T> = std::result::Result<T, RuleError>;
