//! Allow and deny rules for tags, attributes and attribute values.
//!
//! Each rule kind is stored as a fixed-depth table: tag → attribute →
//! value set. Presence of a key is the only signal; an attribute entry
//! with a single `any` value means "every value", an attribute entry
//! named `any` means "every attribute of this tag", and the deny-only
//! attribute `all` removes the whole tag. The pseudo-tag `any` carries
//! attribute rules that apply to every tag.
//!
//! Queries never create entries. Everything is lowercased on the way
//! in, both when merging and when querying.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Result, RuleError};

/// Wildcard: every attribute (attribute level) or every value (value level).
/// As a tag name it is the cross-tag pseudo-tag.
pub const ANY: &str = "any";
/// Keeps the tag but admits/denies none of its attributes.
pub const NONE: &str = "none";
/// Deny only: removes the entire tag.
pub const ALL: &str = "all";

/// Caller-facing rule shape: tag → attribute → values.
///
/// An empty value list is shorthand for `["any"]`.
pub type RuleFragment = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Allow,
    Deny,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Allow => f.write_str("allow"),
            RuleKind::Deny => f.write_str("deny"),
        }
    }
}

type AttributeRules = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RuleTable {
    tags: BTreeMap<String, AttributeRules>,
}

impl RuleTable {
    fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    fn has_attribute(&self, tag: &str, attribute: &str) -> bool {
        self.tags
            .get(tag)
            .is_some_and(|attributes| attributes.contains_key(attribute))
    }

    fn has_value(&self, tag: &str, attribute: &str, value: &str) -> bool {
        self.tags
            .get(tag)
            .and_then(|attributes| attributes.get(attribute))
            .is_some_and(|values| values.contains(value))
    }

    /// Every path by which an attribute rule can match. Inputs must
    /// already be lowercase.
    fn matches_attribute(&self, tag: &str, attribute: &str, value: &str) -> bool {
        self.has_value(tag, attribute, value)
            || self.has_value(tag, attribute, ANY)
            || self.has_value(ANY, attribute, ANY)
            || self.has_value(ANY, attribute, value)
            || self.has_attribute(tag, ANY)
    }

    fn to_fragment(&self) -> RuleFragment {
        self.tags
            .iter()
            .map(|(tag, attributes)| {
                let attributes: BTreeMap<String, Vec<String>> = attributes
                    .iter()
                    .map(|(name, values)| (name.clone(), values.iter().cloned().collect()))
                    .collect();
                (tag.clone(), attributes)
            })
            .collect()
    }
}

fn normalize(key: &str) -> Cow<'_, str> {
    if key.chars().any(char::is_uppercase) {
        Cow::Owned(key.to_lowercase())
    } else {
        Cow::Borrowed(key)
    }
}

/// The merged allow and deny rules consulted by [`Filter`](crate::Filter).
///
/// A new rule set is empty, which removes every tag and attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    allow: RuleTable,
    deny: RuleTable,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule set preloaded with [`default_allows`] and no deny rules.
    pub fn with_defaults() -> Self {
        let mut rules = Self::new();
        rules.allow.tags = validate(RuleKind::Allow, &default_allows())
            .expect("built-in allow rules are well formed");
        rules
    }

    fn table(&self, kind: RuleKind) -> &RuleTable {
        match kind {
            RuleKind::Allow => &self.allow,
            RuleKind::Deny => &self.deny,
        }
    }

    fn table_mut(&mut self, kind: RuleKind) -> &mut RuleTable {
        match kind {
            RuleKind::Allow => &mut self.allow,
            RuleKind::Deny => &mut self.deny,
        }
    }

    /// Merges `fragment` into the rules of `kind`.
    ///
    /// Each tag named in the fragment replaces that tag's previous rules
    /// wholesale; other tags are untouched. `None` or an empty fragment
    /// clears every rule of `kind`. The fragment is validated up front,
    /// so an error leaves the rule set unchanged.
    pub fn merge(&mut self, kind: RuleKind, fragment: Option<&RuleFragment>) -> Result<()> {
        let Some(fragment) = fragment.filter(|fragment| !fragment.is_empty()) else {
            log::debug!("Clearing all {} rules", kind);
            self.clear(kind);
            return Ok(());
        };

        let staged = validate(kind, fragment)?;
        let table = self.table_mut(kind);
        for (tag, attributes) in staged {
            if table.tags.insert(tag.clone(), attributes).is_some() {
                log::debug!("Replaced {} rules for <{}>", kind, tag);
            }
        }
        Ok(())
    }

    pub fn allow(&mut self, fragment: Option<&RuleFragment>) -> Result<()> {
        self.merge(RuleKind::Allow, fragment)
    }

    pub fn deny(&mut self, fragment: Option<&RuleFragment>) -> Result<()> {
        self.merge(RuleKind::Deny, fragment)
    }

    pub fn clear(&mut self, kind: RuleKind) {
        self.table_mut(kind).tags.clear();
    }

    pub fn is_empty(&self, kind: RuleKind) -> bool {
        self.table(kind).tags.is_empty()
    }

    /// Current rules of `kind` in the shape accepted by [`merge`](Self::merge).
    pub fn snapshot(&self, kind: RuleKind) -> RuleFragment {
        self.table(kind).to_fragment()
    }

    pub fn allows(&self) -> RuleFragment {
        self.snapshot(RuleKind::Allow)
    }

    pub fn denies(&self) -> RuleFragment {
        self.snapshot(RuleKind::Deny)
    }

    /// True iff an allow rule names `tag`.
    pub fn tag_permitted(&self, tag: &str) -> bool {
        self.allow.has_tag(&normalize(tag))
    }

    /// True iff a deny rule names `all` for `tag`.
    pub fn tag_fully_denied(&self, tag: &str) -> bool {
        self.deny.has_attribute(&normalize(tag), ALL)
    }

    /// Tag-level decision: deny first, then allow, otherwise remove.
    pub fn tag_admitted(&self, tag: &str) -> bool {
        !self.tag_fully_denied(tag) && self.tag_permitted(tag)
    }

    pub fn attribute_permitted(&self, tag: &str, attribute: &str, value: &str) -> bool {
        self.allow
            .matches_attribute(&normalize(tag), &normalize(attribute), &normalize(value))
    }

    pub fn attribute_denied(&self, tag: &str, attribute: &str, value: &str) -> bool {
        self.deny
            .matches_attribute(&normalize(tag), &normalize(attribute), &normalize(value))
    }

    /// Attribute-level decision: deny first, then allow, otherwise remove.
    pub fn attribute_admitted(&self, tag: &str, attribute: &str, value: &str) -> bool {
        !self.attribute_denied(tag, attribute, value)
            && self.attribute_permitted(tag, attribute, value)
    }
}

fn validate(kind: RuleKind, fragment: &RuleFragment) -> Result<BTreeMap<String, AttributeRules>> {
    let mut staged: BTreeMap<String, AttributeRules> = BTreeMap::new();

    for (tag, attributes) in fragment {
        let tag = normalize(tag.trim()).into_owned();
        if tag.is_empty() {
            return Err(RuleError::EmptyTag { kind });
        }

        let rules = staged.entry(tag.clone()).or_default();
        for (attribute, values) in attributes {
            let attribute = normalize(attribute.trim()).into_owned();
            if attribute.is_empty() {
                return Err(RuleError::EmptyAttribute { kind, tag });
            }
            if attribute == ALL {
                match kind {
                    RuleKind::Allow => return Err(RuleError::AllInAllow { tag }),
                    RuleKind::Deny if tag == ANY => return Err(RuleError::AllUnderAnyTag),
                    RuleKind::Deny => {}
                }
            }
            if attribute == NONE {
                continue;
            }

            let entry = rules.entry(attribute).or_default();
            if values.is_empty() {
                entry.insert(ANY.to_string());
            } else {
                entry.extend(values.iter().map(|value| normalize(value).into_owned()));
            }
        }
    }

    Ok(staged)
}

/// Builds a [`RuleFragment`] from borrowed literals.
pub fn fragment(entries: &[(&str, &[(&str, &[&str])])]) -> RuleFragment {
    entries
        .iter()
        .map(|(tag, attributes)| {
            let attributes: BTreeMap<String, Vec<String>> = attributes
                .iter()
                .map(|(name, values)| {
                    (name.to_string(), values.iter().map(|v| v.to_string()).collect())
                })
                .collect();
            (tag.to_string(), attributes)
        })
        .collect()
}

/// Converts untyped JSON into a [`RuleFragment`].
///
/// The top level and each tag must be objects (a tag may also be
/// `null`, meaning no attribute entries). Attribute values may be
/// `null`, a single string, or an array of strings.
pub fn fragment_from_json(kind: RuleKind, value: &Value) -> Result<RuleFragment> {
    let malformed = |path: String, expected: &'static str| RuleError::Malformed {
        kind,
        path,
        expected,
    };

    let tags = value
        .as_object()
        .ok_or_else(|| malformed(kind.to_string(), "an object of tags"))?;

    let mut fragment = RuleFragment::new();
    for (tag, attributes) in tags {
        let mut parsed = BTreeMap::new();
        match attributes {
            Value::Null => {}
            Value::Object(attributes) => {
                for (attribute, values) in attributes {
                    let values = match values {
                        Value::Null => Vec::new(),
                        Value::String(single) => vec![single.clone()],
                        Value::Array(items) => items
                            .iter()
                            .map(|item| {
                                item.as_str().map(str::to_string).ok_or_else(|| {
                                    malformed(format!("{kind}.{tag}.{attribute}"), "string values")
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                        _ => {
                            return Err(malformed(
                                format!("{kind}.{tag}.{attribute}"),
                                "null, a string or an array of strings",
                            ))
                        }
                    };
                    parsed.insert(attribute.clone(), values);
                }
            }
            _ => return Err(malformed(format!("{kind}.{tag}"), "an object of attributes")),
        }
        fragment.insert(tag.clone(), parsed);
    }
    Ok(fragment)
}

const DEFAULT_ALLOWS: &[(&str, &[(&str, &[&str])])] = &[
    ("p", &[]),
    ("br", &[("clear", &["left", "right", "all", "none"])]),
    ("hr", &[]),
    ("h1", &[]),
    ("h2", &[]),
    ("h3", &[]),
    ("h4", &[]),
    ("h5", &[]),
    ("h6", &[]),
    ("b", &[]),
    ("i", &[]),
    ("u", &[]),
    ("s", &[]),
    ("em", &[]),
    ("strong", &[]),
    ("small", &[]),
    ("big", &[]),
    ("sub", &[]),
    ("sup", &[]),
    ("tt", &[]),
    ("code", &[]),
    ("pre", &[]),
    ("blockquote", &[]),
    ("q", &[]),
    ("span", &[]),
    ("div", &[]),
    ("a", &[("href", &[]), ("name", &[]), ("target", &[])]),
    (
        "img",
        &[
            ("src", &[]),
            ("alt", &[]),
            ("width", &[]),
            ("height", &[]),
            ("border", &[]),
        ],
    ),
    ("ul", &[("type", &[])]),
    ("ol", &[("type", &[]), ("start", &[])]),
    ("li", &[]),
    ("dl", &[]),
    ("dt", &[]),
    ("dd", &[]),
    (
        "table",
        &[
            ("border", &[]),
            ("cellpadding", &[]),
            ("cellspacing", &[]),
            ("width", &[]),
        ],
    ),
    ("caption", &[]),
    ("thead", &[]),
    ("tbody", &[]),
    ("tfoot", &[]),
    ("tr", &[]),
    ("th", &[("colspan", &[]), ("rowspan", &[])]),
    ("td", &[("colspan", &[]), ("rowspan", &[])]),
    (
        ANY,
        &[
            ("align", &["left", "right", "center", "justify"]),
            ("valign", &["top", "middle", "bottom", "baseline"]),
        ],
    ),
];

/// The built-in allow list: common formatting markup, plain links and
/// images, simple tables, and cross-tag alignment attributes.
pub fn default_allows() -> RuleFragment {
    fragment(DEFAULT_ALLOWS)
}
