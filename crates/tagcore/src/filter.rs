use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::markup::{self, Attribute, MarkupSink, StartTag};
use crate::rules::RuleSet;

lazy_static! {
    static ref SCRIPT_URL: Regex = Regex::new(r"(?i)^(?:javascript|vbscript|livescript|mocha):")
        .expect("Invalid SCRIPT_URL regex pattern");
    static ref URL_NOISE: Regex =
        Regex::new(r"[\x00-\x20\x7f]+").expect("Invalid URL_NOISE regex pattern");
}

/// Attributes whose values are fetched or navigated to by a browser.
const URL_ATTRIBUTES: &[&str] = &[
    "href",
    "src",
    "lowsrc",
    "dynsrc",
    "background",
    "action",
    "formaction",
    "cite",
    "longdesc",
    "usemap",
    "codebase",
    "poster",
    "data",
];

fn is_xss_risk(attribute: &str, value: &str) -> bool {
    URL_ATTRIBUTES.contains(&attribute) && SCRIPT_URL.is_match(&URL_NOISE.replace_all(value, ""))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Drop comments instead of passing them through.
    pub strip_comments: bool,
    /// Keep script URLs in allowed URL attributes.
    pub skip_xss_risk: bool,
    /// Log every rejection at info level.
    pub log_rejects: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectTarget {
    StartTag,
    EndTag,
    Attribute,
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Matched a deny rule.
    Denied,
    /// No allow rule matched.
    NotAllowed,
    /// Script URL in a URL attribute.
    XssRisk,
    /// Comments are being stripped.
    Stripped,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::Denied => "denied",
            RejectReason::NotAllowed => "not allowed",
            RejectReason::XssRisk => "xss risk",
            RejectReason::Stripped => "stripped",
        };
        f.write_str(text)
    }
}

/// One piece of markup the filter removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub target: RejectTarget,
    pub tag: String,
    pub attribute: Option<String>,
    pub value: Option<String>,
    pub reason: RejectReason,
}

impl Rejection {
    fn tag(target: RejectTarget, tag: &str, reason: RejectReason) -> Self {
        Self {
            target,
            tag: tag.to_string(),
            attribute: None,
            value: None,
            reason,
        }
    }

    fn attribute(tag: &str, attribute: &Attribute, reason: RejectReason) -> Self {
        Self {
            target: RejectTarget::Attribute,
            tag: tag.to_string(),
            attribute: Some(attribute.name.clone()),
            value: Some(attribute.value.clone()),
            reason,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            RejectTarget::StartTag => write!(f, "removed <{}> ({})", self.tag, self.reason),
            RejectTarget::EndTag => write!(f, "removed </{}> ({})", self.tag, self.reason),
            RejectTarget::Comment => write!(f, "removed comment ({})", self.reason),
            RejectTarget::Attribute => write!(
                f,
                "removed {}=\"{}\" from <{}> ({})",
                self.attribute.as_deref().unwrap_or_default(),
                self.value.as_deref().unwrap_or_default(),
                self.tag,
                self.reason
            ),
        }
    }
}

/// Applies a [`RuleSet`] to a stream of markup events.
///
/// Markup handed to [`parse`](Self::parse) is queued until
/// [`finish`](Self::finish), which tokenizes it, appends the survivors to
/// the output buffer and closes the filter. Events can also be fed
/// directly through the [`MarkupSink`] impl while the filter is open.
/// Calling `parse` on a closed filter starts a new document that shares
/// the same buffer; use [`reset`](Self::reset) to start over.
///
/// Names are re-emitted exactly as the events carry them. Events fed
/// directly keep their original case, but markup that goes through
/// [`parse`](Self::parse) comes out with lowercase tag and attribute
/// names, because html5ever normalizes them while tokenizing.
pub struct Filter<'r> {
    rules: &'r RuleSet,
    options: FilterOptions,
    state: FilterState,
    pending: String,
    output: String,
    report: Vec<Rejection>,
}

impl<'r> Filter<'r> {
    pub fn new(rules: &'r RuleSet) -> Self {
        Self::with_options(rules, FilterOptions::default())
    }

    pub fn with_options(rules: &'r RuleSet, options: FilterOptions) -> Self {
        Self {
            rules,
            options,
            state: FilterState::Open,
            pending: String::new(),
            output: String::new(),
            report: Vec::new(),
        }
    }

    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    /// Queues a chunk of markup. Chunks may split tags anywhere.
    pub fn parse(&mut self, chunk: &str) -> &mut Self {
        if self.state == FilterState::Closed {
            log::debug!("Filter reopened for a new document");
            self.state = FilterState::Open;
        }
        self.pending.push_str(chunk);
        self
    }

    /// Tokenizes all queued markup into the buffer and closes the filter.
    pub fn finish(&mut self) -> &mut Self {
        if self.state == FilterState::Open {
            let pending = std::mem::take(&mut self.pending);
            if !pending.is_empty() {
                markup::tokenize(&pending, self);
            }
            self.state = FilterState::Closed;
        }
        self
    }

    /// Finishes the current document and returns everything buffered.
    pub fn output(&mut self) -> &str {
        self.finish();
        &self.output
    }

    /// Filters one complete document and returns its cleaned markup.
    pub fn filter(&mut self, html: &str) -> String {
        self.finish();
        let start = self.output.len();
        self.parse(html).finish();
        self.output[start..].to_string()
    }

    pub fn report(&self) -> &[Rejection] {
        &self.report
    }

    /// Clears the buffer, the report and any queued markup.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.output.clear();
        self.report.clear();
        self.state = FilterState::Open;
    }

    fn accepts_events(&self) -> bool {
        if self.state == FilterState::Closed {
            log::warn!("Markup event received after finish; dropping it");
            return false;
        }
        true
    }

    fn reject(&mut self, rejection: Rejection) {
        if self.options.log_rejects {
            log::info!("{}", rejection);
        }
        self.report.push(rejection);
    }

    fn attribute_verdict(&self, tag: &str, attribute: &Attribute) -> Option<RejectReason> {
        let name = attribute.name.to_lowercase();
        if self.rules.attribute_denied(tag, &name, &attribute.value) {
            Some(RejectReason::Denied)
        } else if !self.rules.attribute_permitted(tag, &name, &attribute.value) {
            Some(RejectReason::NotAllowed)
        } else if !self.options.skip_xss_risk && is_xss_risk(&name, &attribute.value) {
            Some(RejectReason::XssRisk)
        } else {
            None
        }
    }
}

impl MarkupSink for Filter<'_> {
    fn start_tag(&mut self, tag: &StartTag) {
        if !self.accepts_events() {
            return;
        }

        let name = tag.name.to_lowercase();
        if self.rules.tag_fully_denied(&name) {
            self.reject(Rejection::tag(RejectTarget::StartTag, &tag.name, RejectReason::Denied));
            return;
        }
        if !self.rules.tag_permitted(&name) {
            self.reject(Rejection::tag(
                RejectTarget::StartTag,
                &tag.name,
                RejectReason::NotAllowed,
            ));
            return;
        }

        let mut kept = StartTag {
            name: tag.name.clone(),
            attributes: Vec::with_capacity(tag.attributes.len()),
            self_closing: tag.self_closing,
        };
        for attribute in &tag.attributes {
            match self.attribute_verdict(&name, attribute) {
                None => kept.attributes.push(attribute.clone()),
                Some(reason) => self.reject(Rejection::attribute(&tag.name, attribute, reason)),
            }
        }
        self.output.push_str(&kept.to_markup());
    }

    fn end_tag(&mut self, name: &str) {
        if !self.accepts_events() {
            return;
        }

        if self.rules.tag_admitted(name) {
            self.output.push_str("</");
            self.output.push_str(name);
            self.output.push('>');
        } else {
            let reason = if self.rules.tag_fully_denied(name) {
                RejectReason::Denied
            } else {
                RejectReason::NotAllowed
            };
            self.reject(Rejection::tag(RejectTarget::EndTag, name, reason));
        }
    }

    fn text(&mut self, raw: &str) {
        if self.accepts_events() {
            self.output.push_str(raw);
        }
    }

    fn comment(&mut self, body: &str) {
        if !self.accepts_events() {
            return;
        }

        if self.options.strip_comments {
            self.reject(Rejection::tag(RejectTarget::Comment, "", RejectReason::Stripped));
        } else {
            self.output.push_str("<!--");
            self.output.push_str(body);
            self.output.push_str("-->");
        }
    }
}

/// Filters `html` against `rules` with default options.
pub fn filter_html(html: &str, rules: &RuleSet) -> String {
    Filter::new(rules).filter(html)
}

/// Filters `html` against the built-in allow list.
pub fn filter_with_defaults(html: &str) -> String {
    filter_html(html, &RuleSet::with_defaults())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::fragment;

    fn rules(
        allow: &[(&str, &[(&str, &[&str])])],
        deny: &[(&str, &[(&str, &[&str])])],
    ) -> RuleSet {
        let mut rules = RuleSet::new();
        rules.allow(Some(&fragment(allow))).unwrap();
        rules.deny(Some(&fragment(deny))).unwrap();
        rules
    }

    #[test]
    fn test_start_tag_keeps_original_case_and_order() {
        let rules = rules(&[("a", &[("href", &[]), ("title", &[])])], &[]);
        let mut filter = Filter::new(&rules);

        filter.start_tag(
            &StartTag::new("A")
                .with_attribute("TITLE", "T")
                .with_attribute("onClick", "y")
                .with_attribute("HREF", "X"),
        );
        filter.text("t");
        filter.end_tag("A");

        assert_eq!(filter.output(), r#"<A TITLE="T" HREF="X">t</A>"#);
    }

    #[test]
    fn test_unadmitted_tags_are_dropped() {
        let rules = rules(&[("b", &[])], &[("i", &[("all", &[])])]);
        let mut filter = Filter::new(&rules);

        filter.start_tag(&StartTag::new("i"));
        filter.start_tag(&StartTag::new("u"));
        filter.text("x");
        filter.end_tag("u");
        filter.end_tag("i");

        assert_eq!(filter.output(), "x");
        let reasons: Vec<_> = filter.report().iter().map(|r| r.reason).collect();
        assert_eq!(
            reasons,
            vec![
                RejectReason::Denied,
                RejectReason::NotAllowed,
                RejectReason::NotAllowed,
                RejectReason::Denied,
            ]
        );
    }

    #[test]
    fn test_denied_attribute_is_reported() {
        let rules = rules(&[("a", &[("any", &[])])], &[("a", &[("onclick", &[])])]);
        let mut filter = Filter::new(&rules);
        filter.start_tag(&StartTag::new("a").with_attribute("onclick", "y"));

        assert_eq!(filter.output(), "<a>");
        let rejection = &filter.report()[0];
        assert_eq!(rejection.target, RejectTarget::Attribute);
        assert_eq!(rejection.attribute.as_deref(), Some("onclick"));
        assert_eq!(rejection.reason, RejectReason::Denied);
        assert_eq!(rejection.to_string(), r#"removed onclick="y" from <a> (denied)"#);
    }

    #[test]
    fn test_script_urls_are_removed() {
        let rules = rules(&[("a", &[("href", &[])]), ("img", &[("src", &[])])], &[]);
        let mut filter = Filter::new(&rules);

        let out = filter.filter(
            "<a href=\"java\tscript:alert(1)\">x</a><img src=\" JavaScript:alert(1)\"><a href=\"/ok\">y</a>",
        );
        assert_eq!(out, r#"<a>x</a><img><a href="/ok">y</a>"#);
        assert!(filter
            .report()
            .iter()
            .all(|rejection| rejection.reason == RejectReason::XssRisk));
    }

    #[test]
    fn test_skip_xss_risk_keeps_script_urls() {
        let rules = rules(&[("a", &[("href", &[])])], &[]);
        let options = FilterOptions {
            skip_xss_risk: true,
            ..FilterOptions::default()
        };
        let mut filter = Filter::with_options(&rules, options);
        assert_eq!(
            filter.filter(r#"<a href="javascript:x()">x</a>"#),
            r#"<a href="javascript:x()">x</a>"#
        );
    }

    #[test]
    fn test_comments_pass_through_unless_stripped() {
        let rules = RuleSet::new();
        assert_eq!(Filter::new(&rules).filter("a<!-- c -->b"), "a<!-- c -->b");

        let options = FilterOptions {
            strip_comments: true,
            ..FilterOptions::default()
        };
        let mut filter = Filter::with_options(&rules, options);
        assert_eq!(filter.filter("a<!-- c -->b"), "ab");
        assert_eq!(filter.report()[0].target, RejectTarget::Comment);
    }

    #[test]
    fn test_state_machine() {
        let rules = rules(&[("p", &[])], &[]);
        let mut filter = Filter::new(&rules);
        assert_eq!(filter.state(), FilterState::Open);

        filter.parse("<p>one").parse("</p>");
        assert_eq!(filter.state(), FilterState::Open);

        filter.finish();
        assert_eq!(filter.state(), FilterState::Closed);
        assert_eq!(filter.output(), "<p>one</p>");

        // Events after finish are dropped.
        filter.text("late");
        filter.start_tag(&StartTag::new("p"));
        filter.end_tag("p");
        assert_eq!(filter.output(), "<p>one</p>");
        assert!(filter.report().is_empty());

        // A new parse shares the buffer.
        filter.parse("<p>two</p>");
        assert_eq!(filter.state(), FilterState::Open);
        assert_eq!(filter.output(), "<p>one</p><p>two</p>");

        filter.reset();
        assert_eq!(filter.output(), "");
        assert!(filter.report().is_empty());
    }

    #[test]
    fn test_chunks_may_split_tags() {
        let rules = rules(&[("a", &[("href", &[])])], &[]);
        let mut filter = Filter::new(&rules);
        filter.parse("<a hr").parse("ef=\"x\" onclick").parse("=\"y\">t</a>");
        assert_eq!(filter.output(), r#"<a href="x">t</a>"#);
    }

    #[test]
    fn test_filter_returns_only_its_document() {
        let rules = rules(&[("p", &[])], &[]);
        let mut filter = Filter::new(&rules);
        assert_eq!(filter.filter("<p>a</p>"), "<p>a</p>");
        assert_eq!(filter.filter("<p>b</p>"), "<p>b</p>");
        assert_eq!(filter.output(), "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_filter_excludes_previously_queued_markup() {
        let rules = rules(&[("p", &[])], &[]);
        let mut filter = Filter::new(&rules);
        filter.parse("<p>queued</p>");

        assert_eq!(filter.filter("<p>b</p>"), "<p>b</p>");
        assert_eq!(filter.output(), "<p>queued</p><p>b</p>");
    }

    #[test]
    fn test_tokenized_names_come_out_lowercase() {
        let rules = rules(&[("a", &[("href", &[])])], &[]);
        let mut filter = Filter::new(&rules);
        assert_eq!(filter.filter(r#"<A HREF="x">t</A>"#), r#"<a href="x">t</a>"#);

        filter.start_tag(&StartTag::new("A").with_attribute("HREF", "x"));
        assert_eq!(filter.output(), r#"<a href="x">t</a>"#);

        filter.reset();
        filter.start_tag(&StartTag::new("A").with_attribute("HREF", "x"));
        assert_eq!(filter.output(), r#"<A HREF="x">"#);
    }

    #[test]
    fn test_filter_with_defaults_strips_scripts() {
        let out = filter_with_defaults(
            r#"<p align="center" onclick="x()">Hello</p><script>alert('XSS')</script>"#,
        );
        assert_eq!(out, r#"<p align="center">Hello</p>alert('XSS')"#);
    }
}
