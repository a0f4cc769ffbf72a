//! Markup events and the tokenizer that produces them.
//!
//! [`tokenize`] runs the html5ever tokenizer over a document and relays
//! start tags, end tags, text and comments to a [`MarkupSink`] in
//! document order. Tag and attribute names arrive lowercased (html5ever
//! normalizes them) and attribute values arrive unescaped. Text is
//! escaped again before it reaches the sink, so anything a sink passes
//! through verbatim is still well-formed markup.

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use std::cell::RefCell;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A start tag with its attributes in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub self_closing: bool,
}

impl StartTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            self_closing: false,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    pub fn self_closing(mut self) -> Self {
        self.self_closing = true;
        self
    }

    /// Serializes the tag, double-quoting and escaping every value.
    pub fn to_markup(&self) -> String {
        let mut markup = String::with_capacity(self.name.len() + 2);
        markup.push('<');
        markup.push_str(&self.name);
        for attribute in &self.attributes {
            let _ = write!(
                markup,
                " {}=\"{}\"",
                attribute.name,
                html_escape::encode_double_quoted_attribute(&attribute.value)
            );
        }
        if self.self_closing {
            markup.push_str(" /");
        }
        markup.push('>');
        markup
    }
}

/// Receiver for markup events.
pub trait MarkupSink {
    fn start_tag(&mut self, tag: &StartTag);

    fn end_tag(&mut self, name: &str);

    /// Raw text, including anything that is not a tag.
    fn text(&mut self, raw: &str);

    fn comment(&mut self, body: &str) {
        self.text(&format!("<!--{}-->", body));
    }
}

/// Elements whose content the tokenizer must read as text, not markup.
fn raw_kind(name: &str) -> Option<RawKind> {
    match name {
        "script" => Some(RawKind::ScriptData),
        "style" | "xmp" | "iframe" | "noembed" | "noframes" => Some(RawKind::Rawtext),
        "textarea" | "title" => Some(RawKind::Rcdata),
        _ => None,
    }
}

struct Relay<'s, S: MarkupSink> {
    sink: RefCell<&'s mut S>,
}

impl<S: MarkupSink> Relay<'_, S> {
    fn start_tag(&self, tag: Tag) -> TokenSinkResult<()> {
        let event = StartTag {
            attributes: tag
                .attrs
                .iter()
                .map(|attribute| Attribute::new(&*attribute.name.local, &*attribute.value))
                .collect(),
            name: tag.name.to_string(),
            self_closing: tag.self_closing,
        };
        self.sink.borrow_mut().start_tag(&event);

        match raw_kind(&event.name) {
            Some(kind) if !tag.self_closing => TokenSinkResult::RawData(kind),
            _ => TokenSinkResult::Continue,
        }
    }
}

impl<S: MarkupSink> TokenSink for Relay<'_, S> {
    type Handle = ();

    fn process_token(&self, token: Token, line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::TagToken(tag) => match tag.kind {
                TagKind::StartTag => return self.start_tag(tag),
                TagKind::EndTag => self.sink.borrow_mut().end_tag(&tag.name),
            },
            Token::CharacterTokens(text) => {
                self.sink
                    .borrow_mut()
                    .text(&html_escape::encode_text(&*text));
            }
            Token::CommentToken(body) => self.sink.borrow_mut().comment(&body),
            Token::DoctypeToken(doctype) => {
                let name = doctype.name.as_deref().unwrap_or("html");
                self.sink.borrow_mut().text(&format!("<!DOCTYPE {}>", name));
            }
            Token::ParseError(message) => {
                log::trace!("Markup parse error on line {}: {}", line_number, message);
            }
            // NUL characters and end of input
            _ => {}
        }
        TokenSinkResult::Continue
    }
}

/// Splits off a trailing `<` that opens a tag the input never closes.
///
/// html5ever discards such a tag at end of input, which would silently lose
/// the text. The caller relays it as escaped text instead.
fn split_unterminated_tag(html: &str) -> (&str, &str) {
    if let Some(index) = html.rfind('<') {
        let tail = &html[index..];
        let opens_tag = tail[1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'));
        if opens_tag && !tail.contains('>') {
            return (&html[..index], tail);
        }
    }
    (html, "")
}

/// Tokenizes `html` in one pass, relaying every event to `sink`.
///
/// A tag left open at the very end of the input is relayed as escaped text.
pub fn tokenize<S: MarkupSink>(html: &str, sink: &mut S) {
    let (complete, unterminated) = split_unterminated_tag(html);

    {
        let input = BufferQueue::default();
        input.push_back(StrTendril::from_slice(complete));

        let tokenizer = Tokenizer::new(
            Relay {
                sink: RefCell::new(&mut *sink),
            },
            TokenizerOpts::default(),
        );
        let _ = tokenizer.feed(&input);
        tokenizer.end();
    }

    if !unterminated.is_empty() {
        log::debug!("Unterminated tag at end of input kept as text");
        sink.text(&html_escape::encode_text(unterminated));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Start(StartTag),
        End(String),
        Text(String),
        Comment(String),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl MarkupSink for Recorder {
        fn start_tag(&mut self, tag: &StartTag) {
            self.events.push(Event::Start(tag.clone()));
        }

        fn end_tag(&mut self, name: &str) {
            self.events.push(Event::End(name.to_string()));
        }

        fn text(&mut self, raw: &str) {
            // The tokenizer may split text runs; merge them for comparison.
            if let Some(Event::Text(previous)) = self.events.last_mut() {
                previous.push_str(raw);
            } else {
                self.events.push(Event::Text(raw.to_string()));
            }
        }

        fn comment(&mut self, body: &str) {
            self.events.push(Event::Comment(body.to_string()));
        }
    }

    fn record(html: &str) -> Vec<Event> {
        let mut recorder = Recorder::default();
        tokenize(html, &mut recorder);
        recorder.events
    }

    #[test]
    fn test_events_in_document_order() {
        let events = record(r#"<A HREF="x" title='t'>hi</A>"#);
        assert_eq!(
            events,
            vec![
                Event::Start(
                    StartTag::new("a")
                        .with_attribute("href", "x")
                        .with_attribute("title", "t")
                ),
                Event::Text("hi".to_string()),
                Event::End("a".to_string()),
            ]
        );
    }

    #[test]
    fn test_text_is_reescaped() {
        let events = record("a &amp; b &lt;c&gt;");
        assert_eq!(events, vec![Event::Text("a &amp; b &lt;c&gt;".to_string())]);
    }

    #[test]
    fn test_self_closing_and_comments() {
        let events = record("<br/><!-- note -->");
        assert_eq!(
            events,
            vec![
                Event::Start(StartTag::new("br").self_closing()),
                Event::Comment(" note ".to_string()),
            ]
        );
    }

    #[test]
    fn test_script_body_is_text() {
        let events = record("<script>if (a<b) { x(); }</script>");
        assert_eq!(
            events,
            vec![
                Event::Start(StartTag::new("script")),
                Event::Text("if (a&lt;b) { x(); }".to_string()),
                Event::End("script".to_string()),
            ]
        );
    }

    #[test]
    fn test_attribute_values_are_unescaped() {
        let events = record(r#"<a title="1 &lt; 2">"#);
        assert_eq!(
            events,
            vec![Event::Start(StartTag::new("a").with_attribute("title", "1 < 2"))]
        );
    }

    #[test]
    fn test_unterminated_tag_becomes_text() {
        let events = record(r#"x <a href="y"#);
        assert_eq!(events, vec![Event::Text(r#"x &lt;a href="y"#.to_string())]);

        let events = record("<b>bold</b> 1 < 2");
        assert_eq!(
            events,
            vec![
                Event::Start(StartTag::new("b")),
                Event::Text("bold".to_string()),
                Event::End("b".to_string()),
                Event::Text(" 1 &lt; 2".to_string()),
            ]
        );
    }

    #[test]
    fn test_to_markup_escapes_values() {
        let tag = StartTag::new("a")
            .with_attribute("href", "x?a=1&b=2")
            .with_attribute("title", "say \"hi\"");
        assert_eq!(
            tag.to_markup(),
            r#"<a href="x?a=1&amp;b=2" title="say &quot;hi&quot;">"#
        );
        assert_eq!(StartTag::new("br").self_closing().to_markup(), "<br />");
    }

    #[test]
    fn test_default_comment_forwards_to_text() {
        struct TextOnly(String);
        impl MarkupSink for TextOnly {
            fn start_tag(&mut self, _tag: &StartTag) {}
            fn end_tag(&mut self, _name: &str) {}
            fn text(&mut self, raw: &str) {
                self.0.push_str(raw);
            }
        }

        let mut sink = TextOnly(String::new());
        tokenize("a<!--b-->c", &mut sink);
        assert_eq!(sink.0, "a<!--b-->c");
    }
}
