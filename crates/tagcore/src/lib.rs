pub mod error;
pub mod filter;
pub mod markup;
pub mod rules;

pub use error::RuleError;
pub use filter::{filter_html, filter_with_defaults, Filter, FilterOptions, FilterState, Rejection};
pub use markup::{tokenize, MarkupSink, StartTag};
pub use rules::{fragment, fragment_from_json, RuleFragment, RuleKind, RuleSet};
