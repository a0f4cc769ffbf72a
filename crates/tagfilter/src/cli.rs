use anyhow::Result;
use std::path::PathBuf;
use tagcore::{Filter, FilterOptions, Rejection, RuleSet};

pub const USAGE: &str = "\
Usage: tagfilter [OPTIONS] [FILE...]

Filters HTML from each FILE (or stdin) against the configured allow/deny rules.

Options:
  -c, --config PATH   Read rules from PATH instead of the default config file
  -o, --output PATH   Write the result to PATH instead of stdout
  -r, --report        Print every removed tag and attribute to stderr
      --init-config   Write the default config file and exit
  -h, --help          Show this help";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub report: bool,
    pub init_config: bool,
    pub help: bool,
    pub inputs: Vec<PathBuf>,
}

impl Args {
    /// Parses arguments, excluding the program name.
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => parsed.config = Some(Self::value(&arg, args.next())?),
                "-o" | "--output" => parsed.output = Some(Self::value(&arg, args.next())?),
                "-r" | "--report" => parsed.report = true,
                "--init-config" => parsed.init_config = true,
                "-h" | "--help" => parsed.help = true,
                "--" => parsed.inputs.extend(args.by_ref().map(PathBuf::from)),
                flag if flag.starts_with('-') && flag != "-" => {
                    return Err(anyhow::anyhow!("Unknown option: {}", flag));
                }
                _ => parsed.inputs.push(PathBuf::from(&arg)),
            }
        }

        Ok(parsed)
    }

    fn value(flag: &str, value: Option<String>) -> Result<PathBuf> {
        value
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))
    }
}

/// Cleaned markup of one document and everything removed from it.
#[derive(Debug, Clone)]
pub struct FilteredDocument {
    pub html: String,
    pub rejections: Vec<Rejection>,
}

/// Filters one document with a fresh [`Filter`].
pub fn filter_document(rules: &RuleSet, options: &FilterOptions, html: &str) -> FilteredDocument {
    let mut filter = Filter::with_options(rules, options.clone());
    let html = filter.filter(html);
    FilteredDocument {
        html,
        rejections: filter.report().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagcore::fragment;

    fn args(list: &[&str]) -> Result<Args> {
        Args::parse(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_flags_and_inputs() {
        let parsed = args(&["-c", "rules.json", "--report", "a.html", "-o", "out.html", "b.html"])
            .unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("rules.json")));
        assert_eq!(parsed.output, Some(PathBuf::from("out.html")));
        assert!(parsed.report);
        assert!(!parsed.init_config);
        assert_eq!(
            parsed.inputs,
            vec![PathBuf::from("a.html"), PathBuf::from("b.html")]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(args(&["--config"]).is_err());
        assert!(args(&["--bogus"]).is_err());
        assert_eq!(
            args(&["--", "--odd.html"]).unwrap().inputs,
            vec![PathBuf::from("--odd.html")]
        );
    }

    #[test]
    fn test_filter_document_reports_rejections() {
        let mut rules = RuleSet::new();
        rules.allow(Some(&fragment(&[("b", &[])]))).unwrap();

        let document = filter_document(&rules, &FilterOptions::default(), "<b>x</b><i>y</i>");
        assert_eq!(document.html, "<b>x</b>y");
        assert_eq!(document.rejections.len(), 2);
        assert_eq!(document.rejections[0].to_string(), "removed <i> (not allowed)");
    }
}
