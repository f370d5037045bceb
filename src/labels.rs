//! Target label names and their default values.

use std::collections::HashMap;

use crate::cache::LabelSet;

/// Fallback values for injected labels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelDefaults {
    global: Option<String>,
    per_label: HashMap<String, String>,
}

impl LabelDefaults {
    /// Parse a comma-separated list of bare values and `key=value` pairs.
    ///
    /// A bare token sets the global fallback (the last one wins); a keyed
    /// token with nothing after `=` registers an empty default for that label.
    /// The literal `null` is treated as an empty list.
    pub fn parse(defaults: &str) -> Self {
        let mut parsed = Self::default();
        let defaults = defaults.trim();
        if defaults.is_empty() || defaults == "null" {
            return parsed;
        }

        for token in defaults.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            match token.split_once('=') {
                None => parsed.global = Some(token.to_string()),
                Some((key, value)) => {
                    let key = key.trim();
                    if !key.is_empty() {
                        parsed
                            .per_label
                            .insert(key.to_string(), value.trim().to_string());
                    }
                }
            }
        }

        parsed
    }

    /// The global fallback, if any
    pub fn global(&self) -> Option<&str> {
        self.global.as_deref()
    }

    /// The default registered for this exact label name, if any
    pub fn for_label(&self, label: &str) -> Option<&str> {
        self.per_label.get(label).map(String::as_str)
    }

    /// The default applied to a label when no workload value is available
    pub fn resolve(&self, label: &str) -> Option<&str> {
        non_empty(self.for_label(label)).or_else(|| non_empty(self.global()))
    }
}

/// Labels to inject, in order, together with their defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentSpec {
    labels: Vec<String>,
    defaults: LabelDefaults,
}

impl EnrichmentSpec {
    /// Build a spec from the raw `add_labels` and `label_defaults` settings
    pub fn parse(add_labels: &str, label_defaults: &str) -> Self {
        Self {
            labels: split_labels(add_labels),
            defaults: LabelDefaults::parse(label_defaults),
        }
    }

    pub fn new(labels: Vec<String>, defaults: LabelDefaults) -> Self {
        Self { labels, defaults }
    }

    /// Target label names in injection order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn defaults(&self) -> &LabelDefaults {
        &self.defaults
    }

    /// Whether no labels were requested
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Value for a label: the workload's own non-empty value, then the
    /// per-label default, then the global default.
    pub fn resolve_value<'a>(&'a self, label: &str, workload: Option<&'a LabelSet>) -> Option<&'a str> {
        workload
            .and_then(|labels| non_empty(labels.get(label).map(String::as_str)))
            .or_else(|| self.defaults.resolve(label))
    }
}

/// Split a comma-separated list of label names, dropping blanks
pub fn split_labels(labels: &str) -> Vec<String> {
    labels
        .split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}

/// Escape a label value for the exposition format
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_labels() {
        assert_eq!(split_labels(" app, ,tier ,"), vec!["app", "tier"]);
        assert!(split_labels("").is_empty());
    }

    #[test]
    fn test_parse_defaults() {
        let defaults = LabelDefaults::parse("unknown, env=dev , tier=, =ignored");
        assert_eq!(defaults.global(), Some("unknown"));
        assert_eq!(defaults.for_label("env"), Some("dev"));
        assert_eq!(defaults.for_label("tier"), Some(""));
        assert_eq!(defaults.for_label(""), None);

        assert_eq!(defaults.resolve("env"), Some("dev"));
        // An empty per-label default falls through to the global one
        assert_eq!(defaults.resolve("tier"), Some("unknown"));
        assert_eq!(defaults.resolve("other"), Some("unknown"));
    }

    #[test]
    fn test_parse_defaults_null_and_empty() {
        assert_eq!(LabelDefaults::parse("null"), LabelDefaults::default());
        assert_eq!(LabelDefaults::parse("   "), LabelDefaults::default());
        assert_eq!(LabelDefaults::parse("a,b").global(), Some("b"));
    }

    #[test]
    fn test_resolution_precedence() {
        let spec = EnrichmentSpec::parse("env,tier,zone", "fallback,env=dev");
        let workload: LabelSet = [("env".to_string(), "prod".to_string())]
            .into_iter()
            .collect();

        assert_eq!(spec.resolve_value("env", Some(&workload)), Some("prod"));
        assert_eq!(spec.resolve_value("env", None), Some("dev"));
        assert_eq!(spec.resolve_value("tier", Some(&workload)), Some("fallback"));

        let no_global = EnrichmentSpec::parse("env,tier", "env=dev");
        assert_eq!(no_global.resolve_value("tier", None), None);
    }

    #[test]
    fn test_blank_workload_value_uses_default() {
        let spec = EnrichmentSpec::parse("env", "env=dev");
        let workload: LabelSet = [("env".to_string(), "  ".to_string())]
            .into_iter()
            .collect();
        assert_eq!(spec.resolve_value("env", Some(&workload)), Some("dev"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape_label_value("line\nbreak"), r"line\nbreak");
        assert_eq!(escape_label_value("plain"), "plain");
    }
}
