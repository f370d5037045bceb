//! Line-oriented label injection for exposition-format payloads.

use log::trace;
use regex::Regex;

use crate::cache::LabelSet;
use crate::labels::{EnrichmentSpec, escape_label_value};

/// Default label carrying the workload namespace
pub const NAMESPACE_LABEL: &str = "namespace";

/// Default label carrying the workload name
pub const WORKLOAD_LABEL: &str = "pod";

/// Enriches metric samples with labels resolved from workload metadata
#[derive(Debug, Clone)]
pub struct LabelProcessor {
    namespace_pattern: Regex,
    workload_pattern: Regex,
}

impl Default for LabelProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelProcessor {
    /// Processor matching the `namespace` and `pod` labels
    pub fn new() -> Self {
        Self::with_dimensions(NAMESPACE_LABEL, WORKLOAD_LABEL)
    }

    /// Processor matching custom namespace and workload label names
    pub fn with_dimensions(namespace_label: &str, workload_label: &str) -> Self {
        Self {
            namespace_pattern: dimension_pattern(namespace_label),
            workload_pattern: dimension_pattern(workload_label),
        }
    }

    /// Rewrite every sample line carrying both dimensions.
    ///
    /// Comments, blank lines and lines without a label block are emitted
    /// untouched. Every emitted line ends with `\n`.
    pub fn enrich<F>(&self, payload: &str, spec: &EnrichmentSpec, resolve_labels: F) -> String
    where
        F: Fn(&str, &str) -> Option<LabelSet>,
    {
        if spec.is_empty() || payload.is_empty() {
            return payload.to_string();
        }

        let body = payload.strip_suffix('\n').unwrap_or(payload);
        let mut output = String::with_capacity(payload.len() + payload.len() / 4);

        for line in body.split('\n') {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || !has_label_block(line) {
                output.push_str(line);
            } else {
                output.push_str(&self.enrich_line(line, spec, &resolve_labels));
            }
            output.push('\n');
        }

        output
    }

    /// Enrich a single sample line
    pub fn enrich_line<F>(&self, line: &str, spec: &EnrichmentSpec, resolve_labels: F) -> String
    where
        F: Fn(&str, &str) -> Option<LabelSet>,
    {
        let Some((namespace, workload)) = self.extract_dimensions(line) else {
            return line.to_string();
        };

        let workload_labels = resolve_labels(namespace, workload);
        let mut mutated = line.to_string();

        for label in spec.labels() {
            if has_label(&mutated, label) {
                continue;
            }

            let Some(value) = spec.resolve_value(label, workload_labels.as_ref()) else {
                continue;
            };

            let Some(pos) = mutated.rfind('}') else {
                continue;
            };

            let separator = if needs_separator(&mutated[..pos]) { "," } else { "" };
            let segment = format!("{}{}=\"{}\"", separator, label, escape_label_value(value));
            mutated.insert_str(pos, &segment);
        }

        if mutated.len() != line.len() {
            trace!("Enriched sample for {}/{}", namespace, workload);
        }
        mutated
    }

    /// Namespace and workload name of a sample, when both are present
    pub fn extract_dimensions<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let namespace = self.namespace_pattern.captures(line)?.get(1)?.as_str();
        let workload = self.workload_pattern.captures(line)?.get(1)?.as_str();
        Some((namespace, workload))
    }
}

fn dimension_pattern(label: &str) -> Regex {
    // The label name is anchored to a block opener or separator so that
    // `container_namespace` does not match `namespace`.
    let pattern = format!(r#"[{{,]\s*{}="([^"]+)""#, regex::escape(label));
    Regex::new(&pattern).expect("escaped label pattern is valid")
}

fn has_label_block(line: &str) -> bool {
    line.contains('{') && line.contains('}')
}

/// Whether `line` already carries a `label=` segment inside its label block.
/// Quoted values are skipped, so `note="a,app=b"` does not count as `app`.
fn has_label(line: &str, label: &str) -> bool {
    let Some(open) = line.find('{') else {
        return false;
    };

    let block = &line[open + 1..];
    let mut name_start = Some(0);
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in block.char_indices() {
        if in_quotes {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            '=' => {
                if let Some(start) = name_start.take() {
                    if block[start..i].trim() == label {
                        return true;
                    }
                }
            }
            ',' => name_start = Some(i + 1),
            '}' => break,
            _ => {}
        }
    }

    false
}

/// Whether a new segment placed at the end of `head` needs a leading comma
fn needs_separator(head: &str) -> bool {
    !matches!(head.trim_end().chars().last(), Some('{') | Some(','))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_labels(_: &str, _: &str) -> Option<LabelSet> {
        None
    }

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_precedence_example() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("env,tier", "env=dev");
        let output = processor.enrich(r#"foo{namespace="ns",pod="p"} 1"#, &spec, |_, _| {
            Some(LabelSet::new())
        });
        assert_eq!(output, "foo{namespace=\"ns\",pod=\"p\",env=\"dev\"} 1\n");
    }

    #[test]
    fn test_workload_labels_win_over_defaults() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("app,tier", "unknown,tier=backend");
        let line = r#"container_cpu_usage_seconds_total{container="c",namespace="shop",pod="web-0"} 12.5 1700000000"#;

        let output = processor.enrich(line, &spec, |ns, pod| {
            assert_eq!((ns, pod), ("shop", "web-0"));
            Some(labels(&[("app", "web")]))
        });

        assert_eq!(
            output,
            "container_cpu_usage_seconds_total{container=\"c\",namespace=\"shop\",pod=\"web-0\",app=\"web\",tier=\"backend\"} 12.5 1700000000\n"
        );
    }

    #[test]
    fn test_passthrough_lines() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("app", "unknown");
        let payload = "# HELP foo help text {with braces}\n\n  \nup 1\nfoo{job=\"x\"} 2\nbar{namespace=\"ns\"} 3\n";

        let output = processor.enrich(payload, &spec, no_labels);
        assert_eq!(output, payload);
    }

    #[test]
    fn test_trailing_newline_normalized() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("app", "unknown");
        assert_eq!(processor.enrich("up 1", &spec, no_labels), "up 1\n");
        assert_eq!(processor.enrich("up 1\n", &spec, no_labels), "up 1\n");
        assert_eq!(processor.enrich("", &spec, no_labels), "");
    }

    #[test]
    fn test_line_order_preserved() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("app", "");
        let payload = "# a\nz{namespace=\"n\",pod=\"p\"} 1\n# b\na{namespace=\"n\",pod=\"q\"} 2\n";
        let output = processor.enrich(payload, &spec, |_, pod| {
            Some(labels(&[("app", pod)]))
        });

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "# a");
        assert_eq!(lines[1], "z{namespace=\"n\",pod=\"p\",app=\"p\"} 1");
        assert_eq!(lines[2], "# b");
        assert_eq!(lines[3], "a{namespace=\"n\",pod=\"q\",app=\"q\"} 2");
    }

    #[test]
    fn test_enrichment_is_idempotent() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("app,tier", "unknown");
        let resolve = |_: &str, _: &str| Some(labels(&[("app", "web")]));
        let payload = "foo{namespace=\"ns\",pod=\"p\"} 1\n";

        let once = processor.enrich(payload, &spec, resolve);
        let twice = processor.enrich(&once, &spec, resolve);
        assert_eq!(once, twice);
        assert_eq!(once.matches("app=").count(), 1);
        assert_eq!(once.matches("tier=").count(), 1);
    }

    #[test]
    fn test_existing_label_is_not_overwritten() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("app", "unknown");
        let line = "foo{namespace=\"ns\",pod=\"p\",app=\"original\"} 1";
        let output = processor.enrich_line(line, &spec, |_, _| Some(labels(&[("app", "new")])));
        assert_eq!(output, line);
    }

    #[test]
    fn test_label_name_suffix_does_not_count_as_present() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("app", "");
        let line = "foo{namespace=\"ns\",pod=\"p\",k8s_app=\"x\"} 1";
        let output = processor.enrich_line(line, &spec, |_, _| Some(labels(&[("app", "web")])));
        assert_eq!(output, "foo{namespace=\"ns\",pod=\"p\",k8s_app=\"x\",app=\"web\"} 1");
    }

    #[test]
    fn test_label_inside_quoted_value_does_not_count_as_present() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("app", "");
        let line = r#"foo{namespace="ns",pod="p",note="x,app=y"} 1"#;

        let output = processor.enrich(line, &spec, |_, _| Some(labels(&[("app", "web")])));
        assert_eq!(
            output,
            "foo{namespace=\"ns\",pod=\"p\",note=\"x,app=y\",app=\"web\"} 1\n"
        );

        let escaped_quote = r#"foo{note="say \",app=\"",app="set"} 1"#;
        assert!(has_label(escaped_quote, "app"));
        assert!(!has_label(r#"foo{note="say \",app=\""} 1"#, "app"));
    }

    #[test]
    fn test_no_value_means_no_injection() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("app", "");
        let line = "foo{namespace=\"ns\",pod=\"p\"} 1";
        assert_eq!(processor.enrich_line(line, &spec, no_labels), line);
    }

    #[test]
    fn test_escaped_value_keeps_line_parseable() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("owner", "");
        let line = "foo{namespace=\"ns\",pod=\"p\"} 1";
        let output = processor.enrich_line(line, &spec, |_, _| {
            Some(labels(&[("owner", r#"team "a" \ ops"#)]))
        });

        assert_eq!(
            output,
            r#"foo{namespace="ns",pod="p",owner="team \"a\" \\ ops"} 1"#
        );
        assert_eq!(processor.extract_dimensions(&output), Some(("ns", "p")));
    }

    #[test]
    fn test_dimension_names_are_anchored() {
        let processor = LabelProcessor::new();
        let line = "foo{container_namespace=\"wrong\",namespace=\"right\",pod=\"p\"} 1";
        assert_eq!(processor.extract_dimensions(line), Some(("right", "p")));

        let line = "foo{namespace=\"ns\", pod=\"spaced\"} 1";
        assert_eq!(processor.extract_dimensions(line), Some(("ns", "spaced")));

        assert_eq!(processor.extract_dimensions("foo{namespace=\"\",pod=\"p\"} 1"), None);
    }

    #[test]
    fn test_custom_dimensions() {
        let processor = LabelProcessor::with_dimensions("kube_namespace", "kube_pod");
        let spec = EnrichmentSpec::parse("app", "fallback");
        let line = "foo{kube_namespace=\"ns\",kube_pod=\"p\"} 1";
        assert_eq!(
            processor.enrich_line(line, &spec, no_labels),
            "foo{kube_namespace=\"ns\",kube_pod=\"p\",app=\"fallback\"} 1"
        );
    }

    #[test]
    fn test_trailing_comma_in_block() {
        let processor = LabelProcessor::new();
        let spec = EnrichmentSpec::parse("app", "x");
        let line = "foo{namespace=\"ns\",pod=\"p\",} 1";
        assert_eq!(
            processor.enrich_line(line, &spec, no_labels),
            "foo{namespace=\"ns\",pod=\"p\",app=\"x\"} 1"
        );
    }
}
