//! Deciding which specs run.
//!
//! Filtering never removes specs. It sets [`Spec::skip`] so that skipped
//! specs still show up in the report.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{error::FilterError, node::NodeId, spec::Spec};

pub mod label;
pub mod location;
pub mod version;

pub use label::LabelFilter;
pub use location::LocationFilter;

/// User supplied filters, as they come from the command line or the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub focus_strings: Vec<String>,
    pub skip_strings: Vec<String>,
    pub label_filter: Option<String>,
    pub focus_files: Vec<String>,
    pub skip_files: Vec<String>,
    pub semver_filter: Option<String>,
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_focus(mut self, pattern: impl Into<String>) -> Self {
        self.focus_strings.push(pattern.into());
        self
    }

    pub fn with_skip(mut self, pattern: impl Into<String>) -> Self {
        self.skip_strings.push(pattern.into());
        self
    }

    pub fn with_label_filter(self, filter: impl Into<String>) -> Self {
        Self {
            label_filter: Some(filter.into()),
            ..self
        }
    }

    pub fn with_focus_file(mut self, filter: impl Into<String>) -> Self {
        self.focus_files.push(filter.into());
        self
    }

    pub fn with_skip_file(mut self, filter: impl Into<String>) -> Self {
        self.skip_files.push(filter.into());
        self
    }

    pub fn with_semver_filter(self, version: impl Into<String>) -> Self {
        Self {
            semver_filter: Some(version.into()),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Some spec was focused in code, as opposed to through filters.
    pub has_programmatic_focus: bool,
    pub skipped: usize,
}

/// A compiled [`FilterConfig`].
#[derive(Debug, Clone)]
pub struct SpecFilter {
    focus: Vec<Regex>,
    skip: Vec<Regex>,
    labels: Option<LabelFilter>,
    focus_files: Vec<LocationFilter>,
    skip_files: Vec<LocationFilter>,
    version: Option<semver::Version>,
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, FilterError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| FilterError::Regex {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

impl SpecFilter {
    pub fn new(config: &FilterConfig) -> Result<Self, FilterError> {
        let labels = match config.label_filter.as_deref().map(str::trim) {
            Some(filter) if !filter.is_empty() => Some(LabelFilter::parse(filter)?),
            _ => None,
        };
        let files = |filters: &[String]| -> Result<Vec<_>, FilterError> {
            filters.iter().map(|f| LocationFilter::parse(f)).collect()
        };
        let version = config
            .semver_filter
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(version::parse_version)
            .transpose()?;

        Ok(Self {
            focus: compile(&config.focus_strings)?,
            skip: compile(&config.skip_strings)?,
            labels,
            focus_files: files(&config.focus_files)?,
            skip_files: files(&config.skip_files)?,
            version,
        })
    }

    /// Marks specs as skipped.
    ///
    /// Programmatic focus is resolved first: a focused container loses its
    /// focus when one of its descendants is also focused. When any non
    /// pending spec is still focused, every unfocused spec is skipped. The
    /// text, label, file and version filters are then applied to what is left.
    pub fn apply(&self, specs: &mut [Spec]) -> FilterOutcome {
        let unfocused = nested_focus_overrides(specs);
        let is_focused = |spec: &Spec| {
            spec.focused_nodes()
                .any(|node| !unfocused.contains(&node.id))
        };
        let has_programmatic_focus = specs
            .iter()
            .any(|spec| !spec.is_pending() && is_focused(spec));

        let mut outcome = FilterOutcome {
            has_programmatic_focus,
            skipped: 0,
        };
        for spec in specs.iter_mut() {
            let skip = (has_programmatic_focus && !is_focused(spec)) || !self.matches(spec);
            spec.skip = skip;
            if spec.skip {
                outcome.skipped += 1;
            }
        }
        tracing::debug!(
            skipped = outcome.skipped,
            programmatic_focus = outcome.has_programmatic_focus,
            "applied filters"
        );
        outcome
    }

    fn matches(&self, spec: &Spec) -> bool {
        let text = spec.text();
        if !self.focus.is_empty() && !self.focus.iter().any(|re| re.is_match(&text)) {
            return false;
        }
        if self.skip.iter().any(|re| re.is_match(&text)) {
            return false;
        }

        if let Some(labels) = &self.labels {
            if !labels.matches(&spec.labels()) {
                return false;
            }
        }

        let mut locations = spec.nodes().iter().map(|node| &node.location);
        if !self.focus_files.is_empty()
            && !locations
                .clone()
                .any(|location| self.focus_files.iter().any(|f| f.matches(location)))
        {
            return false;
        }
        if locations.any(|location| self.skip_files.iter().any(|f| f.matches(location))) {
            return false;
        }

        match &self.version {
            Some(version) => spec
                .semver_constraints()
                .all(|constraint| constraint.matches(version)),
            None => true,
        }
    }
}

/// Focused nodes that have a focused node below them in some chain.
fn nested_focus_overrides(specs: &[Spec]) -> HashSet<NodeId> {
    let mut overrides = HashSet::new();
    for spec in specs {
        let focused: Vec<NodeId> = spec.focused_nodes().map(|node| node.id).collect();
        if let Some((_, outer)) = focused.split_last() {
            overrides.extend(outer.iter().copied());
        }
    }
    overrides
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::Decorations,
        spec::generate,
        tree::{Tree, TreeBuilder},
    };

    fn specs(f: impl FnOnce(&mut TreeBuilder)) -> Vec<Spec> {
        generate(&Tree::build(f).unwrap()).0
    }

    fn running(specs: &[Spec]) -> Vec<String> {
        specs
            .iter()
            .filter(|spec| !spec.skip)
            .map(|spec| spec.text())
            .collect()
    }

    #[test]
    fn programmatic_focus_skips_everything_else() {
        let mut specs = specs(|b| {
            b.it("a", || ());
            b.it_with("b", Decorations::new().focused(), || ());
            b.it_with("c", Decorations::new().pending(), || ());
        });
        let outcome = SpecFilter::new(&FilterConfig::new()).unwrap().apply(&mut specs);
        assert!(outcome.has_programmatic_focus);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(running(&specs), vec!["b"]);
    }

    #[test]
    fn focused_pending_specs_do_not_count_as_focus() {
        let mut specs = specs(|b| {
            b.it("a", || ());
            b.describe_with("p", Decorations::new().pending(), |b| {
                b.it_with("b", Decorations::new().focused(), || ());
            });
        });
        let outcome = SpecFilter::new(&FilterConfig::new()).unwrap().apply(&mut specs);
        assert!(!outcome.has_programmatic_focus);
        assert_eq!(running(&specs), vec!["a", "p b"]);
    }

    #[test]
    fn nested_focus_unfocuses_the_outer_container() {
        let mut specs = specs(|b| {
            b.describe_with("outer", Decorations::new().focused(), |b| {
                b.it("sibling", || ());
                b.it_with("inner", Decorations::new().focused(), || ());
            });
            b.describe_with("other", Decorations::new().focused(), |b| {
                b.it("x", || ());
            });
            b.it("plain", || ());
        });
        SpecFilter::new(&FilterConfig::new()).unwrap().apply(&mut specs);
        assert_eq!(running(&specs), vec!["outer inner", "other x"]);
    }

    #[test]
    fn text_and_label_filters() {
        let build = || {
            specs(|b| {
                b.describe_with("net", Decorations::new().with_label("network"), |b| {
                    b.it("dials", || ());
                    b.it_with("is slow", Decorations::new().with_label("slow"), || ());
                });
                b.it("parses", || ());
            })
        };

        let mut focused = build();
        let config = FilterConfig::new().with_focus("^net").with_skip("slow");
        SpecFilter::new(&config).unwrap().apply(&mut focused);
        assert_eq!(running(&focused), vec!["net dials"]);

        let mut labelled = build();
        let config = FilterConfig::new().with_label_filter("network && !slow || !network");
        SpecFilter::new(&config).unwrap().apply(&mut labelled);
        assert_eq!(running(&labelled), vec!["net dials", "parses"]);

        let mut empty = build();
        SpecFilter::new(&FilterConfig::new().with_label_filter("  "))
            .unwrap()
            .apply(&mut empty);
        assert_eq!(running(&empty).len(), 3);
    }

    #[test]
    fn file_filters_match_any_node_in_the_chain() {
        let line = line!() + 3;
        let mut specs = specs(|b| {
            b.describe("c", |b| {
                b.it("a", || ());
            });
            b.it("b", || ());
        });

        let config = FilterConfig::new().with_focus_file(format!("filter/mod.rs:{line}"));
        SpecFilter::new(&config).unwrap().apply(&mut specs);
        assert_eq!(running(&specs), vec!["c a"]);

        let config = FilterConfig::new().with_skip_file(format!("filter/mod.rs:{line}"));
        SpecFilter::new(&config).unwrap().apply(&mut specs);
        assert_eq!(running(&specs), vec!["b"]);
    }

    #[test]
    fn semver_filter_checks_every_constraint() {
        let build = || {
            specs(|b| {
                b.describe_with("v2", Decorations::new().with_semver_constraint(">= 2.0"), |b| {
                    b.it_with("narrow", Decorations::new().with_semver_constraint("< 2.5"), || ());
                    b.it("wide", || ());
                });
                b.it("any", || ());
            })
        };

        let specs_at = |version: &str| {
            let mut specs = build();
            SpecFilter::new(&FilterConfig::new().with_semver_filter(version))
                .unwrap()
                .apply(&mut specs);
            running(&specs)
        };
        assert_eq!(specs_at("2.1"), vec!["v2 narrow", "v2 wide", "any"]);
        assert_eq!(specs_at("3"), vec!["v2 wide", "any"]);
        assert_eq!(specs_at("1.0.0"), vec!["any"]);

        let mut unfiltered = build();
        SpecFilter::new(&FilterConfig::new()).unwrap().apply(&mut unfiltered);
        assert_eq!(running(&unfiltered).len(), 3);
    }

    #[test]
    fn invalid_filters_fail_to_compile() {
        assert!(matches!(
            SpecFilter::new(&FilterConfig::new().with_focus("(")),
            Err(FilterError::Regex { .. })
        ));
        assert!(matches!(
            SpecFilter::new(&FilterConfig::new().with_label_filter("a &&")),
            Err(FilterError::Label(_))
        ));
        assert!(matches!(
            SpecFilter::new(&FilterConfig::new().with_semver_filter("x.y")),
            Err(FilterError::SemVer { .. })
        ));
    }
}
