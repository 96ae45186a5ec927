use crate::{
    error::TreeAssemblyError,
    node::{CodeLocation, Decorations, NodeType},
};

const FORBIDDEN_LABEL_CHARS: &[char] = &['&', '|', '!', ',', '(', ')', '/'];

/// Per node checks that only need the node itself.
pub(super) fn check_decorations(
    node_type: NodeType,
    decorations: &Decorations,
    has_context: bool,
    location: &CodeLocation,
) -> Result<(), TreeAssemblyError> {
    let exclusive = |first, second| TreeAssemblyError::MutuallyExclusiveDecorations {
        node_type,
        first,
        second,
        location: location.clone(),
    };
    if decorations.focus && decorations.pending {
        return Err(exclusive("Focus", "Pending"));
    }
    if decorations.flake_attempts.is_some() && decorations.must_pass_repeatedly.is_some() {
        return Err(exclusive("FlakeAttempts", "MustPassRepeatedly"));
    }

    let is_container = node_type == NodeType::Container;
    let is_spec_like = is_container || node_type == NodeType::It;
    for decoration in decorations.set_flags() {
        let allowed = match decoration {
            "Focus" | "Pending" | "Serial" | "FlakeAttempts" | "MustPassRepeatedly"
            | "SpecPriority" | "Label" | "SemVerConstraint" => is_spec_like,
            "Ordered" => is_container,
            "ContinueOnFailure" => is_container && decorations.ordered,
            "SpecTimeout" => node_type == NodeType::It,
            "NodeTimeout" | "GracePeriod" => !is_container,
            _ => true,
        };
        if !allowed {
            return Err(TreeAssemblyError::InvalidDecoration {
                node_type,
                decoration,
                location: location.clone(),
            });
        }
    }

    if !is_container && !has_context {
        let timeout = [
            ("NodeTimeout", decorations.node_timeout.is_some()),
            ("SpecTimeout", decorations.spec_timeout.is_some()),
            ("GracePeriod", decorations.grace_period.is_some()),
        ]
        .into_iter()
        .find_map(|(name, set)| set.then_some(name));
        if let Some(decoration) = timeout {
            return Err(TreeAssemblyError::TimeoutOnNonContextNode {
                node_type,
                decoration,
                location: location.clone(),
            });
        }
    }

    for label in &decorations.labels {
        check_label(label, location)?;
    }
    Ok(())
}

pub(super) fn check_label(label: &str, location: &CodeLocation) -> Result<(), TreeAssemblyError> {
    let reason = if label.trim().is_empty() {
        Some("labels cannot be empty")
    } else if label.contains(FORBIDDEN_LABEL_CHARS) {
        Some("labels cannot contain '&', '|', '!', ',', '(', ')' or '/'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(TreeAssemblyError::InvalidLabel {
            label: label.to_string(),
            reason,
            location: location.clone(),
        }),
        None => Ok(()),
    }
}

pub(super) fn parse_semver_constraints(
    constraints: &[String],
    location: &CodeLocation,
) -> Result<Vec<semver::VersionReq>, TreeAssemblyError> {
    constraints
        .iter()
        .map(|constraint| {
            semver::VersionReq::parse(constraint).map_err(|err| {
                TreeAssemblyError::InvalidSemVerConstraint {
                    constraint: constraint.clone(),
                    reason: err.to_string(),
                    location: location.clone(),
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn here() -> CodeLocation {
        CodeLocation::new("t.rs", 1, 1)
    }

    #[test]
    fn rejects_exclusive_pairs() {
        let err = check_decorations(
            NodeType::It,
            &Decorations::new().focused().pending(),
            false,
            &here(),
        )
        .unwrap_err();
        assert_eq!(err.as_label(), "tree_mutually_exclusive_decorations");

        let err = check_decorations(
            NodeType::Container,
            &Decorations::new()
                .with_flake_attempts(2)
                .with_must_pass_repeatedly(2),
            false,
            &here(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("FlakeAttempts and MustPassRepeatedly"));
    }

    #[test]
    fn decorations_are_restricted_by_node_type() {
        let ordered_it = check_decorations(NodeType::It, &Decorations::new().ordered(), false, &here());
        assert!(matches!(
            ordered_it,
            Err(TreeAssemblyError::InvalidDecoration { decoration: "Ordered", .. })
        ));

        let continue_unordered = check_decorations(
            NodeType::Container,
            &Decorations::new().continue_on_failure(),
            false,
            &here(),
        );
        assert!(continue_unordered.is_err());
        assert!(
            check_decorations(
                NodeType::Container,
                &Decorations::new().ordered().continue_on_failure(),
                false,
                &here()
            )
            .is_ok()
        );

        let labelled_hook = check_decorations(
            NodeType::BeforeEach,
            &Decorations::new().with_label("x"),
            false,
            &here(),
        );
        assert!(labelled_hook.is_err());
    }

    #[test]
    fn timeouts_need_a_context_body() {
        let decorations = Decorations::new().with_node_timeout(Duration::from_secs(1));
        assert!(matches!(
            check_decorations(NodeType::BeforeEach, &decorations, false, &here()),
            Err(TreeAssemblyError::TimeoutOnNonContextNode { .. })
        ));
        assert!(check_decorations(NodeType::BeforeEach, &decorations, true, &here()).is_ok());
    }

    #[test]
    fn labels_and_constraints_are_validated() {
        assert!(check_label("fast", &here()).is_ok());
        assert!(check_label("env: staging", &here()).is_ok());
        assert!(check_label("a&b", &here()).is_err());
        assert!(check_label(" ", &here()).is_err());

        assert_eq!(
            parse_semver_constraints(&[">= 1.2, < 2".into()], &here())
                .unwrap()
                .len(),
            1
        );
        assert!(parse_semver_constraints(&["not a version".into()], &here()).is_err());
    }
}
