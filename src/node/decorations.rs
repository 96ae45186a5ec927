use std::time::Duration;

/// Decorations attached to a node at declaration time.
///
/// Inheritance rules are applied by [`Spec`](crate::spec::Spec): labels are
/// unioned, `serial`/`ordered`/`pending` are inherited, and valued decorations
/// (timeouts, retry policies, priority) are taken from the innermost node that
/// declares them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decorations {
    pub labels: Vec<String>,
    pub focus: bool,
    pub pending: bool,
    pub serial: bool,
    pub ordered: bool,
    pub continue_on_failure: bool,
    pub flake_attempts: Option<u32>,
    pub must_pass_repeatedly: Option<u32>,
    pub node_timeout: Option<Duration>,
    pub spec_timeout: Option<Duration>,
    pub grace_period: Option<Duration>,
    pub poll_progress_after: Option<Duration>,
    pub poll_progress_interval: Option<Duration>,
    pub spec_priority: Option<i32>,
    pub semver_constraints: Vec<String>,
}

impl Decorations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn focused(self) -> Self {
        Self {
            focus: true,
            ..self
        }
    }

    pub fn pending(self) -> Self {
        Self {
            pending: true,
            ..self
        }
    }

    pub fn serial(self) -> Self {
        Self {
            serial: true,
            ..self
        }
    }

    pub fn ordered(self) -> Self {
        Self {
            ordered: true,
            ..self
        }
    }

    /// Keep running the remaining specs of an Ordered container after one fails.
    pub fn continue_on_failure(self) -> Self {
        Self {
            continue_on_failure: true,
            ..self
        }
    }

    pub fn with_flake_attempts(self, attempts: u32) -> Self {
        Self {
            flake_attempts: Some(attempts),
            ..self
        }
    }

    pub fn with_must_pass_repeatedly(self, attempts: u32) -> Self {
        Self {
            must_pass_repeatedly: Some(attempts),
            ..self
        }
    }

    pub fn with_node_timeout(self, timeout: Duration) -> Self {
        Self {
            node_timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_spec_timeout(self, timeout: Duration) -> Self {
        Self {
            spec_timeout: Some(timeout),
            ..self
        }
    }

    pub fn with_grace_period(self, grace: Duration) -> Self {
        Self {
            grace_period: Some(grace),
            ..self
        }
    }

    pub fn with_poll_progress_after(self, after: Duration) -> Self {
        Self {
            poll_progress_after: Some(after),
            ..self
        }
    }

    pub fn with_poll_progress_interval(self, interval: Duration) -> Self {
        Self {
            poll_progress_interval: Some(interval),
            ..self
        }
    }

    pub fn with_priority(self, priority: i32) -> Self {
        Self {
            spec_priority: Some(priority),
            ..self
        }
    }

    /// Restrict the node to versions matching `constraint` (for example `">= 2.1, < 3"`).
    pub fn with_semver_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.semver_constraints.push(constraint.into());
        self
    }

    /// Names of the decorations that are set, used for validation messages.
    pub(crate) fn set_flags(&self) -> impl Iterator<Item = &'static str> + '_ {
        [
            ("Focus", self.focus),
            ("Pending", self.pending),
            ("Serial", self.serial),
            ("Ordered", self.ordered),
            ("ContinueOnFailure", self.continue_on_failure),
            ("FlakeAttempts", self.flake_attempts.is_some()),
            ("MustPassRepeatedly", self.must_pass_repeatedly.is_some()),
            ("NodeTimeout", self.node_timeout.is_some()),
            ("SpecTimeout", self.spec_timeout.is_some()),
            ("GracePeriod", self.grace_period.is_some()),
            ("SpecPriority", self.spec_priority.is_some()),
            ("Label", !self.labels.is_empty()),
            ("SemVerConstraint", !self.semver_constraints.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
    }
}
