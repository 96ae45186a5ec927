//! Splitting the ordered specs across parallel processes.

use std::num::NonZeroUsize;

use crate::{order, spec::Spec};

/// Which specs each process runs, as indices into the generated specs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// `processes[p - 1]` is the work of process `p`.
    pub processes: Vec<Vec<usize>>,
    /// Units holding a Serial spec. Process #1 runs them once every other
    /// process has finished.
    pub serial: Vec<usize>,
}

impl ExecutionPlan {
    /// The specs process `process` runs before the serial ones.
    pub fn for_process(&self, process: usize) -> &[usize] {
        process
            .checked_sub(1)
            .and_then(|index| self.processes.get(index))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

pub fn plan(specs: &[Spec], order: &[usize], total: NonZeroUsize) -> ExecutionPlan {
    let total = total.get();
    if total == 1 {
        return ExecutionPlan {
            processes: vec![order.to_vec()],
            serial: Vec::new(),
        };
    }

    let mut plan = ExecutionPlan {
        processes: vec![Vec::new(); total],
        serial: Vec::new(),
    };
    let mut next = 0;
    for unit in order::units(specs, order) {
        if unit.iter().any(|&index| specs[index].is_serial()) {
            plan.serial.extend(unit);
            continue;
        }
        plan.processes[next % total].extend(unit);
        next += 1;
    }
    tracing::debug!(
        processes = total,
        serial = plan.serial.len(),
        "distributed specs"
    );
    plan
}
