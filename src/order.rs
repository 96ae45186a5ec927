//! Spec ordering.

use std::collections::BTreeMap;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{node::NodeId, spec::Spec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderConfig {
    pub seed: u64,
    /// Shuffle every unit on its own instead of whole top-level containers.
    pub randomize_all: bool,
}

/// Splits `order` into execution units: runs of adjacent specs that share an
/// outermost Ordered container, or single specs.
pub fn units(specs: &[Spec], order: &[usize]) -> Vec<Vec<usize>> {
    let mut units: Vec<Vec<usize>> = Vec::new();
    let mut current: Option<NodeId> = None;
    for &index in order {
        let container = specs[index].ordered_container();
        match (units.last_mut(), container) {
            (Some(unit), Some(id)) if current == Some(id) => unit.push(index),
            _ => units.push(vec![index]),
        }
        current = container;
    }
    units
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Container(NodeId),
    Unit(usize),
}

/// Returns the execution order as indices into `specs`.
///
/// Units are bucketed by priority, highest first. Inside a bucket the units
/// are grouped by top level container (or one group per unit with
/// `randomize_all`) and the groups are shuffled with a generator seeded from
/// `config.seed`. Units keep their declaration order inside a group.
pub fn order_specs(specs: &[Spec], config: &OrderConfig) -> Vec<usize> {
    let declared: Vec<usize> = (0..specs.len()).collect();
    let units = units(specs, &declared);

    let mut buckets: BTreeMap<std::cmp::Reverse<i32>, Vec<(GroupKey, Vec<Vec<usize>>)>> =
        BTreeMap::new();
    for (position, unit) in units.into_iter().enumerate() {
        let priority = unit
            .iter()
            .map(|&index| specs[index].priority())
            .max()
            .unwrap_or(0);
        let key = match specs[unit[0]].top_level_container() {
            Some(id) if !config.randomize_all => GroupKey::Container(id),
            _ => GroupKey::Unit(position),
        };

        let groups = buckets.entry(std::cmp::Reverse(priority)).or_default();
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, members)) => members.push(unit),
            None => groups.push((key, vec![unit])),
        }
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut order = Vec::with_capacity(specs.len());
    for (_, mut groups) in buckets {
        groups.shuffle(&mut rng);
        order.extend(groups.into_iter().flat_map(|(_, units)| units).flatten());
    }
    tracing::trace!(seed = config.seed, specs = order.len(), "ordered specs");
    order
}
