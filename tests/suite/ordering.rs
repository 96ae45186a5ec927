use kispec::{Decorations, Suite, SuiteConfig, TreeBuilder};
use pretty_assertions::assert_eq;

use crate::{ran, run};

fn specs(b: &mut TreeBuilder) {
    for name in ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l"] {
        b.it(name, || ());
    }
    b.describe_with("steps", Decorations::new().ordered(), |b| {
        b.it("step 1", || ());
        b.it("step 2", || ());
        b.it("step 3", || ());
    });
}

#[test]
fn the_same_seed_gives_the_same_order() {
    let config = || SuiteConfig::new().with_seed(1234).with_randomize_all_specs(true);
    let first = ran(&run(config(), specs));
    let second = ran(&run(config(), specs));
    assert_eq!(first, second);

    let mut sorted = first.clone();
    sorted.sort();
    let mut expected: Vec<String> = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l"]
        .into_iter()
        .chain(["step 1", "step 2", "step 3"])
        .map(String::from)
        .collect();
    expected.sort();
    assert_eq!(sorted, expected);
}

#[test]
fn a_different_seed_shuffles_differently() {
    let first = ran(&run(SuiteConfig::new().with_seed(1), specs));
    let second = ran(&run(SuiteConfig::new().with_seed(2), specs));
    assert_ne!(first, second);
}

#[test]
fn ordered_containers_keep_declaration_order() {
    for seed in 0..8 {
        let order = ran(&run(
            SuiteConfig::new().with_seed(seed).with_randomize_all_specs(true),
            specs,
        ));
        let steps: Vec<_> = order
            .iter()
            .filter(|text| text.starts_with("step"))
            .cloned()
            .collect();
        assert_eq!(steps, vec!["step 1", "step 2", "step 3"], "seed {seed}");

        let first = order.iter().position(|text| text == "step 1").unwrap();
        assert_eq!(order[first + 1], "step 2", "seed {seed}");
        assert_eq!(order[first + 2], "step 3", "seed {seed}");
    }
}

#[test]
fn containers_stay_together_without_randomize_all() {
    let suite = Suite::build(SuiteConfig::new().with_seed(77), |b| {
        b.it("solo", || ());
        b.describe("group", |b| {
            b.it("one", || ());
            b.it("two", || ());
            b.it("three", || ());
        });
    })
    .unwrap();

    let order: Vec<_> = suite.ordered_specs().map(|spec| spec.text()).collect();
    let one = order.iter().position(|text| text == "group one").unwrap();
    assert_eq!(
        order[one..one + 3].to_vec(),
        vec!["group one", "group two", "group three"]
    );
}
