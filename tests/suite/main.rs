use std::sync::{Arc, Mutex, Once};

use kispec::{NoReporter, Report, Suite, SuiteConfig, TreeBuilder};

mod interrupts;
mod lifecycle;
mod ordering;
mod parallel;
mod retries;

/// Records node bodies in the order they ran.
#[derive(Debug, Default, Clone)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn record(&self, event: &'static str) -> impl Fn() + Send + Sync + 'static {
        let log = self.clone();
        move || log.push(event)
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn run(config: SuiteConfig, f: impl FnOnce(&mut TreeBuilder)) -> Report {
    init_tracing();
    let mut suite = Suite::build(config, f).unwrap();
    suite.run(&mut NoReporter).unwrap()
}

/// Leaf texts in the order the specs ran.
pub fn ran(report: &Report) -> Vec<String> {
    report
        .specs()
        .map(|spec| spec.leaf_text.clone())
        .collect()
}
