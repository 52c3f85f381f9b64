use super::{Evaluator, ModuleCollector, collect_instances};
use crate::catalog::MetricDefinition;
use crate::common::Stopwatch;
use crate::model::ModuleBundle;
use crate::source::MetricsClient;
use std::fmt;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Discovering,
    Collecting,
    Evaluating,
    Done,
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "idle",
            State::Discovering => "discovering",
            State::Collecting => "collecting",
            State::Evaluating => "evaluating",
            State::Done => "done",
            State::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Drives one module through discover -> collect -> evaluate and finalizes
/// its bundle. Discovery failure is fatal for the module only; collection
/// failures stay per-instance and never stop the run.
pub struct Inspector<C> {
    collector: C,
    definitions: Vec<MetricDefinition>,
    evaluator: Evaluator,
    version: String,
    concurrency: usize,
}

impl<C: ModuleCollector> Inspector<C> {
    pub fn new(
        collector: C,
        definitions: Vec<MetricDefinition>,
        evaluator: Evaluator,
        version: &str,
        concurrency: usize,
    ) -> Self {
        return Inspector {
            collector,
            definitions,
            evaluator,
            version: version.to_string(),
            concurrency,
        };
    }

    fn transition(&self, from: &mut State, to: State) {
        log::debug!("[{}] {} -> {}", self.collector.module(), from, to);
        *from = to;
    }

    pub async fn run(&self, metrics: &MetricsClient, deadline: Instant) -> ModuleBundle {
        let module = self.collector.module();
        let stopwatch = Stopwatch::start_new();
        let mut state = State::Idle;

        self.transition(&mut state, State::Discovering);
        let instances = match self.collector.discover(deadline).await {
            Ok(instances) => instances,
            Err(err) => {
                self.transition(&mut state, State::Failed);
                log::error!("[{}] discovery failed: {:#}", module, err);
                let mut bundle = ModuleBundle::failed(module, &self.version, format!("{:#}", err));
                bundle.duration = stopwatch.elapsed();
                return bundle;
            }
        };
        if instances.is_empty() {
            self.transition(&mut state, State::Done);
            log::warn!("[{}] discovery returned no instances, nothing to inspect", module);
            let mut bundle = ModuleBundle::empty(module, &self.version);
            bundle.duration = stopwatch.elapsed();
            return bundle;
        }

        self.transition(&mut state, State::Collecting);
        let mut results = collect_instances(
            metrics,
            instances,
            &self.definitions,
            self.concurrency,
            deadline,
        )
        .await;
        for result in results.values_mut() {
            self.collector.derive(result);
        }

        self.transition(&mut state, State::Evaluating);
        self.evaluator.evaluate_all(&mut results);

        self.transition(&mut state, State::Done);
        let mut bundle = ModuleBundle::empty(module, &self.version).finalize(results);
        bundle.duration = stopwatch.elapsed();
        log::info!(
            "[{}] inspected {} instances in {} ({} warning, {} critical, {} failed)",
            module,
            bundle.summary.total,
            stopwatch.elapsed_human(),
            bundle.summary.warning,
            bundle.summary.critical,
            bundle.summary.failed,
        );
        return bundle;
    }
}
