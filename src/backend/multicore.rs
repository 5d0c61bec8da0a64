//! Pool of blocking workers on the local machine

use super::{into_ordered, ExecutionBackend, Workload};
use crate::config::Mode;
use crate::dispatch::{JobResult, WorkUnit, WorkWrapper};
use crate::error::Result;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Runs units on up to `cpus` blocking threads per call.
///
/// Without load balancing unit `i` goes to worker `i % cpus`. With load
/// balancing idle workers pull the next unit from a shared cursor.
#[derive(Debug, Clone)]
pub struct MulticoreBackend {
    cpus: usize,
    load_balancing: bool,
}

impl MulticoreBackend {
    pub fn new(cpus: usize, load_balancing: bool) -> Self {
        Self {
            cpus: cpus.max(1),
            load_balancing,
        }
    }
}

fn run_static(
    worker: usize,
    workers: usize,
    units: &[WorkUnit],
    wrapper: &WorkWrapper,
) -> Vec<(usize, JobResult)> {
    units
        .iter()
        .skip(worker)
        .step_by(workers)
        .map(|unit| {
            debug!("Worker {} running unit {}", worker, unit.number());
            (unit.index, wrapper.call(unit))
        })
        .collect()
}

fn run_balanced(
    worker: usize,
    cursor: &AtomicUsize,
    units: &[WorkUnit],
    wrapper: &WorkWrapper,
) -> Vec<(usize, JobResult)> {
    let mut out = Vec::new();
    loop {
        let next = cursor.fetch_add(1, Ordering::SeqCst);
        let Some(unit) = units.get(next) else {
            break;
        };
        debug!("Worker {} pulled unit {}", worker, unit.number());
        out.push((unit.index, wrapper.call(unit)));
    }
    out
}

#[async_trait]
impl ExecutionBackend for MulticoreBackend {
    fn mode(&self) -> Mode {
        Mode::Multicore
    }

    fn cpus(&self) -> usize {
        self.cpus
    }

    async fn run_all(&self, workload: Workload) -> Result<Vec<JobResult>> {
        let n = workload.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let workers = self.cpus.min(n);
        let units = Arc::new(workload.units);
        let wrapper = workload.wrapper;
        let cursor = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers).map(|worker| {
            let units = units.clone();
            let wrapper = wrapper.clone();
            let cursor = cursor.clone();
            let balanced = self.load_balancing;
            tokio::task::spawn_blocking(move || {
                if balanced {
                    run_balanced(worker, &cursor, &units, &wrapper)
                } else {
                    run_static(worker, workers, &units, &wrapper)
                }
            })
        });

        let batches = try_join_all(handles).await?;
        into_ordered(n, batches.into_iter().flatten(), Mode::Multicore.as_str())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{unit_fn, Bindings};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    fn workload(n: usize, fun: crate::dispatch::UnitFn) -> Workload {
        Workload {
            units: (0..n).map(|i| WorkUnit::new(i, vec![json!(i)])).collect(),
            wrapper: WorkWrapper::new(fun, Bindings::default()),
            imputing: false,
            log_dir: None,
        }
    }

    #[test]
    fn test_static_assignment_is_round_robin() {
        let units: Vec<WorkUnit> = (0..7).map(|i| WorkUnit::new(i, vec![])).collect();
        let wrapper = WorkWrapper::new(unit_fn(|_, _| Ok(json!(null))), Bindings::default());
        let indices: Vec<usize> = run_static(1, 3, &units, &wrapper)
            .into_iter()
            .map(|(i, _)| i)
            .collect();
        assert_eq!(indices, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_order_preserved_with_uneven_durations() {
        let fun = unit_fn(|args, _| {
            let i = args[0].as_u64().unwrap_or_default();
            std::thread::sleep(Duration::from_millis((10 - i) * 3));
            Ok(json!(i * i))
        });

        for balanced in [false, true] {
            let backend = MulticoreBackend::new(3, balanced);
            let results = backend.run_all(workload(10, fun.clone())).await.unwrap();
            let values: Vec<u64> = results
                .iter()
                .map(|r| r.value().and_then(|v| v.as_u64()).unwrap())
                .collect();
            assert_eq!(values, (0..10).map(|i| i * i).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_units_run_on_several_threads() {
        let threads = Arc::new(Mutex::new(HashSet::new()));
        let seen = threads.clone();
        let fun = unit_fn(move |_, _| {
            std::thread::sleep(Duration::from_millis(20));
            seen.lock().unwrap().insert(std::thread::current().id());
            Ok(json!(true))
        });

        MulticoreBackend::new(2, false)
            .run_all(workload(4, fun))
            .await
            .unwrap();
        assert_eq!(threads.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_values() {
        let fun = unit_fn(|args, _| {
            if args[0] == json!(1) {
                anyhow::bail!("odd one out");
            }
            Ok(args[0].clone())
        });
        let results = MulticoreBackend::new(2, true)
            .run_all(workload(3, fun))
            .await
            .unwrap();
        assert!(results[1].is_error());
        assert!(!results[0].is_error());
        assert!(!results[2].is_error());
    }

    #[tokio::test]
    async fn test_empty_workload() {
        let fun = unit_fn(|_, _| Ok(json!(null)));
        let results = MulticoreBackend::new(4, false)
            .run_all(workload(0, fun))
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
