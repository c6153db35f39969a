//! Contention command implementation.

use graphkern_core::{
    Clock, CoreError, CoreResult, LockConfig, LockGuard, LockManager, Locks, QueryStatus,
    ResourceType, StatusValue, SystemClock,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of the contention command.
#[derive(Debug, Default, Serialize)]
pub struct ContentionResult {
    /// Competing threads.
    pub threads: usize,
    /// Lock acquisitions completed.
    pub acquisitions: usize,
    /// Status samples taken.
    pub samples: usize,
    /// Samples that found a thread WAITING.
    pub waiting_samples: usize,
    /// Longest observed wait, in milliseconds.
    pub max_wait_millis: u64,
    /// Waits observed per lock mode.
    pub waits_by_mode: WaitsByMode,
    /// Wall time in milliseconds.
    pub elapsed_ms: u128,
}

/// WAITING samples split by requested mode.
#[derive(Debug, Default, Serialize)]
pub struct WaitsByMode {
    /// Waiting for a shared lock.
    pub shared: usize,
    /// Waiting for an exclusive lock.
    pub exclusive: usize,
}

/// Runs the contention command.
pub fn run(
    threads: usize,
    iterations: usize,
    resources: u64,
    hold_micros: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = measure(threads, iterations, resources, Duration::from_micros(hold_micros))?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("=== Graphkern Lock Contention ===");
            println!();
            println!("Threads:        {}", result.threads);
            println!("Acquisitions:   {}", result.acquisitions);
            println!("Elapsed:        {} ms", result.elapsed_ms);
            println!(
                "Waiting:        {}/{} samples (shared {}, exclusive {})",
                result.waiting_samples,
                result.samples,
                result.waits_by_mode.shared,
                result.waits_by_mode.exclusive
            );
            println!("Longest wait:   {} ms", result.max_wait_millis);
        }
    }
    Ok(())
}

fn measure(
    threads: usize,
    iterations: usize,
    resources: u64,
    hold: Duration,
) -> CoreResult<ContentionResult> {
    // Wait start times and the sampler's readings must come from one clock.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let manager = LockManager::with_config(LockConfig::default(), Arc::clone(&clock));
    let clients: Vec<_> = (0..threads).map(|_| manager.client()).collect();
    let statuses: Vec<_> = clients.iter().map(|c| Arc::clone(c.status())).collect();
    let done = AtomicBool::new(false);

    let start = Instant::now();
    let (acquisitions, mut result) = thread::scope(|scope| {
        let sampler = scope.spawn(|| {
            let mut result = ContentionResult::default();
            while !done.load(Ordering::Acquire) {
                for status in &statuses {
                    result.samples += 1;
                    let current = status.current();
                    if let QueryStatus::Waiting(_) = &*current {
                        result.waiting_samples += 1;
                        let map = current.to_map(clock.nanos());
                        if let Some(StatusValue::Integer(millis)) = map.get("waitTimeMillis") {
                            result.max_wait_millis = result.max_wait_millis.max(*millis);
                        }
                        match map.get("lockMode") {
                            Some(StatusValue::Text(mode)) if mode == "SHARED" => {
                                result.waits_by_mode.shared += 1;
                            }
                            _ => result.waits_by_mode.exclusive += 1,
                        }
                    }
                }
                thread::sleep(Duration::from_micros(250));
            }
            result
        });

        let workers: Vec<_> = clients
            .iter()
            .enumerate()
            .map(|(n, client)| {
                scope.spawn(move || -> CoreResult<usize> {
                    let mut rng = StdRng::seed_from_u64(n as u64);
                    for _ in 0..iterations {
                        let resource = rng.gen_range(0..resources);
                        let _guard = if rng.gen_bool(0.3) {
                            LockGuard::exclusive(client as &dyn Locks, ResourceType::Node, resource)?
                        } else {
                            LockGuard::shared(client as &dyn Locks, ResourceType::Node, resource)?
                        };
                        thread::sleep(hold);
                    }
                    Ok(iterations)
                })
            })
            .collect();

        let acquisitions = total_acquisitions(workers.into_iter().map(|w| w.join()));
        done.store(true, Ordering::Release);
        let result = sampler.join().unwrap_or_default();
        acquisitions.map(|n| (n, result))
    })?;

    result.threads = threads;
    result.acquisitions = acquisitions;
    result.elapsed_ms = start.elapsed().as_millis();
    tracing::info!(
        acquisitions,
        waiting = result.waiting_samples,
        "contention run finished"
    );
    Ok(result)
}

/// Sums the acquisitions of every worker; a failed or panicked worker fails the run.
fn total_acquisitions(
    outcomes: impl IntoIterator<Item = thread::Result<CoreResult<usize>>>,
) -> CoreResult<usize> {
    let mut acquisitions = 0;
    let mut failure = None;
    for (n, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(Ok(count)) => acquisitions += count,
            Ok(Err(e)) => failure = Some(e),
            Err(_) => {
                tracing::error!(worker = n, "contention worker panicked");
                failure = Some(CoreError::invalid_operation(format!(
                    "contention worker {n} panicked"
                )));
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(acquisitions),
    }
}
