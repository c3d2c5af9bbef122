//! Concurrent allocate/free workload.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use atsalloc_core::{
    Allocator, AllocatorStats, AtsAllocator, ConfigError, DeviceOrdinal, FreeRouting,
    PageAlignedHost, Placement, RouterConfig, SimulatedDevice, SimulatedDeviceCounters,
    SystemAllocator,
};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("workload needs at least one thread")]
    NoThreads,
    #[error("workload needs at least one request size")]
    NoSizes,
    #[error("{count} workload thread(s) panicked")]
    WorkerPanicked { count: usize },
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shape of a workload run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub threads: usize,
    pub cycles_per_thread: usize,
    /// Request sizes, cycled through per thread with a per-thread offset.
    pub sizes: Vec<usize>,
    /// Live blocks each thread keeps before freeing the oldest (0 frees immediately).
    pub hold: usize,
    pub threshold: usize,
    pub device_capacity: Option<usize>,
    pub free_routing: FreeRouting,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            threads: 4,
            cycles_per_thread: 1_000,
            sizes: vec![64, 512, 4096, 64 * 1024, 1 << 20],
            hold: 8,
            threshold: 64 * 1024,
            device_capacity: None,
            free_routing: FreeRouting::Probe,
        }
    }
}

/// Outcome of [`run_workload`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub spec: WorkloadSpec,
    pub allocator: String,
    pub stats: AllocatorStats,
    pub routed_device: u64,
    pub routed_host: u64,
    pub failed: u64,
    pub device: SimulatedDeviceCounters,
    pub elapsed_ms: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct ThreadTally {
    routed_device: u64,
    routed_host: u64,
    failed: u64,
}

impl ThreadTally {
    fn merge(mut self, other: Self) -> Self {
        self.routed_device += other.routed_device;
        self.routed_host += other.routed_host;
        self.failed += other.failed;
        self
    }
}

/// Run `spec` against a fresh router and report the final counters.
pub fn run_workload(spec: &WorkloadSpec) -> Result<WorkloadReport, HarnessError> {
    if spec.threads == 0 {
        return Err(HarnessError::NoThreads);
    }
    if spec.sizes.is_empty() {
        return Err(HarnessError::NoSizes);
    }

    let device = Arc::new(match spec.device_capacity {
        Some(capacity) => SimulatedDevice::with_capacity(DeviceOrdinal(0), capacity),
        None => SimulatedDevice::new(DeviceOrdinal(0)),
    });
    let config = RouterConfig {
        free_routing: spec.free_routing,
        ..RouterConfig::with_threshold(spec.threshold)
    };
    let alloc = AtsAllocator::with_config(
        Box::new(SystemAllocator),
        device.clone(),
        Arc::new(PageAlignedHost),
        config,
    )?;

    tracing::info!(
        threads = spec.threads,
        cycles = spec.cycles_per_thread,
        threshold = spec.threshold,
        free_routing = ?spec.free_routing,
        "starting workload"
    );
    let started = Instant::now();
    let joined: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..spec.threads)
            .map(|t| {
                let alloc = &alloc;
                s.spawn(move || drive_thread(alloc, spec, t))
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    });
    let panicked = joined.iter().filter(|result| result.is_err()).count();
    if panicked > 0 {
        tracing::error!(panicked, threads = spec.threads, "workload thread panicked");
        return Err(HarnessError::WorkerPanicked { count: panicked });
    }
    let tally = joined
        .into_iter()
        .flatten()
        .fold(ThreadTally::default(), ThreadTally::merge);
    let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;

    let stats = alloc.get_stats().unwrap_or_default();
    tracing::info!(%stats, elapsed_ms, "workload finished");

    Ok(WorkloadReport {
        spec: spec.clone(),
        allocator: alloc.name().to_string(),
        stats,
        routed_device: tally.routed_device,
        routed_host: tally.routed_host,
        failed: tally.failed,
        device: device.counters(),
        elapsed_ms,
    })
}

fn drive_thread(alloc: &AtsAllocator, spec: &WorkloadSpec, thread_idx: usize) -> ThreadTally {
    let mut tally = ThreadTally::default();
    let mut live = VecDeque::with_capacity(spec.hold.min(spec.cycles_per_thread));

    for cycle in 0..spec.cycles_per_thread {
        let size = spec.sizes[(cycle + thread_idx) % spec.sizes.len()];
        match alloc.route(size) {
            Placement::Device => tally.routed_device += 1,
            Placement::Host => tally.routed_host += 1,
        }
        match alloc.allocate_raw(0, size) {
            Some(ptr) => live.push_back(ptr),
            None => tally.failed += 1,
        }
        while live.len() > spec.hold {
            if let Some(ptr) = live.pop_front() {
                // SAFETY: every queued pointer came from `alloc` and is freed once.
                unsafe { alloc.deallocate_raw(ptr.as_ptr()) };
            }
        }
    }
    for ptr in live {
        // SAFETY: as above.
        unsafe { alloc.deallocate_raw(ptr.as_ptr()) };
    }
    tally
}
