//! Workload driver for the atsalloc router.
//!
//! Builds an [`AtsAllocator`](atsalloc_core::AtsAllocator) over a simulated
//! device, runs concurrent allocate/free traffic against it, and reports the
//! resulting statistics in a serializable form.

pub mod workload;

pub use workload::{HarnessError, WorkloadReport, WorkloadSpec, run_workload};
