use atsalloc_core::FreeRouting;
use atsalloc_harness::{WorkloadSpec, run_workload};

#[test]
fn default_workload_balances_and_drains() {
    let spec = WorkloadSpec {
        cycles_per_thread: 200,
        ..WorkloadSpec::default()
    };
    let report = run_workload(&spec).expect("run");

    let total = (spec.threads * spec.cycles_per_thread) as u64;
    assert_eq!(report.stats.num_allocs, total);
    assert_eq!(report.routed_device + report.routed_host, total);
    assert_eq!(report.failed, 0);
    assert_eq!(report.stats.bytes_in_use, 0);
    assert_eq!(report.stats.largest_alloc_size, 1 << 20);
    assert_eq!(report.device.resident_blocks, 0);
    assert_eq!(report.device.allocations, report.routed_device);
    assert_eq!(report.allocator, "ats_allocator");
}

#[test]
fn capped_device_fails_without_host_fallback() {
    let spec = WorkloadSpec {
        threads: 2,
        cycles_per_thread: 64,
        sizes: vec![4096],
        hold: 16,
        threshold: 8192,
        device_capacity: Some(8 * 4096),
        free_routing: FreeRouting::Tagged,
    };
    let report = run_workload(&spec).expect("run");

    assert_eq!(report.stats.num_allocs, 128);
    assert_eq!(report.routed_host, 0);
    assert!(report.failed > 0, "two threads holding 16 blocks each must overflow 8 slots");
    assert_eq!(report.device.failed_allocations, report.failed);
    assert_eq!(report.stats.bytes_in_use, 0);
    assert_eq!(report.device.resident_bytes, 0);
}

#[test]
fn zero_threshold_keeps_device_idle() {
    let spec = WorkloadSpec {
        threads: 3,
        cycles_per_thread: 50,
        threshold: 0,
        ..WorkloadSpec::default()
    };
    let report = run_workload(&spec).expect("run");
    assert_eq!(report.routed_device, 0);
    assert_eq!(report.device.allocations, 0);
    assert_eq!(report.device.activations, report.stats.num_allocs);
}

#[test]
fn report_serializes_to_json() {
    let spec = WorkloadSpec {
        threads: 1,
        cycles_per_thread: 4,
        ..WorkloadSpec::default()
    };
    let report = run_workload(&spec).expect("run");
    let json = serde_json::to_value(&report).expect("serialize");
    assert_eq!(json["stats"]["num_allocs"], 4);
    assert_eq!(json["spec"]["free_routing"], "probe");
    assert!(json["device"]["activations"].is_number());
}

#[test]
fn oversized_hold_keeps_every_block_until_the_end() {
    let spec = WorkloadSpec {
        threads: 2,
        cycles_per_thread: 4,
        hold: usize::MAX / 2,
        ..WorkloadSpec::default()
    };
    let report = run_workload(&spec).expect("run");

    assert_eq!(report.stats.num_allocs, 8);
    assert_eq!(report.routed_device + report.routed_host, 8);
    assert_eq!(report.failed, 0);
    assert_eq!(report.stats.bytes_in_use, 0);
    assert_eq!(report.device.resident_blocks, 0);
}
