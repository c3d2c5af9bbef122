#![no_main]
use std::sync::Arc;

use atsalloc_core::{
    Allocator, AtsAllocator, DeviceOrdinal, FreeRouting, PageAlignedHost, RouterConfig,
    SimulatedDevice, SystemAllocator,
};
use libfuzzer_sys::fuzz_target;

// Each 4-byte chunk is one op: [op, size_lo, size_hi, slot].
fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }

    let free_routing = if data[0] & 1 == 0 {
        FreeRouting::Probe
    } else {
        FreeRouting::Tagged
    };
    let threshold = usize::from(data[0] >> 1) * 256;
    let config = RouterConfig {
        free_routing,
        ..RouterConfig::with_threshold(threshold)
    };
    let device = Arc::new(SimulatedDevice::with_capacity(DeviceOrdinal(0), 1 << 20));
    let Ok(alloc) = AtsAllocator::with_config(
        Box::new(SystemAllocator),
        device.clone(),
        Arc::new(PageAlignedHost),
        config,
    ) else {
        return;
    };

    let mut live: Vec<(std::ptr::NonNull<u8>, usize)> = Vec::new();
    let mut attempts = 0_u64;
    let mut largest = 0_usize;

    for chunk in data[1..].chunks_exact(4) {
        let size = usize::from(u16::from_le_bytes([chunk[1], chunk[2]]));
        match chunk[0] % 3 {
            0 => {
                attempts += 1;
                largest = largest.max(size);
                if let Some(ptr) = alloc.allocate_raw(0, size) {
                    live.push((ptr, size));
                }
            }
            1 if !live.is_empty() => {
                let (ptr, _) = live.swap_remove(usize::from(chunk[3]) % live.len());
                // SAFETY: ptr came from this allocator and is freed once.
                unsafe { alloc.deallocate_raw(ptr.as_ptr()) };
            }
            _ => alloc.clear_stats(),
        }

        let stats = alloc.get_stats().expect("router always reports stats");
        assert!(stats.peak_bytes_in_use >= stats.bytes_in_use);
        assert_eq!(stats.bytes_in_use, live.iter().map(|(_, size)| size).sum::<usize>());
        assert!(stats.num_allocs <= attempts);
        assert!(stats.largest_alloc_size <= largest);
    }

    for (ptr, _) in live {
        // SAFETY: as above.
        unsafe { alloc.deallocate_raw(ptr.as_ptr()) };
    }
    assert_eq!(alloc.get_stats().expect("stats").bytes_in_use, 0);
    assert_eq!(device.counters().resident_blocks, 0);
});
