use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use slotted_btree_stack::SlotAllocator;

fn add_remove_non_reusable(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_allocator/add_remove_non_reusable");
    for n in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut alloc: SlotAllocator<u64> = SlotAllocator::new(false);
                let mut handles = Vec::with_capacity(n);
                for i in 0..n as u64 {
                    handles.push(alloc.add(i));
                }
                for h in handles {
                    alloc.remove(h).unwrap();
                }
            });
        });
    }
    group.finish();
}

fn add_remove_reusable(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_allocator/add_remove_reusable");
    for n in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut alloc: SlotAllocator<u64> = SlotAllocator::new(true);
                alloc.allocate_spare(n as u64).unwrap();
                let mut handles = Vec::with_capacity(n);
                for i in 0..n as u64 {
                    handles.push(alloc.add(i));
                }
                for h in handles {
                    alloc.remove(h).unwrap();
                }
            });
        });
    }
    group.finish();
}

fn reserve_then_fill(c: &mut Criterion) {
    c.bench_function("slot_allocator/reserve_then_fill", |b| {
        b.iter(|| {
            let mut alloc: SlotAllocator<u64> = SlotAllocator::new(true);
            for i in 0..1_000u64 {
                let (_stored, reserved) = alloc.reserve_slot();
                alloc.fill_reserved_slot(reserved, i);
            }
        });
    });
}

criterion_group!(benches, add_remove_non_reusable, add_remove_reusable, reserve_then_fill);
criterion_main!(benches);
