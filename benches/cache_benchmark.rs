use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use libslicecache::scheduler::{Priority, Scheduler, Task, TaskContext};
use libslicecache::testlib::{RecordingView, SyntheticRepresentation};
use libslicecache::{CachedSliceRenderer, RendererConfig, ViewItem};

struct Noop;

impl Task for Noop {
    fn run(&self, _ctx: &TaskContext) {}
}

fn bench_renderer_operations(c: &mut Criterion) {
    let scheduler = Scheduler::new(256);
    let mut renderer = CachedSliceRenderer::new(scheduler.clone(), RendererConfig::default());
    let view = RecordingView::new(0.0, 1.0);
    renderer.set_view(view).unwrap();
    renderer.add_representation(ViewItem::channel(1), SyntheticRepresentation::channel(1));
    renderer.add_representation(ViewItem::channel(2), SyntheticRepresentation::channel(2));
    scheduler.run_pending();
    renderer.process_completions();

    let mut position = 0.0;
    c.bench_function("renderer_shift_and_render", |b| {
        b.iter(|| {
            position += 1.0;
            renderer.set_position(black_box(position));
            scheduler.run_pending();
            renderer.process_completions();
        })
    });

    c.bench_function("renderer_refill", |b| {
        b.iter(|| {
            position += 1000.0;
            renderer.set_position(black_box(position));
            scheduler.run_pending();
            renderer.process_completions();
        })
    });

    c.bench_function("renderer_estimated_memory", |b| {
        b.iter(|| {
            let _ = renderer.estimated_memory_used();
        })
    });
}

fn bench_scheduler_operations(c: &mut Criterion) {
    let scheduler = Scheduler::new(4);
    let task: Arc<dyn Task> = Arc::new(Noop);

    c.bench_function("scheduler_submit_and_run", |b| {
        b.iter(|| {
            let _ = scheduler.submit(Arc::clone(&task), black_box(Priority::Normal));
            scheduler.run_next();
        })
    });

    c.bench_function("scheduler_priority_order", |b| {
        b.iter(|| {
            for priority in [Priority::Low, Priority::Normal, Priority::High, Priority::VeryHigh] {
                let _ = scheduler.submit(Arc::clone(&task), priority);
            }
            scheduler.run_pending();
        })
    });
}

criterion_group!(benches, bench_renderer_operations, bench_scheduler_operations);
criterion_main!(benches);
