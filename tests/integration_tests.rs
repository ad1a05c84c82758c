use std::sync::Arc;
use std::time::{Duration, Instant};

use libslicecache::geometry::Extent2D;
use libslicecache::scheduler::{Priority, Scheduler};
use libslicecache::testlib::{RecordingView, SyntheticRepresentation};
use libslicecache::*;
use proptest::prelude::*;

fn setup(width: usize, spacing: Nm) -> (CachedSliceRenderer, Scheduler, Arc<RecordingView>) {
    let scheduler = Scheduler::new(256);
    let config = RendererConfig::builder().window_width(width).build();
    let mut renderer = CachedSliceRenderer::new(scheduler.clone(), config);
    let view = RecordingView::new(0.0, spacing);
    renderer.set_view(view.clone()).unwrap();
    (renderer, scheduler, view)
}

// Run queued tasks and deliver their completions until nothing is left.
fn settle(renderer: &mut CachedSliceRenderer, scheduler: &Scheduler) {
    loop {
        let ran = scheduler.run_pending();
        let handled = renderer.process_completions();
        if ran == 0 && handled == 0 {
            break;
        }
    }
}

fn assert_ring_invariants(renderer: &CachedSliceRenderer) {
    let positions = renderer.node_positions();
    assert_eq!(positions.len(), 2 * renderer.window_width() + 1);
    for pair in positions.windows(2) {
        assert!((pair[1] - pair[0] - renderer.window_spacing()).abs() < 1e-9);
    }
    let ring = renderer.ring();
    assert_eq!(ring.actual_index(), renderer.window_width());
    assert_eq!(ring.next_index(ring.edge_index()), 0);
}

#[test]
fn test_scroll_one_slice_forward() {
    let (mut renderer, scheduler, view) = setup(2, 1.0);
    let rep = SyntheticRepresentation::channel(1);
    renderer.add_representation(ViewItem::channel(1), rep.clone());
    settle(&mut renderer, &scheduler);

    assert_eq!(renderer.node_positions(), vec![-2.0, -1.0, 0.0, 1.0, 2.0]);
    assert_eq!(view.attached_positions(), vec![0.0]);

    renderer.set_position(1.0);
    settle(&mut renderer, &scheduler);

    assert_eq!(renderer.node_positions(), vec![-1.0, 0.0, 1.0, 2.0, 3.0]);
    assert_eq!(renderer.actual_position(), Some(1.0));
    // only the actual node's actors are ever attached
    assert_eq!(view.attached_positions(), vec![1.0]);
    assert_eq!(view.attached_actors().len(), 1);
    // the recycled node got its slice computed
    assert_eq!(rep.render_count(), 6);
    assert_eq!(renderer.stats().cache_misses, 0);
    assert_ring_invariants(&renderer);
}

#[test]
fn test_resize_window() {
    let (mut renderer, _scheduler, _view) = setup(2, 1.0);
    renderer.add_representation(ViewItem::channel(1), SyntheticRepresentation::channel(1));
    let start = renderer.stats();

    renderer.set_window_width(3);
    let grown = renderer.stats();
    assert_eq!(grown.nodes_created - start.nodes_created, 2);
    assert_eq!(grown.tasks_submitted - start.tasks_submitted, 2);
    assert_eq!(renderer.node_positions(), vec![-3.0, -2.0, -1.0, 0.0, 1.0, 2.0, 3.0]);

    renderer.set_window_width(1);
    let shrunk = renderer.stats();
    assert_eq!(shrunk.nodes_deleted - grown.nodes_deleted, 4);
    assert_eq!(shrunk.tasks_aborted - grown.tasks_aborted, 4);
    assert_ring_invariants(&renderer);

    // no-op when unchanged
    renderer.set_window_width(1);
    assert_eq!(renderer.stats(), shrunk);
}

#[test]
fn test_non_local_jump_is_not_a_miss() {
    let (mut renderer, scheduler, view) = setup(2, 1.0);
    renderer.add_representation(ViewItem::channel(1), SyntheticRepresentation::channel(1));
    renderer.set_position(50.0);

    assert_eq!(renderer.stats().cache_misses, 0);
    assert_eq!(renderer.window_width(), 2);
    assert_eq!(renderer.node_positions(), vec![48.0, 49.0, 50.0, 51.0, 52.0]);

    settle(&mut renderer, &scheduler);
    assert_eq!(view.attached_positions(), vec![50.0]);
}

#[test]
fn test_miss_grows_window_by_increment() {
    let scheduler = Scheduler::new(256);
    let config = RendererConfig::builder().window_width(2).window_increment(3).build();
    let mut renderer = CachedSliceRenderer::new(scheduler.clone(), config);
    let view = RecordingView::new(0.0, 1.0);
    renderer.set_view(view.clone()).unwrap();
    renderer.add_representation(ViewItem::channel(1), SyntheticRepresentation::channel(1));

    // nothing computed yet: the new actual node is still busy
    renderer.set_position(1.0);
    assert_eq!(renderer.stats().cache_misses, 1);
    assert_eq!(renderer.window_width(), 5);
    assert_ring_invariants(&renderer);

    settle(&mut renderer, &scheduler);
    assert_eq!(view.attached_positions(), vec![1.0]);
}

#[test]
fn test_no_miss_when_cached() {
    let (mut renderer, scheduler, _view) = setup(3, 1.0);
    renderer.add_representation(ViewItem::channel(1), SyntheticRepresentation::channel(1));
    settle(&mut renderer, &scheduler);

    for position in [1.0, 2.0, 3.0, 2.0, 1.0] {
        renderer.set_position(position);
        settle(&mut renderer, &scheduler);
    }
    assert_eq!(renderer.stats().cache_misses, 0);
    assert_eq!(renderer.window_width(), 3);
}

#[test]
fn test_only_actual_node_is_displayed_while_scrolling() {
    let (mut renderer, scheduler, view) = setup(4, 0.5);
    renderer.add_representation(ViewItem::channel(1), SyntheticRepresentation::channel(1));
    renderer.add_representation(
        ViewItem::segmentation(2),
        SyntheticRepresentation::segmentation(2, Extent2D::new([0.0, 0.0], [10.0, 10.0]), (-1.0, 1.0)),
    );
    settle(&mut renderer, &scheduler);

    for step in 1..12 {
        let position = step as f64 * 0.5;
        renderer.set_position(position);
        settle(&mut renderer, &scheduler);
        assert_eq!(view.attached_positions(), vec![position]);
        let expected = if position <= 1.0 { 2 } else { 1 };
        assert_eq!(view.attached_actors().len(), expected);
        assert_ring_invariants(&renderer);
    }
}

#[test]
fn test_picking_leaves_pick_list_unchanged() {
    let (mut renderer, scheduler, _view) = setup(1, 1.0);
    renderer.add_representation(ViewItem::channel(1), SyntheticRepresentation::channel(1));
    renderer.add_representation(
        ViewItem::segmentation(7),
        SyntheticRepresentation::segmentation(2, Extent2D::new([5.0, 5.0], [8.0, 8.0]), (-10.0, 10.0)),
    );
    settle(&mut renderer, &scheduler);

    let unrelated = Arc::new(Actor::new(
        RepresentationId(99),
        0.0,
        Extent2D::new([0.0, 0.0], [1.0, 1.0]),
        bytes::Bytes::new(),
    ));
    renderer.picker_mut().add_pick_list(&unrelated);
    let before = renderer.picker().pick_list_ids();

    let picked = renderer.pick(6.0, 6.0, 0.0, RenderableItems::SEGMENTATIONS, false);
    assert_eq!(picked, vec![ItemId(7)]);
    assert_eq!(renderer.picker().pick_list_ids(), before);

    let picked = renderer.pick(0.5, 0.5, 0.0, RenderableItems::ALL, true);
    assert_eq!(picked, vec![ItemId(1)]);
    assert_eq!(renderer.picker().pick_list_ids(), before);
}

#[test]
fn test_hidden_representation_is_not_picked() {
    let (mut renderer, scheduler, _view) = setup(1, 1.0);
    let rep = SyntheticRepresentation::channel(1);
    renderer.add_representation(ViewItem::channel(1), rep.clone());
    settle(&mut renderer, &scheduler);

    rep.set_visible(false);
    renderer.update_representation_visibility(rep.id());
    assert!(renderer.pick(1.0, 1.0, 0.0, RenderableItems::ALL, true).is_empty());
}

#[test]
fn test_remove_while_task_in_flight() {
    let (mut renderer, scheduler, view) = setup(1, 1.0);
    let keep = SyntheticRepresentation::channel(1);
    let gone = SyntheticRepresentation::channel(2);
    renderer.add_representation(ViewItem::channel(1), keep.clone());
    renderer.add_representation(ViewItem::channel(2), gone.clone());
    renderer.remove_representation(gone.id());

    settle(&mut renderer, &scheduler);
    assert_eq!(view.attached_actors().len(), 1);
    assert_eq!(view.attached_actors()[0].representation(), keep.id());
    assert!(!renderer.has_representation(gone.id()));
    for node in renderer.ring().iter() {
        assert!(!node.state().read().representations.contains_key(&gone.id()));
    }
}

#[test]
fn test_update_while_task_in_flight_recomputes() {
    let (mut renderer, scheduler, view) = setup(1, 1.0);
    let rep = SyntheticRepresentation::channel(1);
    renderer.add_representation(ViewItem::channel(1), rep.clone());
    rep.touch();
    renderer.update_representation(rep.id());

    settle(&mut renderer, &scheduler);
    let actor = &view.attached_actors()[0];
    let actual = renderer.ring().actual().unwrap().clone();
    let state = actual.state().read();
    let slot = &state.representations[&rep.id()];
    assert_eq!(slot.timestamp, rep.last_modified());
    assert_eq!(slot.actor.as_ref().unwrap().id(), actor.id());
}

#[test]
fn test_drop_aborts_tasks() {
    let scheduler = Scheduler::new(256);
    let handles: Vec<TaskHandle> = {
        let mut renderer = CachedSliceRenderer::new(scheduler.clone(), RendererConfig::default());
        renderer.set_view(RecordingView::new(0.0, 1.0)).unwrap();
        renderer.add_representation(ViewItem::channel(1), SyntheticRepresentation::channel(1));
        let handles = renderer
            .ring()
            .iter()
            .filter_map(|node| node.state().read().worker.as_ref().map(|w| w.handle.clone()))
            .collect();
        handles
    };
    assert_eq!(handles.len(), 31);
    assert!(handles.iter().all(|handle| handle.is_aborted()));
    assert_eq!(scheduler.run_pending(), 0);
}

#[test]
fn test_actual_node_is_scheduled_first() {
    let (mut renderer, scheduler, view) = setup(3, 1.0);
    renderer.add_representation(ViewItem::channel(1), SyntheticRepresentation::channel(1));

    assert!(scheduler.run_next());
    renderer.process_completions();
    assert_eq!(view.attached_positions(), vec![0.0]);
    assert_eq!(scheduler.pending_count(), 6);
}

#[test]
fn test_threaded_pool_scrolls() {
    let pool = TaskPool::builder().worker_threads(2).max_concurrent(4).build().unwrap();
    let config = RendererConfig::builder().window_width(3).build();
    let mut renderer = CachedSliceRenderer::new(pool.scheduler().clone(), config);
    let view = RecordingView::new(0.0, 1.0);
    renderer.set_view(view.clone()).unwrap();
    let rep = SyntheticRepresentation::slow_channel(1, Duration::from_millis(1));
    renderer.add_representation(ViewItem::channel(1), rep.clone());

    for position in 1..=10 {
        renderer.set_position(position as f64);
        renderer.process_completions();
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while !renderer.is_idle() && Instant::now() < deadline {
        renderer.process_completions();
        std::thread::sleep(Duration::from_millis(2));
    }
    renderer.process_completions();

    assert!(renderer.is_idle());
    assert_eq!(renderer.actual_position(), Some(10.0));
    assert_eq!(view.attached_positions(), vec![10.0]);
    assert_ring_invariants(&renderer);
}

#[tokio::test]
async fn test_next_completion_delivers_frames() {
    let (mut renderer, scheduler, view) = setup(1, 1.0);
    renderer.add_representation(ViewItem::channel(1), SyntheticRepresentation::channel(1));
    assert!(scheduler.run_next());
    assert!(renderer.next_completion().await);
    assert_eq!(view.attached_positions(), vec![0.0]);
    assert_eq!(renderer.stats().frames_rendered, 1);
}

#[test]
fn test_scheduler_runs_highest_priority_first() {
    let scheduler = Scheduler::new(1);
    let low = scheduler.submit(Arc::new(NoopTask), Priority::Low).unwrap();
    let high = scheduler.submit(Arc::new(NoopTask), Priority::VeryHigh).unwrap();
    assert!(scheduler.run_next());
    assert!(high.has_finished());
    assert!(!low.has_finished());
}

struct NoopTask;

impl Task for NoopTask {
    fn run(&self, _ctx: &TaskContext) {}
}

proptest! {
    #[test]
    fn prop_ring_invariants_hold_after_moves(
        width in 0usize..6,
        moves in proptest::collection::vec(-8i32..8, 1..20),
    ) {
        let (mut renderer, scheduler, view) = setup(width, 1.0);
        renderer.add_representation(ViewItem::channel(1), SyntheticRepresentation::channel(1));
        let mut position = 0.0;
        for step in moves {
            position += step as f64;
            renderer.set_position(position);
            if step % 2 == 0 {
                settle(&mut renderer, &scheduler);
            }
            assert_ring_invariants(&renderer);
            prop_assert_eq!(renderer.actual_position(), Some(position));
            let attached = view.attached_positions();
            prop_assert!(attached.is_empty() || attached == vec![position]);
        }
        settle(&mut renderer, &scheduler);
        prop_assert_eq!(view.attached_positions(), vec![position]);
    }

    #[test]
    fn prop_resize_keeps_ring_consistent(widths in proptest::collection::vec(0usize..30, 1..10)) {
        let (mut renderer, _scheduler, _view) = setup(2, 0.25);
        for width in widths {
            renderer.set_window_width(width);
            prop_assert_eq!(renderer.window_width(), width.min(renderer.maximum_window_width()));
            assert_ring_invariants(&renderer);
            prop_assert_eq!(renderer.actual_position(), Some(0.0));
        }
    }
}
