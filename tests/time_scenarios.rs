// Time reference properties across pause/resume sequences.

use chrono::Utc;
use sensa_rs::{ManualClock, TimeReference, TimeSource, TimedEvent};
use std::sync::Arc;

#[test]
fn monotonic_and_wall_projection_agree_without_drift() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let reference = TimeReference::new(clock.clone());

    reference.register_event(TimedEvent::Start);
    for _ in 0..3 {
        clock.advance(7.0);
        reference.register_event(TimedEvent::Pause);
        clock.advance(2.0);
        reference.register_event(TimedEvent::Start);
    }
    clock.advance(1.25);

    let by_event = reference.experiment_time_from_event(clock.monotonic());
    let by_system = reference.experiment_time_from_system(clock.wall());
    assert!((by_event - by_system).abs() < 1e-6);
    assert!((by_event - (3.0 * 7.0 + 1.25)).abs() < 1e-6);
}

#[test]
fn wall_clock_adjustment_does_not_move_monotonic_projection() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let reference = TimeReference::new(clock.clone());

    reference.register_event(TimedEvent::Start);
    clock.advance(5.0);

    // An NTP-style jump after the last event: the monotonic projection is
    // unaffected, the wall-clock projection shifts with it.
    clock.skew_wall(100.0);
    assert!((reference.experiment_time_from_event(clock.monotonic()) - 5.0).abs() < 1e-9);
    assert!((reference.experiment_time_from_system(clock.wall()) - 105.0).abs() < 1e-6);
}

#[test]
fn gap_totals_match_paused_wall_time() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let reference = TimeReference::new(clock.clone());

    reference.register_event(TimedEvent::Start);
    clock.advance(10.0);
    reference.register_event(TimedEvent::Pause);
    clock.advance(4.0);
    reference.register_event(TimedEvent::Start);
    clock.advance(10.0);
    reference.register_event(TimedEvent::Pause);

    // Experiment ran 20s, was paused 4s, so linear time is 24s.
    assert!((reference.experiment_time() - 20.0).abs() < 1e-9);
    assert!((reference.linear_time() - 24.0).abs() < 1e-6);
    let last = reference.event_count() - 1;
    assert!((reference.total_gap_by_index(last) - 4.0).abs() < 1e-6);

    // Gapped lookup: the pause/resume pair at experiment time 10 is
    // passed together; the final pause sits at 20 + 4s gap = 24.
    assert_eq!(reference.reference_index_from_gapped_experiment_time(9.9), 0);
    assert_eq!(reference.reference_index_from_gapped_experiment_time(10.0), 2);
    assert_eq!(reference.reference_index_from_gapped_experiment_time(23.9), 2);
    assert_eq!(reference.reference_index_from_gapped_experiment_time(24.0), 3);
}

#[test]
fn paused_state_is_queryable_per_index() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let reference = TimeReference::new(clock.clone());

    reference.register_event(TimedEvent::Start);
    clock.advance(1.0);
    reference.register_event(TimedEvent::Pause);

    assert!(!reference.paused_by_index(0));
    assert!(reference.paused_by_index(1));
    assert!(reference.paused_by_index(99));
}
