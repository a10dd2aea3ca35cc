// Experiment time reference
//
// Keeps a log of start/pause events and translates between three time
// bases: experiment time (frozen while paused), linear time (wall-clock
// elapsed since first start) and gapped experiment time (experiment time
// shifted by the cumulative paused duration, for plotting against wall
// clock). The log strictly alternates START, PAUSE, ... beginning with
// START; registrations that would break the alternation are dropped.

use crate::clock::{wall_seconds_between, TimeSource};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Kind of a time reference event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimedEvent {
    Start,
    Pause,
}

/// One entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeMapping {
    pub event: TimedEvent,
    /// Experiment-relative time of the event in seconds.
    pub experiment_time: f64,
    /// Monotonic uptime at registration in seconds.
    pub event_time: f64,
    /// Wall-clock time at registration.
    pub system_time: DateTime<Utc>,
}

pub struct TimeReference {
    clock: Arc<dyn TimeSource>,
    mappings: RwLock<Vec<TimeMapping>>,
    // Cumulative gap up to index i never changes once later events are
    // appended, so entries are only invalidated by reset().
    gap_cache: Mutex<HashMap<usize, f64>>,
    dropped_events: AtomicU64,
}

impl TimeReference {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            mappings: RwLock::new(Vec::new()),
            gap_cache: Mutex::new(HashMap::new()),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// Empties the event log and the gap cache.
    pub fn reset(&self) {
        self.mappings.write().clear();
        self.gap_cache.lock().clear();
    }

    /// Registers `event` at the current clock readings. Requests that would
    /// break the START/PAUSE alternation are dropped (debounce for double
    /// start/stop requests); drops are counted and visible through
    /// `dropped_events`.
    pub fn register_event(&self, event: TimedEvent) {
        let event_time = self.clock.monotonic();
        let system_time = self.clock.wall();

        let mut mappings = self.mappings.write();
        let mapping = match mappings.last() {
            Some(last) => {
                let expected = match last.event {
                    TimedEvent::Start => TimedEvent::Pause,
                    TimedEvent::Pause => TimedEvent::Start,
                };
                if event != expected {
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "dropped out-of-order time event {:?} after {:?}",
                        event,
                        last.event
                    );
                    return;
                }
                let experiment_time = match last.event {
                    // Running: elapsed monotonic time extends experiment time.
                    TimedEvent::Start => last.experiment_time + (event_time - last.event_time),
                    // Paused: experiment time does not advance.
                    TimedEvent::Pause => last.experiment_time,
                };
                TimeMapping {
                    event,
                    experiment_time,
                    event_time,
                    system_time,
                }
            }
            None => {
                if event != TimedEvent::Start {
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                    log::warn!("dropped {:?} on empty time reference", event);
                    return;
                }
                TimeMapping {
                    event,
                    experiment_time: 0.0,
                    event_time,
                    system_time,
                }
            }
        };
        mappings.push(mapping);
    }

    /// Number of registrations dropped by the alternation debounce.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn mappings(&self) -> Vec<TimeMapping> {
        self.mappings.read().clone()
    }

    pub fn event_count(&self) -> usize {
        self.mappings.read().len()
    }

    /// Experiment time corresponding to the monotonic reading `event_time`.
    pub fn experiment_time_from_event(&self, event_time: f64) -> f64 {
        let mappings = self.mappings.read();
        match mappings.last() {
            Some(last) => match last.event {
                TimedEvent::Pause => last.experiment_time,
                TimedEvent::Start => last.experiment_time + (event_time - last.event_time),
            },
            None => 0.0,
        }
    }

    /// Experiment time corresponding to the wall-clock reading
    /// `system_time`. Used when no monotonic reading is available, e.g. for
    /// events reconstructed from persisted wall-clock stamps.
    pub fn experiment_time_from_system(&self, system_time: DateTime<Utc>) -> f64 {
        let mappings = self.mappings.read();
        match mappings.last() {
            Some(last) => match last.event {
                TimedEvent::Pause => last.experiment_time,
                TimedEvent::Start => {
                    last.experiment_time + wall_seconds_between(last.system_time, system_time)
                }
            },
            None => 0.0,
        }
    }

    /// Current experiment time.
    pub fn experiment_time(&self) -> f64 {
        self.experiment_time_from_event(self.clock.monotonic())
    }

    /// Wall-clock seconds since the first recorded event, paused intervals
    /// included. Strictly monotonic while the wall clock is.
    pub fn linear_time(&self) -> f64 {
        let mappings = self.mappings.read();
        match mappings.first() {
            Some(first) => wall_seconds_between(first.system_time, self.clock.wall()),
            None => 0.0,
        }
    }

    /// Index of the last event whose experiment time is <= `t`.
    pub fn reference_index_from_experiment_time(&self, t: f64) -> usize {
        let mappings = self.mappings.read();
        let mut i = 0;
        while mappings.len() > i + 1 && mappings[i + 1].experiment_time <= t {
            i += 1;
        }
        i
    }

    /// Index of the last event whose gap-shifted experiment time is <= `t`.
    pub fn reference_index_from_gapped_experiment_time(&self, t: f64) -> usize {
        let mut i = 0;
        loop {
            let next = {
                let mappings = self.mappings.read();
                if mappings.len() <= i + 1 {
                    return i;
                }
                mappings[i + 1].experiment_time
            };
            if next + self.total_gap_by_index(i) <= t {
                i += 1;
            } else {
                return i;
            }
        }
    }

    /// Index of the last event whose wall-clock offset from the first event
    /// is <= `t`.
    pub fn reference_index_from_linear_time(&self, t: f64) -> usize {
        let mappings = self.mappings.read();
        let mut i = 0;
        while mappings.len() > i + 1
            && wall_seconds_between(mappings[0].system_time, mappings[i + 1].system_time) <= t
        {
            i += 1;
        }
        i
    }

    /// Wall-clock stamp of event `i`, or now for an out-of-range index.
    pub fn system_time_by_index(&self, i: usize) -> DateTime<Utc> {
        let mappings = self.mappings.read();
        match mappings.get(i) {
            Some(mapping) => mapping.system_time,
            None => self.clock.wall(),
        }
    }

    /// Experiment time of event `i`, or 0.0 for an out-of-range index.
    pub fn experiment_time_by_index(&self, i: usize) -> f64 {
        self.mappings.read().get(i).map(|m| m.experiment_time).unwrap_or(0.0)
    }

    /// Whether the experiment was paused at event `i`. Out-of-range indices
    /// count as paused.
    pub fn paused_by_index(&self, i: usize) -> bool {
        match self.mappings.read().get(i) {
            Some(mapping) => mapping.event == TimedEvent::Pause,
            None => true,
        }
    }

    /// Cumulative paused duration (wall clock) from the first event through
    /// event `i`. Memoized per index; the log being append-only makes the
    /// memo safe.
    pub fn total_gap_by_index(&self, i: usize) -> f64 {
        {
            let cache = self.gap_cache.lock();
            if let Some(&gap) = cache.get(&i) {
                return gap;
            }
        }

        let gap = {
            let mappings = self.mappings.read();
            let first = match mappings.first() {
                Some(first) if mappings.len() > i => first,
                _ => return 0.0,
            };
            let mut gap = 0.0;
            let mut last_pause = first.system_time;
            for mapping in &mappings[..=i] {
                match mapping.event {
                    TimedEvent::Pause => last_pause = mapping.system_time,
                    TimedEvent::Start => {
                        gap += wall_seconds_between(last_pause, mapping.system_time)
                    }
                }
            }
            gap
        };

        self.gap_cache.lock().insert(i, gap);
        gap
    }
}
