// THEORY:
// An `Event` is one recorded clip as the camera-management backend describes it.
// The engines never see the backend; they only see these immutable records, handed
// over by the orchestrator one at a time.
//
// Scheduling lives here too. The backend returns events per monitor in whatever
// order it likes; `schedule` turns that into the single deterministic processing
// order the run will follow.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type EventId = u64;
pub type MonitorId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub monitor_id: MonitorId,
    pub start_time: NaiveDateTime,
    /// Remote URL or local path of the clip.
    pub video: String,
}

impl Event {
    pub fn new(id: EventId, monitor_id: MonitorId, start_time: NaiveDateTime, video: impl Into<String>) -> Self {
        Self {
            id,
            monitor_id,
            start_time,
            video: video.into(),
        }
    }

    /// `analyzed-mID_<monitor>-Event-<event>.<extension>`; no dot for an empty extension.
    pub fn output_name(&self, extension: &str) -> String {
        let stem = format!("analyzed-mID_{}-Event-{}", self.monitor_id, self.id);
        if extension.is_empty() { stem } else { format!("{stem}.{extension}") }
    }
}

/// What "chronological" means when ordering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKey {
    /// Descending event id. Ids are assigned monotonically by a single backend.
    #[default]
    EventId,
    /// Descending start time, ties broken by descending id.
    StartTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ordering {
    /// One flat sequence across every monitor.
    #[default]
    Global,
    /// All of one monitor's events before the next monitor's.
    Sequential,
}

fn sort_events(events: &mut [Event], key: OrderKey) {
    match key {
        OrderKey::EventId => events.sort_by(|a, b| b.id.cmp(&a.id)),
        OrderKey::StartTime => events.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id))),
    }
}

/// Produces the processing order for a run. Duplicate ids (the same event
/// retrieved twice through overlapping filters) are kept once.
pub fn schedule(events: Vec<Event>, ordering: Ordering, key: OrderKey) -> Vec<Event> {
    let mut seen = std::collections::HashSet::new();
    let events: Vec<Event> = events.into_iter().filter(|e| seen.insert(e.id)).collect();

    match ordering {
        Ordering::Global => {
            let mut flat = events;
            sort_events(&mut flat, key);
            flat
        }
        Ordering::Sequential => {
            // Monitors are visited in order of first appearance.
            let mut monitor_order: Vec<MonitorId> = Vec::new();
            let mut groups: BTreeMap<MonitorId, Vec<Event>> = BTreeMap::new();
            for event in events {
                if !groups.contains_key(&event.monitor_id) {
                    monitor_order.push(event.monitor_id);
                }
                groups.entry(event.monitor_id).or_default().push(event);
            }
            monitor_order
                .into_iter()
                .filter_map(|m| groups.remove(&m))
                .flat_map(|mut group| {
                    sort_events(&mut group, key);
                    group
                })
                .collect()
        }
    }
}
