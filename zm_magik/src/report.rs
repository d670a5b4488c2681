// THEORY:
// The `RunReport` is the run-level record of what happened: one outcome per event
// the orchestrator attempted, in processing order, each carrying the match or
// detection records its engine produced. Engines never touch the report directly;
// they return their records and the orchestrator files them. It is written to disk
// once, at the end of the run.
//
// A failed event is listed with its error and no records, so the report retains
// only data from events that were processed successfully.

use crate::config::Mode;
use crate::core_modules::detection::{BoundingBox, Detection};
use crate::core_modules::frame_source::Frame;
use crate::core_modules::template_search::SearchHit;
use crate::error::Result;
use crate::event::{Event, EventId, MonitorId};
use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Maps a frame index to wall-clock time: `start_time + index / fps`.
pub fn frame_timestamp(event: &Event, frame: &Frame, fps: f64) -> NaiveDateTime {
    let offset = TimeDelta::milliseconds((frame.offset_secs(fps) * 1000.0).round() as i64);
    event.start_time + offset
}

/// One qualifying frame (search) or one accepted detection (blend, annotate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub frame_index: u64,
    pub timestamp: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl MatchRecord {
    pub fn search(event: &Event, frame: &Frame, fps: f64, hit: SearchHit) -> Self {
        Self {
            frame_index: frame.index,
            timestamp: frame_timestamp(event, frame, fps),
            bounding_box: hit.location,
            label: None,
            confidence: None,
            score: Some(hit.score),
        }
    }

    pub fn detection(event: &Event, frame: &Frame, fps: f64, detection: &Detection) -> Self {
        Self {
            frame_index: frame.index,
            timestamp: frame_timestamp(event, frame, fps),
            bounding_box: Some(detection.bounding_box),
            label: detection.label.clone(),
            confidence: detection.confidence,
            score: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Processed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub event_id: EventId,
    pub monitor_id: MonitorId,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub records: Vec<MatchRecord>,
}

impl EventOutcome {
    pub fn processed(event: &Event, records: Vec<MatchRecord>, output: Option<PathBuf>) -> Self {
        Self {
            event_id: event.id,
            monitor_id: event.monitor_id,
            status: EventStatus::Processed,
            error: None,
            output,
            records,
        }
    }

    pub fn failed(event: &Event, error: impl ToString) -> Self {
        Self {
            event_id: event.id,
            monitor_id: event.monitor_id,
            status: EventStatus::Failed,
            error: Some(error.to_string()),
            output: None,
            records: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: Mode,
    pub events_considered: usize,
    pub events_failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<PathBuf>,
    pub events: Vec<EventOutcome>,
}

impl RunReport {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            events_considered: 0,
            events_failed: 0,
            composite: None,
            events: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: EventOutcome) {
        self.events_considered += 1;
        if outcome.status == EventStatus::Failed {
            self.events_failed += 1;
        }
        self.events.push(outcome);
    }

    pub fn records(&self) -> impl Iterator<Item = &MatchRecord> {
        self.events.iter().flat_map(|e| e.records.iter())
    }

    /// `analyzed-<MM_DD_YYYY_HH_MM_SS>.json`
    pub fn file_name(now: NaiveDateTime) -> String {
        format!("analyzed-{}.json", now.format("%m_%d_%Y_%H_%M_%S"))
    }

    pub fn write_json(&self, dir: &Path, now: NaiveDateTime) -> Result<PathBuf> {
        let path = dir.join(Self::file_name(now));
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(path)
    }
}
