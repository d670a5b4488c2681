// THEORY:
// The ZoneMinder API client turns a validated `EventQuery` into the list of
// `Event`s the orchestrator will process. It speaks just enough of the API for
// that: log in once for an access token, then either fetch one event by id or
// page through the filtered event index until every page has been read.
//
// Filters are encoded in the URL path the way the API expects them
// (`MonitorId:11/StartTime >=:2020-06-01 10:00:00/...`). One query is issued per
// requested monitor, or a single unfiltered one when no monitor was named.
// Every URL that may carry a token or password goes through `mask_secrets`
// before it is logged. A listed event that does not parse is skipped with a
// warning instead of failing the whole retrieval.

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use zm_magik::{Event, EventId, EventQuery, MonitorId};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SECRET_PARAM: &str = r"(?i)((pass(?:word)?)|(auth)|(token))=([^&/?]*)";

/// Replaces the value of any `pass`, `password`, `auth` or `token` parameter.
pub fn mask_secrets(url: &str) -> String {
    match Regex::new(SECRET_PARAM) {
        Ok(secret) => secret.replace_all(url, "$1=***").into_owned(),
        Err(_) => "<redacted>".to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(rename = "pageCount", default)]
    page_count: u32,
}

#[derive(Debug, Deserialize)]
struct EventIndex {
    #[serde(default)]
    events: Vec<EventEnvelope>,
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct SingleEvent {
    event: EventEnvelope,
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "Event")]
    event: ApiEvent,
}

/// The API serialises numbers as strings.
#[derive(Debug, Deserialize)]
struct ApiEvent {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "MonitorId")]
    monitor_id: String,
    #[serde(rename = "StartTime")]
    start_time: String,
    #[serde(rename = "Notes", default)]
    notes: Option<String>,
}

impl ApiEvent {
    fn has_detections(&self) -> bool {
        self.notes.as_deref().is_some_and(|n| n.contains("detected:"))
    }
}

/// Path segments for one monitor's event index.
pub fn filter_path(query: &EventQuery, monitor: Option<MonitorId>) -> String {
    let mut filters = Vec::new();
    if let Some(monitor) = monitor {
        filters.push(format!("MonitorId:{monitor}"));
    }
    if let Some(from) = query.from {
        filters.push(format!("StartTime >=:{}", from.format(TIME_FORMAT)));
    }
    if let Some(to) = query.to {
        filters.push(format!("StartTime <=:{}", to.format(TIME_FORMAT)));
    }
    if let Some(min) = query.min_alarm_frames {
        filters.push(format!("AlarmFrames >=:{min}"));
    }
    if let Some(max) = query.max_alarm_frames {
        filters.push(format!("AlarmFrames <=:{max}"));
    }
    if filters.is_empty() {
        "events/index.json".to_string()
    } else {
        format!("events/index/{}.json", filters.join("/"))
    }
}

pub struct ZmClient {
    http: reqwest::Client,
    query: EventQuery,
    token: Option<String>,
}

impl ZmClient {
    pub fn new(query: EventQuery) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            query,
            token: None,
        })
    }

    pub async fn login(&mut self) -> Result<()> {
        let url = format!("{}/host/login.json", self.query.api_portal);
        let response = self
            .http
            .post(&url)
            .form(&[("user", &self.query.username), ("pass", &self.query.password)])
            .send()
            .await
            .with_context(|| format!("logging in to {url}"))?
            .error_for_status()
            .with_context(|| format!("logging in to {url}"))?;
        let login: LoginResponse = response.json().await.context("reading login response")?;
        info!(api = %self.query.api_portal, "logged in");
        self.token = Some(login.access_token);
        Ok(())
    }

    fn token(&self) -> Result<&str> {
        match &self.token {
            Some(token) => Ok(token),
            None => bail!("not logged in"),
        }
    }

    /// `{portal}/index.php?view=view_video&eid=<id>&token=<token>`
    pub fn video_url(&self, id: EventId) -> Result<String> {
        Ok(format!(
            "{}/index.php?view=view_video&eid={id}&token={}",
            self.query.portal,
            self.token()?
        ))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        debug!(url = %mask_secrets(url), "GET");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("requesting {}", mask_secrets(url)))?
            .error_for_status()
            .with_context(|| format!("requesting {}", mask_secrets(url)))?;
        response
            .json()
            .await
            .with_context(|| format!("decoding {}", mask_secrets(url)))
    }

    fn to_event(&self, api: ApiEvent) -> Result<Event> {
        let id: EventId = api.id.parse().with_context(|| format!("event id {:?}", api.id))?;
        let monitor_id: MonitorId = api
            .monitor_id
            .parse()
            .with_context(|| format!("monitor id {:?} of event {id}", api.monitor_id))?;
        let start_time = NaiveDateTime::parse_from_str(&api.start_time, TIME_FORMAT)
            .with_context(|| format!("start time {:?} of event {id}", api.start_time))?;
        Ok(Event::new(id, monitor_id, start_time, self.video_url(id)?))
    }

    async fn fetch_one(&self, id: EventId) -> Result<Vec<Event>> {
        let url = format!("{}/events/{id}.json?token={}", self.query.api_portal, self.token()?);
        let single: SingleEvent = self.get_json(&url).await?;
        if self.query.object_only && !single.event.event.has_detections() {
            info!(event_id = id, "event has no detected objects, skipping");
            return Ok(Vec::new());
        }
        Ok(vec![self.to_event(single.event.event)?])
    }

    async fn fetch_index(&self, monitor: Option<MonitorId>) -> Result<Vec<ApiEvent>> {
        let base = format!("{}/{}", self.query.api_portal, filter_path(&self.query, monitor));
        let mut found = Vec::new();
        let mut page = 1;
        loop {
            let url = format!("{base}?token={}&page={page}", self.token()?);
            let index: EventIndex = self.get_json(&url).await?;
            found.extend(index.events.into_iter().map(|e| e.event));
            let pages = index.pagination.map_or(1, |p| p.page_count);
            if page >= pages {
                break;
            }
            page += 1;
        }
        Ok(found)
    }

    /// Every event matching the query, each id once, in the order the API listed
    /// them per monitor.
    pub async fn fetch_events(&self) -> Result<Vec<Event>> {
        if let Some(id) = self.query.event_id {
            return self.fetch_one(id).await;
        }

        let monitors: Vec<Option<MonitorId>> = if self.query.monitors.is_empty() {
            vec![None]
        } else {
            self.query.monitors.iter().copied().map(Some).collect()
        };

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for monitor in monitors {
            let found = self.fetch_index(monitor).await?;
            info!(monitor = ?monitor, found = found.len(), "queried events");
            for event in self.listed_events(found) {
                if seen.insert(event.id) {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }

    /// Converts one index listing. An entry that cannot be parsed is logged and
    /// left out; the rest of the listing is kept.
    fn listed_events(&self, found: Vec<ApiEvent>) -> Vec<Event> {
        found
            .into_iter()
            .filter(|api| !self.query.object_only || api.has_detections())
            .filter_map(|api| {
                let id = api.id.clone();
                self.to_event(api)
                    .inspect_err(|e| warn!(event_id = %id, "skipping malformed event: {e:#}"))
                    .ok()
            })
            .collect()
    }
}
