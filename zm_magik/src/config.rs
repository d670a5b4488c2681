// THEORY:
// `MagikConfig` is the one explicit configuration value for a run. It is read from
// a TOML file (or built in code), overridden by command-line flags, and then
// resolved exactly once by `validate()` into a `RunPlan`: the single engine the run
// will use, with the reference template and polygon mask already loaded and scaled.
// No component reads configuration after that point.
//
// Validation classifies every problem up front. Bad combinations and out-of-range
// values are `Configuration` errors; a mask, template or detection file that
// cannot be used is a `DetectionInput` error. Both abort the run before the first
// event is touched.

use crate::core_modules::annotation_overlay::{AnnotationOverlay, OverlaySettings};
use crate::core_modules::background_model::BackgroundParams;
use crate::core_modules::blend_compositor::{BlendArea, BlendCompositor, BlendSettings};
use crate::core_modules::detection::DetectionFilter;
use crate::core_modules::detector::{DetectionStep, DetectionType, ObjectDetector, PrecomputedDetector};
use crate::core_modules::object_model::{ModelFiles, labels_from_meta, load_labels};
use crate::core_modules::polygon_mask::PolygonMask;
use crate::core_modules::template_search::{MatchThreshold, SearchPolicy, Template, TemplateSearch};
use crate::error::{MagikError, Result};
use crate::event::{EventId, MonitorId, OrderKey, Ordering};
use crate::orchestrator::{Engine, RunPlan, RunSettings};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The forms `parse_time_bound` understands, for help and error text.
pub const TIME_BOUND_FORMS: &str =
    "\"now\", \"N seconds|minutes|hours|days|weeks ago\" or \"YYYY-MM-DD[ HH:MM[:SS]]\"";

/// Frames between two progress lines.
pub const PROGRESS_INTERVAL: u64 = 100;

/// The three mutually exclusive engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Search,
    Blend,
    Annotate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagikConfig {
    // Where events come from.
    /// A local clip processed as a single event; bypasses the camera backend.
    pub input: Option<PathBuf>,
    pub event_id: Option<EventId>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub monitors: Vec<MonitorId>,
    pub min_alarm_frames: Option<u32>,
    pub max_alarm_frames: Option<u32>,
    /// Only events the backend tagged with detected objects; in blend mode, events
    /// without accepted detections are also left out of the composite.
    pub object_only: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub portal: Option<String>,
    /// Defaults to `<portal>/api`.
    pub api_portal: Option<String>,
    /// Fetch remote clips to a local file before decoding.
    pub download: bool,

    // Mode selection.
    /// Reference image to search for.
    pub find: Option<PathBuf>,
    pub blend: bool,
    pub annotate: bool,

    // Sampling.
    pub skip_frames: u32,
    pub resize: Option<f64>,
    /// Overrides the frame rate reported by the decoder.
    pub fps: Option<f64>,
    /// Seconds analysed from the start of each clip; the whole clip when unset.
    pub duration: Option<f64>,
    pub mask: Option<String>,

    // Template search.
    pub threshold: f32,
    pub present: bool,
    pub all: bool,
    pub write: bool,
    pub trail_frames: u32,

    // Detection.
    pub detection_type: DetectionType,
    /// Saved detector output, replayed for `object_model` when no model is given.
    pub detections_file: Option<PathBuf>,
    /// Darknet network description for `object_model`.
    pub config_file: Option<PathBuf>,
    pub weights_file: Option<PathBuf>,
    /// Class names, one per line.
    pub labels_file: Option<PathBuf>,
    /// Darknet `.data` file; its `names` entry is used when `labels_file` is unset.
    pub meta_file: Option<PathBuf>,
    /// Run the model on a CUDA device.
    pub gpu: bool,
    pub confidence: f32,
    pub detect_pattern: String,
    pub min_blend_area: f64,
    pub background: BackgroundParams,

    // Blend and annotate.
    pub blend_delay: f64,
    pub relevant_only: bool,
    pub draw_boxes: bool,
    pub balance_intensity: bool,
    pub blend_area: BlendArea,
    pub font_scale: f32,

    // Ordering and output.
    pub sequential: bool,
    pub order_by: OrderKey,
    pub output_dir: PathBuf,
    /// File stem of the blend composite.
    pub blend_output: String,
    pub dump_json: bool,

    // Display.
    pub display: bool,
    pub interactive: bool,
    /// Log progress every `PROGRESS_INTERVAL` frames.
    pub show_progress: bool,
}

impl Default for MagikConfig {
    fn default() -> Self {
        Self {
            input: None,
            event_id: None,
            from: None,
            to: None,
            monitors: Vec::new(),
            min_alarm_frames: None,
            max_alarm_frames: None,
            object_only: false,
            username: None,
            password: None,
            portal: None,
            api_portal: None,
            download: true,
            find: None,
            blend: false,
            annotate: false,
            skip_frames: 1,
            resize: None,
            fps: None,
            duration: None,
            mask: None,
            threshold: 0.7,
            present: true,
            all: false,
            write: false,
            trail_frames: 10,
            detection_type: DetectionType::BackgroundExtraction,
            detections_file: None,
            config_file: None,
            weights_file: None,
            labels_file: None,
            meta_file: None,
            gpu: false,
            confidence: 0.6,
            detect_pattern: ".*".into(),
            min_blend_area: 1500.0,
            background: BackgroundParams::default(),
            blend_delay: 2.0,
            relevant_only: true,
            draw_boxes: false,
            balance_intensity: false,
            blend_area: BlendArea::Boxes,
            font_scale: 1.0,
            sequential: false,
            order_by: OrderKey::EventId,
            output_dir: PathBuf::from("."),
            blend_output: "blended".into(),
            dump_json: false,
            display: false,
            interactive: false,
            show_progress: true,
        }
    }
}

/// A validated camera-backend query.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub portal: String,
    pub api_portal: String,
    pub username: String,
    pub password: String,
    pub event_id: Option<EventId>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
    pub monitors: Vec<MonitorId>,
    pub min_alarm_frames: Option<u32>,
    pub max_alarm_frames: Option<u32>,
    pub object_only: bool,
    pub download: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventSource {
    Local(PathBuf),
    Api(EventQuery),
}

impl MagikConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MagikError::Configuration(format!("cannot read config {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn mode(&self) -> Result<Mode> {
        let selected: Vec<Mode> = [
            (self.find.is_some(), Mode::Search),
            (self.blend, Mode::Blend),
            (self.annotate, Mode::Annotate),
        ]
        .into_iter()
        .filter_map(|(on, mode)| on.then_some(mode))
        .collect();
        match selected.as_slice() {
            [mode] => Ok(*mode),
            [] => Err(MagikError::Configuration(
                "one of find, blend or annotate must be selected".into(),
            )),
            many => Err(MagikError::Configuration(format!(
                "modes cannot be mixed, got {many:?}"
            ))),
        }
    }

    pub fn ordering(&self) -> Ordering {
        if self.sequential { Ordering::Sequential } else { Ordering::Global }
    }

    /// Resolves where events come from. Remote retrieval needs credentials.
    pub fn event_source(&self, now: NaiveDateTime) -> Result<EventSource> {
        if let Some(input) = &self.input {
            return Ok(EventSource::Local(input.clone()));
        }
        if self.event_id.is_none() && self.from.is_none() && self.to.is_none() {
            return Err(MagikError::Configuration(
                "specify an input video, an event id, or a time range".into(),
            ));
        }
        let (Some(username), Some(password), Some(portal)) = (&self.username, &self.password, &self.portal) else {
            return Err(MagikError::Configuration(
                "an event id or time range requires username, password and portal".into(),
            ));
        };
        let portal = portal.trim_end_matches('/').to_string();
        let api_portal = match &self.api_portal {
            Some(api) => api.trim_end_matches('/').to_string(),
            None => format!("{portal}/api"),
        };
        Ok(EventSource::Api(EventQuery {
            portal,
            api_portal,
            username: username.clone(),
            password: password.clone(),
            event_id: self.event_id,
            from: self.from.as_deref().map(|raw| parse_time_bound(raw, now)).transpose()?,
            to: self.to.as_deref().map(|raw| parse_time_bound(raw, now)).transpose()?,
            monitors: self.monitors.clone(),
            min_alarm_frames: self.min_alarm_frames,
            max_alarm_frames: self.max_alarm_frames,
            object_only: self.object_only,
            download: self.download,
        }))
    }

    fn check_ranges(&self) -> Result<()> {
        let fail = |msg: String| Err(MagikError::Configuration(msg));
        if self.skip_frames == 0 {
            return fail("skip_frames must be at least 1".into());
        }
        if let Some(resize) = self.resize {
            if !(resize.is_finite() && resize > 0.0) {
                return fail(format!("resize factor {resize} must be positive"));
            }
        }
        if let Some(fps) = self.fps {
            if !(fps.is_finite() && fps > 0.0) {
                return fail(format!("fps {fps} must be positive"));
            }
        }
        if let Some(duration) = self.duration {
            if !(duration.is_finite() && duration > 0.0) {
                return fail(format!("duration {duration} must be positive"));
            }
        }
        if !(0.7..=1.0).contains(&self.threshold) {
            return fail(format!("threshold {} is not in [0.7, 1.0]", self.threshold));
        }
        if !(self.confidence > 0.0 && self.confidence <= 1.0) {
            return fail(format!("confidence {} is not in (0, 1]", self.confidence));
        }
        if !(self.blend_delay.is_finite() && self.blend_delay >= 0.0) {
            return fail(format!("blend_delay {} must not be negative", self.blend_delay));
        }
        if !(self.min_blend_area >= 0.0) {
            return fail(format!("min_blend_area {} must not be negative", self.min_blend_area));
        }
        if !(self.font_scale > 0.0) {
            return fail(format!("font_scale {} must be positive", self.font_scale));
        }
        let rate = self.background.learning_rate;
        if !(rate > 0.0 && rate <= 1.0) {
            return fail(format!("background learning_rate {rate} is not in (0, 1]"));
        }
        Ok(())
    }

    fn polygon_mask(&self) -> Result<Option<PolygonMask>> {
        let Some(raw) = &self.mask else {
            return Ok(None);
        };
        let mask = PolygonMask::parse(raw)?;
        match self.resize {
            Some(factor) => Ok(Some(mask.scaled(factor)?)),
            None => Ok(Some(mask)),
        }
    }

    /// The inference model named by `config_file` and `weights_file`, if any.
    /// Running it needs a backend outside this crate, see `validate_with`.
    pub fn model_files(&self) -> Result<Option<ModelFiles>> {
        if self.detection_type != DetectionType::ObjectModel {
            return Ok(None);
        }
        let (config, weights) = match (&self.config_file, &self.weights_file) {
            (None, None) => return Ok(None),
            (Some(config), Some(weights)) => (config.clone(), weights.clone()),
            _ => {
                return Err(MagikError::Configuration(
                    "an object model needs both config_file and weights_file".into(),
                ));
            }
        };
        for path in [&config, &weights] {
            if !path.is_file() {
                return Err(MagikError::DetectionInput(format!("model file {} not found", path.display())));
            }
        }
        let labels = match (&self.labels_file, &self.meta_file) {
            (Some(labels), _) => load_labels(labels)?,
            (None, Some(meta)) => labels_from_meta(meta)?,
            (None, None) => {
                return Err(MagikError::Configuration(
                    "an object model needs labels_file or meta_file".into(),
                ));
            }
        };
        Ok(Some(ModelFiles {
            config,
            weights,
            labels,
            gpu: self.gpu,
        }))
    }

    fn detection_step(&self, mask: Option<PolygonMask>, model: Option<Box<dyn ObjectDetector>>) -> Result<DetectionStep> {
        match self.detection_type {
            DetectionType::BackgroundExtraction => Ok(DetectionStep::motion(
                self.background.clone(),
                DetectionFilter {
                    mask,
                    min_area: Some(self.min_blend_area),
                    ..DetectionFilter::accept_all()
                },
            )),
            DetectionType::ObjectModel => {
                let detector: Box<dyn ObjectDetector> = match (model, &self.detections_file) {
                    (Some(model), _) => model,
                    (None, Some(path)) => Box::new(PrecomputedDetector::load(path, self.resize)?),
                    (None, None) if self.weights_file.is_some() => {
                        return Err(MagikError::Configuration(
                            "model files were given but no inference backend is available".into(),
                        ));
                    }
                    (None, None) => {
                        return Err(MagikError::Configuration(
                            "object_model detection requires a model (config_file, weights_file) or detections_file"
                                .into(),
                        ));
                    }
                };
                let pattern = Regex::new(&self.detect_pattern).map_err(|e| {
                    MagikError::Configuration(format!("detect_pattern {:?}: {e}", self.detect_pattern))
                })?;
                Ok(DetectionStep::model(
                    detector,
                    DetectionFilter {
                        mask,
                        min_area: None,
                        min_confidence: Some(self.confidence),
                        label_pattern: Some(pattern),
                    },
                ))
            }
        }
    }

    /// Checks the whole configuration and builds the run's single engine.
    pub fn validate(&self) -> Result<RunPlan> {
        self.validate_with(None)
    }

    /// Like `validate`, with `model` as the object detector. An injected model
    /// takes precedence over `detections_file`.
    pub fn validate_with(&self, model: Option<Box<dyn ObjectDetector>>) -> Result<RunPlan> {
        let mode = self.mode()?;
        self.check_ranges()?;
        let mask = self.polygon_mask()?;

        let engine = match mode {
            Mode::Search => {
                let path = self
                    .find
                    .as_ref()
                    .ok_or_else(|| MagikError::Configuration("search needs a reference image".into()))?;
                let template = Template::load(path, self.resize)?;
                Engine::Search(TemplateSearch::new(
                    template,
                    SearchPolicy {
                        threshold: MatchThreshold::new(self.threshold)?,
                        present: self.present,
                        process_all: self.all,
                        trail_frames: self.trail_frames,
                        write_output: self.write,
                    },
                ))
            }
            Mode::Blend => Engine::Blend(BlendCompositor::new(
                self.detection_step(mask, model)?,
                BlendSettings {
                    delay_secs: self.blend_delay,
                    relevant_only: self.relevant_only,
                    object_only: self.object_only,
                    draw_boxes: self.draw_boxes,
                    balance_intensity: self.balance_intensity,
                    area: self.blend_area,
                    font_scale: self.font_scale,
                },
                self.min_blend_area,
                &self.output_dir,
            )),
            Mode::Annotate => Engine::Annotate(AnnotationOverlay::new(
                self.detection_step(mask, model)?,
                OverlaySettings {
                    relevant_only: self.relevant_only,
                    font_scale: self.font_scale,
                },
            )),
        };

        Ok(RunPlan {
            settings: RunSettings {
                stride: self.skip_frames,
                resize: self.resize,
                duration: self.duration,
                progress_every: self.show_progress.then_some(PROGRESS_INTERVAL),
                ordering: self.ordering(),
                order_key: self.order_by,
                output_dir: self.output_dir.clone(),
                blend_output: self.blend_output.clone(),
                dump_json: self.dump_json,
            },
            engine,
        })
    }
}

/// Parses `--from`/`--to`, in one of the `TIME_BOUND_FORMS`. Free-form phrases
/// such as "may 28 1pm" are not understood.
pub fn parse_time_bound(raw: &str, now: NaiveDateTime) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    let relative = Regex::new(r"(?i)^(\d+)\s*(second|sec|minute|min|hour|hr|day|week)s?\s+ago$")
        .map_err(|e| MagikError::Configuration(e.to_string()))?;
    if let Some(caps) = relative.captures(trimmed) {
        let amount: i64 = caps[1]
            .parse()
            .map_err(|_| MagikError::Configuration(format!("time amount in {raw:?} is too large")))?;
        let delta = match caps[2].to_ascii_lowercase().as_str() {
            "second" | "sec" => TimeDelta::try_seconds(amount),
            "minute" | "min" => TimeDelta::try_minutes(amount),
            "hour" | "hr" => TimeDelta::try_hours(amount),
            "day" => TimeDelta::try_days(amount),
            _ => TimeDelta::try_weeks(amount),
        };
        return delta
            .and_then(|d| now.checked_sub_signed(d))
            .ok_or_else(|| MagikError::Configuration(format!("time {raw:?} is out of range")));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(parsed);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }
    Err(MagikError::Configuration(format!(
        "cannot understand time {raw:?}; use {TIME_BOUND_FORMS}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = MagikConfig::default();
        assert_eq!(c.skip_frames, 1);
        assert_eq!(c.trail_frames, 10);
        assert_eq!(c.blend_delay, 2.0);
        assert_eq!(c.threshold, 0.7);
        assert_eq!(c.confidence, 0.6);
        assert_eq!(c.min_blend_area, 1500.0);
        assert!(c.relevant_only && c.download && c.present);
        assert!(!c.draw_boxes);
        assert_eq!(c.detect_pattern, ".*");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = MagikConfig::from_toml_str(
            r#"
            blend = true
            monitors = [11, 14]
            mask = "197,450 1276,463 1239,710 239,715"

            [background]
            learning_rate = 0.1
            "#,
        )
        .unwrap();
        assert!(c.blend);
        assert_eq!(c.monitors, vec![11, 14]);
        assert_eq!(c.background.learning_rate, 0.1);
        assert_eq!(c.background.diff_threshold, 25);
        assert_eq!(c.min_blend_area, 1500.0);
    }

    #[test]
    fn malformed_toml_is_fatal() {
        let err = MagikConfig::from_toml_str("blend = maybe").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn exactly_one_mode() {
        let none = MagikConfig::default();
        assert!(matches!(none.validate().err(), Some(MagikError::Configuration(_))));

        let both = MagikConfig {
            blend: true,
            annotate: true,
            ..MagikConfig::default()
        };
        assert!(matches!(both.mode(), Err(MagikError::Configuration(_))));

        let blend = MagikConfig {
            blend: true,
            ..MagikConfig::default()
        };
        assert_eq!(blend.mode().unwrap(), Mode::Blend);
        assert!(matches!(blend.validate().unwrap().engine, Engine::Blend(_)));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let base = MagikConfig {
            annotate: true,
            ..MagikConfig::default()
        };
        for bad in [
            MagikConfig { threshold: 0.69, ..base.clone() },
            MagikConfig { confidence: 0.0, ..base.clone() },
            MagikConfig { skip_frames: 0, ..base.clone() },
            MagikConfig { resize: Some(0.0), ..base.clone() },
            MagikConfig { blend_delay: -1.0, ..base.clone() },
        ] {
            assert!(matches!(bad.validate().err(), Some(MagikError::Configuration(_))));
        }
        assert!(MagikConfig { threshold: 1.0, ..base }.validate().is_ok());
    }

    #[test]
    fn bad_mask_is_detection_input_error() {
        let c = MagikConfig {
            blend: true,
            mask: Some("0,0 10,0 10".into()),
            ..MagikConfig::default()
        };
        assert!(matches!(c.validate().err(), Some(MagikError::DetectionInput(_))));
    }

    #[test]
    fn missing_reference_image_is_detection_input_error() {
        let c = MagikConfig {
            find: Some(PathBuf::from("/no/such/reference.png")),
            ..MagikConfig::default()
        };
        assert!(matches!(c.validate().err(), Some(MagikError::DetectionInput(_))));
    }

    #[test]
    fn search_plan_loads_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trash.png");
        GrayImage::from_fn(16, 16, |x, y| Luma([((x * 13 + y * 7) % 256) as u8]))
            .save(&path)
            .unwrap();
        let c = MagikConfig {
            find: Some(path),
            resize: Some(0.5),
            ..MagikConfig::default()
        };
        let plan = c.validate().unwrap();
        assert_eq!(plan.settings.resize, Some(0.5));
        assert!(matches!(plan.engine, Engine::Search(_)));
    }

    #[test]
    fn object_model_needs_detections_file() {
        let c = MagikConfig {
            annotate: true,
            detection_type: DetectionType::ObjectModel,
            ..MagikConfig::default()
        };
        assert!(matches!(c.validate().err(), Some(MagikError::Configuration(_))));
    }

    #[test]
    fn model_files_need_config_weights_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("yolov4.cfg");
        let weights = dir.path().join("yolov4.weights");
        let names = dir.path().join("coco.names");
        std::fs::write(&cfg, "[net]").unwrap();
        std::fs::write(&weights, [0u8; 16]).unwrap();
        std::fs::write(&names, "person\ncar\n").unwrap();

        let base = MagikConfig {
            annotate: true,
            detection_type: DetectionType::ObjectModel,
            config_file: Some(cfg.clone()),
            ..MagikConfig::default()
        };
        assert!(matches!(base.model_files(), Err(MagikError::Configuration(_))));

        let no_labels = MagikConfig {
            weights_file: Some(weights.clone()),
            ..base.clone()
        };
        assert!(matches!(no_labels.model_files(), Err(MagikError::Configuration(_))));

        let complete = MagikConfig {
            labels_file: Some(names),
            gpu: true,
            ..no_labels
        };
        let files = complete.model_files().unwrap().unwrap();
        assert_eq!(files.weights, weights);
        assert_eq!(files.labels, vec!["person", "car"]);
        assert!(files.gpu);

        // Model files alone cannot run without an inference backend.
        assert!(matches!(complete.validate().err(), Some(MagikError::Configuration(_))));

        let motion = MagikConfig {
            detection_type: DetectionType::BackgroundExtraction,
            ..complete
        };
        assert_eq!(motion.model_files().unwrap(), None);
    }

    #[test]
    fn missing_model_file_is_detection_input_error() {
        let c = MagikConfig {
            blend: true,
            detection_type: DetectionType::ObjectModel,
            config_file: Some(PathBuf::from("/no/such/yolov4.cfg")),
            weights_file: Some(PathBuf::from("/no/such/yolov4.weights")),
            ..MagikConfig::default()
        };
        assert!(matches!(c.model_files(), Err(MagikError::DetectionInput(_))));
    }

    #[test]
    fn injected_model_is_used_for_object_detection() {
        struct Nothing;
        impl ObjectDetector for Nothing {
            fn detect(
                &mut self,
                _event: &crate::event::Event,
                _frame: &crate::core_modules::frame_source::Frame,
            ) -> Result<Vec<crate::core_modules::detection::Detection>> {
                Ok(Vec::new())
            }
        }
        let c = MagikConfig {
            annotate: true,
            detection_type: DetectionType::ObjectModel,
            ..MagikConfig::default()
        };
        assert!(c.validate().is_err());
        assert!(matches!(c.validate_with(Some(Box::new(Nothing))).unwrap().engine, Engine::Annotate(_)));
    }

    #[test]
    fn duration_and_progress_reach_run_settings() {
        let c = MagikConfig {
            annotate: true,
            duration: Some(30.0),
            ..MagikConfig::default()
        };
        let settings = c.validate().unwrap().settings;
        assert_eq!(settings.duration, Some(30.0));
        assert_eq!(settings.progress_every, Some(PROGRESS_INTERVAL));

        let quiet = MagikConfig {
            show_progress: false,
            ..c.clone()
        };
        assert_eq!(quiet.validate().unwrap().settings.progress_every, None);

        let negative = MagikConfig {
            duration: Some(-1.0),
            ..c
        };
        assert!(matches!(negative.validate().err(), Some(MagikError::Configuration(_))));
    }

    #[test]
    fn remote_retrieval_requires_credentials() {
        let c = MagikConfig {
            event_id: Some(42),
            ..MagikConfig::default()
        };
        assert!(matches!(c.event_source(now()), Err(MagikError::Configuration(_))));

        assert!(matches!(
            MagikConfig::default().event_source(now()),
            Err(MagikError::Configuration(_))
        ));

        let c = MagikConfig {
            from: Some("2 hours ago".into()),
            username: Some("admin".into()),
            password: Some("secret".into()),
            portal: Some("https://zm.example.org/zm/".into()),
            ..MagikConfig::default()
        };
        let EventSource::Api(query) = c.event_source(now()).unwrap() else {
            panic!("expected an API query");
        };
        assert_eq!(query.api_portal, "https://zm.example.org/zm/api");
        assert_eq!(query.from, Some(now() - TimeDelta::hours(2)));
    }

    #[test]
    fn local_input_needs_no_credentials() {
        let c = MagikConfig {
            input: Some(PathBuf::from("clip.mp4")),
            ..MagikConfig::default()
        };
        assert_eq!(c.event_source(now()).unwrap(), EventSource::Local(PathBuf::from("clip.mp4")));
    }

    #[test]
    fn time_bounds() {
        assert_eq!(parse_time_bound("now", now()).unwrap(), now());
        assert_eq!(
            parse_time_bound("30 minutes ago", now()).unwrap(),
            now() - TimeDelta::minutes(30)
        );
        assert_eq!(parse_time_bound("1 day ago", now()).unwrap(), now() - TimeDelta::days(1));
        assert_eq!(
            parse_time_bound("2020-06-01 09:58", now()).unwrap(),
            NaiveDate::from_ymd_opt(2020, 6, 1).unwrap().and_hms_opt(9, 58, 0).unwrap()
        );
        assert_eq!(
            parse_time_bound("2020-06-01", now()).unwrap(),
            NaiveDate::from_ymd_opt(2020, 6, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
        assert!(parse_time_bound("yesterday-ish", now()).is_err());
        let err = parse_time_bound("may 28 1pm", now()).unwrap_err();
        assert!(err.to_string().contains(TIME_BOUND_FORMS));
    }
}
