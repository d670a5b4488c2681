// THEORY:
// Inference-backed object detection for `detection_type = object_model`. A
// Darknet YOLO network is loaded once through OpenCV's dnn module and run on
// every frame. The frame goes in as a 416x416 blob scaled to [0, 1] with the
// channels swapped back to RGB. Each unconnected output layer yields one matrix
// of candidate rows, which the library's `OutputDecoder` turns into detections.
// Layers are decoded separately and suppressed once more across layers, because
// YOLO reports the same object at several scales.
//
// A model that cannot be loaded poisons the whole run. A frame that fails to run
// through the network fails only its event.

use crate::opencv_backend::rgb_to_mat;
use opencv::{
    core::{self, Mat, Scalar, Size, Vector},
    dnn::{self, Net},
    prelude::*,
};
use tracing::{debug, info};
use zm_magik::core_modules::detection::Detection;
use zm_magik::core_modules::detector::ObjectDetector;
use zm_magik::core_modules::frame_source::Frame;
use zm_magik::core_modules::object_model::{ModelFiles, OVERLAP_LIMIT, OutputDecoder, suppress_overlaps};
use zm_magik::{Event, MagikError, Result};

const INPUT_SIZE: i32 = 416;

pub struct DarknetDetector {
    net: Net,
    outputs: Vector<String>,
    decoder: OutputDecoder,
}

impl DarknetDetector {
    pub fn load(files: &ModelFiles) -> Result<Self> {
        let model_error = |e: opencv::Error| {
            MagikError::DetectionInput(format!("cannot load model {}: {e}", files.weights.display()))
        };
        let mut net = dnn::read_net_from_darknet(&files.config.to_string_lossy(), &files.weights.to_string_lossy())
            .map_err(model_error)?;
        if files.gpu {
            net.set_preferable_backend(dnn::DNN_BACKEND_CUDA).map_err(model_error)?;
            net.set_preferable_target(dnn::DNN_TARGET_CUDA).map_err(model_error)?;
        }
        let outputs = net.get_unconnected_out_layers_names().map_err(model_error)?;
        info!(
            config = %files.config.display(),
            classes = files.labels.len(),
            gpu = files.gpu,
            "object model loaded"
        );
        Ok(Self {
            net,
            outputs,
            decoder: OutputDecoder::new(files.labels.clone()),
        })
    }

    fn forward(&mut self, frame: &Frame) -> opencv::Result<Vec<Mat>> {
        let bgr = rgb_to_mat(&frame.image)?;
        let blob = dnn::blob_from_image(
            &bgr,
            1.0 / 255.0,
            Size::new(INPUT_SIZE, INPUT_SIZE),
            Scalar::default(),
            true,
            false,
            core::CV_32F,
        )?;
        self.net.set_input(&blob, "", 1.0, Scalar::default())?;
        let mut layers: Vector<Mat> = Vector::new();
        self.net.forward(&mut layers, &self.outputs)?;
        Ok(layers.to_vec())
    }
}

/// Decodes every output layer and suppresses duplicates across them.
pub fn decode_layers<'a>(
    decoder: &OutputDecoder,
    layers: impl IntoIterator<Item = (&'a [f32], usize)>,
    frame_size: (u32, u32),
) -> Vec<Detection> {
    let found = layers
        .into_iter()
        .flat_map(|(rows, row_len)| decoder.decode(rows, row_len, frame_size))
        .collect();
    suppress_overlaps(found, OVERLAP_LIMIT)
}

impl ObjectDetector for DarknetDetector {
    fn detect(&mut self, event: &Event, frame: &Frame) -> Result<Vec<Detection>> {
        let inference_error = |e: opencv::Error| MagikError::resource("object model", e);
        let layers = self.forward(frame).map_err(inference_error)?;
        let mut raw = Vec::with_capacity(layers.len());
        for layer in &layers {
            raw.push((layer.data_typed::<f32>().map_err(inference_error)?, layer.cols() as usize));
        }
        let detections = decode_layers(&self.decoder, raw, frame.image.dimensions());
        debug!(event_id = event.id, frame = frame.index, found = detections.len(), "model output decoded");
        Ok(detections)
    }
}
