use super::preprocess::{Normalization, Preprocessor};
use super::types::LandmarkModel;
use image::imageops;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::frame::{Frame, LandmarkSet, PixelRect, Point2};

/// Landmark count of the MediaPipe face mesh topology.
pub const FACE_MESH_POINTS: usize = 468;

const INPUT_SIZE: u32 = 192;
/// Extra margin around the previous face when cropping the next frame.
const ROI_PADDING: f32 = 0.25;
const MIN_ROI_SIDE: u32 = 32;

/// MediaPipe face mesh model running on ONNX Runtime
///
/// The model wants a roughly face-centred square crop. The first frame (and any
/// frame after tracking is lost) uses the whole frame; afterwards the crop
/// follows the last face found.
pub struct OnnxFaceMesh {
    session: Session,
    preprocessor: Preprocessor,
    presence_threshold: f32,
    roi: Option<PixelRect>,
}

impl OnnxFaceMesh {
    /// Create a face mesh model from an ONNX file
    ///
    /// # Default Configuration
    /// - Input size: 192x192, samples scaled to [0, 1]
    /// - Face presence threshold: 0.5 (after sigmoid)
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading face mesh model from {}", path.display());

        let session = Session::builder()
            .map_err(|e| PipelineError::model_unavailable(format!("ORT session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::model_unavailable(format!("ORT opt level: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| PipelineError::model_unavailable(format!("ORT threads: {e}")))?
            .commit_from_file(path)
            .map_err(|e| {
                PipelineError::model_unavailable(format!(
                    "Failed to load model from {}: {e}",
                    path.display()
                ))
            })?;

        tracing::info!("Face mesh model loaded successfully");

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(INPUT_SIZE, INPUT_SIZE),
            presence_threshold: 0.5,
            roi: None,
        })
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.preprocessor = Preprocessor::new(INPUT_SIZE, INPUT_SIZE).with_normalization(normalization);
        self
    }

    pub fn with_presence_threshold(mut self, threshold: f32) -> Self {
        self.presence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    fn run(&mut self, crop: &Frame) -> Result<(Vec<f32>, Option<f32>)> {
        let input = self.preprocessor.preprocess(crop);
        let shape = input.shape().to_vec();
        let tensor = Tensor::from_array((shape, input.into_raw_vec().into_boxed_slice()))
            .map_err(|e| PipelineError::model_unavailable(format!("ORT tensor: {e}")))?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| PipelineError::model_unavailable(format!("ORT run failed: {e}")))?;

        // Output names differ between exports: tell them apart by size
        let mut coords = None;
        let mut presence = None;
        for (name, value) in outputs.iter() {
            let (_, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| PipelineError::model_unavailable(format!("ORT extract {name}: {e}")))?;
            if data.len() >= FACE_MESH_POINTS * 3 && coords.is_none() {
                coords = Some(data.to_vec());
            } else if data.len() == 1 && presence.is_none() {
                presence = Some(data[0]);
            }
        }

        let coords = coords.ok_or_else(|| {
            PipelineError::model_unavailable("face mesh produced no landmark tensor")
        })?;
        Ok((coords, presence))
    }
}

impl LandmarkModel for OnnxFaceMesh {
    fn landmarks(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>> {
        let _span = tracing::debug_span!("face_mesh").entered();
        let (width, height) = frame.dimensions();

        let region = self
            .roi
            .filter(|r| r.x + r.width <= width && r.y + r.height <= height)
            .unwrap_or(PixelRect {
                x: 0,
                y: 0,
                width,
                height,
            });
        let crop = imageops::crop_imm(frame, region.x, region.y, region.width, region.height).to_image();

        let (coords, presence) = self.run(&crop)?;

        if let Some(logit) = presence {
            let score = sigmoid(logit);
            if score < self.presence_threshold {
                tracing::debug!("No face (presence {:.3})", score);
                self.roi = None;
                return Ok(None);
            }
        }

        let landmarks = map_to_frame(&coords, region);
        self.roi = square_roi(&landmarks, width, height, ROI_PADDING);
        Ok(Some(landmarks))
    }

    fn input_size(&self) -> (u32, u32) {
        self.preprocessor.target_size()
    }

    fn reset_tracking(&mut self) {
        self.roi = None;
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Map model-space `(x, y, z)` triples back into frame pixels.
///
/// Exports emit either input-pixel coordinates (0..192) or normalised ones
/// (0..1); anything whose extent stays under 2 is taken as normalised.
fn map_to_frame(coords: &[f32], region: PixelRect) -> LandmarkSet {
    let triples = &coords[..FACE_MESH_POINTS * 3];
    let extent = triples
        .chunks_exact(3)
        .flat_map(|c| [c[0].abs(), c[1].abs()])
        .fold(0.0f32, f32::max);
    let unit = if extent <= 2.0 { 1.0 } else { INPUT_SIZE as f32 };

    let points = triples
        .chunks_exact(3)
        .map(|c| {
            Point2::new(
                region.x as f32 + c[0] / unit * region.width as f32,
                region.y as f32 + c[1] / unit * region.height as f32,
            )
        })
        .collect();
    LandmarkSet::new(points)
}

/// Square crop around the landmarks, expanded by `padding`, clamped to the frame.
fn square_roi(landmarks: &LandmarkSet, width: u32, height: u32, padding: f32) -> Option<PixelRect> {
    let pts = landmarks.points();
    if pts.is_empty() {
        return None;
    }
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for p in pts {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    let side = (max_x - min_x).max(max_y - min_y) * (1.0 + padding);
    let cx = (min_x + max_x) / 2.0;
    let cy = (min_y + max_y) / 2.0;

    let x1 = (cx - side / 2.0).max(0.0);
    let y1 = (cy - side / 2.0).max(0.0);
    let x2 = (cx + side / 2.0).min(width as f32);
    let y2 = (cy + side / 2.0).min(height as f32);
    if x2 - x1 < MIN_ROI_SIDE as f32 || y2 - y1 < MIN_ROI_SIDE as f32 {
        return None;
    }
    Some(PixelRect {
        x: x1 as u32,
        y: y1 as u32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
    })
}
