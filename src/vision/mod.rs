//! Model adapters: detection, segmentation, generative fill and face landmarks.

mod face_mesh;
mod fill;
mod http;
mod preprocess;
mod tracker;
mod types;

pub use face_mesh::{OnnxFaceMesh, FACE_MESH_POINTS};
pub use fill::ResizingFill;
pub use http::{decode_png, encode_png, HttpVisionClient, InpaintSettings};
pub use preprocess::{Normalization, Preprocessor};
pub use tracker::{DegradeReason, FaceLandmarkTracker, SwapOutcome, FACE_OVAL, SMOOTHING_ALPHA};
pub use types::{
    select_best_mask, Detection, DetectionParams, Detector, GenerativeFill, InpaintModel,
    LandmarkModel, PointLabel, ScoredMask, SegmentPrompt, Segmenter,
};
