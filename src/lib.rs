//! Object replacement, live face swapping and lip-sync job orchestration
//! around external vision models and hosted generation services.

pub mod capture;
pub mod catalog;
pub mod composite;
pub mod config;
pub mod error;
pub mod frame;
pub mod live;
pub mod media;
pub mod output;
pub mod pipeline;
pub mod pitch;
pub mod remote;
pub mod server;
pub mod vision;

pub use error::{PipelineError, Result};
pub use frame::{BoundingBox, Frame, LandmarkSet, Mask, Point2};
