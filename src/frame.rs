//! Core data model: frames, boxes, masks and landmark sets.

use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_polygon_mut;

use crate::error::{PipelineError, Result};

/// A single RGB frame, exclusively owned by the loop iteration that made it.
pub type Frame = RgbImage;

/// A 2-D point in frame pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Integer pixel rectangle, guaranteed to lie inside the frame it was clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Axis-aligned box in pixel coordinates of one specific frame.
///
/// Coordinates are only valid for the frame they came from: resizing the frame
/// requires a matching [`BoundingBox::scaled`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }

    /// Clip to `[0, width) x [0, height)` and round to whole pixels.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<PixelRect> {
        let (fw, fh) = (width as f32, height as f32);
        let x1 = self.x1.min(self.x2).max(0.0).min(fw);
        let y1 = self.y1.min(self.y2).max(0.0).min(fh);
        let x2 = self.x1.max(self.x2).max(0.0).min(fw);
        let y2 = self.y1.max(self.y2).max(0.0).min(fh);

        let (x1, y1) = (x1.floor() as u32, y1.floor() as u32);
        let (x2, y2) = (x2.ceil() as u32, y2.ceil() as u32);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(PixelRect {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        })
    }
}

/// Per-pixel membership weights in `[0, 1]`, aligned to exactly one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl Mask {
    /// All-zero mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; (width as usize) * (height as usize)],
        }
    }

    /// All-one mask covering the whole frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![1.0; (width as usize) * (height as usize)],
        }
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Self {
        let mut data = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y).clamp(0.0, 1.0));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Build from row-major weights. Fails if the length does not match.
    pub fn from_weights(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        if data.len() != (width as usize) * (height as usize) {
            return Err(PipelineError::segmentation_failed(format!(
                "mask has {} values for a {}x{} grid",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data: data.into_iter().map(|v| v.clamp(0.0, 1.0)).collect(),
        })
    }

    pub fn from_gray(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        Self {
            width,
            height,
            data: gray.pixels().map(|p| p[0] as f32 / 255.0).collect(),
        }
    }

    /// Filled polygon (weight 1 inside, 0 outside).
    pub fn from_polygon(width: u32, height: u32, points: &[Point2]) -> Result<Self> {
        let mut vertices: Vec<imageproc::point::Point<i32>> = points
            .iter()
            .map(|p| imageproc::point::Point::new(p.x.round() as i32, p.y.round() as i32))
            .collect();
        vertices.dedup();
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        if vertices.len() < 3 {
            return Err(PipelineError::geometry(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                vertices.len()
            )));
        }
        let mut canvas = GrayImage::new(width, height);
        draw_polygon_mut(&mut canvas, &vertices, Luma([255u8]));
        Ok(Self::from_gray(&canvas))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn weights(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y as usize) * (self.width as usize) + x as usize]
    }

    /// Number of pixels with weight above 0.5.
    pub fn area(&self) -> usize {
        self.data.iter().filter(|&&v| v > 0.5).count()
    }

    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([(self.get(x, y) * 255.0).round().clamp(0.0, 255.0) as u8])
        })
    }

    /// Visualise as a grayscale RGB frame.
    pub fn to_rgb(&self) -> Frame {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let v = (self.get(x, y) * 255.0).round().clamp(0.0, 255.0) as u8;
            image::Rgb([v, v, v])
        })
    }

    /// Resample to another resolution with a linear filter.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }
        let resized = imageops::resize(&self.to_gray(), width, height, imageops::FilterType::Triangle);
        Self::from_gray(&resized)
    }

    /// Grow the region with a square structuring element of `kernel` pixels.
    pub fn dilated(&self, kernel: u8) -> Self {
        if kernel < 2 {
            return self.clone();
        }
        let binary = GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) > 0.5 { 255 } else { 0 }])
        });
        let grown = imageproc::morphology::dilate(&binary, Norm::LInf, kernel / 2);
        Self::from_gray(&grown)
    }

    /// Blur the mask edges so compositing leaves no hard seam.
    pub fn feathered(&self, sigma: f32) -> Self {
        if sigma <= 0.0 {
            return self.clone();
        }
        let blurred = imageproc::filter::gaussian_blur_f32(&self.to_gray(), sigma);
        Self::from_gray(&blurred)
    }
}

/// Ordered landmark points with a fixed, topology-defined cardinality.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LandmarkSet {
    points: Vec<Point2>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point2>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Exponential smoothing against the previous frame:
    /// `alpha * self + (1 - alpha) * previous`.
    ///
    /// A previous set with a different cardinality is ignored.
    pub fn smoothed(&self, previous: &LandmarkSet, alpha: f32) -> LandmarkSet {
        if previous.len() != self.len() {
            return self.clone();
        }
        let points = self
            .points
            .iter()
            .zip(previous.points.iter())
            .map(|(raw, prev)| {
                Point2::new(
                    alpha * raw.x + (1.0 - alpha) * prev.x,
                    alpha * raw.y + (1.0 - alpha) * prev.y,
                )
            })
            .collect();
        LandmarkSet { points }
    }

    /// Pick points by index; `None` if any index is out of range.
    pub fn select(&self, indices: &[usize]) -> Option<Vec<Point2>> {
        indices.iter().map(|&i| self.points.get(i).copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_inside_frame_is_unchanged() {
        let rect = BoundingBox::new(10.0, 20.0, 30.0, 50.0).clamp_to(100, 100).unwrap();
        assert_eq!(
            rect,
            PixelRect {
                x: 10,
                y: 20,
                width: 20,
                height: 30
            }
        );
    }

    #[test]
    fn clamp_clips_partial_overlap() {
        let rect = BoundingBox::new(-5.0, 90.0, 20.0, 140.0).clamp_to(100, 100).unwrap();
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 90, 20, 10));
    }

    #[test]
    fn clamp_outside_frame_is_none() {
        assert!(BoundingBox::new(150.0, 150.0, 200.0, 200.0).clamp_to(100, 100).is_none());
        assert!(BoundingBox::new(-50.0, 10.0, -1.0, 20.0).clamp_to(100, 100).is_none());
        assert!(BoundingBox::new(10.0, 10.0, 10.0, 40.0).clamp_to(100, 100).is_none());
    }

    #[test]
    fn smoothing_weights_new_observation() {
        let previous = LandmarkSet::new(vec![Point2::new(0.0, 0.0)]);
        let raw = LandmarkSet::new(vec![Point2::new(10.0, 10.0)]);
        let smoothed = raw.smoothed(&previous, 0.7);
        let p = smoothed.points()[0];
        assert!((p.x - 7.0).abs() < 1e-5);
        assert!((p.y - 7.0).abs() < 1e-5);
    }

    #[test]
    fn smoothing_ignores_mismatched_topology() {
        let previous = LandmarkSet::new(vec![Point2::new(0.0, 0.0); 2]);
        let raw = LandmarkSet::new(vec![Point2::new(4.0, 4.0)]);
        assert_eq!(raw.smoothed(&previous, 0.7), raw);
    }

    #[test]
    fn polygon_mask_fills_interior() {
        let square = [
            Point2::new(10.0, 10.0),
            Point2::new(30.0, 10.0),
            Point2::new(30.0, 30.0),
            Point2::new(10.0, 30.0),
        ];
        let mask = Mask::from_polygon(40, 40, &square).unwrap();
        assert_eq!(mask.dimensions(), (40, 40));
        assert_eq!(mask.get(20, 20), 1.0);
        assert_eq!(mask.get(2, 2), 0.0);
    }

    #[test]
    fn polygon_with_too_few_vertices_is_degenerate() {
        let line = [Point2::new(0.0, 0.0), Point2::new(5.0, 5.0)];
        assert!(matches!(
            Mask::from_polygon(10, 10, &line),
            Err(PipelineError::GeometryDegenerate(_))
        ));
    }

    #[test]
    fn resize_and_dilate_keep_alignment() {
        let mask = Mask::from_fn(20, 20, |x, y| if (8..12).contains(&x) && (8..12).contains(&y) { 1.0 } else { 0.0 });
        assert_eq!(mask.resized(40, 10).dimensions(), (40, 10));
        let grown = mask.dilated(5);
        assert!(grown.area() > mask.area());
        assert_eq!(grown.dimensions(), mask.dimensions());
    }

    #[test]
    fn feathering_softens_edges() {
        let mask = Mask::from_fn(40, 40, |x, _| if x < 20 { 1.0 } else { 0.0 });
        let soft = mask.feathered(3.0);
        let edge = soft.get(20, 20);
        assert!(edge > 0.0 && edge < 1.0, "edge weight was {edge}");
    }

    #[test]
    fn weights_length_is_validated() {
        assert!(Mask::from_weights(2, 2, vec![0.0; 3]).is_err());
        assert!(Mask::from_weights(2, 2, vec![0.0; 4]).is_ok());
    }
}
