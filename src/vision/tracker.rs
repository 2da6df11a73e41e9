//! Session-scoped face landmark tracking and face swapping.

use super::types::LandmarkModel;
use crate::composite::{blend_by_mask, estimate_homography, warp_perspective, BlendMode};
use crate::error::Result;
use crate::frame::{Frame, LandmarkSet, Mask};

/// Weight of the new observation in the exponential smoothing update.
pub const SMOOTHING_ALPHA: f32 = 0.7;

/// Face mesh indices tracing the face outline, in polygon order.
pub const FACE_OVAL: [usize; 36] = [
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
];

/// Gaussian sigma used to feather the outline mask.
const FEATHER_SIGMA: f32 = 10.0;

/// Why a swap left the target frame untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum DegradeReason {
    /// No face could be found in the reference frame yet.
    NoReference,
    NoFaceInTarget,
    /// The landmark model itself errored.
    Model(String),
    /// Homography, warp or mask construction failed.
    Geometry(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwapOutcome {
    Swapped(Frame),
    Degraded { frame: Frame, reason: DegradeReason },
}

impl SwapOutcome {
    pub fn frame(&self) -> &Frame {
        match self {
            SwapOutcome::Swapped(frame) => frame,
            SwapOutcome::Degraded { frame, .. } => frame,
        }
    }

    pub fn into_frame(self) -> Frame {
        match self {
            SwapOutcome::Swapped(frame) => frame,
            SwapOutcome::Degraded { frame, .. } => frame,
        }
    }

    pub fn is_swapped(&self) -> bool {
        matches!(self, SwapOutcome::Swapped(_))
    }
}

/// Landmark tracker holding one smoothed "live" set and one cached reference set.
pub struct FaceLandmarkTracker<M: LandmarkModel> {
    model: M,
    alpha: f32,
    outline: Vec<usize>,
    feather_sigma: f32,
    previous: Option<LandmarkSet>,
    reference: Option<LandmarkSet>,
}

impl<M: LandmarkModel> FaceLandmarkTracker<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            alpha: SMOOTHING_ALPHA,
            outline: FACE_OVAL.to_vec(),
            feather_sigma: FEATHER_SIGMA,
            previous: None,
            reference: None,
        }
    }

    /// Use a different outline topology (for models other than the 468-point mesh).
    pub fn with_outline(mut self, outline: Vec<usize>) -> Self {
        self.outline = outline;
        self
    }

    pub fn with_feather_sigma(mut self, sigma: f32) -> Self {
        self.feather_sigma = sigma;
        self
    }

    pub fn previous_landmarks(&self) -> Option<&LandmarkSet> {
        self.previous.as_ref()
    }

    pub fn reference_landmarks(&self) -> Option<&LandmarkSet> {
        self.reference.as_ref()
    }

    /// Forget the cached reference so the next swap recaptures it.
    pub fn reset_reference(&mut self) {
        tracing::info!("Reference landmarks cleared");
        self.reference = None;
    }

    /// Run the model and smooth against the previous frame.
    ///
    /// No face leaves the tracker state untouched and returns `None`.
    pub fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>> {
        let Some(raw) = self.model.landmarks(frame)? else {
            return Ok(None);
        };
        let smoothed = match &self.previous {
            Some(previous) => raw.smoothed(previous, self.alpha),
            None => raw,
        };
        self.previous = Some(smoothed.clone());
        Ok(Some(smoothed))
    }

    /// Paste the reference face onto the face in `target`.
    ///
    /// Never fails: any missing input or geometry problem returns the target
    /// frame unchanged, tagged with the reason.
    pub fn swap(&mut self, reference_frame: &Frame, target: Frame) -> SwapOutcome {
        if self.reference.is_none() {
            // Reference is measured raw on the full frame so it never mixes
            // with the live track, and the live track restarts afterwards
            self.model.reset_tracking();
            let measured = self.model.landmarks(reference_frame);
            self.model.reset_tracking();
            match measured {
                Ok(Some(landmarks)) => {
                    tracing::info!("Captured reference landmarks ({} points)", landmarks.len());
                    self.reference = Some(landmarks);
                }
                Ok(None) => {
                    return SwapOutcome::Degraded {
                        frame: target,
                        reason: DegradeReason::NoReference,
                    }
                }
                Err(e) => {
                    return SwapOutcome::Degraded {
                        frame: target,
                        reason: DegradeReason::Model(e.to_string()),
                    }
                }
            }
        }

        let live = match self.detect(&target) {
            Ok(Some(live)) => live,
            Ok(None) => {
                return SwapOutcome::Degraded {
                    frame: target,
                    reason: DegradeReason::NoFaceInTarget,
                }
            }
            Err(e) => {
                return SwapOutcome::Degraded {
                    frame: target,
                    reason: DegradeReason::Model(e.to_string()),
                }
            }
        };

        let Some(reference) = self.reference.as_ref() else {
            return SwapOutcome::Degraded {
                frame: target,
                reason: DegradeReason::NoReference,
            };
        };

        match self.composite(reference_frame, reference, &live, &target) {
            Ok(frame) => SwapOutcome::Swapped(frame),
            Err(e) => {
                tracing::debug!("Face swap degraded: {}", e);
                SwapOutcome::Degraded {
                    frame: target,
                    reason: DegradeReason::Geometry(e.to_string()),
                }
            }
        }
    }

    fn composite(
        &self,
        reference_frame: &Frame,
        reference: &LandmarkSet,
        live: &LandmarkSet,
        target: &Frame,
    ) -> Result<Frame> {
        let _span = tracing::debug_span!("face_swap").entered();

        let outline_len = self.outline.len();
        let src = reference.select(&self.outline).ok_or_else(|| {
            crate::error::PipelineError::geometry(format!(
                "reference has {} landmarks, outline needs {}",
                reference.len(),
                outline_len
            ))
        })?;
        let dst = live.select(&self.outline).ok_or_else(|| {
            crate::error::PipelineError::geometry(format!(
                "live set has {} landmarks, outline needs {}",
                live.len(),
                outline_len
            ))
        })?;

        let (width, height) = target.dimensions();
        let homography = estimate_homography(&src, &dst)?;
        let warped = warp_perspective(reference_frame, &homography, width, height)?;
        let mask = Mask::from_polygon(width, height, &dst)?.feathered(self.feather_sigma);

        blend_by_mask(target, &warped, &mask, BlendMode::Alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::frame::Point2;
    use image::Rgb;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Replays a fixed script of model answers.
    struct ScriptedModel {
        answers: VecDeque<Result<Option<LandmarkSet>>>,
    }

    impl ScriptedModel {
        fn new(answers: Vec<Result<Option<LandmarkSet>>>) -> Self {
            Self {
                answers: answers.into(),
            }
        }
    }

    impl LandmarkModel for ScriptedModel {
        fn landmarks(&mut self, _frame: &Frame) -> Result<Option<LandmarkSet>> {
            self.answers.pop_front().unwrap_or(Ok(None))
        }

        fn input_size(&self) -> (u32, u32) {
            (192, 192)
        }
    }

    fn single(x: f32, y: f32) -> LandmarkSet {
        LandmarkSet::new(vec![Point2::new(x, y)])
    }

    /// 468 points with the outline on a circle of `radius` around (cx, cy).
    fn face(cx: f32, cy: f32, radius: f32) -> LandmarkSet {
        let mut points = vec![Point2::new(cx, cy); 468];
        for (i, &idx) in FACE_OVAL.iter().enumerate() {
            let t = i as f32 / FACE_OVAL.len() as f32 * std::f32::consts::TAU;
            points[idx] = Point2::new(cx + radius * t.cos(), cy + radius * t.sin());
        }
        LandmarkSet::new(points)
    }

    fn solid(value: u8) -> Frame {
        Frame::from_pixel(100, 100, Rgb([value, value, value]))
    }

    #[test]
    fn first_detection_is_raw_then_smoothed() {
        let model = ScriptedModel::new(vec![Ok(Some(single(0.0, 0.0))), Ok(Some(single(10.0, 10.0)))]);
        let mut tracker = FaceLandmarkTracker::new(model);

        let first = tracker.detect(&solid(0)).unwrap().unwrap();
        assert_eq!(first.points()[0], Point2::new(0.0, 0.0));

        let second = tracker.detect(&solid(0)).unwrap().unwrap();
        let p = second.points()[0];
        assert!((p.x - 7.0).abs() < 1e-5 && (p.y - 7.0).abs() < 1e-5);
        assert_eq!(tracker.previous_landmarks(), Some(&second));
    }

    #[test]
    fn missing_face_keeps_previous_state() {
        let model = ScriptedModel::new(vec![Ok(Some(single(4.0, 4.0))), Ok(None)]);
        let mut tracker = FaceLandmarkTracker::new(model);
        tracker.detect(&solid(0)).unwrap();
        assert!(tracker.detect(&solid(0)).unwrap().is_none());
        assert_eq!(tracker.previous_landmarks(), Some(&single(4.0, 4.0)));
    }

    #[test]
    fn no_reference_returns_target_unchanged() {
        let mut tracker = FaceLandmarkTracker::new(ScriptedModel::new(vec![Ok(None)]));
        let target = Frame::from_fn(100, 100, |x, y| Rgb([x as u8, y as u8, 3]));
        let outcome = tracker.swap(&solid(255), target.clone());
        assert_eq!(outcome.frame(), &target);
        assert!(matches!(
            outcome,
            SwapOutcome::Degraded {
                reason: DegradeReason::NoReference,
                ..
            }
        ));
        assert!(tracker.reference_landmarks().is_none());
    }

    #[test]
    fn no_face_in_target_returns_target_unchanged() {
        let model = ScriptedModel::new(vec![Ok(Some(face(50.0, 50.0, 30.0))), Ok(None)]);
        let mut tracker = FaceLandmarkTracker::new(model);
        let target = Frame::from_fn(100, 100, |x, y| Rgb([y as u8, x as u8, 9]));
        let outcome = tracker.swap(&solid(255), target.clone());
        assert_eq!(outcome.into_frame(), target);
        assert!(tracker.reference_landmarks().is_some());
    }

    #[test]
    fn model_error_is_reported_not_raised() {
        let model = ScriptedModel::new(vec![Err(PipelineError::model_unavailable("bad tensor"))]);
        let mut tracker = FaceLandmarkTracker::new(model);
        let outcome = tracker.swap(&solid(255), solid(0));
        assert!(matches!(
            outcome,
            SwapOutcome::Degraded {
                reason: DegradeReason::Model(_),
                ..
            }
        ));
    }

    #[test]
    fn swap_pastes_reference_inside_outline() {
        let model = ScriptedModel::new(vec![
            Ok(Some(face(50.0, 50.0, 30.0))),
            Ok(Some(face(50.0, 50.0, 30.0))),
        ]);
        let mut tracker = FaceLandmarkTracker::new(model);
        let outcome = tracker.swap(&solid(255), solid(0));
        assert!(outcome.is_swapped());

        let frame = outcome.into_frame();
        assert_eq!(frame.dimensions(), (100, 100));
        assert!(frame.get_pixel(50, 50)[0] > 240);
        assert_eq!(frame.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn collinear_outline_degrades_to_target() {
        let mut line = vec![Point2::new(0.0, 0.0); 468];
        for (i, &idx) in FACE_OVAL.iter().enumerate() {
            line[idx] = Point2::new(i as f32 * 2.0, i as f32);
        }
        let line = LandmarkSet::new(line);
        let model = ScriptedModel::new(vec![Ok(Some(line.clone())), Ok(Some(line))]);
        let mut tracker = FaceLandmarkTracker::new(model);
        let target = solid(17);
        let outcome = tracker.swap(&solid(255), target.clone());
        assert_eq!(outcome.frame(), &target);
        assert!(matches!(
            outcome,
            SwapOutcome::Degraded {
                reason: DegradeReason::Geometry(_),
                ..
            }
        ));
    }

    #[test]
    fn reset_reference_forces_recapture() {
        let model = ScriptedModel::new(vec![
            Ok(Some(face(50.0, 50.0, 30.0))),
            Ok(None),
            Ok(Some(face(40.0, 40.0, 20.0))),
            Ok(None),
        ]);
        let mut tracker = FaceLandmarkTracker::new(model);
        tracker.swap(&solid(255), solid(0));
        assert_eq!(tracker.reference_landmarks(), Some(&face(50.0, 50.0, 30.0)));

        tracker.reset_reference();
        tracker.swap(&solid(255), solid(0));
        assert_eq!(tracker.reference_landmarks(), Some(&face(40.0, 40.0, 20.0)));
    }

    /// Crops to the region of its last frame, like a real face mesh, and logs
    /// the region each call started from (`None` = full frame).
    struct RegionModel {
        region: Option<u8>,
        log: Rc<RefCell<Vec<Option<u8>>>>,
    }

    impl LandmarkModel for RegionModel {
        fn landmarks(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>> {
            self.log.borrow_mut().push(self.region);
            self.region = Some(frame.get_pixel(0, 0)[0]);
            Ok(Some(face(50.0, 50.0, 30.0)))
        }

        fn input_size(&self) -> (u32, u32) {
            (192, 192)
        }

        fn reset_tracking(&mut self) {
            self.region = None;
        }
    }

    #[test]
    fn reference_is_measured_from_the_full_frame() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let model = RegionModel {
            region: Some(99),
            log: Rc::clone(&log),
        };
        let mut tracker = FaceLandmarkTracker::new(model);

        tracker.swap(&solid(255), solid(0));
        tracker.swap(&solid(255), solid(0));
        tracker.reset_reference();
        tracker.swap(&solid(255), solid(0));

        // reference, target, target (tracked), reference, target
        assert_eq!(*log.borrow(), vec![None, None, Some(0), None, None]);
    }
}
