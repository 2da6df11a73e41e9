//! Planar homography estimation (normalised DLT) and perspective warping.

use image::Rgb;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};

use crate::error::{PipelineError, Result};
use crate::frame::{Frame, Point2};

/// Ratio between the smaller and larger spread of a point cloud below which
/// the points are treated as collinear.
const COLLINEARITY_EPS: f64 = 1e-6;
const SCALE_EPS: f64 = 1e-9;

/// Estimate the 3x3 homography mapping each `src[i]` onto `dst[i]`.
///
/// Least-squares over all correspondences. Fewer than four points, collinear
/// point sets and singular solutions yield [`PipelineError::GeometryDegenerate`].
pub fn estimate_homography(src: &[Point2], dst: &[Point2]) -> Result<Matrix3<f64>> {
    if src.len() != dst.len() {
        return Err(PipelineError::geometry(format!(
            "correspondence count mismatch: {} vs {}",
            src.len(),
            dst.len()
        )));
    }
    if src.len() < 4 {
        return Err(PipelineError::geometry(format!(
            "homography needs at least 4 points, got {}",
            src.len()
        )));
    }

    let t_src = normalising_transform(src)?;
    let t_dst = normalising_transform(dst)?;

    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let p = t_src * Vector3::new(s.x as f64, s.y as f64, 1.0);
        let q = t_dst * Vector3::new(d.x as f64, d.y as f64, 1.0);
        let (x, y) = (p.x, p.y);
        let (u, v) = (q.x, q.y);

        let r = 2 * i;
        a[(r, 0)] = -x;
        a[(r, 1)] = -y;
        a[(r, 2)] = -1.0;
        a[(r, 6)] = u * x;
        a[(r, 7)] = u * y;
        a[(r, 8)] = u;

        a[(r + 1, 3)] = -x;
        a[(r + 1, 4)] = -y;
        a[(r + 1, 5)] = -1.0;
        a[(r + 1, 6)] = v * x;
        a[(r + 1, 7)] = v * y;
        a[(r + 1, 8)] = v;
    }

    // Null vector of A = eigenvector of AᵀA with the smallest eigenvalue.
    let ata = a.transpose() * &a;
    let eigen = SymmetricEigen::new(ata);
    let smallest = eigen.eigenvalues.imin();
    let h = eigen.eigenvectors.column(smallest);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| PipelineError::geometry("destination normalisation is singular"))?;
    let mut hom = t_dst_inv * h_norm * t_src;

    let scale = hom[(2, 2)];
    if !scale.is_finite() || scale.abs() < SCALE_EPS {
        return Err(PipelineError::geometry("homography is not normalisable"));
    }
    hom /= scale;

    let det = hom.determinant();
    if !det.is_finite() || det.abs() < SCALE_EPS {
        return Err(PipelineError::geometry(format!(
            "homography is singular (det = {det:e})"
        )));
    }
    Ok(hom)
}

/// Apply `h` to a point. `None` if the point maps to infinity.
pub fn project(h: &Matrix3<f64>, p: Point2) -> Option<Point2> {
    let v = h * Vector3::new(p.x as f64, p.y as f64, 1.0);
    if v.z.abs() < SCALE_EPS {
        return None;
    }
    Some(Point2::new((v.x / v.z) as f32, (v.y / v.z) as f32))
}

/// Warp `source` through `h` into a `width x height` canvas. Pixels with no
/// source sample are black.
pub fn warp_perspective(source: &Frame, h: &Matrix3<f64>, width: u32, height: u32) -> Result<Frame> {
    let mut matrix = [0f32; 9];
    for row in 0..3 {
        for col in 0..3 {
            matrix[row * 3 + col] = h[(row, col)] as f32;
        }
    }
    let projection = Projection::from_matrix(matrix)
        .ok_or_else(|| PipelineError::geometry("homography is not invertible"))?;

    let mut output = Frame::new(width, height);
    warp_into(
        source,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut output,
    );
    Ok(output)
}

/// Similarity transform moving the centroid to the origin with mean distance √2.
fn normalising_transform(points: &[Point2]) -> Result<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / n;

    let (mut sxx, mut syy, mut sxy, mut dist) = (0.0, 0.0, 0.0, 0.0);
    for p in points {
        let dx = p.x as f64 - cx;
        let dy = p.y as f64 - cy;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
        dist += (dx * dx + dy * dy).sqrt();
    }
    let mean_dist = dist / n;
    if mean_dist < SCALE_EPS {
        return Err(PipelineError::geometry("all points coincide"));
    }

    // Eigenvalues of the 2x2 scatter matrix.
    let trace = sxx + syy;
    let disc = ((sxx - syy).powi(2) + 4.0 * sxy * sxy).sqrt();
    let major = (trace + disc) / 2.0;
    let minor = (trace - disc) / 2.0;
    if major <= 0.0 || minor / major < COLLINEARITY_EPS {
        return Err(PipelineError::geometry("points are collinear"));
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    Ok(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}
