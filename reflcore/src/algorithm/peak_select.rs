//! Peak and low-resolution range selection on detector count profiles.
//!
//! Locates the specular peak on a 1-D counts-per-pixel profile via a
//! first-derivative walk gated by the derivative RMS, and the surrounding
//! low-resolution signal region via the reciprocal derivative of the
//! normalized cumulative distribution.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};

use itertools::Itertools;
use ordered_float::OrderedFloat;
use statrs::statistics::Statistics;

use crate::data::profile::PixelProfile;
use crate::error::{SelectionError, SelectionResult};

/// Number of highest-count points entering the weighted peak-center estimate
const TOP_POINTS: usize = 5;

/// Reciprocal-derivative ratio marking the edge of the signal region
const EDGE_JUMP_RATIO: f64 = 3.0;

/// Configuration for range selection on a count profile
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Margin subtracted/added to the low-resolution range edges (default: 4)
    pub back_offset: i64,
    /// Whether to derive the primary (clocking) range from the flanks (default: false)
    pub compute_primary: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        SelectionConfig {
            back_offset: 4,
            compute_primary: false,
        }
    }
}

/// Inclusive pixel range `[min, max]`.
///
/// Ranges produced with a back offset are NOT clamped to the pixel axis and
/// may extend below 0 or beyond the last pixel; callers clamp at the point
/// of use, see [`PixelRange::clamped`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRange {
    pub min: i64,
    pub max: i64,
}

impl PixelRange {
    pub fn new(min: i64, max: i64) -> Self {
        PixelRange { min, max }
    }

    pub fn width(&self) -> i64 {
        self.max - self.min
    }

    /// Intersects the range with the axis of an `n_pixels`-wide profile.
    pub fn clamped(&self, n_pixels: usize) -> PixelRange {
        PixelRange {
            min: self.min.max(0),
            max: self.max.min(n_pixels as i64 - 1),
        }
    }

    pub fn contains(&self, pixel: i64) -> bool {
        self.min <= pixel && pixel <= self.max
    }
}

impl Display for PixelRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Mean and root-mean-square of the first derivative, as observed during a run.
///
/// The RMS is taken over the raw derivative values, not centered about the
/// mean; it is the gate used by the peak boundary walk.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DerivativeStats {
    pub mean: f64,
    pub rms: f64,
}

/// Result of one range-selection run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeakSelection {
    /// Count-weighted center of the highest points, rounded to a pixel
    pub peak_pixel: i64,
    /// Extent of the specular peak
    pub peak: PixelRange,
    /// Extent of the non-background signal region, margin applied
    pub low_res: PixelRange,
    /// Primary (clocking) range, present when requested
    pub primary: Option<PixelRange>,
    /// First-derivative statistics of the run
    pub derivative: DerivativeStats,
}

/// Selects peak and low-resolution ranges on one profile.
///
/// Each finder owns its profile and configuration; runs are independent and
/// deterministic, so finders may be used freely across threads.
pub struct PeakFinder {
    profile: PixelProfile,
    config: SelectionConfig,
}

impl PeakFinder {
    /// Creates a finder for `profile`, failing when the profile is too short
    /// to differentiate (fewer than 2 pixels).
    pub fn new(profile: PixelProfile, config: SelectionConfig) -> SelectionResult<Self> {
        if profile.len() < 2 {
            return Err(SelectionError::InvalidInput { len: profile.len() });
        }
        Ok(PeakFinder { profile, config })
    }

    pub fn profile(&self) -> &PixelProfile {
        &self.profile
    }

    /// Runs the full selection pipeline.
    ///
    /// The peak range is derived from the first derivative of the counts:
    /// the derivative extrema seed a left and a right boundary walk that
    /// move outward while the absolute derivative stays above its RMS. The
    /// low-resolution range is derived independently from the reciprocal
    /// derivative of the normalized cumulative counts, with the configured
    /// back offset applied to both edges (unclamped, see [`PixelRange`]).
    pub fn select(&self) -> SelectionResult<PeakSelection> {
        let pixel = &self.profile.pixel;
        let counts = &self.profile.counts;

        let top = top_points(pixel, counts, TOP_POINTS);
        let peak_pixel = weighted_center_pixel(&top)?;

        let (mid_x, dy) = first_derivative(pixel, counts);
        let (left_seed, right_seed) = extrema_seeds(&mid_x, &dy);
        let stats = derivative_stats(&dy);
        let peak = refine_peak_bounds(&mid_x, &dy, stats.rms, left_seed, right_seed);

        let (lower_edge, upper_edge) = low_resolution_edges(pixel, counts)?;
        let low_res = PixelRange::new(
            lower_edge - self.config.back_offset,
            upper_edge + self.config.back_offset,
        );

        log::debug!(
            "selection on {} pixels: center={}, seeds=({}, {}), derivative rms={:.4}",
            self.profile.len(),
            peak_pixel,
            left_seed,
            right_seed,
            stats.rms
        );

        let primary = if self.config.compute_primary {
            Some(self.primary_range(lower_edge, upper_edge)?)
        } else {
            None
        };

        Ok(PeakSelection {
            peak_pixel,
            peak,
            low_res,
            primary,
            derivative: stats,
        })
    }

    /// Derives the primary (clocking) range from the flanks outside the
    /// unmargined low-resolution range.
    ///
    /// Each flank is re-analyzed as an independent zero-based profile with
    /// the low-resolution step alone; the outer edges, mapped back into the
    /// parent coordinate frame, form the result. Flanks that are too short
    /// or carry no signal propagate their own errors.
    fn primary_range(&self, lower_edge: i64, upper_edge: i64) -> SelectionResult<PixelRange> {
        let n = self.profile.len();

        let left_flank = self.profile.sub_profile(0, lower_edge as usize);
        if left_flank.len() < 2 {
            return Err(SelectionError::InvalidInput {
                len: left_flank.len(),
            });
        }
        let (left_clocking, _) = low_resolution_edges(&left_flank.pixel, &left_flank.counts)?;

        // The last pixel stays out of the right flank.
        let right_flank = self.profile.sub_profile(upper_edge as usize, n - 1);
        if right_flank.len() < 2 {
            return Err(SelectionError::InvalidInput {
                len: right_flank.len(),
            });
        }
        let (_, flank_upper) = low_resolution_edges(&right_flank.pixel, &right_flank.counts)?;

        Ok(PixelRange::new(left_clocking, flank_upper + upper_edge))
    }
}

/// Returns the `n` highest-count `(pixel, count)` pairs, counts descending.
///
/// The sort is stable, so equal counts keep ascending pixel order and the
/// lowest pixel wins a tie. Profiles shorter than `n` yield all points.
pub fn top_points(pixel: &[f64], counts: &[f64], n: usize) -> Vec<(f64, f64)> {
    counts
        .iter()
        .copied()
        .enumerate()
        .sorted_by_key(|&(_, y)| std::cmp::Reverse(OrderedFloat(y)))
        .take(n)
        .map(|(i, y)| (pixel[i], y))
        .collect()
}

/// Count-weighted center of a set of `(pixel, count)` points, rounded to the
/// nearest pixel (`f64::round`, half away from zero).
pub fn weighted_center_pixel(points: &[(f64, f64)]) -> SelectionResult<i64> {
    let count_sum: f64 = points.iter().map(|&(_, y)| y).sum();
    if count_sum == 0.0 {
        return Err(SelectionError::DegenerateInput(format!(
            "sum of the {} highest counts is zero",
            points.len()
        )));
    }
    let weighted: f64 = points.iter().map(|&(x, y)| x * y).sum();
    Ok((weighted / count_sum).round() as i64)
}

/// First derivative of `counts` over `pixel`, sampled at bin midpoints.
///
/// Returns `(mid_x, dy)`, each one element shorter than the input. The
/// division keeps its general form although the pixel axis is unit-spaced.
pub fn first_derivative(pixel: &[f64], counts: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = pixel.len();
    let mut mid_x = Vec::with_capacity(n.saturating_sub(1));
    let mut dy = Vec::with_capacity(n.saturating_sub(1));
    for i in 0..n.saturating_sub(1) {
        mid_x.push((pixel[i] + pixel[i + 1]) / 2.0);
        dy.push((counts[i + 1] - counts[i]) / (pixel[i + 1] - pixel[i]));
    }
    (mid_x, dy)
}

/// Seeds the boundary walks from the derivative extrema.
///
/// The smaller of the two extremum midpoints (truncated) seeds the left
/// walk, the larger the right walk, regardless of which extremum comes
/// first spatially. Ties on equal derivative values keep the first index.
fn extrema_seeds(mid_x: &[f64], dy: &[f64]) -> (usize, usize) {
    let mut argmin = 0usize;
    let mut argmax = 0usize;
    for (i, &d) in dy.iter().enumerate() {
        if d < dy[argmin] {
            argmin = i;
        }
        if d > dy[argmax] {
            argmax = i;
        }
    }
    let a = mid_x[argmin];
    let b = mid_x[argmax];
    (a.min(b) as usize, a.max(b) as usize)
}

/// Mean and RMS of the raw derivative values.
fn derivative_stats(dy: &[f64]) -> DerivativeStats {
    DerivativeStats {
        mean: dy.iter().mean(),
        rms: dy.iter().quadratic_mean(),
    }
}

/// Walks the peak boundaries outward from the extrema seeds.
///
/// Each walk moves one pixel at a time while the absolute derivative stays
/// above `rms` and the index stays on the derivative axis; hitting the axis
/// end is not an error, the walk saturates at the last in-bounds index.
fn refine_peak_bounds(
    mid_x: &[f64],
    dy: &[f64],
    rms: f64,
    left_seed: usize,
    right_seed: usize,
) -> PixelRange {
    let mut lo = left_seed;
    while lo > 0 && dy[lo].abs() > rms {
        lo -= 1;
    }
    let mut hi = right_seed;
    while hi < dy.len() - 1 && dy[hi].abs() > rms {
        hi += 1;
    }
    PixelRange::new(mid_x[lo].floor() as i64, mid_x[hi].ceil() as i64)
}

/// Unmargined edges of the low-resolution (non-background) region.
///
/// Normalizes the cumulative counts to `[~0, 1]` and scans the reciprocal
/// derivative `Δx/Δy_int` outward from its center value; the first point on
/// each side exceeding three times the center value marks an edge.
/// Sides that never trigger default to the respective profile end. A zero
/// denominator in the reciprocal derivative yields `inf` and is accepted;
/// only a zero center value is rejected as degenerate.
pub fn low_resolution_edges(pixel: &[f64], counts: &[f64]) -> SelectionResult<(i64, i64)> {
    let n = counts.len();
    if n < 2 {
        return Err(SelectionError::InvalidInput { len: n });
    }

    // Normalized cumulative distribution
    let mut y_integrated = Vec::with_capacity(n);
    let mut acc = 0.0;
    for &c in counts {
        acc += c;
        y_integrated.push(acc);
    }
    let total = acc;
    let y_norm: Vec<f64> = y_integrated.iter().map(|v| v / total).collect();

    // Reciprocal rate of change of the distribution
    let mut deriv = Vec::with_capacity(n - 1);
    for i in 1..n {
        deriv.push((pixel[i] - pixel[i - 1]) / (y_norm[i] - y_norm[i - 1]));
    }

    let center = deriv.len() / 2;
    let middle_value = deriv[center];
    if middle_value == 0.0 {
        return Err(SelectionError::DegenerateInput(
            "center value of the cumulative derivative is zero".to_string(),
        ));
    }

    let mut i_min = 0usize;
    for i in (1..=center).rev() {
        if deriv[i] / middle_value > EDGE_JUMP_RATIO {
            i_min = i;
            break;
        }
    }

    let mut i_max = deriv.len();
    for i in center..deriv.len() {
        if deriv[i] / middle_value > EDGE_JUMP_RATIO {
            i_max = i;
            break;
        }
    }

    Ok((pixel[i_min] as i64, pixel[i_max] as i64))
}

/// Runs range selection over many profiles in parallel.
///
/// Per-profile failures stay in their slot instead of aborting the batch.
pub fn select_many(
    profiles: &[PixelProfile],
    config: &SelectionConfig,
) -> Vec<SelectionResult<PeakSelection>> {
    profiles
        .par_iter()
        .map(|p| PeakFinder::new(p.clone(), *config)?.select())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(counts: Vec<f64>) -> SelectionResult<PeakSelection> {
        PeakFinder::new(PixelProfile::new(counts), SelectionConfig::default())?.select()
    }

    fn gaussian_profile() -> Vec<f64> {
        // 1000 * exp(-(i-64)^2 / 200), rounded to whole counts
        (0..128)
            .map(|i| (1000.0 * (-((i as f64 - 64.0).powi(2)) / 200.0).exp()).round())
            .collect()
    }

    fn step_profile() -> Vec<f64> {
        let mut c = vec![10.0; 20];
        c.extend(vec![1000.0; 60]);
        c.extend(vec![10.0; 20]);
        c
    }

    #[test]
    fn test_single_spike() {
        // Flat zero except a spike at pixel 50; the four zero-count points in
        // the top five carry no weight, so the center lands on the spike
        let mut counts = vec![0.0; 100];
        counts[50] = 100.0;

        let result = select(counts).unwrap();
        assert_eq!(result.peak_pixel, 50);
        assert_eq!(result.peak, PixelRange::new(48, 52));
        assert_eq!(result.low_res, PixelRange::new(44, 54));
        assert!(result.peak.contains(50));
    }

    #[test]
    fn test_gaussian_bump() {
        let result = select(gaussian_profile()).unwrap();

        assert_eq!(result.peak_pixel, 64);
        assert!(result.peak.contains(64));
        assert!(result.low_res.contains(64));
        // The RMS gate lets the boundary walk run out to ~2 sigma on each side
        assert_eq!(result.peak, PixelRange::new(43, 85));
        assert_eq!(result.low_res, PixelRange::new(44, 82));
    }

    #[test]
    fn test_step_profile() {
        // Sharp beam edges at pixels 20 and 79
        let result = select(step_profile()).unwrap();

        assert_eq!(result.peak_pixel, 22);
        assert_eq!(result.peak, PixelRange::new(18, 81));
        assert!(result.peak.contains(30) && result.peak.contains(70));
        assert_eq!(result.low_res, PixelRange::new(14, 83));
    }

    #[test]
    fn test_all_zero_profile_is_degenerate() {
        let err = select(vec![0.0; 10]).unwrap_err();
        assert!(matches!(err, SelectionError::DegenerateInput(_)));
    }

    #[test]
    fn test_too_short_profile() {
        let err = select(vec![5.0]).unwrap_err();
        assert_eq!(err, SelectionError::InvalidInput { len: 1 });

        let err = select(vec![]).unwrap_err();
        assert_eq!(err, SelectionError::InvalidInput { len: 0 });
    }

    #[test]
    fn test_minimum_length_profile() {
        // Two points: one derivative sample, everything still computable
        let result = select(vec![5.0, 7.0]).unwrap();
        assert_eq!(result.peak, PixelRange::new(0, 1));
        // The back offset pushes the edges past the axis; that is the contract
        assert_eq!(result.low_res, PixelRange::new(-4, 5));
        assert_eq!(result.low_res.clamped(2), PixelRange::new(0, 1));
    }

    #[test]
    fn test_deterministic_across_runs() {
        let finder =
            PeakFinder::new(PixelProfile::new(gaussian_profile()), SelectionConfig::default())
                .unwrap();
        let a = finder.select().unwrap();
        let b = finder.select().unwrap();
        assert_eq!(a.peak, b.peak);
        assert_eq!(a.low_res, b.low_res);
        assert_eq!(a.peak_pixel, b.peak_pixel);
    }

    #[test]
    fn test_back_offset_widens_symmetrically() {
        let profile = PixelProfile::new(step_profile());
        let zero = PeakFinder::new(
            profile.clone(),
            SelectionConfig {
                back_offset: 0,
                ..Default::default()
            },
        )
        .unwrap()
        .select()
        .unwrap();
        let seven = PeakFinder::new(
            profile,
            SelectionConfig {
                back_offset: 7,
                ..Default::default()
            },
        )
        .unwrap()
        .select()
        .unwrap();

        assert_eq!(zero.low_res, PixelRange::new(18, 79));
        assert_eq!(seven.low_res.min, zero.low_res.min - 7);
        assert_eq!(seven.low_res.max, zero.low_res.max + 7);
        assert_eq!(seven.low_res.width(), zero.low_res.width() + 14);
    }

    #[test]
    fn test_tie_order_keeps_lowest_pixels() {
        // Six equal maxima; the stable ranking keeps pixels 1..=5, so the
        // weighted center is their plain average
        let counts = vec![0.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 0.0];
        let result = select(counts).unwrap();
        assert_eq!(result.peak_pixel, 3);
    }

    #[test]
    fn test_top_points_short_profile() {
        let pixel = vec![0.0, 1.0, 2.0];
        let counts = vec![1.0, 9.0, 4.0];
        let top = top_points(&pixel, &counts, 5);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0], (1.0, 9.0));
        assert_eq!(top[1], (2.0, 4.0));
    }

    #[test]
    fn test_first_derivative_lengths() {
        let pixel = vec![0.0, 1.0, 2.0, 3.0];
        let counts = vec![1.0, 4.0, 2.0, 2.0];
        let (mid_x, dy) = first_derivative(&pixel, &counts);
        assert_eq!(mid_x, vec![0.5, 1.5, 2.5]);
        assert_eq!(dy, vec![3.0, -2.0, 0.0]);
    }

    #[test]
    fn test_primary_range_on_step() {
        let result = PeakFinder::new(
            PixelProfile::new(step_profile()),
            SelectionConfig {
                back_offset: 0,
                compute_primary: true,
            },
        )
        .unwrap()
        .select()
        .unwrap();

        // Flat flanks never trigger the edge ratio, so each flank saturates
        // at its own profile end; the right flank excludes the last pixel
        assert_eq!(result.low_res, PixelRange::new(18, 79));
        assert_eq!(result.primary, Some(PixelRange::new(0, 98)));
    }

    #[test]
    fn test_primary_range_fails_on_empty_flank() {
        // Monotonically falling counts put the lower low-res edge at pixel 0,
        // leaving no left flank to analyze
        let counts: Vec<f64> = (0..40).map(|i| ((60 - i) * (60 - i)) as f64).collect();
        let pixel: Vec<f64> = (0..40).map(|i| i as f64).collect();
        assert_eq!(low_resolution_edges(&pixel, &counts).unwrap().0, 0);

        let err = PeakFinder::new(
            PixelProfile::new(counts),
            SelectionConfig {
                back_offset: 0,
                compute_primary: true,
            },
        )
        .unwrap()
        .select()
        .unwrap_err();
        assert!(matches!(err, SelectionError::InvalidInput { .. }));
    }

    #[test]
    fn test_select_many_keeps_errors_in_slot() {
        let profiles = vec![
            PixelProfile::new(step_profile()),
            PixelProfile::new(vec![1.0]),
            PixelProfile::new(gaussian_profile()),
        ];
        let results = select_many(&profiles, &SelectionConfig::default());

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().unwrap_err(),
            &SelectionError::InvalidInput { len: 1 }
        );
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_randomized_invariants() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let n = rng.gen_range(2..120);
            let counts: Vec<f64> = (0..n).map(|_| rng.gen_range(0..50) as f64).collect();
            let top_sum: f64 = top_points(
                &(0..n).map(|i| i as f64).collect::<Vec<_>>(),
                &counts,
                TOP_POINTS,
            )
            .iter()
            .map(|&(_, y)| y)
            .sum();
            if top_sum == 0.0 {
                continue;
            }

            let result = select(counts).unwrap();
            let last = n as i64 - 1;
            assert!(result.peak.min <= result.peak.max);
            assert!(result.peak.min >= 0 && result.peak.max <= last);
            assert!(result.low_res.min <= result.low_res.max);
        }
    }
}
