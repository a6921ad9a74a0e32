//! Finite-difference kinematics and small statistics helpers shared by the
//! quality analyzer and the anomaly detector.

use crate::trajectory::TrajectoryPoint;

/// Non-positive time deltas are clamped to this many seconds.
pub const MIN_TIME_DELTA: f64 = 1e-6;

/// Per-segment time deltas (`len = n - 1`), clamped to [`MIN_TIME_DELTA`].
///
/// Duplicate or out-of-order timestamps are tolerated here rather than
/// rejected; they only inflate the derivative at that segment.
pub fn time_deltas(points: &[TrajectoryPoint]) -> Vec<f64> {
    points
        .windows(2)
        .map(|w| {
            let dt = w[1].timestamp - w[0].timestamp;
            if dt > 0.0 {
                dt
            } else {
                MIN_TIME_DELTA
            }
        })
        .collect()
}

/// First-order finite difference: `out[i] = (v[i+1] - v[i]) / deltas[i]`.
///
/// `deltas` must hold at least `values.len() - 1` entries; callers pass the
/// tail of the segment deltas for higher-order derivatives.
pub fn differentiate(values: &[Vec<f64>], deltas: &[f64]) -> Vec<Vec<f64>> {
    values
        .windows(2)
        .zip(deltas)
        .map(|(w, &dt)| w[1].iter().zip(&w[0]).map(|(b, a)| (b - a) / dt).collect())
        .collect()
}

/// Euclidean norm.
pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Euclidean distance between two equally sized vectors.
pub fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

/// Dot product of two equally sized vectors.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Arithmetic mean; `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; `0.0` for an empty slice.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Root mean square of a set of magnitudes; `0.0` for an empty slice.
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

/// Joint-space velocity vectors of every segment (`len = n - 1`).
pub fn velocities(points: &[TrajectoryPoint], deltas: &[f64]) -> Vec<Vec<f64>> {
    let positions: Vec<Vec<f64>> = points.iter().map(|p| p.joint_positions.clone()).collect();
    differentiate(&positions, deltas)
}

/// Velocity magnitude of every segment (`len = n - 1`).
pub fn velocity_magnitudes(points: &[TrajectoryPoint]) -> Vec<f64> {
    let dt = time_deltas(points);
    velocities(points, &dt).iter().map(|v| norm(v)).collect()
}

/// Maximal runs of consecutive indices where `predicate` holds, as
/// half-open `(start, end)` pairs.
pub fn runs_where<F>(values: &[f64], predicate: F) -> Vec<(usize, usize)>
where
    F: Fn(f64) -> bool,
{
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;

    for (i, &v) in values.iter().enumerate() {
        match (predicate(v), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, values.len()));
    }
    runs
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::tests::point;

    #[test]
    fn time_deltas_clamp_non_positive() {
        let pts = vec![
            point(0.0, 0, &[0.0]),
            point(0.1, 1, &[0.0]),
            point(0.1, 2, &[0.0]),
            point(0.05, 3, &[0.0]),
        ];
        let dt = time_deltas(&pts);
        assert_eq!(dt.len(), 3);
        assert!((dt[0] - 0.1).abs() < 1e-12);
        assert_eq!(dt[1], MIN_TIME_DELTA);
        assert_eq!(dt[2], MIN_TIME_DELTA);
    }

    #[test]
    fn differentiate_divides_by_delta() {
        let values = vec![vec![0.0, 0.0], vec![1.0, 2.0], vec![3.0, 2.0]];
        let out = differentiate(&values, &[0.5, 2.0]);
        assert_eq!(out, vec![vec![2.0, 4.0], vec![1.0, 0.0]]);
    }

    #[test]
    fn differentiate_short_input_is_empty() {
        assert!(differentiate(&[vec![1.0]], &[]).is_empty());
    }

    #[test]
    fn statistics_of_known_values() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&v) - 5.0).abs() < 1e-12);
        assert!((std_dev(&v) - 2.0).abs() < 1e-12);
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[]), 0.0);
        assert!((rms(&[3.0, 4.0]) - (12.5f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn runs_where_finds_maximal_runs() {
        let v = [0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        assert_eq!(runs_where(&v, |x| x < 0.5), vec![(0, 2), (3, 4), (5, 8)]);
        assert!(runs_where(&[], |x| x < 0.5).is_empty());
    }

    #[test]
    fn velocity_magnitudes_of_diagonal_motion() {
        let pts = vec![point(0.0, 0, &[0.0, 0.0]), point(1.0, 1, &[3.0, 4.0])];
        assert_eq!(velocity_magnitudes(&pts), vec![5.0]);
    }
}
