use crate::node::Hyperplane;
use crate::simd;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normals shorter than this are treated as zero (identical centroids)
const MIN_NORMAL_LENGTH: f32 = 1e-12;

/// Distance metric of a forest.
///
/// The metric decides both how candidates are ranked and where split
/// hyperplanes are placed during build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Euclidean,
    Manhattan,
    Angular,
}

impl Metric {
    /// Distance between two vectors, as reported to callers.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => simd::squared_l2(a, b).max(0.0).sqrt(),
            Metric::Manhattan => simd::l1(a, b),
            Metric::Angular => {
                let pp = simd::dot(a, a);
                let qq = simd::dot(b, b);
                let ppqq = pp * qq;
                let cos_term = if ppqq > 0.0 {
                    2.0 - 2.0 * simd::dot(a, b) / ppqq.sqrt()
                } else {
                    2.0
                };
                cos_term.max(0.0).sqrt()
            }
        }
    }

    /// Hyperplane separating two centroids, or `None` when they coincide.
    pub fn split_plane(self, left: &[f32], right: &[f32]) -> Option<Hyperplane> {
        match self {
            Metric::Euclidean | Metric::Manhattan => {
                let normal = unit_difference(right, left)?;
                let offset = -normal
                    .iter()
                    .zip(left.iter().zip(right))
                    .map(|(n, (l, r))| n * (l + r) / 2.0)
                    .sum::<f32>();
                Some(Hyperplane::new(normal, offset))
            }
            Metric::Angular => {
                let l = unit(left)?;
                let r = unit(right)?;
                let normal = unit_difference(&r, &l)?;
                Some(Hyperplane::new(normal, 0.0))
            }
        }
    }
}

fn unit(v: &[f32]) -> Option<Vec<f32>> {
    let norm = simd::norm(v);
    if norm <= MIN_NORMAL_LENGTH || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

fn unit_difference(a: &[f32], b: &[f32]) -> Option<Vec<f32>> {
    let diff: Vec<f32> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    unit(&diff)
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Euclidean => "euclidean",
            Metric::Manhattan => "manhattan",
            Metric::Angular => "angular",
        };
        f.write_str(name)
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "manhattan" | "l1" => Ok(Metric::Manhattan),
            "angular" | "cosine" => Ok(Metric::Angular),
            other => Err(Error::InvalidArgument(format!("unknown metric '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let d = Metric::Euclidean.distance(&[1.0, 1.0], &[4.0, 5.0]);
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_manhattan_distance() {
        assert_eq!(Metric::Manhattan.distance(&[1.0, 1.0], &[4.0, 5.0]), 7.0);
    }

    #[test]
    fn test_angular_distance() {
        let same = Metric::Angular.distance(&[1.0, 0.0], &[2.0, 0.0]);
        assert!(same.abs() < 1e-3);

        let orthogonal = Metric::Angular.distance(&[1.0, 0.0], &[0.0, 3.0]);
        assert!((orthogonal - 2.0f32.sqrt()).abs() < 1e-6);

        let opposite = Metric::Angular.distance(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((opposite - 2.0).abs() < 1e-6);

        let zero = Metric::Angular.distance(&[0.0, 0.0], &[1.0, 0.0]);
        assert!((zero - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_split_plane_bisects() {
        let plane = Metric::Euclidean.split_plane(&[0.0, 0.0], &[2.0, 0.0]).unwrap();
        assert!(plane.margin(&[1.0, 5.0]).abs() < 1e-6);
        assert!(plane.margin(&[2.0, 0.0]) > 0.0);
        assert!(plane.margin(&[0.0, 0.0]) < 0.0);
    }

    #[test]
    fn test_angular_split_plane_through_origin() {
        let plane = Metric::Angular.split_plane(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert_eq!(plane.offset(), 0.0);
        assert!(plane.margin(&[0.0, 5.0]) > 0.0);
        assert!(plane.margin(&[5.0, 0.0]) < 0.0);
    }

    #[test]
    fn test_identical_centroids_have_no_plane() {
        assert!(Metric::Euclidean.split_plane(&[1.0, 1.0], &[1.0, 1.0]).is_none());
        assert!(Metric::Angular.split_plane(&[1.0, 1.0], &[2.0, 2.0]).is_none());
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("Euclidean".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert_eq!("l1".parse::<Metric>().unwrap(), Metric::Manhattan);
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Angular);
        assert!("hamming".parse::<Metric>().is_err());
    }
}
