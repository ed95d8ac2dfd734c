// Distance kernels used by the tree builder and the search engine.
// AVX2/FMA on x86_64 when the CPU supports it, unrolled scalar code elsewhere.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

// Below this length the AVX2 setup costs more than it saves
#[cfg(target_arch = "x86_64")]
const MIN_DIM_AVX: usize = 32;

#[cfg(target_arch = "x86_64")]
#[inline]
fn has_avx2(len: usize) -> bool {
    len >= MIN_DIM_AVX && is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
}

/// Dot product of two equal-length slices.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2(a.len()) {
            return unsafe { dot_avx2(a, b) };
        }
    }

    dot_scalar(a, b)
}

/// Squared Euclidean distance.
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2(a.len()) {
            return unsafe { squared_l2_avx2(a, b) };
        }
    }

    squared_l2_scalar(a, b)
}

/// Manhattan (L1) distance.
#[inline]
pub fn l1(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

#[inline]
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Horizontal sum of an AVX register.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn hsum256(v: __m256) -> f32 {
    let high = _mm256_extractf128_ps(v, 1);
    let low = _mm256_castps256_ps128(v);
    let mut sum = _mm_add_ps(high, low);
    sum = _mm_hadd_ps(sum, sum);
    sum = _mm_hadd_ps(sum, sum);
    _mm_cvtss_f32(sum)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
    let dim = a.len();
    let mut i = 0;
    let mut acc1 = _mm256_setzero_ps();
    let mut acc2 = _mm256_setzero_ps();

    while i + 16 <= dim {
        let x1 = _mm256_loadu_ps(a.as_ptr().add(i));
        let y1 = _mm256_loadu_ps(b.as_ptr().add(i));
        let x2 = _mm256_loadu_ps(a.as_ptr().add(i + 8));
        let y2 = _mm256_loadu_ps(b.as_ptr().add(i + 8));
        acc1 = _mm256_fmadd_ps(x1, y1, acc1);
        acc2 = _mm256_fmadd_ps(x2, y2, acc2);
        i += 16;
    }

    let mut total = hsum256(_mm256_add_ps(acc1, acc2));
    while i < dim {
        total += a[i] * b[i];
        i += 1;
    }
    total
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
unsafe fn squared_l2_avx2(a: &[f32], b: &[f32]) -> f32 {
    let dim = a.len();
    let mut i = 0;
    let mut acc1 = _mm256_setzero_ps();
    let mut acc2 = _mm256_setzero_ps();

    while i + 16 <= dim {
        let d1 = _mm256_sub_ps(
            _mm256_loadu_ps(a.as_ptr().add(i)),
            _mm256_loadu_ps(b.as_ptr().add(i)),
        );
        let d2 = _mm256_sub_ps(
            _mm256_loadu_ps(a.as_ptr().add(i + 8)),
            _mm256_loadu_ps(b.as_ptr().add(i + 8)),
        );
        acc1 = _mm256_fmadd_ps(d1, d1, acc1);
        acc2 = _mm256_fmadd_ps(d2, d2, acc2);
        i += 16;
    }

    let mut total = hsum256(_mm256_add_ps(acc1, acc2));
    while i < dim {
        let d = a[i] - b[i];
        total += d * d;
        i += 1;
    }
    total
}

// Two accumulators keep the FP pipeline busy
#[inline]
fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    let mut even = 0.0f32;
    let mut odd = 0.0f32;

    let chunks = a.chunks_exact(4).zip(b.chunks_exact(4));
    for (x, y) in chunks {
        even += x[0] * y[0] + x[1] * y[1];
        odd += x[2] * y[2] + x[3] * y[3];
    }

    let tail = a.len() - a.len() % 4;
    for i in tail..a.len() {
        even += a[i] * b[i];
    }

    even + odd
}

#[inline]
fn squared_l2_scalar(a: &[f32], b: &[f32]) -> f32 {
    let mut even = 0.0f32;
    let mut odd = 0.0f32;

    let chunks = a.chunks_exact(4).zip(b.chunks_exact(4));
    for (x, y) in chunks {
        let (d0, d1, d2, d3) = (x[0] - y[0], x[1] - y[1], x[2] - y[2], x[3] - y[3]);
        even += d0 * d0 + d1 * d1;
        odd += d2 * d2 + d3 * d3;
    }

    let tail = a.len() - a.len() % 4;
    for i in tail..a.len() {
        let d = a[i] - b[i];
        even += d * d;
    }

    even + odd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_dot_matches_naive_across_lengths() {
        for len in [0, 1, 3, 4, 7, 16, 31, 32, 33, 64, 100] {
            let a: Vec<f32> = (0..len).map(|i| i as f32 * 0.5 - 3.0).collect();
            let b: Vec<f32> = (0..len).map(|i| 1.0 - i as f32 * 0.25).collect();
            let expected = naive_dot(&a, &b);
            assert!((dot(&a, &b) - expected).abs() <= 1e-3 * expected.abs().max(1.0));
        }
    }

    #[test]
    fn test_squared_l2() {
        assert_eq!(squared_l2(&[0.0, 0.0], &[3.0, 4.0]), 25.0);

        let a = vec![1.0f32; 40];
        let b = vec![3.0f32; 40];
        assert!((squared_l2(&a, &b) - 160.0).abs() < 1e-3);
    }

    #[test]
    fn test_l1_and_norm() {
        assert_eq!(l1(&[1.0, -2.0], &[4.0, 2.0]), 7.0);
        assert!((norm(&[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }
}
