//! Goodness of fit: Kolmogorov-Smirnov statistic, Lilliefors variant
//!
//! The reference distribution takes its mean and standard deviation from the
//! same samples it is compared against. The D statistic is reported next to
//! the latency figures as a diagnostic and never filters them.

use std::f64::consts::SQRT_2;

use serde::Serialize;

use crate::stats::accumulator::LogTransform;
use crate::stats::online::OnlineMoments;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Hypothesis {
    Normal,
    LogNormal,
}

/// Complementary error function, Chebyshev fit with fractional error below
/// 1.2e-7 everywhere.
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

pub fn erf(x: f64) -> f64 {
    1.0 - erfc(x)
}

/// Normal CDF at `x` for mean `mu` and standard deviation `sigma`.
pub fn normal_cdf(x: f64, mu: f64, sigma: f64) -> f64 {
    0.5 * erfc(-(x - mu) / (sigma * SQRT_2))
}

/// KS distance between the samples and the fitted `hypothesis`.
///
/// Empty input, a single sample and zero spread all give 0.0.
pub fn ks_statistic(samples: &[f64], hypothesis: Hypothesis) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }

    let mut data: Vec<f64> = match hypothesis {
        Hypothesis::Normal => samples.to_vec(),
        Hypothesis::LogNormal => {
            let transform = LogTransform::for_samples(samples);
            samples.iter().map(|&x| transform.forward(x)).collect()
        }
    };

    let mut moments = OnlineMoments::new();
    moments.extend(data.iter().copied());
    let mu = moments.mean();
    let sigma = moments.sample_variance().unwrap_or(0.0).sqrt();
    if !(sigma > 0.0 && sigma.is_finite() && mu.is_finite()) {
        return 0.0;
    }

    data.sort_by(f64::total_cmp);

    let n = data.len() as f64;
    let d = data
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let cdf = normal_cdf(x, mu, sigma);
            let below = (cdf - i as f64 / n).abs();
            let above = (cdf - (i + 1) as f64 / n).abs();
            below.max(above)
        })
        .fold(0.0, f64::max);

    d.clamp(0.0, 1.0)
}
