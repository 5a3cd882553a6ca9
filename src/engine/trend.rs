use std::collections::BTreeSet;

use serde::Serialize;

use super::error::EngineError;
use super::series::IndicatorSeries;

const BETA_MAX_ITERATIONS: usize = 300;
const BETA_EPSILON: f64 = 3.0e-14;
const BETA_FLOOR: f64 = 1.0e-300;
const QUANTILE_BISECTION_STEPS: usize = 200;

/// Ordinary least squares fit of value on year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearTrend {
    pub slope: f64,
    pub intercept: f64,
    pub observations: usize,
    pub mean_year: f64,
    pub mean_value: f64,
    pub year_sum_of_squares: f64,
    /// `None` with exactly two points: the fit is exact and has no residual
    /// degrees of freedom.
    pub residual_std_error: Option<f64>,
    pub last_year: i32,
    pub last_value: f64,
}

pub fn fit_trend(series: &IndicatorSeries) -> Result<LinearTrend, EngineError> {
    let distinct_years = series
        .points
        .iter()
        .map(|point| point.year)
        .collect::<BTreeSet<i32>>();
    let insufficient = || EngineError::InsufficientData {
        indicator_code: series.indicator_code.clone(),
        distinct_years: distinct_years.len(),
    };
    if distinct_years.len() < 2 {
        return Err(insufficient());
    }
    let last_year = *distinct_years.iter().next_back().ok_or_else(insufficient)?;
    let last_value = series
        .points
        .iter()
        .rev()
        .find(|point| point.year == last_year)
        .map(|point| point.value)
        .ok_or_else(insufficient)?;

    let n = series.points.len() as f64;
    let mean_year = series.points.iter().map(|p| f64::from(p.year)).sum::<f64>() / n;
    let mean_value = series.points.iter().map(|p| p.value).sum::<f64>() / n;

    let mut sxx = 0.0_f64;
    let mut sxy = 0.0_f64;
    for point in &series.points {
        let dx = f64::from(point.year) - mean_year;
        sxx += dx * dx;
        sxy += dx * (point.value - mean_value);
    }

    let slope = sxy / sxx;
    let intercept = mean_value - slope * mean_year;

    let residual_std_error = if series.points.len() > 2 {
        let sse = series
            .points
            .iter()
            .map(|point| {
                let fitted = mean_value + slope * (f64::from(point.year) - mean_year);
                (point.value - fitted).powi(2)
            })
            .sum::<f64>();
        Some((sse / (n - 2.0)).sqrt())
    } else {
        None
    };

    Ok(LinearTrend {
        slope,
        intercept,
        observations: series.points.len(),
        mean_year,
        mean_value,
        year_sum_of_squares: sxx,
        residual_std_error,
        last_year,
        last_value,
    })
}

impl LinearTrend {
    pub fn value_at(&self, year: i32) -> f64 {
        self.mean_value + self.slope * (f64::from(year) - self.mean_year)
    }

    pub fn residual_degrees_of_freedom(&self) -> usize {
        self.observations.saturating_sub(2)
    }

    /// Half-width of the OLS prediction interval at `year`:
    /// `t * s * sqrt(1 + 1/n + (year - mean_year)^2 / Sxx)`.
    pub fn prediction_half_width(&self, year: i32, confidence_level: f64) -> Option<f64> {
        let residual_std_error = self.residual_std_error?;
        let degrees = self.residual_degrees_of_freedom();
        if degrees == 0 {
            return None;
        }

        let t = student_t_quantile(0.5 + confidence_level / 2.0, degrees as f64);
        let distance = f64::from(year) - self.mean_year;
        let leverage =
            1.0 + 1.0 / self.observations as f64 + distance * distance / self.year_sum_of_squares;
        Some(t * residual_std_error * leverage.sqrt())
    }
}

/// Inverse CDF of Student's t by bisection on the CDF.
pub fn student_t_quantile(probability: f64, degrees_of_freedom: f64) -> f64 {
    if probability <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if probability >= 1.0 {
        return f64::INFINITY;
    }
    if probability < 0.5 {
        return -student_t_quantile(1.0 - probability, degrees_of_freedom);
    }
    if probability == 0.5 {
        return 0.0;
    }

    let mut low = 0.0_f64;
    let mut high = 1.0_f64;
    while student_t_cdf(high, degrees_of_freedom) < probability && high < 1.0e8 {
        high *= 2.0;
    }

    for _ in 0..QUANTILE_BISECTION_STEPS {
        let mid = 0.5 * (low + high);
        if student_t_cdf(mid, degrees_of_freedom) < probability {
            low = mid;
        } else {
            high = mid;
        }
        if high - low < 1.0e-12 {
            break;
        }
    }
    0.5 * (low + high)
}

pub fn student_t_cdf(t: f64, degrees_of_freedom: f64) -> f64 {
    let x = degrees_of_freedom / (degrees_of_freedom + t * t);
    let tail = 0.5 * regularized_incomplete_beta(0.5 * degrees_of_freedom, 0.5, x);
    if t >= 0.0 { 1.0 - tail } else { tail }
}

fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let front =
        (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln()).exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

// Modified Lentz evaluation of the incomplete beta continued fraction.
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0_f64;
    let mut d = floor_abs(1.0 - qab * x / qap).recip();
    let mut h = d;

    for m in 1..=BETA_MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let even = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = floor_abs(1.0 + even * d).recip();
        c = floor_abs(1.0 + even / c);
        h *= d * c;

        let odd = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = floor_abs(1.0 + odd * d).recip();
        c = floor_abs(1.0 + odd / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < BETA_EPSILON {
            break;
        }
    }
    h
}

fn floor_abs(value: f64) -> f64 {
    if value.abs() < BETA_FLOOR {
        BETA_FLOOR
    } else {
        value
    }
}

// Lanczos approximation.
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];

    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut series = 1.000_000_000_190_015_f64;
    for coefficient in COEFFICIENTS {
        y += 1.0;
        series += coefficient / y;
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::series::SeriesPoint;

    fn series(points: &[(i32, f64)]) -> IndicatorSeries {
        IndicatorSeries {
            indicator_code: "ACC_OWNERSHIP".to_string(),
            points: points
                .iter()
                .map(|(year, value)| SeriesPoint {
                    year: *year,
                    value: *value,
                })
                .collect(),
        }
    }

    #[test]
    fn t_quantile_matches_reference_table() {
        assert!((student_t_quantile(0.975, 1.0) - 12.706).abs() < 1e-3);
        assert!((student_t_quantile(0.975, 3.0) - 3.182).abs() < 1e-3);
        assert!((student_t_quantile(0.975, 30.0) - 2.042).abs() < 1e-3);
        assert!((student_t_quantile(0.95, 10.0) - 1.812).abs() < 1e-3);
        assert!((student_t_quantile(0.025, 3.0) + 3.182).abs() < 1e-3);
    }

    #[test]
    fn t_cdf_is_symmetric() {
        let upper = student_t_cdf(1.5, 4.0);
        let lower = student_t_cdf(-1.5, 4.0);
        assert!((upper + lower - 1.0).abs() < 1e-12);
        assert!((student_t_cdf(0.0, 7.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn fit_recovers_exact_line() {
        let trend = fit_trend(&series(&[(2010, 10.0), (2012, 14.0), (2015, 20.0)]))
            .expect("three points should fit");
        assert!((trend.slope - 2.0).abs() < 1e-9);
        assert!((trend.value_at(2020) - 30.0).abs() < 1e-9);
        assert!((trend.intercept - (10.0 - 2.0 * 2010.0)).abs() < 1e-6);
        assert_eq!(trend.last_year, 2015);
        assert_eq!(trend.last_value, 20.0);
        assert!(trend.residual_std_error.expect("three points have residual df") < 1e-9);
    }

    #[test]
    fn fit_rejects_single_year() {
        let error = fit_trend(&series(&[(2021, 46.0)])).expect_err("one year cannot fit");
        assert_eq!(
            error,
            EngineError::InsufficientData {
                indicator_code: "ACC_OWNERSHIP".to_string(),
                distinct_years: 1,
            }
        );
    }

    #[test]
    fn two_points_have_no_prediction_interval() {
        let trend =
            fit_trend(&series(&[(2021, 18.0), (2024, 35.0)])).expect("two points should fit");
        assert!(trend.residual_std_error.is_none());
        assert!(trend.prediction_half_width(2025, 0.95).is_none());
    }

    #[test]
    fn prediction_interval_widens_with_distance() {
        let trend = fit_trend(&series(&[
            (2011, 14.0),
            (2014, 22.0),
            (2017, 35.0),
            (2021, 46.0),
            (2024, 49.0),
        ]))
        .expect("five points should fit");
        let near = trend.prediction_half_width(2025, 0.95).expect("interval");
        let far = trend.prediction_half_width(2030, 0.95).expect("interval");
        let narrow = trend.prediction_half_width(2030, 0.80).expect("interval");
        assert!(near > 0.0);
        assert!(far > near);
        assert!(narrow < far);
    }
}
