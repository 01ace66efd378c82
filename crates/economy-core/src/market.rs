//! Daily asset-price simulation (discretized geometric Brownian motion) and
//! the wall-clock index into a day's price path.

use std::f64::consts::TAU;
use std::fmt;

use chrono::{NaiveTime, Timelike};
use contracts::{PriceSeries, BASE_PRICE, PRICE_STEPS};
use rand::Rng;

pub const DRIFT: f64 = 0.05;
pub const VOLATILITY: f64 = 0.2;
/// Carried-over opening prices outside this band are pulled back toward it
/// over the day, mean-reverting runaway trends.
pub const SCALE_MIN: i64 = 500;
pub const SCALE_MAX: i64 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketError {
    InvalidSeriesLength,
}

impl fmt::Display for MarketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSeriesLength => write!(f, "price series length must be positive"),
        }
    }
}

impl std::error::Error for MarketError {}

/// Generate one day's price path. Element 0 is the literal opening price;
/// the remaining `steps` values follow
/// `r_i = (drift - volatility^2 / 2) * dt + volatility * sqrt(dt) * z_i`
/// compounded through `exp`, scaled by the mean-reversion vector, and
/// truncated to integers. Output length is always `steps + 1`.
pub fn generate_values<R: Rng>(
    rng: &mut R,
    opening_price: i64,
    steps: usize,
    drift: f64,
    volatility: f64,
) -> Vec<i64> {
    let dt = 1.0 / steps as f64;
    let scales = reversion_scales(opening_price, steps, SCALE_MIN, SCALE_MAX);

    let mut values = Vec::with_capacity(steps + 1);
    values.push(opening_price);

    let mut growth = 1.0;
    for scale in scales {
        let z = standard_normal(rng);
        let increment = (drift - volatility * volatility / 2.0) * dt + volatility * dt.sqrt() * z;
        growth *= increment.exp();
        values.push((scale * growth) as i64);
    }

    values
}

/// Per-step base values for the day. An opening price inside the band stays
/// constant; one outside the band interpolates linearly toward the nearer
/// band edge (endpoints inclusive).
pub fn reversion_scales(opening_price: i64, steps: usize, min: i64, max: i64) -> Vec<f64> {
    if opening_price > min && opening_price < max {
        return vec![opening_price as f64; steps];
    }

    let target = if opening_price >= max { max } else { min };
    linspace(opening_price as f64, target as f64, steps)
}

/// Roll the series over to a new calendar day, carrying yesterday's close
/// forward as today's opening price. An unreadable previous series falls
/// back to [`BASE_PRICE`].
pub fn roll_daily<R: Rng>(rng: &mut R, previous: &PriceSeries, today: &str) -> PriceSeries {
    let opening_price = if previous.is_readable() {
        previous.closing_value().unwrap_or(BASE_PRICE)
    } else {
        BASE_PRICE
    };

    PriceSeries {
        prev_check: today.to_string(),
        values: generate_values(rng, opening_price, PRICE_STEPS, DRIFT, VOLATILITY),
    }
}

/// Map a time of day onto a position in the day's price path:
/// `floor(series_len * (hour + minute/60) / 24)`. Floors, never rounds, so
/// 23:59 stays in bounds.
pub fn index_for_time(series_len: usize, time: NaiveTime) -> Result<usize, MarketError> {
    if series_len == 0 {
        return Err(MarketError::InvalidSeriesLength);
    }

    let day_fraction = (f64::from(time.hour()) + f64::from(time.minute()) / 60.0) / 24.0;
    Ok((series_len as f64 * day_fraction) as usize)
}

/// Standard-normal sample via the Box-Muller transform. `u1` is reflected
/// into (0, 1] so the log stays finite.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count).map(|i| start + step * i as f64).collect()
        }
    }
}
