use crate::data::aggregator::OnInterval;
use crate::data::bar::Bar;
use crate::data::{BarKey, HistoryMap};
use crate::portfolio::order::Direction;
use crate::Ticker;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Maximum fractional slippage applied to any fill.
const MAX_SLIPPAGE: f64 = 0.05;

/// Pluggable calculator producing a fractional slippage in `[0, 0.05]` for a fill. Models also
/// subscribe to the base interval via [`OnInterval`] to maintain their rolling features.
pub trait SlippageModel: OnInterval {
    fn slippage(
        &mut self,
        ticker: &str,
        timestamp: DateTime<Utc>,
        quantity: f64,
        direction: Direction,
    ) -> f64;
}

/// Frictionless model returning zero slippage.
#[derive(Copy, Clone, Debug, Default, Deserialize)]
pub struct NoSlippage;

impl SlippageModel for NoSlippage {
    fn slippage(&mut self, _: &str, _: DateTime<Utc>, _: f64, _: Direction) -> f64 {
        0.0
    }
}

impl OnInterval for NoSlippage {
    fn on_interval(&mut self, _: &HistoryMap, _: &[BarKey]) {}
}

/// Configuration for constructing a [`MultiFactorSlippage`] via the new() constructor method.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub periods_in_year: f64,
    pub short_window: usize,
    pub med_window: usize,
    pub long_window: usize,
    /// Exponent on the participation term of the market impact.
    pub power_law_exponent: f64,
    /// Ceiling applied to the volume-surge ratio so outlier prints cannot dominate.
    pub upper_lim_vol_surge: f64,
    pub bidask_window: usize,
    pub volatility_cost_factor: f64,
    pub market_impact_factor: f64,
    pub momentum_cost_factor: f64,
    pub liquidity_cost_factor: f64,
    pub liquidity_cost_exponent: f64,
    /// Standard deviation of the Gaussian noise term; 0 disables it.
    pub random_noise: f64,
    /// Seed for the noise RNG. Unset draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            periods_in_year: 252.0,
            short_window: 5,
            med_window: 10,
            long_window: 20,
            power_law_exponent: 0.5,
            upper_lim_vol_surge: 3.0,
            bidask_window: 10,
            volatility_cost_factor: 0.5,
            market_impact_factor: 0.1,
            momentum_cost_factor: 0.1,
            liquidity_cost_factor: 0.01,
            liquidity_cost_exponent: 0.5,
            random_noise: 1e-4,
            seed: None,
        }
    }
}

/// Multi-factor slippage model combining a bid-ask spread estimate, power-law market impact,
/// volatility & momentum costs, an Amihud illiquidity cost and Gaussian noise:
///
/// `slippage = spread + impact * (1 + volatility) + momentum * liquidity + N(0, sigma)`
///
/// Features derive from a bounded rolling window of base-interval bars per ticker, so backtest
/// and live modes share one code path.
pub struct MultiFactorSlippage {
    config: Config,
    max_lookback: usize,
    windows: HashMap<Ticker, VecDeque<Bar>>,
    rng: StdRng,
}

impl MultiFactorSlippage {
    /// Constructs a new [`MultiFactorSlippage`] component.
    pub fn new(config: Config) -> Self {
        let max_lookback = config
            .long_window
            .max(config.med_window)
            .max(config.short_window)
            .max(config.bidask_window)
            + 5;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            max_lookback,
            windows: HashMap::new(),
            rng,
        }
    }

    fn features(&self, bars: &[Bar]) -> Features {
        let cfg = &self.config;
        let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|bar| bar.volume).collect();
        let last_close = *closes.last().unwrap_or(&0.0);
        let last_volume = *volumes.last().unwrap_or(&0.0);

        let returns: Vec<f64> = closes
            .windows(2)
            .map(|pair| {
                if pair[0] != 0.0 {
                    pair[1] / pair[0] - 1.0
                } else {
                    0.0
                }
            })
            .collect();
        let last_return = returns.last().copied().unwrap_or(0.0);
        let price_acceleration = if returns.len() >= 2 {
            last_return - returns[returns.len() - 2]
        } else {
            0.0
        };

        let vol_med = tail_std(&returns, cfg.med_window) * cfg.periods_in_year.sqrt();

        let vol_ma_med = tail_mean(&volumes, cfg.med_window);
        let vol_ratio_med = if vol_ma_med > 0.0 {
            last_volume / vol_ma_med
        } else {
            0.0
        };
        let vol_ma_long = tail_mean(&volumes, cfg.long_window);
        let vol_surge = if vol_ma_long > 0.0 && volumes.len() >= cfg.long_window {
            (last_volume / vol_ma_long).min(cfg.upper_lim_vol_surge)
        } else {
            1.0
        };

        let amihud = if last_volume * last_close > 0.0 {
            last_return.abs() / (last_volume * last_close)
        } else {
            0.0
        };

        let turnover: Vec<f64> = volumes
            .iter()
            .zip(&closes)
            .map(|(volume, close)| volume * close)
            .collect();
        let turnover_mean = tail_mean(&turnover, cfg.med_window);
        let turnover_cov = if turnover_mean > 0.0 {
            tail_std(&turnover, cfg.med_window) / turnover_mean
        } else {
            0.0
        };

        let spread_cost = if bars.len() >= cfg.bidask_window {
            edge(&bars[bars.len() - cfg.bidask_window..]).unwrap_or(0.0) / 2.0
        } else {
            0.0
        };

        Features {
            last_volume,
            last_return,
            price_acceleration,
            vol_med,
            vol_ratio_med,
            vol_surge,
            amihud,
            turnover_cov,
            spread_cost,
        }
    }
}

struct Features {
    last_volume: f64,
    last_return: f64,
    price_acceleration: f64,
    vol_med: f64,
    vol_ratio_med: f64,
    vol_surge: f64,
    amihud: f64,
    turnover_cov: f64,
    spread_cost: f64,
}

impl SlippageModel for MultiFactorSlippage {
    fn slippage(
        &mut self,
        ticker: &str,
        _timestamp: DateTime<Utc>,
        quantity: f64,
        _direction: Direction,
    ) -> f64 {
        let cfg = self.config;
        let Some(window) = self.windows.get(ticker) else {
            return 0.0;
        };
        if window.len() < cfg.short_window {
            // Not enough data yet to characterise the market
            return 0.0;
        }
        let bars: Vec<Bar> = window.iter().copied().collect();
        let features = self.features(&bars);

        let participation = if features.last_volume > 0.0 {
            quantity / features.last_volume
        } else {
            0.0
        };
        let vol_ratio = if features.vol_ratio_med > 1e-8 {
            features.vol_ratio_med
        } else {
            1e-8
        };

        let market_impact = cfg.market_impact_factor
            * (participation / vol_ratio).powf(cfg.power_law_exponent)
            * features.vol_med
            * (-features.turnover_cov).exp();
        let volatility_cost =
            features.vol_med * (features.vol_surge - 1.0).exp() * cfg.volatility_cost_factor;
        let momentum_cost =
            cfg.momentum_cost_factor * features.last_return.abs() * sign(features.price_acceleration);
        let liquidity_cost = cfg.liquidity_cost_factor
            * features.amihud.clamp(1e-8, f64::MAX).powf(cfg.liquidity_cost_exponent);

        let noise = if cfg.random_noise > 0.0 {
            match Normal::new(0.0, cfg.random_noise) {
                Ok(normal) => normal.sample(&mut self.rng),
                Err(_) => 0.0,
            }
        } else {
            0.0
        };

        let slippage = features.spread_cost
            + market_impact * (1.0 + volatility_cost)
            + momentum_cost * liquidity_cost
            + noise;
        let slippage = slippage.clamp(0.0, MAX_SLIPPAGE);

        debug!(
            %ticker,
            quantity,
            spread = features.spread_cost,
            market_impact,
            volatility_cost,
            momentum_cost,
            liquidity_cost,
            slippage,
            "calculated slippage"
        );

        slippage
    }
}

impl OnInterval for MultiFactorSlippage {
    fn on_interval(&mut self, history: &HistoryMap, closed: &[BarKey]) {
        for key in closed {
            let Some(bar) = history.get(key).and_then(|bars| bars.last()) else {
                continue;
            };
            let window = self.windows.entry(key.0.clone()).or_default();
            window.push_back(*bar);
            while window.len() > self.max_lookback {
                window.pop_front();
            }
        }
    }
}

/// numpy-style sign: 0.0 for 0, unlike `f64::signum`.
fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn tail_mean(values: &[f64], window: usize) -> f64 {
    if values.len() < window || window == 0 {
        return 0.0;
    }
    let tail = &values[values.len() - window..];
    tail.iter().sum::<f64>() / window as f64
}

/// Sample standard deviation (ddof = 1) over the trailing `window` values.
fn tail_std(values: &[f64], window: usize) -> f64 {
    if values.len() < window || window < 2 {
        return 0.0;
    }
    let tail = &values[values.len() - window..];
    let mean = tail.iter().sum::<f64>() / window as f64;
    let variance =
        tail.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / (window - 1) as f64;
    variance.sqrt()
}

/// EDGE bid-ask spread estimator of Ardia, Guidotti & Kroencke (2024), computed from open, high,
/// low & close log-prices. Returns `None` when the sample is degenerate (eg/ no intra-bar price
/// movement).
fn edge(bars: &[Bar]) -> Option<f64> {
    let n = bars.len();
    if n < 3 {
        return None;
    }
    if bars
        .iter()
        .any(|bar| bar.open <= 0.0 || bar.high <= 0.0 || bar.low <= 0.0 || bar.close <= 0.0)
    {
        return None;
    }

    let o: Vec<f64> = bars.iter().map(|bar| bar.open.ln()).collect();
    let h: Vec<f64> = bars.iter().map(|bar| bar.high.ln()).collect();
    let l: Vec<f64> = bars.iter().map(|bar| bar.low.ln()).collect();
    let c: Vec<f64> = bars.iter().map(|bar| bar.close.ln()).collect();
    let m: Vec<f64> = h.iter().zip(&l).map(|(high, low)| (high + low) / 2.0).collect();

    let count = n - 1;
    let mut tau = Vec::with_capacity(count);
    let mut phi1 = Vec::with_capacity(count);
    let mut phi2 = Vec::with_capacity(count);
    let mut phi3 = Vec::with_capacity(count);
    let mut phi4 = Vec::with_capacity(count);
    let (mut r1, mut r2, mut r3, mut r4, mut r5) = (
        Vec::with_capacity(count),
        Vec::with_capacity(count),
        Vec::with_capacity(count),
        Vec::with_capacity(count),
        Vec::with_capacity(count),
    );

    for t in 1..n {
        let active = (h[t] != l[t] || l[t] != c[t - 1]) as u8 as f64;
        tau.push(active);
        phi1.push(((o[t] != h[t]) as u8 as f64) * active);
        phi2.push(((o[t] != l[t]) as u8 as f64) * active);
        phi3.push(((c[t - 1] != h[t - 1]) as u8 as f64) * active);
        phi4.push(((c[t - 1] != l[t - 1]) as u8 as f64) * active);
        r1.push(m[t] - o[t]);
        r2.push(o[t] - m[t - 1]);
        r3.push(m[t] - c[t - 1]);
        r4.push(c[t - 1] - m[t - 1]);
        r5.push(o[t] - c[t - 1]);
    }

    let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
    let pt = mean(&tau);
    let po = mean(&phi1) + mean(&phi2);
    let pc = mean(&phi3) + mean(&phi4);
    if pt == 0.0 || po == 0.0 || pc == 0.0 {
        return None;
    }

    let r1_mean = mean(&r1);
    let r3_mean = mean(&r3);
    let r5_mean = mean(&r5);

    let mut x1 = Vec::with_capacity(count);
    let mut x2 = Vec::with_capacity(count);
    for t in 0..count {
        let d1 = r1[t] - tau[t] * r1_mean / pt;
        let d3 = r3[t] - tau[t] * r3_mean / pt;
        let d5 = r5[t] - tau[t] * r5_mean / pt;
        x1.push(-4.0 / po * d1 * r2[t] - 4.0 / pc * d3 * r4[t]);
        x2.push(-4.0 / po * d1 * r5[t] - 4.0 / pc * d5 * r4[t]);
    }

    let e1 = mean(&x1);
    let e2 = mean(&x2);
    let variance = |values: &[f64], mu: f64| {
        values.iter().map(|value| (value - mu).powi(2)).sum::<f64>() / values.len() as f64
    };
    let v1 = variance(&x1, e1);
    let v2 = variance(&x2, e2);

    let s2 = if v1 + v2 > 0.0 {
        (v2 * e1 + v1 * e2) / (v1 + v2)
    } else {
        (e1 + e2) / 2.0
    };
    let spread = s2.abs().sqrt();
    spread.is_finite().then_some(spread)
}
