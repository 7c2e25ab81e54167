//! Offline baseline fitting.
//!
//! Reads the head of `trades.csv` and `orderbook.csv`, builds
//! `(ln vol, ln spread)` feature rows, and writes the mean, the ridge
//! regularised inverse covariance and a distance threshold to the calibration
//! artifact the engine loads at startup.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::config::Calibration;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::regime::Baseline;

pub const MAX_ROWS: usize = 100_000;
pub const VOL_WINDOW: usize = 50;
pub const MIN_THRESHOLD: f64 = 3.0;
const LOG_EPS: f64 = 1e-9;
const RIDGE: f64 = 1e-6;
const DIST_STRIDE: usize = 100;
const THRESHOLD_PERCENTILE: f64 = 99.9;

#[derive(Debug, Clone, PartialEq)]
pub struct TradeRow {
    pub ts: i64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookRow {
    pub ts: i64,
    pub side: String,
    pub price: f64,
}

/// Read up to `limit` rows, returning the requested columns in order.
/// Headers are trimmed and lower-cased before lookup.
fn read_columns<R: Read>(rdr: R, columns: &[&str], limit: usize) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
    let headers: Vec<String> = reader
        .headers()
        .context("read csv header")?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let idx: Vec<usize> = columns
        .iter()
        .map(|c| {
            headers
                .iter()
                .position(|h| h == c)
                .ok_or_else(|| anyhow!("missing column `{}`", c))
        })
        .collect::<Result<_>>()?;

    let mut out = Vec::new();
    for rec in reader.records().take(limit) {
        let rec = rec.context("read csv row")?;
        out.push(idx.iter().map(|&i| rec.get(i).unwrap_or("").trim().to_string()).collect());
    }
    Ok(out)
}

fn parse_ts(raw: &str) -> Option<i64> {
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

pub fn read_trades<R: Read>(rdr: R) -> Result<Vec<TradeRow>> {
    let rows = read_columns(rdr, &["timestamp", "price"], MAX_ROWS)?;
    Ok(rows
        .into_iter()
        .filter_map(|r| {
            Some(TradeRow {
                ts: parse_ts(&r[0])?,
                price: r[1].parse().ok()?,
            })
        })
        .collect())
}

pub fn read_books<R: Read>(rdr: R) -> Result<Vec<BookRow>> {
    let rows = read_columns(rdr, &["timestamp", "side", "price"], MAX_ROWS)?;
    Ok(rows
        .into_iter()
        .filter_map(|r| {
            Some(BookRow {
                ts: parse_ts(&r[0])?,
                side: r[1].clone(),
                price: r[2].parse().ok()?,
            })
        })
        .collect())
}

/// `(ts, vol)` per trade: rolling sample std of simple returns, 0 until the
/// window fills.
pub fn trade_volatility(trades: &[TradeRow]) -> Vec<(i64, f64)> {
    let mut sorted = trades.to_vec();
    sorted.sort_by_key(|t| t.ts);

    let mut returns = Vec::with_capacity(sorted.len());
    for (i, t) in sorted.iter().enumerate() {
        let ret = if i == 0 {
            0.0
        } else {
            let prev = sorted[i - 1].price;
            let r = (t.price - prev) / prev;
            if r.is_finite() {
                r
            } else {
                0.0
            }
        };
        returns.push(ret);
    }

    sorted
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let vol = if i + 1 >= VOL_WINDOW {
                let w = &returns[i + 1 - VOL_WINDOW..=i];
                let mean = w.iter().sum::<f64>() / w.len() as f64;
                let var = w.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (w.len() - 1) as f64;
                var.sqrt()
            } else {
                0.0
            };
            (t.ts, vol)
        })
        .collect()
}

/// `(ts, spread)` for every timestamp that has both sides and a positive spread.
pub fn book_spreads(books: &[BookRow]) -> Vec<(i64, f64)> {
    let mut best: BTreeMap<i64, (Option<f64>, Option<f64>)> = BTreeMap::new();
    for b in books {
        let slot = best.entry(b.ts).or_insert((None, None));
        match b.side.as_str() {
            "bid" => slot.0 = Some(slot.0.map_or(b.price, |v| v.max(b.price))),
            "ask" => slot.1 = Some(slot.1.map_or(b.price, |v| v.min(b.price))),
            _ => {}
        }
    }
    best.into_iter()
        .filter_map(|(ts, (bid, ask))| Some((ts, ask? - bid?)))
        .filter(|(_, spread)| *spread > 0.0)
        .collect()
}

/// Pair each trade with the latest spread at or before its timestamp.
pub fn asof_features(vols: &[(i64, f64)], spreads: &[(i64, f64)]) -> Vec<[f64; 2]> {
    let mut out = Vec::with_capacity(vols.len());
    let mut j = 0;
    let mut current: Option<f64> = None;
    for &(ts, vol) in vols {
        while j < spreads.len() && spreads[j].0 <= ts {
            current = Some(spreads[j].1);
            j += 1;
        }
        if let Some(spread) = current {
            out.push([(vol + LOG_EPS).ln(), (spread + LOG_EPS).ln()]);
        }
    }
    out
}

/// Linear-interpolated percentile, `q` in [0, 100].
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (q / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

fn invert2(m: [[f64; 2]; 2]) -> Result<[[f64; 2]; 2]> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if det == 0.0 || !det.is_finite() {
        bail!("covariance matrix is singular");
    }
    Ok([[m[1][1] / det, -m[0][1] / det], [-m[1][0] / det, m[0][0] / det]])
}

pub fn fit(features: &[[f64; 2]]) -> Result<Calibration> {
    let n = features.len();
    if n < 2 {
        bail!("need at least 2 feature rows, got {}", n);
    }
    let nf = n as f64;
    let mu = [
        features.iter().map(|x| x[0]).sum::<f64>() / nf,
        features.iter().map(|x| x[1]).sum::<f64>() / nf,
    ];

    let mut cov = [[0.0; 2]; 2];
    for x in features {
        let d = [x[0] - mu[0], x[1] - mu[1]];
        for r in 0..2 {
            for c in 0..2 {
                cov[r][c] += d[r] * d[c];
            }
        }
    }
    for row in cov.iter_mut() {
        for v in row.iter_mut() {
            *v /= nf - 1.0;
        }
    }
    cov[0][0] += RIDGE;
    cov[1][1] += RIDGE;
    let inv_cov = invert2(cov)?;

    let baseline = Baseline { mu, inv_cov };
    let dists: Vec<f64> = features.iter().step_by(DIST_STRIDE).map(|x| baseline.mahalanobis(*x)).collect();
    let threshold = percentile(&dists, THRESHOLD_PERCENTILE).unwrap_or(MIN_THRESHOLD).max(MIN_THRESHOLD);

    Ok(Calibration {
        mu,
        inv_cov,
        timestamp_tolerance_ms: None,
        threshold: Some(threshold),
    })
}

/// Fit from `<research_dir>/{trades,orderbook}.csv` and write `config_path`.
/// Missing inputs produce the default artifact.
pub fn run_calibration(research_dir: &Path, config_path: &Path) -> Result<Calibration> {
    let trades_path = research_dir.join("trades.csv");
    let books_path = research_dir.join("orderbook.csv");

    if !trades_path.exists() || !books_path.exists() {
        log(
            Level::Warn,
            Domain::System,
            "calibration_inputs_missing",
            obj(&[("research_dir", v_str(&research_dir.display().to_string()))]),
        );
        let cal = Calibration::default();
        cal.write(config_path)?;
        return Ok(cal);
    }

    let open = |p: &Path| File::open(p).with_context(|| format!("open {}", p.display()));
    let trades = read_trades(open(&trades_path)?).with_context(|| format!("parse {}", trades_path.display()))?;
    let books = read_books(open(&books_path)?).with_context(|| format!("parse {}", books_path.display()))?;

    let features = asof_features(&trade_volatility(&trades), &book_spreads(&books));
    let cal = fit(&features).context("fit baseline")?;
    cal.write(config_path)?;

    log(
        Level::Info,
        Domain::Regime,
        "calibration_written",
        obj(&[
            ("path", v_str(&config_path.display().to_string())),
            ("rows", v_num(features.len() as f64)),
            ("mu_vol", v_num(cal.mu[0])),
            ("mu_spread", v_num(cal.mu[1])),
            ("threshold", v_num(cal.threshold.unwrap_or(MIN_THRESHOLD))),
        ]),
    );
    Ok(cal)
}
