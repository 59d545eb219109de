//! Score normalizer: projection onto a bounded, fixed-sum distribution.
//!
//! Raw survival scores are projected onto the intersection of the
//! {sum = 100} simplex and the per-element box [floor, ceiling]. Output
//! values are whole numbers so presentation layers can render them as
//! percentages without drift.

use crate::config::EngineConfig;
use crate::logging::{self, obj, v_num, Domain};

const TARGET_SUM: f64 = 100.0;
const MAX_ITERATIONS: usize = 16;
const EPS: f64 = 1e-9;

/// Normalize `raw` into integer-valued scores in [floor, ceiling] summing
/// to exactly 100.
///
/// Pathological inputs never escape: non-finite entries are zeroed, an
/// all-non-positive vector falls back to uniform, and an infeasible box
/// (n*floor > 100 or n*ceiling < 100) degrades to plain proportional
/// scaling. Re-normalizing an already valid in-band vector returns it
/// unchanged.
pub fn normalize(raw: &[f64], cfg: &EngineConfig) -> Vec<f64> {
    let n = raw.len();
    if n == 0 {
        return Vec::new();
    }
    let floor = cfg.score_floor;
    let ceiling = cfg.score_ceiling;

    let mut v: Vec<f64> = raw
        .iter()
        .map(|x| if x.is_finite() { *x } else { 0.0 })
        .collect();

    if v.iter().all(|x| *x <= 0.0) {
        logging::warn(
            Domain::Normalizer,
            "uniform_fallback",
            obj(&[("n", v_num(n as f64))]),
        );
        v = vec![TARGET_SUM / n as f64; n];
    }

    let box_feasible = n as f64 * floor <= TARGET_SUM + EPS && n as f64 * ceiling >= TARGET_SUM - EPS;
    if !box_feasible {
        logging::warn(
            Domain::Normalizer,
            "infeasible_box",
            obj(&[
                ("n", v_num(n as f64)),
                ("floor", v_num(floor)),
                ("ceiling", v_num(ceiling)),
            ]),
        );
        rescale(&mut v);
        round_to_sum(&mut v, f64::NEG_INFINITY, f64::INFINITY);
        return v;
    }

    // 1. Clamp into the box, 2. rescale, 3. iteratively re-clamp and
    // redistribute the residual among elements still inside the box.
    for x in v.iter_mut() {
        *x = x.clamp(floor, ceiling);
    }
    rescale(&mut v);

    for _ in 0..MAX_ITERATIONS {
        for x in v.iter_mut() {
            *x = x.clamp(floor, ceiling);
        }
        let residual = TARGET_SUM - v.iter().sum::<f64>();
        if residual.abs() < EPS {
            break;
        }
        if residual > 0.0 {
            // Overflow goes preferentially to the smallest free elements,
            // each up to its remaining ceiling room.
            let mut order: Vec<usize> = (0..n).filter(|&i| v[i] < ceiling - EPS).collect();
            if order.is_empty() {
                break;
            }
            order.sort_by(|&a, &b| v[a].partial_cmp(&v[b]).unwrap_or(std::cmp::Ordering::Equal));
            let mut remaining = residual;
            for i in order {
                let room = ceiling - v[i];
                let give = room.min(remaining);
                v[i] += give;
                remaining -= give;
                if remaining < EPS {
                    break;
                }
            }
        } else {
            // Underflow comes preferentially from the largest free elements,
            // each down to the floor.
            let mut order: Vec<usize> = (0..n).filter(|&i| v[i] > floor + EPS).collect();
            if order.is_empty() {
                break;
            }
            order.sort_by(|&a, &b| v[b].partial_cmp(&v[a]).unwrap_or(std::cmp::Ordering::Equal));
            let mut remaining = -residual;
            for i in order {
                let room = v[i] - floor;
                let take = room.min(remaining);
                v[i] -= take;
                remaining -= take;
                if remaining < EPS {
                    break;
                }
            }
        }
    }

    // 4. Integer rounding with the residual fixed on in-range elements.
    round_to_sum(&mut v, floor, ceiling);
    v
}

fn rescale(v: &mut [f64]) {
    let sum: f64 = v.iter().sum();
    if sum > EPS {
        let scale = TARGET_SUM / sum;
        for x in v.iter_mut() {
            *x *= scale;
        }
    }
}

/// Round every element to a whole number and walk the leftover units onto
/// the largest elements that can absorb them without leaving the box.
fn round_to_sum(v: &mut [f64], floor: f64, ceiling: f64) {
    for x in v.iter_mut() {
        *x = x.round();
    }
    let mut residual = (TARGET_SUM - v.iter().sum::<f64>()).round() as i64;
    let mut guard = 0;
    while residual != 0 && guard < 1000 {
        guard += 1;
        let step = if residual > 0 { 1.0 } else { -1.0 };
        let candidate = (0..v.len())
            .filter(|&i| v[i] + step >= floor - EPS && v[i] + step <= ceiling + EPS)
            .max_by(|&a, &b| v[a].partial_cmp(&v[b]).unwrap_or(std::cmp::Ordering::Equal));
        match candidate {
            Some(i) => {
                v[i] += step;
                residual -= step as i64;
            }
            None => break,
        }
    }
}
