use super::types::{
    DcfStats, Histogram, Inputs, PayoutYearStats, ValuationResult, ValuationSummary,
};

const HISTOGRAM_BINS: usize = 50;

pub fn summarize(inputs: &Inputs, result: &ValuationResult) -> ValuationSummary {
    ValuationSummary {
        market_price: inputs.market_price,
        target_profit_probability: inputs.target_profit_probability,
        trials: inputs.trials,
        after_tax: dcf_stats(&result.dcf_after_tax, inputs),
        pre_tax: dcf_stats(&result.dcf_pre_tax, inputs),
        payout_years: payout_year_stats(&result.payout_years),
    }
}

fn dcf_stats(ensemble: &[f64], inputs: &Inputs) -> DcfStats {
    let mut sorted = ensemble.to_vec();
    let price = inputs.market_price;
    let profit = profit_probability(ensemble, price);

    DcfStats {
        mean: mean(ensemble),
        median: percentile(&mut sorted, 50.0),
        p5: percentile(&mut sorted, 5.0),
        p95: percentile(&mut sorted, 95.0),
        break_even_price: percentile(
            &mut sorted,
            (1.0 - inputs.target_profit_probability) * 100.0,
        ),
        mean_margin: mean_margin(ensemble, price),
        profit_probability: profit,
        profit_probability_ci_half_width: binomial_ci_half_width(profit, ensemble.len() as u32),
        conditional_margin: conditional_margin(ensemble, price),
        histogram: histogram(ensemble, HISTOGRAM_BINS),
    }
}

fn payout_year_stats(payout_years: &[u32]) -> PayoutYearStats {
    let mut as_f64: Vec<f64> = payout_years.iter().map(|y| *y as f64).collect();
    PayoutYearStats {
        mean: mean(&as_f64),
        median: percentile(&mut as_f64, 50.0),
        min: payout_years.iter().copied().min().unwrap_or(0),
        max: payout_years.iter().copied().max().unwrap_or(0),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn mean_margin(ensemble: &[f64], price: f64) -> f64 {
    mean(ensemble) / price - 1.0
}

fn profit_probability(ensemble: &[f64], price: f64) -> f64 {
    if ensemble.is_empty() {
        return 0.0;
    }
    let winners = ensemble.iter().filter(|dcf| **dcf > price).count();
    winners as f64 / ensemble.len() as f64
}

fn conditional_margin(ensemble: &[f64], price: f64) -> Option<f64> {
    let mut winner_sum = 0.0;
    let mut winner_count = 0usize;
    for dcf in ensemble {
        if *dcf > price {
            winner_sum += dcf;
            winner_count += 1;
        }
    }

    if winner_count == 0 {
        return None;
    }
    Some(winner_sum / winner_count as f64 / price - 1.0)
}

fn binomial_ci_half_width(p: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

fn histogram(values: &[f64], bins: usize) -> Histogram {
    if values.is_empty() || bins == 0 {
        return Histogram {
            start: 0.0,
            bin_width: 1.0,
            counts: Vec::new(),
        };
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(*v);
        max = max.max(*v);
    }

    if max <= min {
        // Constant ensemble collapses to a single centered bin.
        return Histogram {
            start: min - 0.5,
            bin_width: 1.0,
            counts: vec![values.len() as u32],
        };
    }

    let bin_width = (max - min) / bins as f64;
    let mut counts = vec![0u32; bins];
    for v in values {
        let mut index = ((v - min) / bin_width) as usize;
        if index >= bins {
            index = bins - 1;
        }
        counts[index] += 1;
    }

    Histogram {
        start: min,
        bin_width,
        counts,
    }
}
