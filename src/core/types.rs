use serde::Serialize;

// Hard ceiling on the per-trial payout horizon; the validation layer
// rejects reserve/sales ratios that would exceed it.
pub const MAX_PAYOUT_YEARS: usize = 100_000;

#[derive(Debug, Clone)]
pub struct History {
    sales: Vec<f64>,
    dividends: Vec<f64>,
    weights: Vec<f64>,
    min_sales: f64,
}

impl History {
    pub fn new(
        sales: Vec<f64>,
        dividends: Vec<f64>,
        mut weights: Vec<f64>,
    ) -> Result<Self, String> {
        if sales.is_empty() {
            return Err("historical dataset must not be empty".to_string());
        }
        if sales.len() != dividends.len() || sales.len() != weights.len() {
            return Err("sales, dividends, and weights must have the same length".to_string());
        }
        if sales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err("sales entries must be positive and finite".to_string());
        }
        if dividends.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err("dividend entries must be non-negative and finite".to_string());
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("weights must be non-negative and finite".to_string());
        }

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err("weights must have a positive sum".to_string());
        }
        for w in &mut weights {
            *w /= total;
        }

        let min_sales = sales.iter().fold(f64::INFINITY, |acc, s| acc.min(*s));

        Ok(Self {
            sales,
            dividends,
            weights,
            min_sales,
        })
    }

    pub fn len(&self) -> usize {
        self.sales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sales.is_empty()
    }

    pub fn sales(&self) -> &[f64] {
        &self.sales
    }

    pub fn dividends(&self) -> &[f64] {
        &self.dividends
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn min_sales(&self) -> f64 {
        self.min_sales
    }

    // Every non-terminal year consumes at least min_sales, so a trial can
    // never pay out more years than this. Saturates at MAX_PAYOUT_YEARS for
    // extreme reserve ratios.
    pub fn max_payout_years(&self, reserves: f64) -> usize {
        if reserves <= 0.0 {
            return 0;
        }
        let bound = (reserves / self.min_sales).ceil();
        if bound >= MAX_PAYOUT_YEARS as f64 {
            return MAX_PAYOUT_YEARS;
        }
        bound as usize + 1
    }
}

#[derive(Debug, Clone)]
pub struct Inputs {
    pub discount_rate: f64,
    pub tax_rate: f64,
    pub trials: u32,
    pub initial_reserves: f64,
    pub history: History,
    pub stub_dividend: f64,
    pub target_profit_probability: f64,
    pub market_price: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct ValuationResult {
    pub dcf_after_tax: Vec<f64>,
    pub dcf_pre_tax: Vec<f64>,
    pub payout_years: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Histogram {
    pub start: f64,
    pub bin_width: f64,
    pub counts: Vec<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DcfStats {
    pub mean: f64,
    pub median: f64,
    pub p5: f64,
    pub p95: f64,
    pub break_even_price: f64,
    pub mean_margin: f64,
    pub profit_probability: f64,
    pub profit_probability_ci_half_width: f64,
    pub conditional_margin: Option<f64>,
    pub histogram: Histogram,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutYearStats {
    pub mean: f64,
    pub median: f64,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationSummary {
    pub market_price: f64,
    pub target_profit_probability: f64,
    pub trials: u32,
    pub after_tax: DcfStats,
    pub pre_tax: DcfStats,
    pub payout_years: PayoutYearStats,
}
