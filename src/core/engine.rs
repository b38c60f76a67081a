use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::types::{History, Inputs, ValuationResult};

pub fn run_valuation(inputs: &Inputs) -> ValuationResult {
    let history = &inputs.history;
    let sampler = WeightedSampler::new(history.weights());
    let keep = 1.0 - inputs.tax_rate;

    let trials = inputs.trials as usize;
    let mut dcf_after_tax = Vec::with_capacity(trials);
    let mut dcf_pre_tax = Vec::with_capacity(trials);
    let mut payout_years = Vec::with_capacity(trials);

    for trial_id in 0..inputs.trials {
        let trial_seed = derive_seed(inputs.seed, trial_id);
        let mut rng = ChaCha8Rng::seed_from_u64(trial_seed);

        let payouts = simulate_trial(history, &sampler, &mut rng, inputs.initial_reserves);
        let taxed: Vec<f64> = payouts.iter().map(|d| d * keep).collect();

        let taxed_pv: f64 = present_value(&taxed, inputs.discount_rate).iter().sum();
        let untaxed_pv: f64 = present_value(&payouts, inputs.discount_rate).iter().sum();

        dcf_after_tax.push(taxed_pv + inputs.stub_dividend * keep);
        dcf_pre_tax.push(untaxed_pv + inputs.stub_dividend);
        payout_years.push(payouts.len() as u32);
    }

    ValuationResult {
        dcf_after_tax,
        dcf_pre_tax,
        payout_years,
    }
}

struct WeightedSampler {
    cumulative: Vec<f64>,
}

impl WeightedSampler {
    fn new(weights: &[f64]) -> Self {
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        for w in weights {
            total += w;
            cumulative.push(total);
        }
        Self { cumulative }
    }

    fn draw(&self, rng: &mut ChaCha8Rng) -> usize {
        let last = self.cumulative.len().saturating_sub(1);
        let total = self.cumulative.last().copied().unwrap_or(0.0);
        if total <= 0.0 {
            return last;
        }

        let roll = rng.gen_range(0.0..1.0) * total;
        for (index, bound) in self.cumulative.iter().enumerate() {
            if roll < *bound {
                return index;
            }
        }
        last
    }
}

#[derive(Debug, Clone, Copy)]
struct ProjectedYear {
    dividend: f64,
    reserves: f64,
}

fn project(
    history: &History,
    sampler: &WeightedSampler,
    rng: &mut ChaCha8Rng,
    reserves: f64,
) -> ProjectedYear {
    let index = sampler.draw(rng);
    let sales = history.sales()[index];
    let dividend = history.dividends()[index];

    if sales < reserves {
        ProjectedYear {
            dividend,
            reserves: reserves - sales,
        }
    } else {
        // Terminal year: the remaining reserves only cover a fraction of the
        // sampled year, so the dividend is stretched by that fraction.
        ProjectedYear {
            dividend: dividend * reserves / sales,
            reserves: 0.0,
        }
    }
}

fn simulate_trial(
    history: &History,
    sampler: &WeightedSampler,
    rng: &mut ChaCha8Rng,
    initial_reserves: f64,
) -> Vec<f64> {
    let mut payouts = Vec::with_capacity(history.max_payout_years(initial_reserves));
    let mut reserves = initial_reserves;

    while reserves > 0.0 {
        let year = project(history, sampler, rng, reserves);
        payouts.push(year.dividend);
        reserves = year.reserves;
    }

    payouts
}

fn present_value(cash_flows: &[f64], rate: f64) -> Vec<f64> {
    let mut discounted = Vec::with_capacity(cash_flows.len());
    let mut factor = 1.0;
    for cf in cash_flows {
        factor /= 1.0 + rate;
        discounted.push(cf * factor);
    }
    discounted
}

fn derive_seed(base_seed: u64, trial_id: u32) -> u64 {
    splitmix64(base_seed ^ trial_id as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MAX_PAYOUT_YEARS;
    use proptest::prelude::{any, prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn sample_history() -> History {
        History::new(
            vec![1392.0, 1481.0, 1533.0, 1628.0, 1702.0],
            vec![0.67, 0.78, 0.91, 1.02, 1.12],
            vec![0.35, 0.25, 0.175, 0.125, 0.1],
        )
        .expect("valid history")
    }

    fn point_mass_history() -> History {
        History::new(
            vec![1392.0, 1481.0, 1533.0, 1628.0, 1702.0],
            vec![0.67, 0.78, 0.91, 1.02, 1.12],
            vec![1.0, 0.0, 0.0, 0.0, 0.0],
        )
        .expect("valid history")
    }

    fn sample_inputs() -> Inputs {
        Inputs {
            discount_rate: 0.08,
            tax_rate: 0.28,
            trials: 500,
            initial_reserves: 7950.0,
            history: sample_history(),
            stub_dividend: 0.17,
            target_profit_probability: 0.95,
            market_price: 2.48,
            seed: 42,
        }
    }

    #[test]
    fn weighted_sampler_honors_point_mass() {
        let sampler = WeightedSampler::new(&[0.0, 0.0, 1.0, 0.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..64 {
            assert_eq!(sampler.draw(&mut rng), 2);
        }
    }

    #[test]
    fn weighted_sampler_tracks_relative_weights() {
        let sampler = WeightedSampler::new(&[0.5, 0.3, 0.2]);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let draws = 20_000;
        let mut counts = [0usize; 3];
        for _ in 0..draws {
            counts[sampler.draw(&mut rng)] += 1;
        }

        assert_approx_tol(counts[0] as f64 / draws as f64, 0.5, 0.02);
        assert_approx_tol(counts[1] as f64 / draws as f64, 0.3, 0.02);
        assert_approx_tol(counts[2] as f64 / draws as f64, 0.2, 0.02);
    }

    #[test]
    fn weighted_sampler_accepts_unnormalized_weights() {
        let sampler = WeightedSampler::new(&[2.0, 0.0, 6.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let draws = 20_000;
        let mut counts = [0usize; 3];
        for _ in 0..draws {
            counts[sampler.draw(&mut rng)] += 1;
        }

        assert_eq!(counts[1], 0);
        assert_approx_tol(counts[0] as f64 / draws as f64, 0.25, 0.02);
        assert_approx_tol(counts[2] as f64 / draws as f64, 0.75, 0.02);
    }

    #[test]
    fn project_pays_full_dividend_when_reserves_cover_sales() {
        let history = point_mass_history();
        let sampler = WeightedSampler::new(history.weights());
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let year = project(&history, &sampler, &mut rng, 2784.0);
        assert_approx(year.dividend, 0.67);
        assert_approx(year.reserves, 1392.0);
    }

    #[test]
    fn project_pro_rates_final_year_when_reserves_fall_short() {
        let history = point_mass_history();
        let sampler = WeightedSampler::new(history.weights());
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let year = project(&history, &sampler, &mut rng, 696.0);
        assert_approx(year.dividend, 0.67 * 0.5);
        assert_eq!(year.reserves, 0.0);
    }

    #[test]
    fn project_treats_exact_reserve_match_as_full_final_payout() {
        let history = point_mass_history();
        let sampler = WeightedSampler::new(history.weights());
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let year = project(&history, &sampler, &mut rng, 1392.0);
        assert_approx(year.dividend, 0.67);
        assert_eq!(year.reserves, 0.0);
    }

    #[test]
    fn simulate_trial_depletes_exactly_in_two_even_years() {
        let history = point_mass_history();
        let sampler = WeightedSampler::new(history.weights());
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        let payouts = simulate_trial(&history, &sampler, &mut rng, 2784.0);
        assert_eq!(payouts.len(), 2);
        assert_approx(payouts[0], 0.67);
        assert_approx(payouts[1], 0.67);
    }

    #[test]
    fn simulate_trial_pro_rates_partial_final_year() {
        let history = point_mass_history();
        let sampler = WeightedSampler::new(history.weights());
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        let payouts = simulate_trial(&history, &sampler, &mut rng, 2088.0);
        assert_eq!(payouts.len(), 2);
        assert_approx(payouts[0], 0.67);
        assert_approx(payouts[1], 0.67 * 0.5);
    }

    #[test]
    fn deeper_reserves_never_shorten_the_payout_path() {
        let history = sample_history();
        let sampler = WeightedSampler::new(history.weights());

        let mut shallow_rng = ChaCha8Rng::seed_from_u64(21);
        let shallow = simulate_trial(&history, &sampler, &mut shallow_rng, 3000.0);
        let mut deep_rng = ChaCha8Rng::seed_from_u64(21);
        let deep = simulate_trial(&history, &sampler, &mut deep_rng, 6000.0);

        assert!(deep.len() >= shallow.len());
    }

    #[test]
    fn present_value_zero_rate_is_identity() {
        let flows = vec![0.67, 0.78, 0.91];
        let discounted = present_value(&flows, 0.0);
        assert_eq!(discounted, flows);
    }

    #[test]
    fn present_value_discounts_single_flow() {
        let discounted = present_value(&[1.0], 0.08);
        assert_eq!(discounted.len(), 1);
        assert_approx(discounted[0], 1.0 / 1.08);
    }

    #[test]
    fn present_value_compounds_discount_each_year() {
        let discounted = present_value(&[1.0, 1.0, 1.0], 0.10);
        assert_approx(discounted[0], 1.0 / 1.1);
        assert_approx(discounted[1], 1.0 / (1.1 * 1.1));
        assert_approx(discounted[2], 1.0 / (1.1 * 1.1 * 1.1));
    }

    #[test]
    fn run_valuation_matches_point_mass_oracle() {
        let inputs = Inputs {
            discount_rate: 0.08,
            tax_rate: 0.25,
            trials: 8,
            initial_reserves: 2784.0,
            history: point_mass_history(),
            stub_dividend: 0.17,
            target_profit_probability: 0.95,
            market_price: 1.0,
            seed: 42,
        };

        let expected_pre = 0.67 / 1.08 + 0.67 / (1.08 * 1.08) + 0.17;
        let expected_after =
            (0.75 * 0.67) / 1.08 + (0.75 * 0.67) / (1.08 * 1.08) + 0.75 * 0.17;

        let result = run_valuation(&inputs);
        assert_eq!(result.dcf_pre_tax.len(), 8);
        assert_eq!(result.dcf_after_tax.len(), 8);
        assert_eq!(result.payout_years.len(), 8);
        for trial in 0..8 {
            assert_approx(result.dcf_pre_tax[trial], expected_pre);
            assert_approx(result.dcf_after_tax[trial], expected_after);
            assert_eq!(result.payout_years[trial], 2);
        }
    }

    #[test]
    fn run_valuation_is_deterministic_for_fixed_seed() {
        let inputs = sample_inputs();
        let first = run_valuation(&inputs);
        let second = run_valuation(&inputs);

        assert_eq!(first.dcf_after_tax, second.dcf_after_tax);
        assert_eq!(first.dcf_pre_tax, second.dcf_pre_tax);
        assert_eq!(first.payout_years, second.payout_years);
    }

    #[test]
    fn run_valuation_varies_with_seed() {
        let mut inputs = sample_inputs();
        let first = run_valuation(&inputs);
        inputs.seed = 43;
        let second = run_valuation(&inputs);

        assert_ne!(first.dcf_pre_tax, second.dcf_pre_tax);
    }

    #[test]
    fn payout_years_stay_within_depletion_bound() {
        let inputs = sample_inputs();
        let bound = inputs.history.max_payout_years(inputs.initial_reserves) as u32;

        let result = run_valuation(&inputs);
        for years in result.payout_years {
            assert!(years >= 1);
            assert!(years <= bound);
        }
    }

    #[test]
    fn max_payout_years_clamps_extreme_reserve_ratios() {
        let history = History::new(vec![1.0], vec![0.5], vec![1.0]).expect("valid history");

        assert_eq!(history.max_payout_years(1e300), MAX_PAYOUT_YEARS);
        assert_eq!(history.max_payout_years(1e20), MAX_PAYOUT_YEARS);
        assert_eq!(history.max_payout_years(5.0), 6);
    }

    #[test]
    fn derive_seed_changes_per_trial() {
        let a = derive_seed(42, 0);
        let b = derive_seed(42, 1);
        let c = derive_seed(7, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(40))]

        #[test]
        fn prop_trials_deplete_within_length_bound(
            seed in any::<u64>(),
            reserves_scale in 1u32..80
        ) {
            let history = sample_history();
            let sampler = WeightedSampler::new(history.weights());
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let initial_reserves = reserves_scale as f64 * 100.0;

            let payouts = simulate_trial(&history, &sampler, &mut rng, initial_reserves);

            prop_assert!(!payouts.is_empty());
            prop_assert!(payouts.len() <= history.max_payout_years(initial_reserves));
        }

        #[test]
        fn prop_payouts_never_exceed_largest_historical_dividend(
            seed in any::<u64>(),
            reserves_scale in 1u32..80
        ) {
            let history = sample_history();
            let sampler = WeightedSampler::new(history.weights());
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let initial_reserves = reserves_scale as f64 * 100.0;

            let payouts = simulate_trial(&history, &sampler, &mut rng, initial_reserves);

            for payout in payouts {
                prop_assert!(payout >= 0.0);
                prop_assert!(payout <= 1.12 + EPS);
            }
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(28))]

        #[test]
        fn prop_present_value_never_exceeds_positive_cash_flows(
            flows in proptest::collection::vec(0.0f64..50.0, 1..12),
            rate_bp in 0u32..2000
        ) {
            let rate = rate_bp as f64 / 10_000.0;
            let discounted = present_value(&flows, rate);

            prop_assert_eq!(discounted.len(), flows.len());
            for (pv, cf) in discounted.iter().zip(flows.iter()) {
                prop_assert!(*pv >= 0.0);
                prop_assert!(*pv <= *cf + EPS);
            }
        }

        #[test]
        fn prop_after_tax_dcf_never_exceeds_pre_tax(
            seed in any::<u64>(),
            tax_bp in 0u32..10_000
        ) {
            let mut inputs = sample_inputs();
            inputs.trials = 40;
            inputs.seed = seed;
            inputs.tax_rate = tax_bp as f64 / 10_000.0;

            let result = run_valuation(&inputs);
            for (after, pre) in result.dcf_after_tax.iter().zip(result.dcf_pre_tax.iter()) {
                prop_assert!(*after <= *pre + EPS);
            }
        }
    }
}
