use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    DcfStats, History, Inputs, MAX_PAYOUT_YEARS, PayoutYearStats, ValuationSummary, run_valuation,
    summarize,
};

const INDEX_HTML: &str = include_str!("../../web/index.html");
const STYLES_CSS: &str = include_str!("../../web/styles.css");
const APP_JS: &str = include_str!("../../web/app.js");

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ValuationPayload {
    discount_rate: Option<f64>,
    tax_rate: Option<f64>,
    trials: Option<u32>,
    initial_reserves: Option<f64>,
    sales: Option<NumberList>,
    dividends: Option<NumberList>,
    weights: Option<NumberList>,
    stub_dividend: Option<f64>,
    target_profit_probability: Option<f64>,
    market_price: Option<f64>,
    seed: Option<u64>,
}

// Array parameters arrive as JSON arrays in POST bodies and as
// comma-separated strings in GET query parameters.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberList {
    Values(Vec<f64>),
    Csv(String),
}

impl NumberList {
    fn into_values(self, flag: &str) -> Result<Vec<f64>, String> {
        match self {
            NumberList::Values(values) => Ok(values),
            NumberList::Csv(raw) => raw
                .split(',')
                .map(|part| {
                    part.trim()
                        .parse::<f64>()
                        .map_err(|_| format!("--{flag} must be a comma-separated list of numbers"))
                })
                .collect(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "trustval",
    about = "Monte Carlo valuation of a finite-reserve royalty trust (historical resampling + reserve depletion + discounted distributions)"
)]
struct Cli {
    #[arg(long, default_value_t = 8.0, help = "Annual discount rate in percent")]
    discount_rate: f64,
    #[arg(
        long,
        default_value_t = 28.0,
        help = "Combined tax rate on distributions in percent"
    )]
    tax_rate: f64,
    #[arg(long, default_value_t = 10000)]
    trials: u32,
    #[arg(
        long,
        default_value_t = 7950.0,
        help = "Remaining reserves backing future distributions, in thousand barrels"
    )]
    initial_reserves: f64,
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [1392.0, 1481.0, 1533.0, 1628.0, 1702.0],
        help = "Historical net sales volume per fiscal year, most recent first, in thousand barrels"
    )]
    sales: Vec<f64>,
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [0.67, 0.78, 0.91, 1.02, 1.12],
        help = "Historical cash distribution per unit for each fiscal year"
    )]
    dividends: Vec<f64>,
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [0.35, 0.25, 0.175, 0.125, 0.1],
        help = "Sampling weight per historical year; normalized to sum to 1"
    )]
    weights: Vec<f64>,
    #[arg(
        long,
        default_value_t = 0.17,
        help = "Current-quarter distribution already declared, credited without discounting"
    )]
    stub_dividend: f64,
    #[arg(
        long,
        default_value_t = 95.0,
        help = "Required probability of profit in percent when quoting the break-even entry price"
    )]
    target_profit_probability: f64,
    #[arg(
        long,
        default_value_t = 2.48,
        help = "Observed market price per trust unit"
    )]
    market_price: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValuationResponse {
    discount_rate: f64,
    tax_rate: f64,
    trials: u32,
    initial_reserves: f64,
    stub_dividend: f64,
    market_price: f64,
    target_profit_probability: f64,
    seed: u64,
    after_tax: DcfStats,
    pre_tax: DcfStats,
    payout_years: PayoutYearStats,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_inputs(cli: Cli) -> Result<Inputs, String> {
    if !(0.0..=100.0).contains(&cli.discount_rate) {
        return Err("--discount-rate must be between 0 and 100".to_string());
    }

    if !(0.0..=100.0).contains(&cli.tax_rate) {
        return Err("--tax-rate must be between 0 and 100".to_string());
    }

    if cli.trials == 0 {
        return Err("--trials must be > 0".to_string());
    }

    if !cli.initial_reserves.is_finite() || cli.initial_reserves <= 0.0 {
        return Err("--initial-reserves must be > 0".to_string());
    }

    if !cli.stub_dividend.is_finite() || cli.stub_dividend < 0.0 {
        return Err("--stub-dividend must be >= 0".to_string());
    }

    if !(0.0..=100.0).contains(&cli.target_profit_probability) {
        return Err("--target-profit-probability must be between 0 and 100".to_string());
    }

    if !cli.market_price.is_finite() || cli.market_price <= 0.0 {
        return Err("--market-price must be > 0".to_string());
    }

    let history = History::new(cli.sales, cli.dividends, cli.weights)?;

    if cli.initial_reserves / history.min_sales() >= MAX_PAYOUT_YEARS as f64 {
        return Err(format!(
            "--initial-reserves must deplete within {MAX_PAYOUT_YEARS} years at the smallest sales entry"
        ));
    }

    Ok(Inputs {
        discount_rate: cli.discount_rate / 100.0,
        tax_rate: cli.tax_rate / 100.0,
        trials: cli.trials,
        initial_reserves: cli.initial_reserves,
        history,
        stub_dividend: cli.stub_dividend,
        target_profit_probability: cli.target_profit_probability / 100.0,
        market_price: cli.market_price,
        seed: cli.seed,
    })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route("/styles.css", get(styles_handler))
        .route("/app.js", get(app_js_handler))
        .route(
            "/api/valuation",
            get(valuation_get_handler).post(valuation_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("trustval HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/");

    axum::serve(listener, app).await
}

pub fn run_report() -> Result<(), String> {
    let cli = Cli::parse();
    let inputs = build_inputs(cli)?;
    let result = run_valuation(&inputs);
    let summary = summarize(&inputs, &result);
    print_report(&inputs, &summary);
    Ok(())
}

async fn index_handler() -> impl IntoResponse {
    with_cache_control(Html(INDEX_HTML))
}

async fn styles_handler() -> impl IntoResponse {
    with_cache_control((
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        STYLES_CSS,
    ))
}

async fn app_js_handler() -> impl IntoResponse {
    with_cache_control((
        [(
            header::CONTENT_TYPE,
            "application/javascript; charset=utf-8",
        )],
        APP_JS,
    ))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn valuation_get_handler(Query(payload): Query<ValuationPayload>) -> Response {
    valuation_handler_impl(payload).await
}

async fn valuation_post_handler(Json(payload): Json<ValuationPayload>) -> Response {
    valuation_handler_impl(payload).await
}

async fn valuation_handler_impl(payload: ValuationPayload) -> Response {
    let inputs = match inputs_from_payload(payload) {
        Ok(inputs) => inputs,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let result = run_valuation(&inputs);
    let summary = summarize(&inputs, &result);
    json_response(StatusCode::OK, build_valuation_response(&inputs, summary))
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn inputs_from_json(json: &str) -> Result<Inputs, String> {
    let payload = serde_json::from_str::<ValuationPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    inputs_from_payload(payload)
}

fn inputs_from_payload(payload: ValuationPayload) -> Result<Inputs, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.discount_rate {
        cli.discount_rate = v;
    }
    if let Some(v) = payload.tax_rate {
        cli.tax_rate = v;
    }
    if let Some(v) = payload.trials {
        cli.trials = v;
    }
    if let Some(v) = payload.initial_reserves {
        cli.initial_reserves = v;
    }
    if let Some(v) = payload.sales {
        cli.sales = v.into_values("sales")?;
    }
    if let Some(v) = payload.dividends {
        cli.dividends = v.into_values("dividends")?;
    }
    if let Some(v) = payload.weights {
        cli.weights = v.into_values("weights")?;
    }
    if let Some(v) = payload.stub_dividend {
        cli.stub_dividend = v;
    }
    if let Some(v) = payload.target_profit_probability {
        cli.target_profit_probability = v;
    }
    if let Some(v) = payload.market_price {
        cli.market_price = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = v;
    }

    build_inputs(cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        discount_rate: 8.0,
        tax_rate: 28.0,
        trials: 10_000,
        initial_reserves: 7950.0,
        sales: vec![1392.0, 1481.0, 1533.0, 1628.0, 1702.0],
        dividends: vec![0.67, 0.78, 0.91, 1.02, 1.12],
        weights: vec![0.35, 0.25, 0.175, 0.125, 0.1],
        stub_dividend: 0.17,
        target_profit_probability: 95.0,
        market_price: 2.48,
        seed: 42,
    }
}

fn build_valuation_response(inputs: &Inputs, summary: ValuationSummary) -> ValuationResponse {
    ValuationResponse {
        discount_rate: inputs.discount_rate,
        tax_rate: inputs.tax_rate,
        trials: summary.trials,
        initial_reserves: inputs.initial_reserves,
        stub_dividend: inputs.stub_dividend,
        market_price: summary.market_price,
        target_profit_probability: summary.target_profit_probability,
        seed: inputs.seed,
        after_tax: summary.after_tax,
        pre_tax: summary.pre_tax,
        payout_years: summary.payout_years,
    }
}

fn print_report(inputs: &Inputs, summary: &ValuationSummary) {
    let rule = "=".repeat(64);

    println!("{rule}");
    println!(" Finite-reserve trust valuation (Monte Carlo)");
    println!("{rule}");
    println!(" Trials:                 {}", summary.trials);
    println!(" Seed:                   {}", inputs.seed);
    println!(
        " Discount rate:          {:.2}% per year",
        inputs.discount_rate * 100.0
    );
    println!(" Tax rate:               {:.2}%", inputs.tax_rate * 100.0);
    println!(
        " Initial reserves:       {:.0} thousand barrels",
        inputs.initial_reserves
    );
    println!(" Historical years:       {}", inputs.history.len());
    println!(" Stub dividend:          {:.4} per unit", inputs.stub_dividend);
    println!(" Market price:           {:.2} per unit", summary.market_price);
    println!();
    println!(
        " Years until depletion:  mean {:.2}  median {:.1}  range {}..{}",
        summary.payout_years.mean,
        summary.payout_years.median,
        summary.payout_years.min,
        summary.payout_years.max
    );
    println!();

    print_dcf_section("After-tax DCF per unit", &summary.after_tax, summary);
    println!();
    print_dcf_section("Pre-tax DCF per unit", &summary.pre_tax, summary);
}

fn print_dcf_section(title: &str, stats: &DcfStats, summary: &ValuationSummary) {
    let rule = "-".repeat(64);

    println!(" {title}");
    println!("{rule}");
    println!(" Mean:                   {:.4}", stats.mean);
    println!(" Median:                 {:.4}", stats.median);
    println!(" p5 / p95:               {:.4} / {:.4}", stats.p5, stats.p95);
    println!(
        " Break-even entry price: {:.4} (at {:.0}% profit target)",
        stats.break_even_price,
        summary.target_profit_probability * 100.0
    );
    println!(
        " Mean margin:            {:+.2}% vs market",
        stats.mean_margin * 100.0
    );
    println!(
        " Profit probability:     {:.1}% (+/- {:.1}%)",
        stats.profit_probability * 100.0,
        stats.profit_probability_ci_half_width * 100.0
    );
    match stats.conditional_margin {
        Some(margin) => println!(" Margin if profitable:   {:+.2}%", margin * 100.0),
        None => println!(" Margin if profitable:   n/a (no profitable trials)"),
    }
}
