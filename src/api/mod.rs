use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum};
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    CaregiverParameters, DEFAULT_PRICE_THRESHOLDS, ModelConfig, MonteCarloConfig, ParameterSet,
    PricingRow, PsaSettings, Scenario, ScenarioResult, StartingAgeConfig, ThresholdConfig,
    ValidationReport, default_ranges, default_subgroups, heterogeneity_analysis,
    one_way_sensitivity, run_psa, run_scenarios, starting_age_analysis, threshold_analysis,
    validate_against_cohort, value_based_pricing,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliAnalysis {
    /// Baseline vs interventions with incremental results and pricing.
    Evaluate,
    /// Monte Carlo patients against the cohort run.
    Validate,
    /// One-way sensitivity (tornado) for the first intervention.
    Sensitivity,
    /// Treatment-effect sweep against the target ICER.
    Threshold,
    /// Responder subgroups and their population average.
    Heterogeneity,
    /// Reruns at later starting ages.
    StartingAge,
    /// Probabilistic sensitivity analysis with acceptability curve.
    Psa,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EvaluatePayload {
    starting_age: Option<u32>,
    starting_latent: Option<f64>,
    horizon: Option<u32>,
    discount_rate: Option<f64>,
    acquisition_cost: Option<f64>,
    caregiver: Option<bool>,
    price_thresholds: Option<Vec<f64>>,
    interventions: Option<Vec<Scenario>>,

    patients: Option<u32>,
    seed: Option<u64>,
    validate_theta: Option<f64>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "renal-hta",
    about = "Markov cohort cost-utility model for progressive kidney disease"
)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = CliAnalysis::Evaluate)]
    analysis: CliAnalysis,
    #[arg(long, default_value_t = 1, help = "Patient age at cycle 0")]
    starting_age: u32,
    #[arg(long, default_value_t = 95.0, help = "Latent filtration value at cycle 0")]
    starting_latent: f64,
    #[arg(long, default_value_t = 100, help = "Number of annual cycles")]
    horizon: u32,
    #[arg(
        long,
        default_value_t = 1.5,
        help = "Annual discount rate in percent, e.g. 1.5"
    )]
    discount_rate: f64,
    #[arg(long, default_value_t = 0.0, help = "One-time intervention price")]
    acquisition_cost: f64,
    #[arg(long, help = "Include caregiver quality-of-life loss")]
    caregiver: bool,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Intervention effects as fractions of pathological decline removed, e.g. 1,0.85; defaults to the standard scenario set"
    )]
    theta: Vec<f64>,
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = DEFAULT_PRICE_THRESHOLDS.to_vec(),
        help = "Willingness-to-pay thresholds for value-based pricing"
    )]
    price_threshold: Vec<f64>,
    #[arg(long, default_value_t = 100_000.0, help = "Target ICER for the threshold sweep")]
    target_icer: f64,
    #[arg(long, default_value_t = 1_000, help = "Monte Carlo patients")]
    patients: u32,
    #[arg(long, default_value_t = 1_000, help = "PSA iterations")]
    psa_iterations: u32,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(
        long,
        help = "Validate a treated arm with this effect instead of natural history"
    )]
    validate_theta: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateResponse {
    baseline: ScenarioResult,
    interventions: Vec<ScenarioResult>,
    pricing: Vec<PricingRow>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

const MAX_PATIENTS: u32 = 1_000_000;
const MAX_PSA_ITERATIONS: u32 = 100_000;

fn build_params(cli: &Cli) -> Result<ParameterSet, String> {
    if !(0.0..100.0).contains(&cli.discount_rate) {
        return Err("--discount-rate must be within [0, 100)".to_string());
    }
    if !cli.acquisition_cost.is_finite() || cli.acquisition_cost < 0.0 {
        return Err("--acquisition-cost must be >= 0".to_string());
    }
    if cli.price_threshold.iter().any(|t| !t.is_finite() || *t < 0.0) {
        return Err("--price-threshold values must be >= 0".to_string());
    }
    if !(1..=MAX_PATIENTS).contains(&cli.patients) {
        return Err(format!("--patients must be within [1, {MAX_PATIENTS}]"));
    }
    if !(1..=MAX_PSA_ITERATIONS).contains(&cli.psa_iterations) {
        return Err(format!(
            "--psa-iterations must be within [1, {MAX_PSA_ITERATIONS}]"
        ));
    }

    let mut config = ModelConfig {
        starting_age: cli.starting_age,
        starting_latent: cli.starting_latent,
        horizon: cli.horizon,
        discount_rate: cli.discount_rate / 100.0,
        caregiver: cli.caregiver.then(CaregiverParameters::default),
        ..ModelConfig::default()
    };
    config.intervention_costs.acquisition = cli.acquisition_cost;

    ParameterSet::new(config).map_err(|e| e.to_string())
}

fn interventions(cli: &Cli) -> Vec<Scenario> {
    if cli.theta.is_empty() {
        return Scenario::default_interventions();
    }
    cli.theta
        .iter()
        .map(|&theta| Scenario::treated(format!("Theta {theta}"), theta))
        .collect()
}

fn validation_scenario(cli: &Cli) -> Scenario {
    match cli.validate_theta {
        Some(theta) => Scenario::treated(format!("Theta {theta}"), theta),
        None => Scenario::natural_history(),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to serialise report: {e}"))
}

/// One-shot run for the command line; returns the JSON report.
pub fn run_cli(cli: Cli) -> Result<String, String> {
    let params = build_params(&cli)?;
    let baseline = Scenario::natural_history();
    let interventions = interventions(&cli);

    match cli.analysis {
        CliAnalysis::Evaluate => {
            let response = evaluate(&params, &interventions, &cli.price_threshold)?;
            to_json(&response)
        }
        CliAnalysis::Validate => to_json(&validate(&params, &cli)?),
        CliAnalysis::Sensitivity => {
            let intervention = interventions
                .first()
                .ok_or_else(|| "sensitivity needs an intervention".to_string())?;
            let rows = one_way_sensitivity(&params, &baseline, intervention, &default_ranges())
                .map_err(|e| e.to_string())?;
            to_json(&rows)
        }
        CliAnalysis::Threshold => {
            let config = ThresholdConfig {
                target_icer: cli.target_icer,
                ..ThresholdConfig::default()
            };
            let analysis =
                threshold_analysis(&params, &baseline, config).map_err(|e| e.to_string())?;
            to_json(&analysis)
        }
        CliAnalysis::Heterogeneity => {
            let analysis = heterogeneity_analysis(&params, &baseline, &default_subgroups())
                .map_err(|e| e.to_string())?;
            to_json(&analysis)
        }
        CliAnalysis::StartingAge => {
            let rows = starting_age_analysis(
                &params,
                &baseline,
                &interventions,
                &StartingAgeConfig::default(),
                &cli.price_threshold,
            )
            .map_err(|e| e.to_string())?;
            to_json(&rows)
        }
        CliAnalysis::Psa => {
            let settings = PsaSettings {
                iterations: cli.psa_iterations,
                seed: cli.seed,
                ..PsaSettings::default()
            };
            let report = run_psa(&params, &baseline, &interventions, &settings)
                .map_err(|e| e.to_string())?;
            to_json(&report)
        }
    }
}

fn evaluate(
    params: &ParameterSet,
    interventions: &[Scenario],
    thresholds: &[f64],
) -> Result<EvaluateResponse, String> {
    let report = run_scenarios(params, &Scenario::natural_history(), interventions)
        .map_err(|e| e.to_string())?;
    let pricing = value_based_pricing(&report, thresholds);
    Ok(EvaluateResponse {
        baseline: report.baseline,
        interventions: report.interventions,
        pricing,
    })
}

fn validate(params: &ParameterSet, cli: &Cli) -> Result<ValidationReport, String> {
    let config = MonteCarloConfig {
        patients: cli.patients,
        seed: cli.seed,
    };
    validate_against_cohort(params, &validation_scenario(cli), config).map_err(|e| e.to_string())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/evaluate",
            get(evaluate_get_handler).post(evaluate_post_handler),
        )
        .route(
            "/api/validate",
            get(validate_get_handler).post(validate_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!("HTTP API listening on http://{addr}");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn evaluate_get_handler(Query(payload): Query<EvaluatePayload>) -> Response {
    evaluate_handler_impl(payload).await
}

async fn evaluate_post_handler(Json(payload): Json<EvaluatePayload>) -> Response {
    evaluate_handler_impl(payload).await
}

async fn validate_get_handler(Query(payload): Query<EvaluatePayload>) -> Response {
    validate_handler_impl(payload).await
}

async fn validate_post_handler(Json(payload): Json<EvaluatePayload>) -> Response {
    validate_handler_impl(payload).await
}

async fn evaluate_handler_impl(payload: EvaluatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match evaluate(
        &request.params,
        &request.interventions,
        &request.cli.price_threshold,
    ) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn validate_handler_impl(payload: EvaluatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match validate(&request.params, &request.cli) {
        Ok(report) => json_response(StatusCode::OK, report),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
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

#[derive(Debug)]
struct ApiRequest {
    cli: Cli,
    params: ParameterSet,
    interventions: Vec<Scenario>,
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<EvaluatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: EvaluatePayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.starting_age {
        cli.starting_age = v;
    }
    if let Some(v) = payload.starting_latent {
        cli.starting_latent = v;
    }
    if let Some(v) = payload.horizon {
        cli.horizon = v;
    }
    if let Some(v) = payload.discount_rate {
        cli.discount_rate = v;
    }
    if let Some(v) = payload.acquisition_cost {
        cli.acquisition_cost = v;
    }
    if let Some(v) = payload.caregiver {
        cli.caregiver = v;
    }
    if let Some(v) = payload.price_thresholds {
        cli.price_threshold = v;
    }
    if let Some(v) = payload.patients {
        cli.patients = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = v;
    }
    if payload.validate_theta.is_some() {
        cli.validate_theta = payload.validate_theta;
    }

    let params = build_params(&cli)?;
    let interventions = match payload.interventions {
        Some(list) if list.is_empty() => {
            return Err("interventions must not be empty when supplied".to_string());
        }
        Some(list) => list,
        None => interventions(&cli),
    };

    Ok(ApiRequest {
        cli,
        params,
        interventions,
    })
}

fn default_cli_for_api() -> Cli {
    Cli {
        analysis: CliAnalysis::Evaluate,
        starting_age: 1,
        starting_latent: 95.0,
        horizon: 100,
        discount_rate: 1.5,
        acquisition_cost: 0.0,
        caregiver: false,
        theta: Vec::new(),
        price_threshold: DEFAULT_PRICE_THRESHOLDS.to_vec(),
        target_icer: 100_000.0,
        patients: 1_000,
        psa_iterations: 1_000,
        seed: 42,
        validate_theta: None,
    }
}
