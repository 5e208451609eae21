use log::{debug, info, warn};

use crate::{
    hal::{NetworkLink, PredictionTransport, SensorSource},
    parser::{parse_predictions, ParseError, PredictionValues},
    types::{Prediction, Reading},
};

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Updated,
    SkippedLinkDown,
    SkippedSensorFault,
    TransportFailed(String),
    ParseFailed(ParseError),
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updated => "UPDATED",
            Self::SkippedLinkDown => "SKIPPED_LINK_DOWN",
            Self::SkippedSensorFault => "SKIPPED_SENSOR_FAULT",
            Self::TransportFailed(_) => "TRANSPORT_FAILED",
            Self::ParseFailed(_) => "PARSE_FAILED",
        }
    }
}

/// Process-lifetime prediction state, owned by the main loop.
#[derive(Debug, Clone, Default)]
pub struct PredictionState {
    prediction: Prediction,
    cycles_run: u64,
    successful_cycles: u64,
    last_outcome: Option<CycleOutcome>,
}

impl PredictionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prediction(&self) -> &Prediction {
        &self.prediction
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles_run
    }

    pub fn successful_cycles(&self) -> u64 {
        self.successful_cycles
    }

    pub fn last_outcome(&self) -> Option<&CycleOutcome> {
        self.last_outcome.as_ref()
    }

    /// Replaces all three values at once and marks the prediction available.
    pub fn apply(&mut self, values: &PredictionValues) {
        self.prediction = Prediction {
            temperature_c: values.temperature_c,
            humidity_pct: values.humidity_pct,
            aqi: values.aqi,
            available: true,
        };
        self.successful_cycles = self.successful_cycles.saturating_add(1);
    }

    fn record(&mut self, outcome: CycleOutcome) -> CycleOutcome {
        self.cycles_run = self.cycles_run.saturating_add(1);
        self.last_outcome = Some(outcome.clone());
        outcome
    }
}

pub fn build_request_body(reading: &Reading) -> String {
    format!(
        "{{\"temperature\": {:.2}, \"humidity\": {:.2}, \"aqi\": {}}}",
        reading.temperature_c, reading.humidity_pct, reading.gas_raw
    )
}

pub fn run_prediction_cycle<S, L, T>(
    sensors: &mut S,
    link: &L,
    transport: &mut T,
    endpoint: &str,
    state: &mut PredictionState,
) -> CycleOutcome
where
    S: SensorSource,
    L: NetworkLink + ?Sized,
    T: PredictionTransport,
{
    if !link.is_connected() {
        warn!("wifi not connected; skipping prediction request");
        return state.record(CycleOutcome::SkippedLinkDown);
    }

    let reading = sensors.read();
    if !reading.is_valid() {
        warn!("failed to read from DHT sensor; skipping prediction request");
        return state.record(CycleOutcome::SkippedSensorFault);
    }

    let payload = build_request_body(&reading);
    debug!("POST {endpoint} {payload}");

    let response = match transport.post_json(endpoint, &payload) {
        Ok(response) => response,
        Err(err) => {
            warn!("error on sending prediction POST: {err}");
            return state.record(CycleOutcome::TransportFailed(err.0));
        }
    };

    info!(
        "prediction response (HTTP {}): {}",
        response.status, response.body
    );

    match parse_predictions(&response.body) {
        Ok(values) => {
            if !values.lenient_fields.is_empty() {
                warn!(
                    "prediction fields parsed leniently as 0.0: {}",
                    values.lenient_fields.join(", ")
                );
            }
            state.apply(&values);
            info!(
                "predictions parsed: temperature {:.2} °C, humidity {:.2} %, aqi {:.2}",
                values.temperature_c, values.humidity_pct, values.aqi
            );
            state.record(CycleOutcome::Updated)
        }
        Err(err) => {
            warn!("failed to parse prediction response: {err}");
            state.record(CycleOutcome::ParseFailed(err))
        }
    }
}
