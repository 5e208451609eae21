pub mod config;
pub mod dashboard;
pub mod hal;
pub mod parser;
pub mod prediction;
pub mod scheduler;
pub mod server;
pub mod types;

pub use config::{ConfigError, NetworkConfig, SensorPins, StationConfig};
pub use dashboard::render_dashboard;
pub use hal::{
    Clock, ConnectionSource, NetworkLink, PredictionTransport, SensorSource, TransportError,
    TransportResponse,
};
pub use parser::{parse_predictions, ParseError, PredictionValues};
pub use prediction::{build_request_body, run_prediction_cycle, CycleOutcome, PredictionState};
pub use scheduler::{CycleTimer, Station, TickReport};
pub use server::{serve_connection, ReadEnd, ServeSummary};
pub use types::{gas_voltage, AirQuality, Prediction, Reading, SensorFault};
