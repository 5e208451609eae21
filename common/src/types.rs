pub const ADC_REFERENCE_VOLTS: f32 = 3.3;
pub const ADC_FULL_SCALE: f32 = 4095.0;

pub fn gas_voltage(raw: u16) -> f32 {
    raw as f32 * (ADC_REFERENCE_VOLTS / ADC_FULL_SCALE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AirQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    VeryPoor,
}

impl AirQuality {
    /// Bands are shared by the raw MQ-135 count and the predicted AQI.
    pub fn from_raw(value: f32) -> Self {
        if value < 150.0 {
            Self::Excellent
        } else if value < 300.0 {
            Self::Good
        } else if value < 450.0 {
            Self::Fair
        } else if value < 600.0 {
            Self::Poor
        } else {
            Self::VeryPoor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Poor => "Poor",
            Self::VeryPoor => "Very Poor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFault {
    /// The DHT driver returned no temperature/humidity sample.
    ClimateUnavailable,
}

impl SensorFault {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClimateUnavailable => "temperature/humidity sensor read failed",
        }
    }
}

/// One synchronous snapshot of the sensors.
///
/// On a DHT fault `temperature_c` and `humidity_pct` hold the 0.0 display
/// sentinel and `fault` says why.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub gas_raw: u16,
    pub gas_voltage: f32,
    pub fault: Option<SensorFault>,
}

impl Reading {
    /// Builds a reading from driver output; a missing or NaN climate sample
    /// marks the reading as faulted.
    pub fn from_parts(temperature_c: Option<f32>, humidity_pct: Option<f32>, gas_raw: u16) -> Self {
        match (
            temperature_c.filter(|value| !value.is_nan()),
            humidity_pct.filter(|value| !value.is_nan()),
        ) {
            (Some(temperature_c), Some(humidity_pct)) => Self {
                temperature_c,
                humidity_pct,
                gas_raw,
                gas_voltage: gas_voltage(gas_raw),
                fault: None,
            },
            _ => Self::faulted(gas_raw),
        }
    }

    pub fn faulted(gas_raw: u16) -> Self {
        Self {
            temperature_c: 0.0,
            humidity_pct: 0.0,
            gas_raw,
            gas_voltage: gas_voltage(gas_raw),
            fault: Some(SensorFault::ClimateUnavailable),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.fault.is_none()
    }

    pub fn air_quality(&self) -> AirQuality {
        AirQuality::from_raw(self.gas_raw as f32)
    }
}

/// Most recently parsed next-day forecast.
///
/// `available` flips to true on the first successful parse and never goes
/// back; later failures leave the previous values in place.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Prediction {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub aqi: f32,
    pub available: bool,
}

impl Prediction {
    pub fn air_quality(&self) -> Option<AirQuality> {
        self.available.then(|| AirQuality::from_raw(self.aqi))
    }
}
