//! Extraction of the next-day forecast from the inference service response.
//!
//! The body is scanned with literal substring search rather than decoded as
//! JSON. The `next_day_predictions` label anchors a section running to the end
//! of the body; each leaf value starts right after its label and stops at the
//! first `,` or `}`. There is no brace-depth tracking, so a duplicated label
//! later in the body is never seen and an earlier one always wins.

pub const SECTION_LABEL: &str = "\"next_day_predictions\":";

const AQI_LABEL: &str = "\"aqi\":";
const HUMIDITY_LABEL: &str = "\"humidity\":";
const TEMPERATURE_LABEL: &str = "\"temperature\":";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("response has no `next_day_predictions` section")]
    MissingSection,
    #[error("prediction section has no `{0}` field")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionValues {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub aqi: f32,
    /// Fields whose span was not a finite number and fell back to 0.0.
    pub lenient_fields: Vec<&'static str>,
}

pub fn parse_predictions(body: &str) -> Result<PredictionValues, ParseError> {
    let section_start = body.find(SECTION_LABEL).ok_or(ParseError::MissingSection)?;
    let section = &body[section_start..];

    // Every label must be present before any value is taken.
    let aqi_span = value_span(section, AQI_LABEL).ok_or(ParseError::MissingField("aqi"))?;
    let humidity_span =
        value_span(section, HUMIDITY_LABEL).ok_or(ParseError::MissingField("humidity"))?;
    let temperature_span =
        value_span(section, TEMPERATURE_LABEL).ok_or(ParseError::MissingField("temperature"))?;

    let mut lenient_fields = Vec::new();
    let aqi = lenient_f32(aqi_span, "aqi", &mut lenient_fields);
    let humidity_pct = lenient_f32(humidity_span, "humidity", &mut lenient_fields);
    let temperature_c = lenient_f32(temperature_span, "temperature", &mut lenient_fields);

    Ok(PredictionValues {
        temperature_c,
        humidity_pct,
        aqi,
        lenient_fields,
    })
}

fn value_span<'a>(section: &'a str, label: &str) -> Option<&'a str> {
    let start = section.find(label)? + label.len();
    let rest = &section[start..];
    let end = rest.find([',', '}']).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn lenient_f32(span: &str, field: &'static str, lenient_fields: &mut Vec<&'static str>) -> f32 {
    match span.parse::<f32>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            lenient_fields.push(field);
            0.0
        }
    }
}
