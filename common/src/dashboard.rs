use core::fmt::Write as _;

use crate::types::{AirQuality, Prediction, Reading};

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8" />
<meta name="viewport" content="width=device-width, initial-scale=1" />
"#;

const PAGE_STYLE: &str = r#"<title>ClimeScope Environmental Dashboard</title>
<style>
:root{--bg:#fdf6e3;--card:rgba(255,255,240,.95);--pred:rgba(230,245,255,.95);--text:#222;--accent:#6b8e23;--pred-accent:#2196F3;--border:#d2c1a3}
body.dark{--bg:#2b2a28;--card:rgba(44,38,32,.85);--pred:rgba(32,44,52,.85);--text:#eee;--accent:#a1c181;--pred-accent:#64B5F6;--border:#5a5045}
html,body{margin:0;padding:0;font-family:Arial,sans-serif;background:var(--bg);color:var(--text)}
header{text-align:center;padding:24px 32px 8px}
h1{margin:0;color:var(--accent)}
.subtitle{opacity:.8;margin-top:6px}
.toggle-btn{margin-top:12px;padding:8px 20px;border:none;border-radius:20px;background:var(--accent);color:#fff;cursor:pointer}
.section-title{text-align:center;font-size:1.4rem;font-weight:700;margin:26px 0 6px;color:var(--accent)}
.section-subtitle{text-align:center;font-size:.9rem;opacity:.7;margin-bottom:16px}
.grid{display:grid;grid-template-columns:repeat(auto-fit,minmax(260px,1fr));gap:28px;padding:16px 32px;max-width:1100px;margin:auto}
.card{padding:22px 26px;border-radius:16px;border:1.5px solid var(--border);background:var(--card);text-align:center}
.card.prediction{background:var(--pred);border-color:var(--pred-accent)}
.label{font-weight:600;font-size:1.1rem;margin-bottom:8px}
.value{font-size:2rem;font-weight:700;margin-bottom:6px}
.interpretation{font-weight:600;color:var(--accent)}
.card.prediction .interpretation{color:var(--pred-accent)}
.prediction-badge{display:inline-block;padding:4px 12px;border-radius:12px;font-size:.75rem;font-weight:600;margin-bottom:8px;background:var(--pred-accent);color:#fff}
.fault{max-width:1100px;margin:12px auto;padding:10px 16px;border-radius:10px;background:#fbe3e3;color:#a00000;text-align:center}
.no-prediction{font-size:.9rem;opacity:.7;font-style:italic}
.info-section{max-width:1100px;margin:20px auto;padding:18px 24px;border-radius:16px;border:1.5px solid var(--border);background:var(--card)}
.info-section h2{margin-top:0;color:var(--accent)}
footer{text-align:center;padding:22px;font-size:.9rem;opacity:.7}
</style>
</head>
<body class="light">
<header>
  <h1>ClimeScope</h1>
  <div class="subtitle">ESP32 Environmental Monitoring Dashboard with AI Predictions</div>
  <button class="toggle-btn" onclick="document.body.classList.toggle('dark')">Toggle Dark/Light</button>
</header>
"#;

const PAGE_INFO: &str = r#"<div class="info-section">
  <h2>Hardware</h2>
  <ul>
    <li>ESP32 dev board</li>
    <li>DHT11 temperature &amp; humidity sensor</li>
    <li>MQ-135 air quality sensor (analog)</li>
  </ul>
  <h2>Air Quality Interpretation (MQ-135)</h2>
  <ul>
    <li>&lt; 150 : Excellent</li>
    <li>150&ndash;299 : Good</li>
    <li>300&ndash;449 : Fair</li>
    <li>450&ndash;599 : Poor</li>
    <li>&ge; 600 : Very Poor</li>
  </ul>
</div>
"#;

/// Renders the full dashboard document for one request.
pub fn render_dashboard(
    reading: &Reading,
    prediction: &Prediction,
    refresh_sec: u32,
    prediction_interval_ms: u64,
) -> String {
    let interval_sec = prediction_interval_ms / 1000;
    let mut page = String::with_capacity(8 * 1024);
    page.push_str(PAGE_HEAD);
    let _ = writeln!(
        page,
        "<meta http-equiv=\"refresh\" content=\"{refresh_sec}\" />"
    );
    page.push_str(PAGE_STYLE);

    if let Some(fault) = reading.fault {
        let _ = writeln!(
            page,
            "<div class=\"fault\">Sensor fault: {}. Showing 0.0 until the next good read.</div>",
            fault.as_str()
        );
    }

    page.push_str(
        "<div class=\"section-title\">Current Readings</div>\n\
         <div class=\"section-subtitle\">Real-time sensor data</div>\n\
         <div class=\"grid\">\n",
    );
    push_card(
        &mut page,
        "card",
        None,
        "Temperature",
        &format!("{:.1} &deg;C", reading.temperature_c),
        None,
    );
    push_card(
        &mut page,
        "card",
        None,
        "Humidity",
        &format!("{:.1} %", reading.humidity_pct),
        None,
    );
    push_card(
        &mut page,
        "card",
        None,
        "Air Quality (MQ-135)",
        &format!(
            "{}<br><span style='font-size:1rem;'>{:.2} V</span>",
            reading.gas_raw, reading.gas_voltage
        ),
        Some(reading.air_quality()),
    );
    page.push_str("</div>\n");

    let _ = write!(
        page,
        "<div class=\"section-title\">Next Day Predictions</div>\n\
         <div class=\"section-subtitle\">AI model predictions (updates every {interval_sec} seconds)</div>\n\
         <div class=\"grid\">\n"
    );

    if prediction.available {
        let badge = Some("AI PREDICTED");
        push_card(
            &mut page,
            "card prediction",
            badge,
            "Temperature",
            &format!("{:.2} &deg;C", prediction.temperature_c),
            None,
        );
        push_card(
            &mut page,
            "card prediction",
            badge,
            "Humidity",
            &format!("{:.2} %", prediction.humidity_pct),
            None,
        );
        push_card(
            &mut page,
            "card prediction",
            badge,
            "Air Quality Index",
            &format!("{:.2}", prediction.aqi),
            prediction.air_quality(),
        );
    } else {
        let _ = writeln!(
            page,
            "  <div class=\"card prediction\">\n    <div class=\"label\">Predictions Loading...</div>\n    \
             <div class=\"no-prediction\">Waiting for first prediction cycle<br>(Model updates every {interval_sec} seconds)</div>\n  </div>"
        );
    }
    page.push_str("</div>\n");

    page.push_str(PAGE_INFO);
    let _ = writeln!(
        page,
        "<footer>Page refreshes every {refresh_sec} seconds | Predictions update every {interval_sec} seconds</footer>\n</body>\n</html>"
    );
    page
}

fn push_card(
    page: &mut String,
    class: &str,
    badge: Option<&str>,
    label: &str,
    value: &str,
    band: Option<AirQuality>,
) {
    let _ = writeln!(page, "  <div class=\"{class}\">");
    if let Some(badge) = badge {
        let _ = writeln!(page, "    <div class=\"prediction-badge\">{badge}</div>");
    }
    let _ = writeln!(page, "    <div class=\"label\">{label}</div>");
    let _ = writeln!(page, "    <div class=\"value\">{value}</div>");
    if let Some(band) = band {
        let _ = writeln!(
            page,
            "    <div class=\"interpretation\">{}</div>",
            band.as_str()
        );
    }
    page.push_str("  </div>\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shows_loading_placeholder_until_available() {
        let reading = Reading::from_parts(Some(27.3), Some(61.0), 420);
        let page = render_dashboard(&reading, &Prediction::default(), 5, 60_000);

        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("content=\"5\""));
        assert!(page.contains("27.3 &deg;C"));
        assert!(page.contains("61.0 %"));
        assert!(page.contains("420<br>"));
        assert!(page.contains(">Fair<"));
        assert!(page.contains("Predictions Loading..."));
        assert!(page.contains("every 60 seconds"));
        assert!(!page.contains("AI PREDICTED"));
        assert!(page.trim_end().ends_with("</html>"));
    }

    #[test]
    fn shows_predicted_values_when_available() {
        let reading = Reading::from_parts(Some(30.0), Some(70.0), 100);
        let prediction = Prediction {
            temperature_c: 31.71,
            humidity_pct: 73.21,
            aqi: 104.18,
            available: true,
        };
        let page = render_dashboard(&reading, &prediction, 5, 60_000);

        assert!(page.contains("31.71 &deg;C"));
        assert!(page.contains("73.21 %"));
        assert!(page.contains("104.18"));
        assert_eq!(page.matches("AI PREDICTED").count(), 3);
        assert!(!page.contains("Predictions Loading"));
    }

    #[test]
    fn faulted_reading_shows_notice_and_zero_sentinel() {
        let page = render_dashboard(&Reading::faulted(50), &Prediction::default(), 5, 60_000);

        assert!(page.contains("Sensor fault: temperature/humidity sensor read failed"));
        assert!(page.contains("0.0 &deg;C"));
        assert!(page.contains("0.0 %"));
    }
}
