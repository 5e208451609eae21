use core::convert::TryInto;
use std::{thread, time::Duration};

use anyhow::{anyhow, Context};
use dht_sensor::dht11;
use embedded_svc::{
    http::{client::Client as HttpClient, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    delay::{Ets, FreeRtos},
    gpio::{AnyIOPin, Gpio34, IOPin, InputOutput, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use climescope_common::{
    config::NetworkConfig, NetworkLink, PredictionTransport, Reading, SensorSource, Station,
    StationConfig, TransportError, TransportResponse,
};

use crate::net::{push_capped, DashboardListener, MonotonicClock};

const RESPONSE_CHUNK_SIZE: usize = 512;
const MAX_RESPONSE_BODY: usize = 4096;
/// One FreeRTOS tick; shorter waits busy-spin instead of yielding.
const IDLE_DELAY_MS: u32 = 10;

type GasChannel = AdcChannelDriver<'static, Gpio34, AdcDriver<'static, ADC1>>;

struct StationSensors {
    dht_pin: PinDriver<'static, AnyIOPin, InputOutput>,
    gas: GasChannel,
    delay: Ets,
}

impl StationSensors {
    fn new(dht_pin: AnyIOPin, adc: ADC1, gas_pin: Gpio34) -> anyhow::Result<Self> {
        let mut dht_pin = PinDriver::input_output_od(dht_pin)?;
        dht_pin.set_pull(Pull::Up)?;
        dht_pin.set_high()?;

        let adc = AdcDriver::new(adc).context("failed to initialize ADC1")?;
        let channel_config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        let gas = AdcChannelDriver::new(adc, gas_pin, &channel_config)
            .context("failed to initialize MQ-135 ADC channel")?;

        Ok(Self {
            dht_pin,
            gas,
            delay: Ets,
        })
    }

    fn read_climate(&mut self) -> (Option<f32>, Option<f32>) {
        if let Err(err) = self.dht_pin.set_high() {
            warn!("failed to set DHT11 line high before read: {err:?}");
            return (None, None);
        }

        match dht11::blocking::read(&mut self.delay, &mut self.dht_pin) {
            Ok(reading) => (
                Some(reading.temperature as f32),
                Some(reading.relative_humidity as f32),
            ),
            Err(err) => {
                warn!("failed to read DHT11: {err:?}");
                (None, None)
            }
        }
    }

    fn read_gas_raw(&mut self) -> u16 {
        match self.gas.read_raw() {
            Ok(raw) => raw,
            Err(err) => {
                warn!("failed to read MQ-135 ADC: {err:?}");
                0
            }
        }
    }
}

impl SensorSource for StationSensors {
    fn read(&mut self) -> Reading {
        let (temperature_c, humidity_pct) = self.read_climate();
        let gas_raw = self.read_gas_raw();
        Reading::from_parts(temperature_c, humidity_pct, gas_raw)
    }
}

struct WifiLink;

impl NetworkLink for WifiLink {
    fn is_connected(&self) -> bool {
        is_wifi_station_connected()
    }
}

struct EspPredictionTransport;

impl PredictionTransport for EspPredictionTransport {
    fn post_json(&mut self, url: &str, body: &str) -> Result<TransportResponse, TransportError> {
        let transport_err = |err: esp_idf_svc::io::EspIOError| TransportError(format!("{err:?}"));

        // No explicit timeout: the call is bounded only by the esp-idf client.
        let http_conf = HttpClientConfiguration {
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let mut client =
            HttpClient::wrap(EspHttpConnection::new(&http_conf).map_err(|err| {
                TransportError(format!("failed to create http client: {err:?}"))
            })?);

        let content_length = body.len().to_string();
        let headers = [
            ("Content-Type", "application/json"),
            ("Content-Length", content_length.as_str()),
        ];

        let mut request = client.post(url, &headers).map_err(transport_err)?;
        request.write_all(body.as_bytes()).map_err(transport_err)?;
        request.flush().map_err(transport_err)?;
        let mut response = request.submit().map_err(transport_err)?;

        let status = response.status();
        let mut raw = Vec::with_capacity(RESPONSE_CHUNK_SIZE);
        let mut chunk = [0_u8; RESPONSE_CHUNK_SIZE];
        loop {
            let read = response.read(&mut chunk).map_err(transport_err)?;
            if read == 0 {
                break;
            }
            if push_capped(&mut raw, &chunk[..read], MAX_RESPONSE_BODY) {
                warn!("prediction response truncated at {MAX_RESPONSE_BODY} bytes");
                break;
            }
        }

        Ok(TransportResponse {
            status,
            body: String::from_utf8_lossy(&raw).into_owned(),
        })
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let config = build_config()?;

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals {
        modem, pins, adc1, ..
    } = Peripherals::take()?;

    info!(
        "initializing sensors (DHT11 on GPIO{}, MQ-135 on GPIO{})",
        config.sensors.dht_pin, config.sensors.gas_adc_pin
    );
    let mut sensors = StationSensors::new(pins.gpio4.downgrade(), adc1, pins.gpio34)
        .context("failed to initialize sensors")?;
    thread::sleep(Duration::from_millis(config.sensors.warmup_ms));

    let initial = sensors.read();
    if initial.is_valid() {
        info!(
            "initial temperature: {:.1} °C, humidity: {:.1} %",
            initial.temperature_c, initial.humidity_pct
        );
    } else {
        warn!("initial sensor read failed");
    }

    let (wifi, connected) = connect_wifi(modem, sys_loop, nvs_partition, &config.network)
        .context("wifi startup failed")?;

    let listener = if connected {
        disable_wifi_power_save();
        match DashboardListener::bind(config.http_port) {
            Ok(listener) => {
                match listener.local_addr() {
                    Ok(addr) => info!("dashboard listening on {addr}"),
                    Err(_) => info!("dashboard listening on port {}", config.http_port),
                }
                Some(listener)
            }
            Err(err) => {
                warn!("failed to start dashboard server: {err}");
                None
            }
        }
    } else {
        warn!("failed to connect to wifi; dashboard disabled");
        None
    };

    // Keep the driver alive for the program lifetime.
    let _wifi = wifi;

    let mut station = Station::new(
        config,
        sensors,
        WifiLink,
        EspPredictionTransport,
        listener,
        MonotonicClock::new(),
    );
    station.startup();
    station.run(|| {
        feed_watchdog();
        FreeRtos::delay_ms(IDLE_DELAY_MS);
    })
}

fn build_config() -> anyhow::Result<StationConfig> {
    let mut config = StationConfig::default();
    config.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    config.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or_default().to_string();
    if let Some(endpoint) = option_env!("PREDICT_ENDPOINT") {
        config.predict_endpoint = endpoint.to_string();
    }

    config.sanitize();
    config.validate().context("invalid station config")?;
    Ok(config)
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<(EspWifi<'static>, bool)> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;

    if !has_station_credentials(network) {
        warn!("wifi credentials missing; build with WIFI_SSID/WIFI_PASS set");
        return Ok((esp_wifi, false));
    }

    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("connecting to wifi ssid `{}`", network.wifi_ssid);

    let mut connected = false;
    for attempt in 1..=network.connect_attempts {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                connected = true;
                break;
            }
            Err(err) => {
                warn!(
                    "wifi connect attempt {attempt}/{} failed: {err:#}",
                    network.connect_attempts
                );
            }
        }

        if attempt < network.connect_attempts {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(network.connect_retry_delay_ms));
        }
    }

    if connected {
        match wifi.wifi().sta_netif().get_ip_info() {
            Ok(ip_info) => info!("wifi connected, ip address {}", ip_info.ip),
            Err(err) => warn!("wifi connected but ip info unavailable: {err:?}"),
        }
    }

    drop(wifi);
    Ok((esp_wifi, connected))
}

fn has_station_credentials(network: &NetworkConfig) -> bool {
    let ssid = network.wifi_ssid.trim();
    !ssid.is_empty() && ssid != "CHANGE_ME"
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}
