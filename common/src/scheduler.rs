use log::{info, warn};

use crate::{
    config::StationConfig,
    dashboard::render_dashboard,
    hal::{Clock, ConnectionSource, NetworkLink, PredictionTransport, SensorSource},
    prediction::{run_prediction_cycle, CycleOutcome, PredictionState},
    server::{serve_connection, ServeSummary},
};

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub served: Option<ServeSummary>,
    pub cycle: Option<CycleOutcome>,
}

/// Decides when the next prediction cycle is due.
///
/// The anchor is the tick-start timestamp of the last cycle, so time spent
/// serving a connection or waiting on a slow POST in that tick is not
/// credited to the next interval.
#[derive(Debug, Clone)]
pub struct CycleTimer {
    interval_ms: u64,
    anchor_ms: u64,
}

impl CycleTimer {
    pub fn new(interval_ms: u64, boot_ms: u64) -> Self {
        Self {
            interval_ms,
            anchor_ms: boot_ms,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.anchor_ms) >= self.interval_ms
    }

    pub fn mark_started(&mut self, tick_start_ms: u64) {
        self.anchor_ms = tick_start_ms;
    }

    pub fn anchor_ms(&self) -> u64 {
        self.anchor_ms
    }
}

/// Everything the main loop owns. One thread drives it; connection servicing
/// and prediction cycles run strictly one after the other inside `tick`.
pub struct Station<S, L, T, A, K> {
    config: StationConfig,
    sensors: S,
    link: L,
    transport: T,
    acceptor: Option<A>,
    clock: K,
    state: PredictionState,
    timer: CycleTimer,
}

impl<S, L, T, A, K> Station<S, L, T, A, K>
where
    S: SensorSource,
    L: NetworkLink,
    T: PredictionTransport,
    A: ConnectionSource,
    K: Clock,
{
    /// `acceptor` is `None` when the link never came up at boot; the station
    /// then keeps running prediction cycles (which skip while the link is
    /// down) without serving the dashboard.
    pub fn new(
        config: StationConfig,
        sensors: S,
        link: L,
        transport: T,
        acceptor: Option<A>,
        clock: K,
    ) -> Self {
        let timer = CycleTimer::new(config.prediction_interval_ms, clock.now_ms());
        Self {
            config,
            sensors,
            link,
            transport,
            acceptor,
            clock,
            state: PredictionState::new(),
            timer,
        }
    }

    pub fn state(&self) -> &PredictionState {
        &self.state
    }

    pub fn timer(&self) -> &CycleTimer {
        &self.timer
    }

    pub fn sensors(&self) -> &S {
        &self.sensors
    }

    /// Boot-time cycle. Leaves the anchor at boot so the first scheduled
    /// cycle lands one interval after power-on.
    pub fn startup(&mut self) -> CycleOutcome {
        info!("running startup prediction cycle");
        self.run_cycle()
    }

    pub fn tick(&mut self) -> TickReport {
        let tick_start_ms = self.clock.now_ms();

        let served = self.serve_pending();

        let cycle = if self.timer.is_due(tick_start_ms) {
            let outcome = self.run_cycle();
            self.timer.mark_started(tick_start_ms);
            Some(outcome)
        } else {
            None
        };

        TickReport { served, cycle }
    }

    /// One loop pass. `on_idle` runs only when the pass neither served a
    /// client nor ran a cycle, so the caller can yield to other tasks there.
    pub fn step<F: FnMut()>(&mut self, on_idle: &mut F) -> TickReport {
        let report = self.tick();
        if report.served.is_none() && report.cycle.is_none() {
            on_idle();
        }
        report
    }

    pub fn run<F: FnMut()>(&mut self, mut on_idle: F) -> ! {
        info!(
            "station loop started (prediction every {} ms, read timeout {} ms)",
            self.config.prediction_interval_ms, self.config.read_timeout_ms
        );
        loop {
            self.step(&mut on_idle);
        }
    }

    fn serve_pending(&mut self) -> Option<ServeSummary> {
        let acceptor = self.acceptor.as_mut()?;
        let mut conn = match acceptor.poll_accept() {
            Ok(Some(conn)) => conn,
            Ok(None) => return None,
            Err(err) => {
                warn!("accept failed: {err}");
                return None;
            }
        };

        let sensors = &mut self.sensors;
        let prediction = self.state.prediction();
        let refresh_sec = self.config.page_refresh_sec;
        let interval_ms = self.config.prediction_interval_ms;

        let summary = serve_connection(&mut conn, &self.clock, self.config.read_timeout_ms, || {
            let reading = sensors.read();
            if let Some(fault) = reading.fault {
                warn!("{}; serving 0.0 sentinel", fault.as_str());
            }
            info!(
                "temperature: {:.1} °C, humidity: {:.1} %, MQ-135 raw: {}, voltage: {:.2} V",
                reading.temperature_c, reading.humidity_pct, reading.gas_raw, reading.gas_voltage
            );
            render_dashboard(&reading, prediction, refresh_sec, interval_ms)
        });
        Some(summary)
    }

    fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = run_prediction_cycle(
            &mut self.sensors,
            &self.link,
            &mut self.transport,
            &self.config.predict_endpoint,
            &mut self.state,
        );
        if let Some(last) = self.state.last_outcome() {
            info!(
                "prediction cycle {} ({}/{} successful)",
                last.as_str(),
                self.state.successful_cycles(),
                self.state.cycles_run()
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        io::{self, Read, Write},
        rc::Rc,
    };

    use super::*;
    use crate::{
        hal::{TransportError, TransportResponse},
        prediction::tests::{FakeLink, FakeSensors},
        server::tests::{MockConn, Step},
        types::Reading,
    };
    use pretty_assertions::assert_eq;

    const GOOD_BODY: &str =
        r#"{"next_day_predictions":{"aqi":104.18,"humidity":73.21,"temperature":31.71}}"#;

    /// Shared manual clock; the transport and acceptor advance it to model
    /// time spent inside blocking calls.
    #[derive(Clone)]
    struct ManualClock(Rc<Cell<u64>>);

    impl ManualClock {
        fn advance(&self, ms: u64) {
            self.0.set(self.0.get() + ms);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
    }

    struct RecordingTransport {
        clock: ManualClock,
        log: Rc<RefCell<Vec<String>>>,
        post_ms: u64,
    }

    impl PredictionTransport for RecordingTransport {
        fn post_json(&mut self, _url: &str, _body: &str) -> Result<TransportResponse, TransportError> {
            self.log.borrow_mut().push("cycle-start".to_string());
            self.clock.advance(self.post_ms);
            self.log.borrow_mut().push("cycle-end".to_string());
            Ok(TransportResponse {
                status: 200,
                body: GOOD_BODY.to_string(),
            })
        }
    }

    struct ScriptedAcceptor {
        clock: ManualClock,
        log: Rc<RefCell<Vec<String>>>,
        /// Clock times at which a client shows up.
        arrivals: Vec<u64>,
    }

    impl ConnectionSource for ScriptedAcceptor {
        type Conn = LoggedConn;

        fn poll_accept(&mut self) -> io::Result<Option<LoggedConn>> {
            let now = self.clock.now_ms();
            match self.arrivals.first() {
                Some(&at) if at <= now => {
                    self.arrivals.remove(0);
                    self.log.borrow_mut().push("serve-start".to_string());
                    Ok(Some(LoggedConn {
                        inner: MockConn::new(vec![Step::Data(b"GET / HTTP/1.1\r\n\r\n")]),
                        log: self.log.clone(),
                    }))
                }
                _ => Ok(None),
            }
        }
    }

    struct LoggedConn {
        inner: MockConn,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Read for LoggedConn {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Write for LoggedConn {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Drop for LoggedConn {
        fn drop(&mut self) {
            self.log.borrow_mut().push("serve-end".to_string());
        }
    }

    type TestStation =
        Station<FakeSensors, FakeLink, RecordingTransport, ScriptedAcceptor, ManualClock>;

    fn station(arrivals: Vec<u64>, post_ms: u64) -> (TestStation, ManualClock, Rc<RefCell<Vec<String>>>) {
        let clock = ManualClock(Rc::new(Cell::new(0)));
        let log = Rc::new(RefCell::new(Vec::new()));
        let station = Station::new(
            StationConfig::default(),
            FakeSensors::steady(Reading::from_parts(Some(28.5), Some(65.0), 150)),
            FakeLink(Cell::new(true)),
            RecordingTransport {
                clock: clock.clone(),
                log: log.clone(),
                post_ms,
            },
            Some(ScriptedAcceptor {
                clock: clock.clone(),
                log: log.clone(),
                arrivals,
            }),
            clock.clone(),
        );
        (station, clock, log)
    }

    #[test]
    fn timer_fires_once_per_interval() {
        let mut timer = CycleTimer::new(60_000, 0);

        assert!(!timer.is_due(59_999));
        assert!(timer.is_due(60_000));
        timer.mark_started(60_000);
        assert!(!timer.is_due(119_999));
        assert!(timer.is_due(120_000));
    }

    #[test]
    fn startup_cycle_keeps_boot_anchor() {
        let (mut station, clock, _log) = station(vec![], 5_000);

        assert_eq!(station.startup(), CycleOutcome::Updated);
        assert_eq!(clock.now_ms(), 5_000);
        assert_eq!(station.timer().anchor_ms(), 0);
        assert!(station.state().prediction().available);
    }

    #[test]
    fn cycle_runs_only_when_interval_elapsed() {
        let (mut station, clock, _log) = station(vec![], 0);

        clock.advance(59_999);
        assert_eq!(station.tick().cycle, None);

        clock.advance(1);
        assert_eq!(station.tick().cycle, Some(CycleOutcome::Updated));
        assert_eq!(station.timer().anchor_ms(), 60_000);

        clock.advance(30_000);
        assert_eq!(station.tick().cycle, None);
    }

    #[test]
    fn anchor_is_tick_start_even_after_slow_post() {
        let (mut station, clock, _log) = station(vec![], 45_000);

        clock.advance(60_000);
        station.tick();

        assert_eq!(clock.now_ms(), 105_000);
        assert_eq!(station.timer().anchor_ms(), 60_000);

        // Next cycle is due at 120_000, only 15 s after the slow POST returned.
        clock.advance(14_999);
        assert_eq!(station.tick().cycle, None);
        clock.advance(1);
        assert!(station.tick().cycle.is_some());
    }

    #[test]
    fn connection_and_cycle_never_overlap() {
        let (mut station, clock, log) = station(vec![0, 60_000, 60_000, 125_000], 3_000);

        for _ in 0..200 {
            station.tick();
            clock.advance(1_000);
        }

        let log = log.borrow();
        let mut serving = false;
        let mut cycling = false;
        for event in log.iter() {
            match event.as_str() {
                "serve-start" => {
                    assert!(!serving && !cycling, "overlap at {event}: {log:?}");
                    serving = true;
                }
                "serve-end" => serving = false,
                "cycle-start" => {
                    assert!(!serving && !cycling, "overlap at {event}: {log:?}");
                    cycling = true;
                }
                "cycle-end" => cycling = false,
                other => panic!("unexpected event {other}"),
            }
        }
        assert_eq!(log.iter().filter(|event| *event == "serve-start").count(), 4);
        assert_eq!(log.iter().filter(|event| *event == "serve-end").count(), 4);
        assert!(log.iter().any(|event| event == "cycle-start"));
    }

    #[test]
    fn connection_is_served_before_due_cycle() {
        let (mut station, clock, _log) = station(vec![60_000], 0);

        clock.advance(60_000);
        let report = station.tick();

        let served = report.served.expect("connection served");
        assert!(served.write_ok);
        assert_eq!(report.cycle, Some(CycleOutcome::Updated));
        assert_eq!(station.sensors().reads, 2);
    }

    #[test]
    fn no_listener_still_runs_cycles() {
        let clock = ManualClock(Rc::new(Cell::new(0)));
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut station: TestStation = Station::new(
            StationConfig::default(),
            FakeSensors::steady(Reading::from_parts(Some(20.0), Some(50.0), 80)),
            FakeLink(Cell::new(false)),
            RecordingTransport {
                clock: clock.clone(),
                log: log.clone(),
                post_ms: 0,
            },
            None,
            clock.clone(),
        );

        clock.advance(60_000);
        let report = station.tick();

        assert_eq!(report.served, None);
        assert_eq!(report.cycle, Some(CycleOutcome::SkippedLinkDown));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn idle_hook_runs_only_on_quiet_ticks() {
        let (mut station, clock, _log) = station(vec![1_000], 0);
        let mut idles = 0;
        let mut on_idle = || idles += 1;

        station.step(&mut on_idle);
        clock.advance(1_000);
        let served = station.step(&mut on_idle);
        clock.advance(59_000);
        let cycled = station.step(&mut on_idle);
        station.step(&mut on_idle);

        assert!(served.served.is_some());
        assert_eq!(cycled.cycle, Some(CycleOutcome::Updated));
        assert_eq!(idles, 2);
    }

    #[test]
    fn cycle_counters_follow_each_run() {
        let (mut station, clock, _log) = station(vec![], 0);

        station.startup();
        clock.advance(60_000);
        station.tick();

        assert_eq!(station.state().cycles_run(), 2);
        assert_eq!(station.state().successful_cycles(), 2);
        assert_eq!(
            station.state().last_outcome().map(CycleOutcome::as_str),
            Some("UPDATED")
        );
    }
}
