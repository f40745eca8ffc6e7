//! # Rain Bucket Application Entry Point
//!
//! This binary crate wires the rainfall engine to a tip source and a periodic
//! main loop. It supports both production mode (reed switch on a GPIO
//! interrupt) and development mode (synthetic showers, `--simulate`).


#[cfg(all(target_os = "linux", feature = "hardware"))]
mod gpio;
mod simulate;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rain_bucket_lib::{
    clock::{self, MonotonicClock},
    config::Config,
    storage, Millis, RainfallEngine, RainfallSink, Resume, StatisticsSnapshot, VERSION,
};
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct Options {
    /// Feed synthetic tips instead of the GPIO interrupt
    simulate: bool,
    /// Explicit configuration file
    config: Option<PathBuf>,
}

impl Options {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut options = Options::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--simulate" => options.simulate = true,
                "--config" => {
                    let path = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--config needs a path"))?;
                    options.config = Some(PathBuf::from(path));
                }
                other => anyhow::bail!("unknown argument: {}", other),
            }
        }
        Ok(options)
    }
}

/// Sink that logs every notification and keeps the snapshot file current.
///
/// The file is only touched once the boot epoch is known: before that tip
/// times are boot relative and the file still holds the previous boot's
/// rainfall.
struct Reporter {
    snapshot_path: PathBuf,
}

impl Reporter {
    fn new(snapshot_path: PathBuf) -> Self {
        Self { snapshot_path }
    }

    fn clear_snapshot(&self) {
        if let Err(e) = storage::clear(&self.snapshot_path) {
            warn!("Statistics snapshot not removed: {}", e);
        }
    }
}

/// Human readable tip time: UTC once the boot epoch is known, otherwise
/// seconds since boot
fn describe_tip_time(engine: &RainfallEngine, secs: u64) -> String {
    match engine
        .boot_epoch()
        .and_then(|_| DateTime::from_timestamp(secs as i64, 0))
    {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => format!("+{}s since boot", secs),
    }
}

/// Summary of a rainfall as it ends, with the level it ended at
fn describe_rainfall_end(engine: &RainfallEngine) -> String {
    format!(
        "Rainfall ended at {}: {:.2} mm in {} s, level {}",
        describe_tip_time(engine, engine.last_tip()),
        engine.volume(),
        engine.duration(),
        engine.intensity()
    )
}

impl RainfallSink for Reporter {
    fn on_rainfall_start(&mut self, engine: &RainfallEngine) {
        info!(
            "🌧️  Rainfall started at {} ({} tips)",
            describe_tip_time(engine, engine.first_tip()),
            engine.tips()
        );
    }

    fn on_rainfall_update(&mut self, engine: &RainfallEngine) {
        match serde_json::to_string(&engine.report()) {
            Ok(json) => info!("{}", json),
            Err(e) => warn!("Report serialization failed: {}", e),
        }
        if engine.boot_epoch().is_none() {
            return;
        }
        if let Err(e) = storage::save(&self.snapshot_path, &engine.export()) {
            warn!("Statistics snapshot not saved: {}", e);
        }
    }

    fn on_rainfall_stop(&mut self, engine: &RainfallEngine) {
        info!("☀️  {}", describe_rainfall_end(engine));
        if engine.boot_epoch().is_some() {
            self.clear_snapshot();
        }
    }
}

/// Snapshot left by the previous boot, if any.
fn load_snapshot(snapshot_path: &Path) -> Option<StatisticsSnapshot> {
    match storage::load(snapshot_path) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Ignoring statistics snapshot: {}", e);
            None
        }
    }
}

/// Set the boot epoch once the wall clock can be trusted, then resume the
/// rainfall of the previous boot. Returns `true` once the epoch is known.
///
/// The snapshot stays pending, and its file untouched, until then. Its last
/// tip also bounds the wall clock from below: a clock reading earlier than
/// a tip already on record is stale.
fn resolve_epoch(
    engine: &mut RainfallEngine,
    wall_clock: DateTime<Utc>,
    uptime: Duration,
    now: Millis,
    pending: &mut Option<StatisticsSnapshot>,
    sink: &mut Reporter,
) -> bool {
    if engine.boot_epoch().is_some() {
        return true;
    }
    let not_before = pending.map_or(0, |snapshot| snapshot.last_tip);
    let Some(epoch) = clock::boot_epoch_at(wall_clock, uptime, not_before) else {
        debug!("wall clock {} not trusted yet", wall_clock);
        return false;
    };
    engine.set_boot_epoch(epoch);

    if let Some(snapshot) = pending.take() {
        match engine.import(&snapshot, now, sink) {
            Resume::Resumed => {}
            Resume::Ended | Resume::Discarded => sink.clear_snapshot(),
            Resume::EpochUnknown => *pending = Some(snapshot),
        }
    }
    true
}

/// Periodic evaluation, the "main loop" of the gauge.
async fn run(
    mut engine: RainfallEngine,
    clock: MonotonicClock,
    period: Duration,
    mut sink: Reporter,
    mut pending: Option<StatisticsSnapshot>,
) {
    // A zero period would make the interval panic
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    loop {
        ticker.tick().await;
        let now = clock.millis();
        resolve_epoch(
            &mut engine,
            Utc::now(),
            clock.uptime(),
            now,
            &mut pending,
            &mut sink,
        );
        engine.measure(now, &mut sink);
    }
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = Options::parse(env::args().skip(1))?;
    info!("{}", VERSION);

    let config = match &options.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    let clock = MonotonicClock::new();
    let mut engine = RainfallEngine::new(&config.gauge);
    let snapshot_path = PathBuf::from(&config.storage.snapshot_path);
    let mut pending = load_snapshot(&snapshot_path);
    let mut sink = Reporter::new(snapshot_path);

    // Epoch first, so the snapshot maps onto this boot's clock
    if !resolve_epoch(
        &mut engine,
        Utc::now(),
        clock.uptime(),
        clock.millis(),
        &mut pending,
        &mut sink,
    ) {
        warn!("Wall clock not trusted yet, tip times stay relative to boot until it is");
    }

    // Create Tokio runtime for the ticker and the simulated tip source
    let rt = tokio::runtime::Runtime::new()?;

    // Development mode: synthetic showers
    if options.simulate {
        let capture = engine.capture();
        info!("🧪 Simulating tips (debounce {} ms)", capture.debounce_ms());
        rt.spawn(simulate::run(capture, clock));
        let period = Duration::from_millis(config.gauge.measure_period_ms);
        rt.block_on(run(engine, clock, period, sink, pending));
        return Ok(());
    }

    // Production mode: reed switch on a GPIO interrupt
    listen(&rt, &config, engine, clock, sink, pending)
}

/// Run the main loop with tips coming from the GPIO interrupt.
#[cfg(all(target_os = "linux", feature = "hardware"))]
fn listen(
    rt: &tokio::runtime::Runtime,
    config: &Config,
    engine: RainfallEngine,
    clock: MonotonicClock,
    sink: Reporter,
    pending: Option<StatisticsSnapshot>,
) -> anyhow::Result<()> {
    // The interrupt stays registered while the pin is alive
    let _input = gpio::attach(config.hardware.tip_pin, engine.capture(), clock)?;
    info!(
        "🔧 Listening for tips on GPIO {}, measuring every {} ms",
        config.hardware.tip_pin, config.gauge.measure_period_ms
    );
    let period = Duration::from_millis(config.gauge.measure_period_ms);
    rt.block_on(run(engine, clock, period, sink, pending));
    Ok(())
}

#[cfg(not(all(target_os = "linux", feature = "hardware")))]
fn listen(
    _rt: &tokio::runtime::Runtime,
    _config: &Config,
    _engine: RainfallEngine,
    _clock: MonotonicClock,
    _sink: Reporter,
    _pending: Option<StatisticsSnapshot>,
) -> anyhow::Result<()> {
    warn!("GPIO support not enabled. Rebuild with --features hardware on Linux, or use --simulate.");
    Err(anyhow::anyhow!("No tip source available"))
}
