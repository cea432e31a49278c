//! CLI entry point for rust_scan
//!
//! Runs the scan engine against mock hardware:
//! - `scan`: execute the configured step scan (Ctrl+C cancels it)
//! - `fly`: measure the detector rate, then fly the configured grid
//! - `continuous`: sample the detector at a fixed rate for a while
//! - `preview`: print the trajectory and motion estimates without moving
//! - `show-config`: print the effective configuration as TOML
//!
//! # Usage
//!
//! ```bash
//! rust_scan --config config/scan.toml scan --pattern raster --output scan.json
//! RUST_SCAN_CONTINUOUS__SAMPLE_RATE_HZ=50 rust_scan continuous --seconds 5
//! rust_scan fly --output fly.json
//! rust_scan preview
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_scan::config::{ScanEngineConfig, DEFAULT_CONFIG_PATH};
use rust_scan::events::{DomainEvent, EventBus, EventType};
use rust_scan::experiment::rate_measurement::DEFAULT_WARMUP_SAMPLES;
use rust_scan::experiment::{
    AcquisitionRateMeter, ContinuousAcquisitionExecutor, ScanApplicationService,
};
use rust_scan::hardware::mock::{MockAcquisitionDevice, MockMotionStage, StageLimits};
use rust_scan::hardware::MotionPort;
use rust_scan::logging::{self, OutputFormat, TracingConfig};
use rust_scan::output::{LogPresenter, ScanOutputBridge};
use rust_scan::scan::{ScanPattern, ScanTrajectoryFactory, StepScanConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rust_scan")]
#[command(about = "Step-scan execution engine running on mock hardware", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the configured step scan
    Scan {
        /// Override the scan pattern
        #[arg(long)]
        pattern: Option<ScanPattern>,

        /// Write the finished scan (config, motions, results) as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Measure the detector rate, then fly the configured grid
    Fly {
        /// Write the finished fly scan (config, segments, samples) as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run a continuous acquisition
    Continuous {
        /// How long to sample before stopping
        #[arg(long, default_value_t = 2.0)]
        seconds: f64,
    },

    /// Print the planned trajectory without moving the stage
    Preview {
        /// Override the scan pattern
        #[arg(long)]
        pattern: Option<ScanPattern>,
    },

    /// Print the effective configuration after all sources are merged
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ScanEngineConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    logging::init(TracingConfig::from_config(&config)?.with_format(cli.log_format))?;

    match cli.command {
        Commands::Scan { pattern, output } => run_scan(&config, pattern, output).await,
        Commands::Fly { output } => run_fly_scan(&config, output).await,
        Commands::Continuous { seconds } => run_continuous(&config, seconds).await,
        Commands::Preview { pattern } => preview(&config, pattern).await,
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Scan configuration checked against the limits the stage reports.
async fn scan_config(
    config: &ScanEngineConfig,
    stage: &dyn MotionPort,
    pattern: Option<ScanPattern>,
) -> Result<StepScanConfig> {
    let mut settings = config.scan.clone();
    if let Some(pattern) = pattern {
        settings.pattern = pattern;
    }
    let limits = stage.get_axis_limits().await?;
    Ok(settings.to_domain_within(limits)?)
}

fn mock_stage(config: &ScanEngineConfig) -> MockMotionStage {
    MockMotionStage::builder()
        .limits(StageLimits::hard_stop(
            config.mock.stage_max_x_mm,
            config.mock.stage_max_y_mm,
        ))
        .profile(config.motion.fast_profile)
        .mode(config.mock.mode)
        .error_config(config.mock.error_config())
        .build()
}

fn mock_detector(config: &ScanEngineConfig) -> MockAcquisitionDevice {
    let builder = MockAcquisitionDevice::builder()
        .noise_amplitude(config.mock.noise_amplitude_volts)
        .quantification_noise(config.mock.quantification_noise_volts)
        .mode(config.mock.mode)
        .error_config(config.mock.error_config());
    match config.mock.seed {
        Some(seed) => builder.seed(seed).build(),
        None => builder.build(),
    }
}

async fn run_scan(
    config: &ScanEngineConfig,
    pattern: Option<ScanPattern>,
    output: Option<PathBuf>,
) -> Result<()> {
    let stage = Arc::new(mock_stage(config));
    let scan = scan_config(config, stage.as_ref(), pattern).await?;
    println!(
        "Scanning {} points ({}), estimated {:.1} s. Press Ctrl+C to cancel.",
        scan.total_points(),
        scan.pattern(),
        scan.estimated_duration().as_secs_f64()
    );

    let bus = Arc::new(EventBus::new());
    let _bridge = ScanOutputBridge::attach(Arc::clone(&bus), Arc::new(LogPresenter));

    let service = Arc::new(
        ScanApplicationService::new(
            stage,
            Arc::new(mock_detector(config)),
            Arc::clone(&bus),
        )
        .with_selector(config.selector()?)
        .with_settings(config.service_settings()),
    );

    let mut handle = Arc::clone(&service).spawn_scan(scan);
    let completed = tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nCancelling scan...");
            service.cancel_scan();
            handle.await?
        }
    };

    if let Some(scan) = service.take_last_scan() {
        println!(
            "Scan {} finished {} with {}/{} points",
            scan.id(),
            scan.status(),
            scan.results().len(),
            scan.total_points()
        );
        if let Some(reason) = scan.failure_reason() {
            println!("  reason: {reason}");
        }
        if let Some(path) = output {
            let file = std::fs::File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), &scan)?;
            println!("Results written to {}", path.display());
        }
    }

    if completed {
        Ok(())
    } else {
        anyhow::bail!("scan did not complete")
    }
}

async fn run_fly_scan(config: &ScanEngineConfig, output: Option<PathBuf>) -> Result<()> {
    let stage = Arc::new(mock_stage(config));
    let detector = Arc::new(mock_detector(config));
    let limits = stage.get_axis_limits().await?;
    let fly = config.fly_scan_config_within(limits)?;

    println!(
        "Measuring detector rate for {:?}...",
        config.fly_scan.rate_measurement_window
    );
    let capability = AcquisitionRateMeter::new()
        .measure(
            detector.as_ref(),
            config.fly_scan.rate_measurement_window,
            DEFAULT_WARMUP_SAMPLES,
        )
        .await
        .context("measuring acquisition rate")?;
    println!("Detector: {capability}");
    println!(
        "Flying {} grid points ({}) at {} Hz, needs {:.1} Hz. Press Ctrl+C to cancel.",
        fly.total_grid_points(),
        fly.pattern(),
        fly.acquisition_rate_hz(),
        fly.required_minimum_rate_hz()
    );

    let bus = Arc::new(EventBus::new());
    let _bridge = ScanOutputBridge::attach(Arc::clone(&bus), Arc::new(LogPresenter));
    let service = Arc::new(
        ScanApplicationService::new(stage, detector, Arc::clone(&bus))
            .with_settings(config.service_settings()),
    );

    let mut handle = Arc::clone(&service).spawn_fly_scan(fly, capability);
    let completed = tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nCancelling fly scan...");
            service.cancel_scan();
            handle.await?
        }
    };

    match service.take_last_fly_scan() {
        Some(scan) => {
            println!(
                "Fly scan {} finished {} with {}/{} samples",
                scan.id(),
                scan.status(),
                scan.results().len(),
                scan.expected_points()
            );
            if let Some(reason) = scan.failure_reason() {
                println!("  reason: {reason}");
            }
            if let Some(path) = output {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("creating {}", path.display()))?;
                serde_json::to_writer_pretty(std::io::BufWriter::new(file), &scan)?;
                println!("Results written to {}", path.display());
            }
        }
        None => println!("Fly scan refused, see the log for the reasons"),
    }

    if completed {
        Ok(())
    } else {
        anyhow::bail!("fly scan did not complete")
    }
}

async fn run_continuous(config: &ScanEngineConfig, seconds: f64) -> Result<()> {
    let run_for = Duration::try_from_secs_f64(seconds).context("invalid --seconds")?;
    let acquisition = config.continuous_config()?;

    let bus = Arc::new(EventBus::new());
    let samples = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&samples);
    bus.subscribe(EventType::ContinuousAcquisitionSampleAcquired, move |event| {
        if let DomainEvent::ContinuousAcquisitionSampleAcquired {
            sample_index,
            sample,
            ..
        } = event
        {
            counter.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(sample_index, magnitude = sample.in_phase_magnitude(), "Sample");
        }
        Ok(())
    });
    bus.subscribe(EventType::ContinuousAcquisitionFailed, |event| {
        if let DomainEvent::ContinuousAcquisitionFailed { reason, .. } = event {
            tracing::error!(reason, "Continuous acquisition failed");
        }
        Ok(())
    });

    let executor = ContinuousAcquisitionExecutor::new(Arc::clone(&bus))
        .with_stop_timeout(config.continuous.stop_timeout);
    let id = executor.start(acquisition, Arc::new(mock_detector(config)));
    println!(
        "Continuous acquisition {id} at {} Hz for {seconds} s",
        acquisition.sample_rate_hz()
    );

    tokio::select! {
        _ = tokio::time::sleep(run_for) => {}
        _ = tokio::signal::ctrl_c() => println!("\nStopping..."),
    }
    if !executor.stop().await {
        tracing::warn!("Acquisition worker did not stop in time");
    }

    println!("Acquired {} samples", samples.load(Ordering::Relaxed));
    Ok(())
}

async fn preview(config: &ScanEngineConfig, pattern: Option<ScanPattern>) -> Result<()> {
    let scan = scan_config(config, &mock_stage(config), pattern).await?;
    let trajectory = ScanTrajectoryFactory::create_trajectory(&scan);
    let motions = ScanTrajectoryFactory::create_motions(trajectory.points(), &config.selector()?)?;

    println!(
        "{} pattern, {} points, {:.3} mm of travel",
        scan.pattern(),
        trajectory.len(),
        trajectory.total_travel_distance()
    );
    for (index, position) in trajectory.iter().enumerate() {
        match index.checked_sub(1).and_then(|i| motions.get(i)) {
            Some(motion) => println!(
                "{index:4}  {position}  move {:.3} mm in {:.3} s (peak {:.2} mm/s)",
                motion.distance(),
                motion.estimated_duration_seconds(),
                motion
                    .motion_profile()
                    .phases(motion.distance())
                    .peak_speed
            ),
            None => println!("{index:4}  {position}  start"),
        }
    }

    let estimate = ScanTrajectoryFactory::estimate_scan_duration(&scan, &motions);
    println!("Estimated duration: {:.1} s", estimate.as_secs_f64());
    Ok(())
}
