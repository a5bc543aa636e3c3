// src/main.rs
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info};

use bodesweep::config::{BodeConfig, TimingSettings};
use bodesweep::drivers::store::timestamped_name;
use bodesweep::drivers::{
    persist_sweep, replot, DatasetStore, LowPassCircuit, MeasurementPort, PlotStyle, ScpiPort,
    SerialLink, SimulatedScope, SweepController, SweepError,
};

/// Sweep a circuit with the oscilloscope's waveform generator and capture its frequency response
#[derive(Parser)]
#[command(name = "bodesweep", version)]
struct Cli {
    /// Start frequency [Hz]
    #[arg(long)]
    start: Option<f64>,

    /// Stop frequency [Hz]
    #[arg(long)]
    stop: Option<f64>,

    /// Number of sweep steps (at least 2)
    #[arg(long)]
    steps: Option<usize>,

    /// Serial device of the instrument, e.g. /dev/ttyUSB0
    #[arg(long)]
    port: Option<String>,

    #[arg(long)]
    baud: Option<u32>,

    /// Sweep a simulated low-pass circuit instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// Cutoff of the simulated circuit [Hz]
    #[arg(long, default_value_t = 1000.0, value_parser = parse_positive_hz)]
    sim_cutoff: f64,

    /// Relative measurement noise of the simulated scope
    #[arg(long, default_value_t = 0.0, value_parser = parse_noise)]
    sim_noise: f64,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// Dataset name; defaults to Bode_<unix seconds>
    #[arg(long)]
    name: Option<String>,

    /// Skip rendering the Bode plot image
    #[arg(long)]
    no_plot: bool,

    /// List the datasets saved in the data directory
    #[arg(long, conflicts_with = "replot")]
    list: bool,

    /// Reload a saved dataset and redo its summary and plot, without the instrument
    #[arg(long, value_name = "NAME")]
    replot: Option<String>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let style = PlotStyle::default();

    // 回放模式：不连接仪器，只处理已保存的数据
    if cli.list {
        return list_datasets(&config);
    }
    if let Some(name) = &cli.replot {
        replot(&config.output, &style, name)?;
        return Ok(());
    }

    let plan = config.plan;
    info!(
        "Start: {:.2} Hz | Stop: {:.2} Hz | Steps: {}",
        plan.start_freq_hz, plan.stop_freq_hz, plan.step_count
    );
    let name = cli.name.clone().unwrap_or_else(timestamped_name);

    let outcome = {
        let port = open_port(&cli, &config)?;
        let mut controller = SweepController::from_config(port, &config);
        controller
            .executor_mut()
            .initialize(config.timing.reset_settle())
            .context("instrument initialisation failed")?;
        controller.run(&plan)
        // Session is released here, before any file work.
    };

    let saved = persist_sweep(&outcome, &config.output, &style, &name);
    match outcome {
        Ok(_) => saved.map(|_| ()),
        Err(err) => {
            if let Err(save_err) = saved {
                error!("{save_err:#}");
            }
            if let SweepError::Aborted { .. } = err {
                error!("Please modify frequency range and try again...");
            }
            Err(err.into())
        }
    }
}

fn list_datasets(config: &BodeConfig) -> Result<()> {
    let store = DatasetStore::new(&config.output.data_dir);
    let names = store
        .list()
        .with_context(|| format!("failed to list {}", store.dir().display()))?;
    if names.is_empty() {
        info!("No datasets in {}", store.dir().display());
    }
    for (idx, name) in names.iter().enumerate() {
        println!("{:>3}: {name}", idx + 1);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<BodeConfig> {
    let mut config = match &cli.config {
        Some(path) => BodeConfig::load(path)?,
        None => BodeConfig::default(),
    };
    if let Some(start) = cli.start {
        config.plan.start_freq_hz = start;
    }
    if let Some(stop) = cli.stop {
        config.plan.stop_freq_hz = stop;
    }
    if let Some(steps) = cli.steps {
        config.plan.step_count = steps;
    }
    if let Some(port) = &cli.port {
        config.serial.path = Some(port.clone());
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(dir) = &cli.data_dir {
        config.output.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.image_dir {
        config.output.image_dir = dir.clone();
    }
    if cli.no_plot {
        config.output.render_plot = false;
    }
    if cli.simulate {
        config.timing = TimingSettings::immediate();
    }
    Ok(config)
}

fn open_port(cli: &Cli, config: &BodeConfig) -> Result<Box<dyn MeasurementPort>> {
    if cli.simulate {
        info!("Using simulated low-pass circuit, cutoff {:.1} Hz", cli.sim_cutoff);
        let scope = SimulatedScope::new(LowPassCircuit::new(cli.sim_cutoff)).with_noise(cli.sim_noise, 1);
        return Ok(Box::new(ScpiPort::new(scope)));
    }
    let Some(path) = config.serial.path.as_deref() else {
        bail!(
            "no instrument port given (use --port or --simulate); available: {:?}",
            SerialLink::available_ports()
        );
    };
    let link = SerialLink::from_settings(path, &config.serial)
        .with_context(|| format!("failed to open instrument on {path}"))?;
    Ok(Box::new(ScpiPort::new(link)))
}

fn parse_positive_hz(text: &str) -> Result<f64, String> {
    match text.parse::<f64>() {
        Ok(hz) if hz.is_finite() && hz > 0.0 => Ok(hz),
        Ok(_) => Err(format!("expected a positive frequency, got {text}")),
        Err(e) => Err(e.to_string()),
    }
}

fn parse_noise(text: &str) -> Result<f64, String> {
    match text.parse::<f64>() {
        Ok(fraction) if fraction.is_finite() && fraction >= 0.0 => Ok(fraction),
        Ok(_) => Err(format!("expected a finite fraction of at least 0, got {text}")),
        Err(e) => Err(e.to_string()),
    }
}
