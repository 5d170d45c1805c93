//! `pilot`: drive a desktop or browser toward an objective with a generative model.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use pilot::core::extract::parse_reply;
use pilot::core::session::Session;
use pilot::core::types::Mode;
use pilot::exit_codes;
use pilot::io::config::{ConfigError, Credentials, PilotConfig, load_config, load_dotenv};
use pilot::io::desktop::DesktopBackend;
use pilot::io::effector::Effector;
use pilot::io::executor::ActionExecutor;
use pilot::io::generator::{ActionGenerator, GenerationError, GeneratorSettings};
use pilot::io::model::{GeminiClient, ModelError};
use pilot::io::pause::ThreadPause;
use pilot::io::perception::Perceive;
use pilot::io::webdriver::BrowserBackend;
use pilot::logging;
use pilot::looping::{SessionReport, require_objective, run_session, run_supplied};
use pilot::status::check_status;
use pilot::step::IterationReport;

#[derive(Parser)]
#[command(
    name = "pilot",
    version,
    about = "Perception-action control loop for desktop and browser automation"
)]
struct Cli {
    /// Configuration file; defaults apply when it is missing.
    #[arg(long, global = true, default_value = "pilot.toml")]
    config: PathBuf,

    /// Debug diagnostics on stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a session until done, no further actions, or the iteration ceiling.
    Run {
        #[arg(short, long)]
        objective: String,
        /// desktop or browser; defaults to the configured mode.
        #[arg(long)]
        mode: Option<Mode>,
    },
    /// Execute a JSON action list once, without the model.
    Exec {
        #[arg(short, long)]
        objective: String,
        /// File holding a JSON array of operations.
        #[arg(long)]
        actions: PathBuf,
        #[arg(long)]
        mode: Option<Mode>,
    },
    /// Ask the model for one batch and print it without executing.
    Generate {
        #[arg(short, long)]
        objective: String,
        #[arg(long)]
        mode: Option<Mode>,
    },
    /// Check configuration, credentials and the browser driver.
    Status {
        #[arg(long)]
        mode: Option<Mode>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    load_dotenv();
    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Command::Run { objective, mode } => cmd_run(cli, objective, *mode),
        Command::Exec {
            objective,
            actions,
            mode,
        } => cmd_exec(cli, objective, actions, *mode),
        Command::Generate { objective, mode } => cmd_generate(cli, objective, *mode),
        Command::Status { mode } => cmd_status(cli, *mode),
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        exit_codes::CONFIG
    } else if err.downcast_ref::<ModelError>().is_some()
        || err.downcast_ref::<GenerationError>().is_some()
    {
        exit_codes::MODEL
    } else {
        exit_codes::INVALID
    }
}

fn load(cli: &Cli) -> Result<PilotConfig> {
    Ok(load_config(&cli.config)?)
}

fn model_client(config: &PilotConfig) -> Result<GeminiClient> {
    let credentials = Credentials::from_env(&config.model.api_key_env)?;
    Ok(GeminiClient::new(&config.model, credentials)?)
}

fn cmd_run(cli: &Cli, objective: &str, mode: Option<Mode>) -> Result<i32> {
    let objective = require_objective(objective)?;
    let config = load(cli)?;
    let mode = mode.unwrap_or(config.mode);
    let model = model_client(&config)?;
    match mode {
        Mode::Desktop => {
            let backend = DesktopBackend::new(&config.desktop, &config.screenshot_path);
            drive(cli, objective, &config, mode, &model, &backend)
        }
        Mode::Browser => {
            let backend = BrowserBackend::new(&config.browser, &config.screenshot_path)
                .context("create browser backend")?;
            drive(cli, objective, &config, mode, &model, &backend)
        }
    }
}

fn drive<B: Perceive + Effector>(
    cli: &Cli,
    objective: &str,
    config: &PilotConfig,
    mode: Mode,
    model: &GeminiClient,
    backend: &B,
) -> Result<i32> {
    let pause = ThreadPause;
    let settings = GeneratorSettings::from_config(config, mode);
    let generator = ActionGenerator::new(model, backend, &pause, settings)?;
    let executor = ActionExecutor::new(backend, &pause, config.browser.snapshot_every);
    let json = cli.json;
    let report = run_session(
        objective,
        &generator,
        &executor,
        config.max_iterations,
        |iteration| {
            if !json {
                print_progress(iteration);
            }
        },
    );
    print_report(cli, &report)?;
    Ok(report.exit_code())
}

fn cmd_exec(cli: &Cli, objective: &str, actions: &Path, mode: Option<Mode>) -> Result<i32> {
    let objective = require_objective(objective)?;
    let config = load(cli)?;
    let mode = mode.unwrap_or(config.mode);
    let contents = fs::read_to_string(actions)
        .with_context(|| format!("read actions {}", actions.display()))?;
    let batch =
        parse_reply(&contents).with_context(|| format!("parse actions {}", actions.display()))?;
    let pause = ThreadPause;
    let report = match mode {
        Mode::Desktop => {
            let backend = DesktopBackend::new(&config.desktop, &config.screenshot_path);
            let executor = ActionExecutor::new(&backend, &pause, config.browser.snapshot_every);
            run_supplied(objective, batch, &executor)
        }
        Mode::Browser => {
            let backend = BrowserBackend::new(&config.browser, &config.screenshot_path)
                .context("create browser backend")?;
            let executor = ActionExecutor::new(&backend, &pause, config.browser.snapshot_every);
            run_supplied(objective, batch, &executor)
        }
    };
    print_report(cli, &report)?;
    Ok(report.exit_code())
}

fn cmd_generate(cli: &Cli, objective: &str, mode: Option<Mode>) -> Result<i32> {
    let objective = require_objective(objective)?;
    let config = load(cli)?;
    let mode = mode.unwrap_or(config.mode);
    let model = model_client(&config)?;
    match mode {
        Mode::Desktop => {
            let backend = DesktopBackend::new(&config.desktop, &config.screenshot_path);
            generate_once(objective, &config, mode, &model, &backend)
        }
        Mode::Browser => {
            let backend = BrowserBackend::new(&config.browser, &config.screenshot_path)
                .context("create browser backend")?;
            generate_once(objective, &config, mode, &model, &backend)
        }
    }
}

fn generate_once<P: Perceive>(
    objective: &str,
    config: &PilotConfig,
    mode: Mode,
    model: &GeminiClient,
    perception: &P,
) -> Result<i32> {
    let pause = ThreadPause;
    let generator = ActionGenerator::new(
        model,
        perception,
        &pause,
        GeneratorSettings::from_config(config, mode),
    )?;
    let session = Session::new(objective, generator.instructions(objective)?);
    let generation = generator.generate(&session)?;
    let batch = Value::Array(generation.batch.into_iter().map(Value::Object).collect());
    write_stdout(&serde_json::to_string_pretty(&batch).context("serialize batch")?)?;
    Ok(exit_codes::OK)
}

fn cmd_status(cli: &Cli, mode: Option<Mode>) -> Result<i32> {
    let config = load(cli)?;
    let mode = mode.unwrap_or(config.mode);
    let report = check_status(&cli.config, &config, mode);
    if cli.json {
        write_json(&report)?;
    } else {
        write_stdout(&report.render())?;
    }
    Ok(report.exit_code())
}

fn print_progress(iteration: &IterationReport) {
    let succeeded = iteration.outcomes.iter().filter(|o| o.succeeded).count();
    println!(
        "iteration {}: {}/{} actions succeeded",
        iteration.iteration,
        succeeded,
        iteration.outcomes.len()
    );
    for outcome in iteration.outcomes.iter().filter(|o| !o.succeeded) {
        println!(
            "  step {} {}: {}",
            outcome.step,
            outcome.kind,
            outcome.error.as_deref().unwrap_or("failed")
        );
    }
}

fn print_report(cli: &Cli, report: &SessionReport) -> Result<()> {
    if cli.json {
        write_json(report)
    } else {
        write_stdout(&report.summary_line())
    }
}

fn write_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize report")?;
    write_stdout(&payload)
}

fn write_stdout(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}").context("write stdout")?;
    Ok(())
}
