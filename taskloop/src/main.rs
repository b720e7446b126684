//! `taskloop`: let a language model build a project one task at a time.
//!
//! `taskloop run <WORKDIR>` plans the goal and executes tasks until the model
//! stops proposing work; `taskloop tasks <WORKDIR>` prints what a run stored;
//! `taskloop init <WORKDIR>` writes the default config for editing.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use taskloop::exit_codes;
use taskloop::io::config::{CONFIG_FILE, LoopConfig, load_config, write_config};
use taskloop::io::executor::SystemExecutor;
use taskloop::io::model::GeminiBackend;
use taskloop::io::store::TaskStore;
use taskloop::io::workspace::{Workspace, resolve_workdir};
use taskloop::logging;
use taskloop::looping::LoopStop;
use taskloop::run::{open_store, run_goal};
use taskloop::shutdown::install_shutdown_handler;

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Let a language model build a project one task at a time"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan a goal and execute tasks in WORKDIR until the model is done.
    Run {
        /// Project directory; created if missing.
        workdir: PathBuf,
        /// Goal to build. Read from the terminal when omitted.
        #[arg(long)]
        goal: Option<String>,
        /// Config file (default: `<WORKDIR>/taskloop.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write the default `taskloop.toml` into WORKDIR.
    Init {
        workdir: PathBuf,
        /// Replace an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Print the tasks stored in WORKDIR.
    Tasks {
        workdir: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    if let Err(err) = dotenvy::dotenv() {
        // A missing .env is the common case.
        if !err.not_found() {
            eprintln!("warning: failed to load .env: {err}");
        }
    }
    logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run {
            workdir,
            goal,
            config,
        } => cmd_run(&workdir, goal, config.as_deref()),
        Command::Init { workdir, force } => cmd_init(&workdir, force),
        Command::Tasks { workdir, config } => cmd_tasks(&workdir, config.as_deref()),
    };
    std::process::exit(code);
}

struct PreparedRun {
    workdir: PathBuf,
    config: LoopConfig,
    model: GeminiBackend,
    goal: String,
    store: Arc<TaskStore>,
}

fn cmd_run(workdir: &Path, goal: Option<String>, config: Option<&Path>) -> i32 {
    let prepared = match prepare_run(workdir, goal, config) {
        Ok(prepared) => prepared,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::INVALID;
        }
    };
    match execute_run(&prepared) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::FAULT
        }
    }
}

fn prepare_run(workdir: &Path, goal: Option<String>, config: Option<&Path>) -> Result<PreparedRun> {
    let workdir = resolve_workdir(workdir)?;
    let config_path = config.map_or_else(|| workdir.join(CONFIG_FILE), Path::to_path_buf);
    let config = load_config(&config_path)?;
    let model = GeminiBackend::from_env(&config.model, &config.generation)?;
    let goal = match goal {
        Some(goal) => goal,
        None => prompt_goal()?,
    };
    if goal.trim().is_empty() {
        bail!("goal must not be empty");
    }
    let store = open_store(&workdir, &config)?;
    debug!(workdir = %workdir.display(), "run prepared");
    Ok(PreparedRun {
        workdir,
        config,
        model,
        goal,
        store,
    })
}

fn execute_run(prepared: &PreparedRun) -> Result<i32> {
    let workspace = Workspace::new(prepared.workdir.clone());
    install_shutdown_handler(
        Arc::clone(&prepared.store),
        workspace.processes().tracker(),
    )?;
    let executor = SystemExecutor::from_config(&prepared.config.exec);
    let result = run_goal(
        workspace,
        &prepared.config,
        Arc::clone(&prepared.store),
        &prepared.goal,
        &prepared.model,
        &executor,
        |_| {},
    );
    if let Err(err) = prepared.store.close() {
        eprintln!("warning: {err:#}");
    }
    let report = result?;

    let steps = report.outcome.steps_executed;
    match report.outcome.stop {
        LoopStop::Complete => {
            println!("All tasks completed after {steps} step(s).");
        }
        LoopStop::MaxIterationsExceeded { max_iterations } => {
            println!("Stopped after reaching the limit of {max_iterations} step(s).");
        }
        LoopStop::Stalled { remaining } => {
            println!("Stopped after {steps} step(s): {remaining} task(s) still open but none pending.");
        }
    }
    Ok(exit_codes::OK)
}

fn prompt_goal() -> Result<String> {
    print!("What would you like to build? ");
    io::stdout().flush().context("flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read goal from stdin")?;
    Ok(line.trim().to_string())
}

fn cmd_init(workdir: &Path, force: bool) -> i32 {
    match init_config(workdir, force) {
        Ok(path) => {
            println!("Wrote {}", path.display());
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    }
}

fn init_config(workdir: &Path, force: bool) -> Result<PathBuf> {
    let workdir = resolve_workdir(workdir)?;
    let path = workdir.join(CONFIG_FILE);
    if path.exists() && !force {
        bail!("{} already exists (use --force to replace it)", path.display());
    }
    write_config(&path, &LoopConfig::default())?;
    Ok(path)
}

fn cmd_tasks(workdir: &Path, config: Option<&Path>) -> i32 {
    match print_tasks(workdir, config) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    }
}

fn print_tasks(workdir: &Path, config: Option<&Path>) -> Result<()> {
    if !workdir.is_dir() {
        bail!("working directory {} does not exist", workdir.display());
    }
    let config_path = config.map_or_else(|| workdir.join(CONFIG_FILE), Path::to_path_buf);
    let config = load_config(&config_path)?;
    let store_path = workdir.join(&config.run.store_file);
    if !store_path.is_file() {
        bail!("no task store at {}", store_path.display());
    }
    let store = TaskStore::open(&store_path)
        .with_context(|| format!("open task store {}", store_path.display()))?;
    for task in store.list()? {
        println!(
            "{:>4}  {:<11}  {}  {:<22}  {}",
            task.id,
            task.status.as_str(),
            task.retries,
            task.kind.as_str(),
            task.description
        );
    }
    store.close()?;
    Ok(())
}
