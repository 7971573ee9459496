//! Single-node Kubernetes host provisioner.
//!
//! `provisioner run` checks the host, then installs and initializes a
//! one-node cluster, mirroring all output to the terminal and syslog.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use provisioner::core::types::Plan;
use provisioner::exit_codes;
use provisioner::io::config::{DEFAULT_CONFIG_PATH, ProvisionConfig, load_config, write_config};
use provisioner::io::executor::SystemExecutor;
use provisioner::io::host::Host;
use provisioner::io::tee::Tee;
use provisioner::logging;
use provisioner::preflight::preflight;
use provisioner::provision::{plan_for, provision};

#[derive(Parser)]
#[command(
    name = "provisioner",
    version,
    about = "Provision a single-node Kubernetes cluster on this host"
)]
struct Cli {
    /// Filesystem root for host probes and file edits.
    #[arg(long, global = true, hide = true, default_value = "/")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the host and run every provisioning step, stopping at the first failure.
    Run {
        /// Config file; missing means built-in defaults.
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Check the host and print the steps `run` would execute.
    Plan {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Write the default config file.
    InitConfig {
        #[arg(default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let host = Host::new(&cli.root);
    let code = match cli.command {
        Command::Run { config } => cmd_run(&host, &config),
        Command::Plan { config, json } => cmd_plan(&host, &config, json),
        Command::InitConfig { path, force } => report(cmd_init_config(&path, force)),
    };
    std::process::exit(code);
}

fn report(result: Result<()>) -> i32 {
    match result {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::FAILED
        }
    }
}

fn cmd_run(host: &Host, config_path: &Path) -> i32 {
    let cfg = match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(err) => return report(Err(err)),
    };
    let tee = match Tee::terminal_and_syslog(&cfg.syslog_tag) {
        Ok(tee) => tee,
        Err(err) => return report(Err(err.context("start output tee"))),
    };
    let executor = SystemExecutor::new(host.clone(), Duration::from_secs(cfg.step_timeout_secs));

    let code = match provision(&cfg, host, &executor, &tee) {
        Ok(_) => exit_codes::OK,
        Err(err) => err.exit_code(),
    };
    if let Err(err) = tee.finish() {
        eprintln!("{:#}", err);
    }
    code
}

fn cmd_plan(host: &Host, config_path: &Path, json: bool) -> i32 {
    let cfg = match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(err) => return report(Err(err)),
    };
    let facts = match preflight(&cfg, host) {
        Ok(facts) => facts,
        Err(err) => {
            eprintln!("{err}");
            return err.exit_code();
        }
    };
    let plan = plan_for(&cfg, &facts);
    let rendered = if json {
        serde_json::to_string_pretty(&plan)
            .map(|mut out| {
                out.push('\n');
                out
            })
            .context("serialize plan")
    } else {
        Ok(render_plan(&plan))
    };
    match rendered {
        Ok(text) => {
            print!("{text}");
            exit_codes::OK
        }
        Err(err) => report(Err(err)),
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &ProvisionConfig::default())
}

/// Numbered steps, each followed by its indented actions.
fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    for (idx, step) in plan.steps.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", idx + 1, step.name);
        for action in &step.actions {
            let _ = writeln!(out, "   {action}");
        }
    }
    out
}
