use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use loadcmd::config::Config;
use loadcmd::directive::{LoadCommandDirective, DIRECTIVE_NAME};
use loadcmd::ExecutionContext;

/// loadcmd - load a natively compiled command and run it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Load a command library and optionally invoke the command once
    Load {
        /// Command name; the library is <prefix>cm<NAME><suffix>
        name: String,

        /// Directories to search, `/*` expands subdirectories
        #[arg(required = true)]
        dirs: Vec<String>,

        /// Invoke the command even when no arguments follow `--`
        #[arg(long)]
        run: bool,

        /// Print the documentation the command publishes
        #[arg(long)]
        docs: bool,

        /// Arguments passed to the command after loading
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Show where a command library would be loaded from
    Probe {
        name: String,

        #[arg(required = true)]
        dirs: Vec<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct ProbeReport {
    command: String,
    module: String,
    searched: Vec<String>,
    found: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")?;

    let config = if let Some(config_path) = args.config {
        Config::load_from_file(&config_path)?
    } else {
        Config::load_default()?
    };

    match args.command {
        Action::Load {
            name,
            dirs,
            run,
            docs,
            args,
        } => load(&config, name, dirs, run || !args.is_empty(), docs, &args),
        Action::Probe { name, dirs, json } => probe(&config, &name, &dirs, json),
    }
}

fn load(
    config: &Config,
    name: String,
    dirs: Vec<String>,
    run: bool,
    docs: bool,
    args: &[String],
) -> Result<()> {
    let mut context = ExecutionContext::from_config(config);
    let directive = LoadCommandDirective::new(config);
    let report_var = directive.report_variable(&name);
    directive.install(&mut context);

    let mut directive_args = vec![name.clone()];
    directive_args.extend(dirs);
    context
        .invoke(DIRECTIVE_NAME, &directive_args)
        .with_context(|| format!("Failed to load command {name}"))?;

    if let Some(path) = context.definitions().get(&report_var) {
        println!("{report_var}={path}");
    }

    if docs {
        let documentation = context.commands().documentation(&name).unwrap_or_default();
        match documentation.terse {
            Some(terse) => println!("{name}: {terse}"),
            None => println!("{name}: no documentation"),
        }
        if let Some(full) = documentation.full {
            println!("{full}");
        }
    }

    if run {
        context
            .invoke(&name, args)
            .with_context(|| format!("Command {name} failed"))?;
    }
    context.end_scope();

    Ok(())
}

fn probe(config: &Config, name: &str, dirs: &[String], json: bool) -> Result<()> {
    let context = ExecutionContext::from_config(config);
    let directive = LoadCommandDirective::new(config);

    let module = directive.module_name(name, &context)?;
    let searched = directive.search_path(dirs);
    let report = ProbeReport {
        command: name.to_string(),
        module: module.clone(),
        searched: searched
            .dirs()
            .iter()
            .map(|dir| dir.display().to_string())
            .collect(),
        found: searched.find(&module).map(|path| path.display().to_string()),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize probe report")?
        );
        return Ok(());
    }

    println!("module: {}", report.module);
    for dir in &report.searched {
        println!("  searched: {dir}");
    }
    match &report.found {
        Some(path) => println!("found: {path}"),
        None => println!("not found"),
    }
    Ok(())
}
