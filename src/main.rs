use clap::{Parser, Subcommand};
use mini_assets::config;
use mini_assets::output::{self, Console};
use mini_assets::pipeline::{Pipeline, Stage, StagePlan};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn version_string() -> &'static str {
    let hash = env!("MINI_GIT_HASH");
    if hash.is_empty() {
        env!("CARGO_PKG_VERSION")
    } else {
        // Leaked once at startup
        Box::leak(format!("{} ({hash})", env!("CARGO_PKG_VERSION")).into_boxed_str())
    }
}

#[derive(Parser)]
#[command(name = "mini-assets")]
#[command(about = "Minify and gzip a tree of static web assets")]
#[command(long_about = "\
Minify and gzip a tree of static web assets

Runs six stages over every file under --path, writing results next to the
sources:

  Minifying html          *.html  →  name.min.html
  Minifying stylesheets   *.css   →  name.min.css
  Minifying scripts       *.js    →  name.min.js
  GZipping css            *.css   →  name.css.gz
  GZipping js             *.js    →  name.js.gz
  GZipping images         *.png … →  name.png.gz

Files named *.min.* and directories named lib, libs or vendor are never
minified; *.gz files are never gzipped.

Tools and patterns are read from mini.toml in the asset root when present.
Run 'mini-assets gen-config' to print a documented mini.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Colorize output
    #[arg(short, long, global = true)]
    color: bool,

    /// Report skipped files, commands run, and files written
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Static asset directory [default: current directory]
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,

    /// Repair template comparison operators in minified HTML
    #[arg(long, global = true)]
    fix_templates: bool,

    /// Config file to use instead of <path>/mini.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Kill a tool that runs longer than this many seconds on one file
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run all six stages (the default)
    Build,
    /// Print the resolved stages without running them
    Stages {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a stock mini.toml with all options documented
    GenConfig,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.unwrap_or(Command::Build);
    if let Command::GenConfig = command {
        print!("{}", config::stock_config_toml());
        return Ok(ExitCode::SUCCESS);
    }

    let root = match cli.path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let mut build_config = config::load_config(&root, cli.config.as_deref())?;
    if cli.fix_templates {
        build_config.fix_templates = true;
    }
    if let Some(secs) = cli.timeout {
        build_config.timeout_secs = secs;
    }
    let pipeline = Pipeline::from_config(&build_config, cli.verbose)?;
    let console = Console::new(cli.color);

    match command {
        Command::Stages { json: true } => {
            let plan: Vec<StagePlan> = pipeline.stages().iter().map(Stage::plan).collect();
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Command::Stages { json: false } => output::print_stage_plan(pipeline.stages(), &console),
        Command::Build | Command::GenConfig => {
            tracing::debug!(root = %root.display(), "starting build");
            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    output::print_build_event(&event, &console);
                }
            });
            let result = pipeline.run(&root, Some(&tx));
            drop(tx);
            printer.join().map_err(|_| "printer thread panicked")?;

            match result {
                Ok(report) => output::print_build_finished(report.elapsed, &console),
                Err(err) => {
                    output::print_build_failed(&err, &console);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Diagnostics go to stderr, filtered by `RUST_LOG`. Without it only warnings
/// are shown, plus this crate's debug events under `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "warn,mini_assets=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
