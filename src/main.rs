//! repack CLI: copy objects and their dependency closures into a new container.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use repack::{ContainerInspector, IdOrder, RepackConfig, RepackError, RepackSession, Result};

#[derive(Parser)]
#[command(name = "repack", version, about = "Repack asset container objects into a new container")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect roots and everything they reference into one output container.
    Pack {
        /// Containers whose matching objects become roots.
        containers: Vec<String>,

        /// Directory containers and side-car streams are resolved against.
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Explicit root as `container:local_id`.
        #[arg(long = "root")]
        roots: Vec<String>,

        /// Only objects of this type id become roots (repeatable).
        #[arg(long = "root-type")]
        root_types: Vec<i32>,

        /// Case-insensitive regex on root names (repeatable).
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Type id that is never copied (repeatable).
        #[arg(long = "opaque")]
        opaque: Vec<i32>,

        /// TOML configuration file; flags are added on top.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Name written into the output container.
        #[arg(long)]
        name: Option<String>,

        /// New id ordering.
        #[arg(long, value_enum)]
        id_order: Option<OrderArg>,

        /// Output path.
        #[arg(short, long)]
        output: PathBuf,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the structure of a container.
    Inspect {
        /// Container to inspect.
        path: PathBuf,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Discovery,
    Source,
}

impl From<OrderArg> for IdOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Discovery => IdOrder::Discovery,
            OrderArg::Source => IdOrder::Source,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Pack {
            containers,
            dir,
            roots,
            root_types,
            patterns,
            opaque,
            config,
            name,
            id_order,
            output,
            json,
        } => {
            let mut cfg = match config {
                Some(path) => RepackConfig::load(&path)?,
                None => RepackConfig::default(),
            };
            cfg.root_types.extend(root_types);
            cfg.name_patterns.extend(patterns);
            cfg.opaque_types.extend(opaque);
            if let Some(name) = name {
                cfg.container_name = name;
            }
            if let Some(order) = id_order {
                cfg.id_order = order.into();
            }

            let mut session = RepackSession::open(dir, cfg)?;
            for container in &containers {
                session.select_roots(container)?;
            }
            for root in &roots {
                let (container, local_id) = parse_root(root)?;
                session.add_root(container, local_id, None)?;
            }
            if session.forest().roots().is_empty() {
                return Err(RepackError::Config("no roots selected".into()));
            }

            let report = session.write(&output)?;
            if json {
                let text = serde_json::to_string_pretty(&report)
                    .map_err(|e| RepackError::Serialization(e.to_string()))?;
                println!("{text}");
            } else {
                println!(
                    "{}: {} objects, {} dependencies, {} excluded",
                    output.display(),
                    report.written.len(),
                    report.dependencies.len(),
                    report.excluded.len()
                );
                for ex in &report.excluded {
                    println!("  excluded {}:{}: {}", ex.source, ex.source_id, ex.reason);
                }
            }
            Ok(())
        }
        Commands::Inspect { path, json } => {
            let report = ContainerInspector::inspect(&path)?;
            if json {
                let text = serde_json::to_string_pretty(&report)
                    .map_err(|e| RepackError::Serialization(e.to_string()))?;
                println!("{text}");
            } else {
                print!("{report}");
            }
            Ok(())
        }
    }
}

/// Splits `container:local_id`, splitting at the last colon.
fn parse_root(arg: &str) -> Result<(&str, i64)> {
    let invalid = || RepackError::Config(format!("root `{arg}` is not `container:local_id`"));
    let (container, id) = arg.rsplit_once(':').ok_or_else(invalid)?;
    let local_id = id.parse().map_err(|_| invalid())?;
    Ok((container, local_id))
}
