use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use opforge::batch::{ExpressionRequest, Shaping};
use opforge::config::Config;
use opforge::driver::Workspace;
use opforge::exprgen::AtomChoice;
use opforge::logging;
use opforge::operator::Shape;

#[derive(Parser)]
#[command(name = "opforge", version, about = "Synthesizes arithmetic operators and expressions over them")]
struct Cli {
    /// Workspace directory holding the operator and expression stores
    #[arg(short, long, env = "OPFORGE_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "OPFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured seed
    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum ShapeArg {
    Prefix,
    Postfix,
    Binary,
}

impl From<ShapeArg> for Shape {
    fn from(arg: ShapeArg) -> Self {
        match arg {
            ShapeArg::Prefix => Shape::Prefix,
            ShapeArg::Postfix => Shape::Postfix,
            ShapeArg::Binary => Shape::Binary,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create the operator store with seed and base operators
    Init,
    /// List registered operators
    List,
    /// Register an operator from a definition such as `a⊕b = { a*b+1 }`
    Define {
        symbol: String,
        #[arg(value_enum)]
        shape: ShapeArg,
        definition: String,
    },
    /// Synthesize operators of one order
    Operators {
        #[arg(short, long)]
        order: u32,
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },
    /// Reassign every priority and associativity
    Priorities,
    /// Print the expression grammar
    Grammar,
    /// Generate expression records
    Expressions {
        #[arg(short = 'n', long, default_value = "100")]
        count: usize,
        #[arg(long)]
        max_order: Option<u32>,
        /// Build every node from this operator id
        #[arg(long, conflicts_with = "single")]
        fixed: Option<String>,
        /// Apply this operator id once to literals
        #[arg(long)]
        single: Option<String>,
        /// Allow variables as leaves
        #[arg(long)]
        variables: bool,
    },
    /// Evaluate an expression in the current grammar
    Calc { expression: String },
    /// Remove an operator and everything depending on it
    Remove { id: String },
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    logging::init(&config.logging)?;

    match cli.command {
        Command::Init => {
            Workspace::init(&cli.workspace, config)?;
            Ok(())
        }
        command => execute(Workspace::open(&cli.workspace, config)?, command),
    }
}

fn execute(mut ws: Workspace, command: Command) -> Result<()> {
    match command {
        Command::Init => return Err(anyhow!("workspace is already initialized")),
        Command::List => {
            for op in ws.registry().operators_by_priority() {
                println!(
                    "{}\t{}\t{}\torder {}\tpriority {}\t{}",
                    op.id,
                    op.symbol,
                    op.shape(),
                    op.order,
                    op.priority.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                    op.definition_text.as_deref().unwrap_or("")
                );
            }
        }
        Command::Define {
            symbol,
            shape,
            definition,
        } => {
            let id = ws.define(&symbol, shape.into(), &definition)?;
            println!("{}", id);
        }
        Command::Operators { order, count } => {
            for id in ws.generate_operators(order, count)? {
                println!("{}", id);
            }
        }
        Command::Priorities => ws.assign_priorities()?,
        Command::Grammar => print!("{}", ws.grammar()?),
        Command::Expressions {
            count,
            max_order,
            fixed,
            single,
            variables,
        } => {
            let shaping = match (fixed, single) {
                (Some(id), _) => Shaping::FixedOperator(id),
                (None, Some(id)) => Shaping::SingleOperator(id),
                (None, None) => Shaping::Random,
            };
            let request = ExpressionRequest {
                shaping,
                max_order,
                atoms: if variables {
                    AtomChoice::VariableAndNumber
                } else {
                    AtomChoice::Number
                },
                ..ExpressionRequest::new(count, 0)
            };
            let batch = ws.generate_expressions(request)?;
            info!("{} written, {} skipped", batch.records.len(), batch.failed);
        }
        Command::Calc { expression } => println!("{}", ws.calculate(&expression)?),
        Command::Remove { id } => {
            let removed = ws.remove(&id)?;
            if removed.is_empty() {
                return Err(anyhow!("nothing removed"));
            }
            println!("removed {}", removed.join(" "));
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
