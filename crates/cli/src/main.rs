mod cmd;
mod output;

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cmd::{BuildVariant, cmd_build, cmd_generate};

const USAGE: &str = "Missing argument : generate, build, build-wrapped or build-simple";

/// solvekit - submit container builds to a remote executor
#[derive(Parser)]
#[command(name = "solvekit")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// One of: generate, build, build-wrapped, build-simple
  #[arg(value_name = "COMMAND", allow_hyphen_values = true)]
  args: Vec<String>,
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let cli = Cli::parse();

  if let Err(err) = dispatch(&cli.args) {
    output::print_error(&format!("{:#}", err));
    std::process::exit(1);
  }
}

fn dispatch(args: &[String]) -> Result<()> {
  let [command] = args else {
    bail!(USAGE);
  };

  match command.as_str() {
    "generate" => cmd_generate(),
    "build" => cmd_build(BuildVariant::Callback),
    "build-wrapped" => cmd_build(BuildVariant::Wrapped),
    "build-simple" => cmd_build(BuildVariant::Simple),
    _ => bail!("Unknown arguments"),
  }
}
