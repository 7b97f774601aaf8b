use anyhow::Result;
use clap::{Parser, Subcommand};
use kubeload::{
	commands::{self, util::BrokenPipeGuard},
	telemetry::{self, LogFormat},
};
use tracing::Level;

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "kubeload")]
#[command(about = "List cluster objects and apply namespaced workloads", long_about = None)]
#[command(version = env!("KUBELOAD_VERSION"))]
struct Cli {
	/// Log level (trace, debug, info, warn, error); defaults to $RUST_LOG, then info
	#[arg(long, global = true)]
	log_level: Option<Level>,

	/// Log line format on stderr
	#[arg(long, global = true, value_enum, default_value_t)]
	log_format: LogFormat,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// List every object of the given resource types
	List(commands::list::ListArgs),

	/// Create a namespace if needed and apply manifests into it
	Apply(commands::apply::ApplyArgs),

	/// Delete a namespace and everything in it
	Delete(commands::delete::DeleteArgs),
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let _telemetry = telemetry::init(cli.log_level, cli.log_format)?;

	let stdout = BrokenPipeGuard::new(std::io::stdout());

	match cli.command {
		Commands::List(args) => commands::list::run(args, stdout),
		Commands::Apply(args) => commands::apply::run(args, stdout),
		Commands::Delete(args) => commands::delete::run(args, stdout),
	}
}
