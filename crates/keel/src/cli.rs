//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Keel - reconcile a platform's components through their lifecycle
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Locations shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to keel.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Directory holding the resource documents
    #[arg(long, global = true, env = "KEEL_STATE_DIR")]
    pub state_dir: Option<Utf8PathBuf>,

    /// Component manifest
    #[arg(long, global = true, env = "KEEL_COMPONENTS", default_value = "components.yaml")]
    pub components: Utf8PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a resource from a manifest, or apply its spec to the stored one
    Apply(ApplyArgs),

    /// Run a single reconcile pass
    Reconcile(ReconcileArgs),

    /// Reconcile repeatedly until settled or interrupted
    Run(RunArgs),

    /// Show resource and component status
    Status(StatusArgs),

    /// Validate the component manifest
    Validate(ValidateArgs),

    /// Request deletion of a resource
    Delete(DeleteArgs),
}

/// Identity of one resource
#[derive(Args, Debug, Clone)]
pub struct ResourceArgs {
    /// Resource name
    pub name: String,

    /// Resource namespace
    #[arg(short, long, default_value = "default")]
    pub namespace: String,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Resource manifest (YAML)
    #[arg(short, long)]
    pub file: Utf8PathBuf,
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub resource: ResourceArgs,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Resource name; every stored resource when omitted
    pub name: Option<String>,

    /// Resource namespace
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Keep polling after the resource settled
    #[arg(long)]
    pub watch: bool,

    /// Stop after this many passes (overrides controller.max_passes)
    #[arg(long)]
    pub max_passes: Option<u64>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Resource name; lists every resource when omitted
    pub name: Option<String>,

    /// Resource namespace
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Also print the resolved components
    #[arg(long)]
    pub list: bool,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub resource: ResourceArgs,

    /// Remove the document right away once the resource is finalized
    #[arg(long)]
    pub purge: bool,
}
