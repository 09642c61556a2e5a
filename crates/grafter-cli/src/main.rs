//! Grafter CLI - Command-line interface for GGUF container surgery

mod info;
mod insert_bias;
mod split_fused;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grafter")]
#[command(author, version, about = "Structural surgery for GGUF model containers")]
#[command(
    long_about = "Grafter repairs GGUF model files without re-converting them: it can insert a missing zero-filled bias tensor or split fused feed-forward projections, copying everything else through bit-identical.\n\nEdits always read one file and write another; the input is never touched."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a zero-filled bias tensor into a model
    InsertBias {
        /// Input model file
        input: PathBuf,

        /// Output model file (must differ from the input)
        output: PathBuf,

        /// Name of the tensor to insert
        #[arg(long, default_value = grafter_gguf::DEFAULT_BIAS_NAME)]
        name: String,

        /// Tensor after which the new one is placed (appended at the end
        /// when absent from the model)
        #[arg(long, default_value = grafter_gguf::DEFAULT_BIAS_ANCHOR)]
        anchor: String,

        /// Vector length for the new tensor (defaults to the model's
        /// embedding_length metadata, which must then exist)
        #[arg(long)]
        dim: Option<u64>,
    },

    /// Split fused gate/up feed-forward tensors into separate tensors
    SplitFused {
        /// Input model file
        input: PathBuf,

        /// Output model file (must differ from the input)
        output: PathBuf,

        /// Name suffix identifying fused tensors
        #[arg(long, default_value = grafter_gguf::DEFAULT_FUSED_SUFFIX)]
        suffix: String,

        /// Suffix substituted into the first half's name
        #[arg(long, default_value = grafter_gguf::DEFAULT_GATE_SUFFIX)]
        replacement: String,

        /// Expected width of fused tensors (defaults to twice the model's
        /// feed_forward_length metadata, which must then exist)
        #[arg(long)]
        fused_width: Option<u64>,
    },

    /// Show information about a model file
    Info {
        /// Model file
        model: PathBuf,

        /// List every tensor with shape and type
        #[arg(long)]
        tensors: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::InsertBias {
            input,
            output,
            name,
            anchor,
            dim,
        } => insert_bias::run(&input, &output, &name, &anchor, dim),

        Commands::SplitFused {
            input,
            output,
            suffix,
            replacement,
            fused_width,
        } => split_fused::run(&input, &output, &suffix, &replacement, fused_width),

        Commands::Info {
            model,
            tensors,
            json,
        } => info::run(&model, tensors, json),
    }
}
