//! `grafter insert-bias` command implementation

use anyhow::{Context, Result};
use grafter_core::{hash_to_hex, sha256};
use grafter_gguf::{insert_bias, write_container, BiasOutcome, BiasSpec, GGUFParser};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub fn run(
    input: &Path,
    output: &Path,
    name: &str,
    anchor: &str,
    dim: Option<u64>,
) -> Result<()> {
    ensure_distinct_paths(input, output)?;

    println!("Inserting bias tensor...");
    println!("  Input:  {}", input.display());
    println!("  Output: {}", output.display());
    println!("  Tensor: {}", name);
    println!("  Anchor: {}", anchor);

    let spinner = reading_spinner();
    let data = fs::read(input).context("Failed to read input model")?;
    let container = GGUFParser::new()
        .parse(&data)
        .context("Failed to parse GGUF container")?;
    spinner.finish_and_clear();

    let spec = BiasSpec {
        name: name.to_string(),
        anchor: anchor.to_string(),
        dimension: dim,
    };

    let (result, inserted) = match insert_bias(&container, &spec)? {
        BiasOutcome::Inserted(edited) => (edited, true),
        BiasOutcome::AlreadyPresent => {
            println!();
            println!("{} already present; copying container through unchanged.", name);
            (container.clone(), false)
        }
    };

    write_container(output, &result).context("Failed to write output model")?;

    // Re-read what was actually written; a model that fails its own
    // re-parse must never be reported as a success.
    let written = fs::read(output).context("Failed to re-read output model")?;
    let verified = GGUFParser::new()
        .parse(&written)
        .context("Output model failed verification")?;

    println!();
    if inserted {
        println!("Bias tensor inserted successfully!");
    } else {
        println!("Container copied successfully (no-op).");
    }
    println!("  Input tensors:  {:>8}", container.tensors.len());
    println!("  Output tensors: {:>8}", verified.tensors.len());
    println!("  Output size:    {:>8} bytes", written.len());
    println!("  SHA-256:        {}", hash_to_hex(&sha256(&written)));

    Ok(())
}

/// Edits are always source to new file; refuse to clobber the input
fn ensure_distinct_paths(input: &Path, output: &Path) -> Result<()> {
    if input == output {
        anyhow::bail!("Output path must differ from input path: {}", input.display());
    }
    if output.exists() {
        let a = fs::canonicalize(input).context("Failed to resolve input path")?;
        let b = fs::canonicalize(output).context("Failed to resolve output path")?;
        if a == b {
            anyhow::bail!("Output path must differ from input path: {}", input.display());
        }
    }
    Ok(())
}

/// Spinner shown while a multi-gigabyte model loads
fn reading_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    spinner.set_message("Reading model...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
