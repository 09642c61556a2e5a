//! `grafter split-fused` command implementation

use anyhow::{Context, Result};
use grafter_core::{hash_to_hex, sha256};
use grafter_gguf::{split_fused, write_container, GGUFParser, SplitSpec};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub fn run(
    input: &Path,
    output: &Path,
    suffix: &str,
    replacement: &str,
    fused_width: Option<u64>,
) -> Result<()> {
    ensure_distinct_paths(input, output)?;

    println!("Splitting fused tensors...");
    println!("  Input:  {}", input.display());
    println!("  Output: {}", output.display());
    println!("  Suffix: {} -> {}", suffix, replacement);

    let spinner = reading_spinner();
    let data = fs::read(input).context("Failed to read input model")?;
    let container = GGUFParser::new()
        .parse(&data)
        .context("Failed to parse GGUF container")?;
    spinner.finish_and_clear();

    let spec = SplitSpec {
        suffix: suffix.to_string(),
        replacement: replacement.to_string(),
        fused_width,
    };

    let (edited, report) = split_fused(&container, &spec)?;
    write_container(output, &edited).context("Failed to write output model")?;

    let written = fs::read(output).context("Failed to re-read output model")?;
    let verified = GGUFParser::new()
        .parse(&written)
        .context("Output model failed verification")?;

    println!();
    if report.tensors_split == 0 {
        println!("No fused tensors found; container copied unchanged.");
    } else {
        println!("Fused tensors split successfully!");
    }
    println!("  Tensors split:  {:>8}", report.tensors_split);
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
