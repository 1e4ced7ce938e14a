//! # image-bake
//!
//! Compiles a JSON heap description into the zero-copy image read by `heapwatch`.
//!
//! ## Usage
//! ```sh
//! cargo run -p image-bake -- demos/stuck_continuation.json -o heap.img
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use common::{HeapImage, MappedImage};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "image-bake",
    about = "Compile a JSON heap description into a heapwatch image"
)]
struct Cli {
    /// JSON file with `objects` and `roots`.
    input: PathBuf,
    /// Output image path.
    #[arg(short, long, default_value = "heap.img")]
    output: PathBuf,
}

/// Reference problems that do not block baking.
#[derive(Debug, Default, PartialEq, Eq)]
struct Dangling {
    references: usize,
    roots: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut image = load_image(&cli.input)?;
    let dangling = validate(&image)?;
    if dangling.references > 0 {
        eprintln!(
            "Warning: {} reference(s) point outside the image; they will be dead ends.",
            dangling.references
        );
    }
    if dangling.roots > 0 {
        eprintln!(
            "Warning: {} root(s) point outside the image; they will be ignored.",
            dangling.roots
        );
    }

    bake(&mut image, &cli.output)?;

    println!(
        "Successfully baked {} with {} objects and {} roots.",
        cli.output.display(),
        image.objects.len(),
        image.roots.len()
    );
    Ok(())
}

fn load_image(path: &Path) -> Result<HeapImage> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid heap description {:?}", path))
}

/// Rejects duplicate addresses; counts references and roots with no object behind them.
fn validate(image: &HeapImage) -> Result<Dangling> {
    if let Some(address) = image.duplicate_address() {
        bail!("Duplicate object address {} in heap description", address);
    }

    let known: HashSet<u64> = image.objects.iter().map(|o| o.address).collect();
    Ok(Dangling {
        references: image
            .objects
            .iter()
            .flat_map(|o| o.references.iter())
            .filter(|r| !known.contains(r))
            .count(),
        roots: image
            .roots
            .iter()
            .filter(|r| !known.contains(&r.address))
            .count(),
    })
}

/// Writes the image and re-opens it to prove the archive validates.
fn bake(image: &mut HeapImage, output: &Path) -> Result<()> {
    image
        .save(output)
        .with_context(|| format!("Failed to write {:?}", output))?;
    let mapped = MappedImage::open(output).context("Baked image failed validation")?;
    if mapped.len() != image.objects.len() {
        bail!(
            "Baked image holds {} objects, expected {}",
            mapped.len(),
            image.objects.len()
        );
    }
    Ok(())
}
