//! # chunkvault CLI - Deduplicating file backups
//!
//! Command-line front end for the chunkvault library.
//!
//! ## Usage
//! ```bash
//! # Store a file (optionally with a base chunk size in bytes)
//! chunkvault store report.pdf
//! chunkvault store video.mp4 8192
//!
//! # Reconstruct it as retrieved_report.pdf
//! chunkvault retrieve report.pdf
//!
//! # Show per-file and overall savings
//! chunkvault list
//!
//! # Remove a file and the chunks only it used
//! chunkvault delete report.pdf
//! ```

use chunkvault::chunker::BASE_CHUNK_SIZE;
use chunkvault::utils::{format_bytes, format_number};
use chunkvault::{ProgressInfo, Result, Vault, VaultBuilder, VaultError};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// chunkvault CLI - content-addressed, deduplicating file store
#[derive(Parser)]
#[command(name = "chunkvault")]
#[command(author, version)]
#[command(about = "Store files as deduplicated, compressed chunks")]
#[command(long_about = None)]
struct Cli {
    /// Vault directory holding chunks/ and metadata.json
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Show progress bars
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file
    Store {
        /// File to store
        path: PathBuf,

        /// Base chunk size in bytes (clamped to 1024-8192)
        chunk_size: Option<String>,
    },

    /// Reconstruct a stored file
    Retrieve {
        /// Stored file path, as shown by `list`
        path: String,

        /// Output file (defaults to retrieved_<name> next to the path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a stored file
    #[command(alias = "rm")]
    Delete {
        /// Stored file path, as shown by `list`
        path: String,
    },

    /// List stored files with statistics
    #[command(alias = "ls")]
    List,

    /// Remove chunk objects no file references
    Gc {
        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Check the index against the chunk objects
    Verify {
        /// Fail if the metadata record is unusable instead of starting empty
        #[arg(long)]
        strict: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let root = cli.root;
    let progress = cli.progress;

    match cli.command {
        Commands::Store { path, chunk_size } => cmd_store(&root, &path, chunk_size.as_deref(), progress),
        Commands::Retrieve { path, output } => cmd_retrieve(&root, &path, output, progress),
        Commands::Delete { path } => cmd_delete(&root, &path),
        Commands::List => cmd_list(&root),
        Commands::Gc { dry_run } => cmd_gc(&root, dry_run),
        Commands::Verify { strict } => cmd_verify(&root, strict),
    }
}

/// Parse the optional chunk size argument
fn parse_chunk_size(arg: &str) -> Result<usize> {
    match arg.trim().parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(VaultError::invalid_argument(format!("invalid chunk size {:?}", arg))),
    }
}

fn byte_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

fn chunk_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Store a file
///
/// The file is split into adaptive chunks; chunks already in the vault are
/// not written again.
fn cmd_store(root: &Path, path: &Path, chunk_size: Option<&str>, show_progress: bool) -> Result<()> {
    let mut builder = VaultBuilder::new();
    if let Some(arg) = chunk_size {
        match parse_chunk_size(arg) {
            Ok(size) => builder = builder.base_chunk_size(size),
            Err(e) => {
                warn!("{}", e);
                eprintln!(
                    "{} Invalid chunk size provided. Using default {} bytes.",
                    "⚠".yellow().bold(),
                    BASE_CHUNK_SIZE
                );
            }
        }
    }
    let mut vault = builder.build(root)?;

    let start = Instant::now();
    let bar = if show_progress {
        let total = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Some(byte_bar(total))
    } else {
        None
    };

    let report = match &bar {
        Some(pb) => vault.store_file_with_progress(path, Some(|info: ProgressInfo| pb.set_position(info.processed)))?,
        None => vault.store_file(path)?,
    };

    if let Some(pb) = bar {
        pb.finish_and_clear();
    }

    println!(
        "{} Stored file with deduplication: {}",
        "✓".green().bold(),
        report.path.cyan()
    );
    println!("  Chunk size: {} bytes", report.base_chunk_size.to_string().cyan());
    println!("  Size: {}", format_bytes(report.bytes_read).cyan());
    println!(
        "  Chunks: {} ({} new, {} deduplicated)",
        report.chunk_count.to_string().cyan(),
        report.chunks_written.to_string().green(),
        report.chunks_deduplicated.to_string().yellow()
    );
    println!("  Time: {}", format_duration(truncate_millis(start.elapsed())).to_string().cyan());

    if report.write_failures > 0 {
        println!(
            "\n{} {} chunks could not be written; run {} to check the vault",
            "⚠".yellow().bold(),
            report.write_failures,
            "chunkvault verify".yellow()
        );
    }

    Ok(())
}

/// Reconstruct a stored file
fn cmd_retrieve(root: &Path, path: &str, output: Option<PathBuf>, show_progress: bool) -> Result<()> {
    let vault = Vault::open(root)?;
    let output = match output {
        Some(output) => output,
        None => Vault::default_output_path(path)?,
    };

    let bar = if show_progress {
        Some(chunk_bar(vault.index().get_chunks(path).len() as u64))
    } else {
        None
    };

    let report = match &bar {
        Some(pb) => vault.retrieve_file_with_progress(
            path,
            &output,
            Some(|info: ProgressInfo| pb.set_position(info.processed)),
        )?,
        None => vault.retrieve_file_to(path, &output)?,
    };

    if let Some(pb) = bar {
        pb.finish_and_clear();
    }

    println!(
        "{} File reconstructed: {}",
        "✓".green().bold(),
        report.output.display().to_string().cyan()
    );
    println!("  Bytes written: {}", format_bytes(report.bytes_written).cyan());

    if !report.is_complete() {
        println!("\n{}", "Warnings:".yellow().bold());
        for fingerprint in &report.missing_chunks {
            println!("  - missing chunk {}", fingerprint.short().yellow());
        }
        for fingerprint in &report.degraded_chunks {
            println!("  - damaged chunk {}", fingerprint.short().yellow());
        }
    }

    Ok(())
}

/// Delete a stored file
///
/// Unknown paths are reported but not treated as failures.
fn cmd_delete(root: &Path, path: &str) -> Result<()> {
    let mut vault = Vault::open(root)?;

    match vault.delete_file(path) {
        Ok(report) => {
            println!("{} File deleted successfully: {}", "✓".green().bold(), path.cyan());
            println!("  Chunks released: {}", report.references_released.to_string().cyan());
            println!("  Chunks deleted: {}", report.chunks_deleted.to_string().cyan());
            Ok(())
        }
        Err(VaultError::FileNotFound(path)) => {
            eprintln!("{} File not found in metadata: {}", "⚠".yellow().bold(), path);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// List stored files with per-file and overall statistics
fn cmd_list(root: &Path) -> Result<()> {
    let vault = Vault::open(root)?;
    let stats = vault.stats();

    if stats.is_empty() {
        println!("{}", "No files stored yet.".yellow());
        return Ok(());
    }

    println!("{}", "Stored files:".blue().bold());
    for file in &stats.files {
        println!(
            " - {} | Chunks: {} | Avg chunk size: {:.2} bytes | Compressed: {} bytes | Original: {} bytes | Savings: {:.2} %",
            file.path.cyan(),
            file.chunk_count,
            file.average_chunk_size(),
            format_number(file.stored_bytes as i64),
            format_number(file.original_bytes as i64),
            file.savings_percent()
        );
        if file.missing_chunks > 0 || file.degraded_chunks > 0 {
            println!(
                "   {} {} missing, {} damaged chunks",
                "⚠".yellow(),
                file.missing_chunks,
                file.degraded_chunks
            );
        }
    }

    println!("\n{}", "Overall stats:".blue().bold());
    println!(" Total files: {}", stats.file_count());
    println!(" Unique chunks: {}", stats.unique_chunks);
    println!(" Total compressed size: {} bytes", format_number(stats.physical_bytes as i64));
    println!(" Total original size: {} bytes", format_number(stats.logical_bytes as i64));
    println!(
        " Total dedup + compression savings: {} bytes",
        format_number(stats.savings()).green()
    );

    Ok(())
}

/// Garbage collect unreferenced chunk objects
fn cmd_gc(root: &Path, dry_run: bool) -> Result<()> {
    let vault = Vault::open(root)?;
    let start = Instant::now();

    if dry_run {
        println!("{}", "Analyzing garbage collection (dry run)...".blue().bold());
        let stats = vault.gc_analyze()?;

        println!("\n{}", "Analysis Results:".bold());
        println!("  Objects examined: {}", stats.objects_examined);
        println!("  Unreferenced objects: {}", stats.unreferenced_objects.len().to_string().yellow());
        println!("  Space to reclaim: {}", format_bytes(stats.bytes_reclaimed).green());

        if !stats.unreferenced_objects.is_empty() {
            println!("\n{}", "Unreferenced objects:".yellow());
            for fingerprint in stats.unreferenced_objects.iter().take(10) {
                println!("  - {}", fingerprint.as_str()[..16].dimmed());
            }
            if stats.unreferenced_objects.len() > 10 {
                println!("  ... and {} more", (stats.unreferenced_objects.len() - 10).to_string().dimmed());
            }
        }

        println!("\n{}", "No changes made (dry run)".dimmed());
    } else {
        println!("{}", "Running garbage collection...".blue().bold());
        let stats = vault.gc()?;

        println!("\n{} Garbage collection complete", "✓".green().bold());
        println!("  Objects deleted: {}", stats.objects_deleted.to_string().green());
        println!("  Space reclaimed: {}", format_bytes(stats.bytes_reclaimed).green());
        println!(
            "  Time: {}",
            format_duration(Duration::from_millis(stats.duration_ms)).to_string().cyan()
        );
    }

    let elapsed = truncate_millis(start.elapsed());
    println!("\n{}", format!("Total time: {}", format_duration(elapsed)).dimmed());

    Ok(())
}

/// Verify the vault
///
/// Exits with an error if any problem is found.
fn cmd_verify(root: &Path, strict: bool) -> Result<()> {
    let vault = VaultBuilder::new().strict_metadata(strict).build(root)?;

    println!("{}", "Verifying vault...".blue().bold());
    let report = vault.verify()?;

    println!("\n{}", "Verification Report:".bold());
    println!(
        "  Chunks: {}/{} valid",
        report.chunks_valid.to_string().green(),
        report.chunks_checked
    );
    println!(
        "  Reference counts: {}",
        if report.ref_count_mismatches.is_empty() {
            "✓ Valid".green()
        } else {
            "✗ Invalid".red()
        }
    );

    for chunk in &report.failed_chunks {
        if let Some(error) = &chunk.error {
            println!("  {} {}", "✗".red(), error);
        }
    }
    for mismatch in &report.ref_count_mismatches {
        println!(
            "  {} chunk {} recorded {} references, expected {}",
            "✗".red(),
            mismatch.fingerprint.short().yellow(),
            mismatch.recorded,
            mismatch.expected
        );
    }
    if !report.orphaned_objects.is_empty() {
        println!(
            "\n{} Found {} orphaned objects (run {} to remove them)",
            "⚠".yellow().bold(),
            report.orphaned_objects.len(),
            "chunkvault gc".yellow()
        );
    }

    if report.is_valid() {
        println!("\n{} {}", "✓".green().bold(), report.summary());
        Ok(())
    } else {
        Err(VaultError::corrupt(report.summary()))
    }
}

/// Drop sub-millisecond precision so durations print compactly
fn truncate_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
