//! epub-split - split an epub into smaller epubs

use std::fs;
use std::io::{Read, Seek};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use epub_split::doc::EpubDoc;
use epub_split::{SplitError, SplitOptions, Splitter};

#[derive(Parser)]
#[command(name = "epub-split")]
#[command(version, about = "Split an epub into smaller, self-contained epubs", long_about = None)]
#[command(after_help = "EXAMPLES:
    epub-split book.epub               Split into parts of at most 2 MB
    epub-split book.epub -s 5 -o out   Parts of 5 MB, written to out/
    epub-split book.epub --plan        Show the parts without writing them")]
struct Cli {
    /// Input epub
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Target size of each part, in megabytes
    #[arg(short, long, default_value_t = 2.0)]
    size: f64,

    /// Output file name prefix [default: input file name]
    #[arg(short, long)]
    prefix: Option<String>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Deflate level, 0 to 9
    #[arg(short, long, default_value_t = 6)]
    level: i64,

    /// Write a single zip holding every part
    #[arg(long)]
    bundle: bool,

    /// Only show how the book would be split
    #[arg(long)]
    plan: bool,

    /// Only report errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "error" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), SplitError> {
    let mut options = SplitOptions::new(cli.size).compression_level(cli.level);
    if let Some(prefix) = &cli.prefix {
        options = options.prefix(prefix);
    }
    let splitter = Splitter::new(options)?;
    let mut doc = EpubDoc::new(&cli.input)?;

    if cli.plan {
        return show_plan(&splitter, &mut doc);
    }

    if cli.bundle {
        let output = splitter.split(&mut doc)?;
        fs::create_dir_all(&cli.out_dir)?;
        let path = cli.out_dir.join(output.bundle_name());
        fs::write(&path, output.bundle()?)?;
        if !cli.quiet {
            println!("{} parts bundled in {}", output.files.len(), path.display());
        }
        return Ok(());
    }

    let report = splitter.split_to_dir(&mut doc, &cli.out_dir)?;
    if !cli.quiet {
        for path in &report.files {
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn show_plan<R: Read + Seek>(
    splitter: &Splitter,
    doc: &mut EpubDoc<R>,
) -> Result<(), SplitError> {
    let plan = splitter.plan(doc)?;

    println!("Title: {}", plan.book.title);
    println!("Author: {}", plan.book.creator);
    println!("Chapters: {}", plan.chapter_count());
    println!("Target: {} bytes", plan.target_bytes);
    println!("Shared resources: {} bytes", plan.shared_bytes);
    println!("Compression level: {}", splitter.options().compression_level);
    println!();

    for partition in &plan.partitions {
        let (first, last) = partition.chapter_range();
        let oversized = if partition.is_oversized(plan.target_bytes) {
            " (oversized chapter)"
        } else {
            ""
        };
        println!(
            "{}: chapters {first}-{last} ({} bytes), {} resources, ~{} bytes{oversized}",
            plan.file_name(partition.number),
            partition.chapter_bytes(),
            partition.resources.len(),
            partition.size
        );
        for chapter in &partition.chapters {
            println!("    {:>4}  {}", chapter.index, chapter.title);
        }
    }
    Ok(())
}
