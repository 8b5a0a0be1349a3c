use clap::{ArgAction, Parser, Subcommand};
use respack::extract;
use respack::io_stream::{ReaderOptions, WriterOptions};
use respack::package::Package;
use respack::{path as pkpath, PackageError};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "respack", about = "Resource package container CLI", version)]
struct Cli {
    /// More log output (-v debug, -vv trace).  RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    /// Packages carry the magic header before the index
    #[arg(long, global = true)]
    header: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files and directories into a package
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        /// Store paths relative to this directory instead of the input's own
        #[arg(short, long)]
        base: Option<PathBuf>,
        /// Only take the top level of input directories
        #[arg(long)]
        no_recursive: bool,
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// List package contents
    List {
        input: PathBuf,
        /// Only direct children of this directory
        #[arg(short, long)]
        dir: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Write one entry to stdout
    Cat {
        input: PathBuf,
        entry: String,
    },
    /// Extract a package
    Extract {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        /// Only entries whose path contains one of these
        #[arg(short, long)]
        filter: Vec<String>,
    },
    /// BLAKE3 of every entry
    Hash {
        input: PathBuf,
    },
    /// Show index metadata
    Info {
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let header = cli.header;
    match cli.command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, base, no_recursive, input } => {
            let opts = WriterOptions { write_header: header, ..Default::default() };
            let mut pkg = Package::create(&output, opts)?;
            for path in &input {
                if path.is_dir() {
                    let n = pkg.add_directory(path, base.as_deref(), !no_recursive)?;
                    println!("  queued  {} ({n} files)", path.display());
                } else {
                    let data_path = data_path_for(path, base.as_deref())?;
                    pkg.add_file(path, &data_path)?;
                    println!("  queued  {}", path.display());
                }
            }
            let summary = pkg.finalize()?;
            println!(
                "Created: {} ({} entries, {} B index, {} B total)",
                output.display(),
                summary.entries,
                summary.index_size,
                summary.bytes_written
            );
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, dir, json } => {
            let pkg = open_package(&input, header)?;
            let entries: Vec<_> = match &dir {
                Some(d) => pkg.list_directory(d)?.collect(),
                None    => pkg.list()?.iter().collect(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("Package: {}", input.display());
                println!("{:<40} {:>12} {:>12}", "Path", "Offset", "Size");
                for e in entries {
                    println!("{:<40} {:>12} {:>12}", e.path, e.position(), e.length());
                }
            }
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { input, entry } => {
            let pkg = open_package(&input, header)?;
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            pkg.reader()?.copy_to(entry.as_str(), &mut out)?;
            out.flush()?;
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output_dir, filter } => {
            let pkg = open_package(&input, header)?;
            let n = extract::extract_all(pkg.reader()?, &output_dir, &filter)?;
            println!("Extracted {n} file(s) to: {}", output_dir.display());
        }

        // ── Hash ─────────────────────────────────────────────────────────────
        Commands::Hash { input } => {
            let pkg = open_package(&input, header)?;
            for d in extract::digest_all(pkg.reader()?)? {
                println!("{}  {}", d.hex(), d.path);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let pkg    = open_package(&input, header)?;
            let reader = pkg.reader()?;
            let payload: u64 = reader.iter().map(|e| e.length()).sum();

            println!("── Package ──────────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Header         {}", header);
            println!("  Index offset   {} B", reader.index_start());
            println!("  Index size     {} B", reader.index_size());
            println!("  Entries        {}", reader.count());
            println!("  Payload        {} B", payload);
            println!("  Container      {} B", reader.container_len()?);
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn open_package(path: &Path, header: bool) -> Result<Package, PackageError> {
    Package::open_with(path, ReaderOptions { verify_header: header, ..Default::default() })
}

/// Logical path for a single input file: relative to `base` when given,
/// otherwise just the file name.
fn data_path_for(file: &Path, base: Option<&Path>) -> Result<String, PackageError> {
    match base {
        Some(b) => pkpath::relative_to(b, file),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PackageError::InvalidPath {
                path:   file.display().to_string(),
                reason: "input has no file name",
            }),
    }
}
