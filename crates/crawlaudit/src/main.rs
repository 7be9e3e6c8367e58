//! crawlaudit command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use crawlaudit::{
    fdparse, get_list, ingest_listing, seed_catalog, AuditConfig, Checkable, DimensionRegistry,
    EntryKind,
};
use crawlaudit_db::DbConnection;
use crawlaudit_logging::{init_logging, LogConfig};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "crawlaudit", about = "Archive integrity crawl scheduler")]
struct Cli {
    /// Config file (default: ~/.crawlaudit/config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the catalog and seed it with data roots
    Init {
        /// Data root (repeatable; defaults to the configured roots)
        #[arg(long = "root")]
        roots: Vec<String>,
    },

    /// Print the next batch of entries to verify
    Batch {
        /// Entries per batch (defaults to the configured batch size)
        #[arg(short, long)]
        size: Option<usize>,

        /// Return every eligible entry
        #[arg(long, conflicts_with = "size")]
        all: bool,

        /// Additional data root to add before scheduling (repeatable)
        #[arg(long = "root")]
        roots: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse a directory listing and print the entries it describes
    Parse {
        /// Listing file (stdin when omitted)
        file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reconcile a directory listing into the catalog
    Ingest {
        /// Listing file ("-" for stdin)
        file: PathBuf,

        /// Directory that relative names in the listing live under
        #[arg(long)]
        parent: Option<String>,
    },

    /// Record verifications of catalog entries
    Mark {
        #[arg(required = true)]
        paths: Vec<String>,

        /// The entries are directories
        #[arg(long)]
        dir: bool,

        /// The verifications failed
        #[arg(long)]
        failed: bool,
    },

    /// Show population and sample distributions
    Dims {
        /// Dimension to show (defaults to the configured dimensions)
        #[arg(long)]
        name: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AuditConfig::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: Failed to load config: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match init_logging(LogConfig {
        app_name: "crawlaudit",
        verbose: cli.verbose,
        log_dir: config.log_dir(),
        retention_days: config.log_retention_days,
    }) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: failed to initialize logging: {:#}", err);
            None
        }
    };

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config: AuditConfig) -> Result<()> {
    match cli.command {
        Commands::Parse { file, json } => cmd_parse(file.as_deref(), json),
        Commands::Init { roots } => {
            let conn = open_catalog(&config)?;
            let roots = if roots.is_empty() { config.data_roots.clone() } else { roots };
            if seed_catalog(&conn, &roots, config.default_probability)? {
                println!("Created catalog at {} with {} root(s)", config.database_path, roots.len());
            } else {
                println!("Catalog already exists at {}", config.database_path);
            }
            Ok(())
        }
        Commands::Batch {
            size,
            all,
            roots,
            json,
        } => {
            let conn = open_catalog(&config)?;
            let batch_size = if all { None } else { Some(size.unwrap_or(config.batch_size)) };
            let batch = get_list(&conn, &config, batch_size, &roots)
                .context("Failed to assemble batch")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&batch)?);
            } else {
                for entry in &batch {
                    println!("{}\t{}", entry.kind, entry.path);
                }
            }
            Ok(())
        }
        Commands::Ingest { file, parent } => {
            let conn = open_catalog(&config)?;
            let reader = open_input(Some(&file))?;
            let stats = ingest_listing(&conn, reader, parent.as_deref(), config.default_probability)
                .with_context(|| format!("Failed to ingest {}", file.display()))?;
            println!(
                "parsed {} skipped {} stored {} rejected {}",
                stats.parsed, stats.skipped, stats.stored, stats.rejected
            );
            Ok(())
        }
        Commands::Mark { paths, dir, failed } => {
            let conn = open_catalog(&config)?;
            let kind = if dir { EntryKind::Directory } else { EntryKind::File };
            cmd_mark(&conn, &config, &paths, kind, failed)
        }
        Commands::Dims { name, json } => {
            let conn = open_catalog_readonly(&config)?;
            let names = match name {
                Some(name) => vec![name],
                None => config.dimensions.clone(),
            };
            cmd_dims(&conn, &config, &names, json)
        }
    }
}

fn open_catalog(config: &AuditConfig) -> Result<DbConnection> {
    let path = Path::new(&config.database_path);
    DbConnection::open(path).with_context(|| format!("Failed to open catalog {}", path.display()))
}

fn open_catalog_readonly(config: &AuditConfig) -> Result<DbConnection> {
    let path = Path::new(&config.database_path);
    DbConnection::open_readonly(path)
        .with_context(|| format!("Failed to open catalog {} read-only", path.display()))
}

fn open_input(file: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match file {
        None => Ok(Box::new(BufReader::new(io::stdin()))),
        Some(path) if path == Path::new("-") => Ok(Box::new(BufReader::new(io::stdin()))),
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
    }
}

fn cmd_parse(file: Option<&Path>, json: bool) -> Result<()> {
    let reader = open_input(file)?;
    let mut entries = Vec::new();
    for line in reader.lines() {
        if let Some(desc) = fdparse::parse(&line?) {
            entries.push(desc);
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for desc in &entries {
            println!(
                "{}\t{}\t{}\t{}",
                desc.kind,
                desc.path,
                desc.cos,
                desc.cart.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

fn cmd_mark(
    conn: &DbConnection,
    config: &AuditConfig,
    paths: &[String],
    kind: EntryKind,
    failed: bool,
) -> Result<()> {
    let mut registry = DimensionRegistry::new(config.sampsize);
    let now = chrono::Utc::now().timestamp();

    for path in paths {
        let mut entry =
            Checkable::new(path.as_str(), kind).with_probability(config.default_probability);
        entry.load(conn)?;
        if entry.rowid.is_none() {
            entry.persist(conn, false)?;
        }

        entry.last_check = now;
        entry.fails = if failed { entry.fails + 1 } else { 0 };
        let votes =
            registry.select_for_checksum(conn, &config.dimensions, &mut entry, rand::random::<f64>());
        entry
            .persist(conn, false)
            .with_context(|| format!("Failed to record {}", entry.path))?;

        info!(
            path = %entry.path,
            failed,
            votes,
            checksum = entry.checksum,
            "Marked entry"
        );
        println!(
            "{}\t{}\tchecksum={}\tfails={}",
            entry.kind, entry.path, entry.checksum, entry.fails
        );
    }
    Ok(())
}

fn cmd_dims(conn: &DbConnection, config: &AuditConfig, names: &[String], json: bool) -> Result<()> {
    let mut registry = DimensionRegistry::new(config.sampsize);
    if json {
        let dims: Vec<_> = names
            .iter()
            .map(|name| registry.get_dim(conn, name).clone())
            .collect();
        println!("{}", serde_json::to_string_pretty(&dims)?);
        return Ok(());
    }

    for name in names {
        let dim = registry.get_dim(conn, name);
        let rows = dim
            .report()
            .into_iter()
            .map(|row| {
                let color = if row.sample.pct < row.population.pct {
                    Some(Color::Yellow)
                } else {
                    None
                };
                vec![
                    (row.category, None),
                    (row.population.count.to_string(), None),
                    (format!("{:.2}", row.population.pct), None),
                    (row.sample.count.to_string(), color),
                    (format!("{:.2}", row.sample.pct), color),
                    (format!("{:.1}", row.target), None),
                ]
            })
            .collect();
        println!("{}", name);
        print_table_colored(
            &["category", "population", "%", "sample", "%", "target"],
            rows,
        );
    }
    Ok(())
}

fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| match color {
                Some(c) => Cell::new(text).fg(c),
                None => Cell::new(text),
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}
