//! martgen — the mart-generation CLI
//!
//! # Usage
//!
//! ```bash
//! # Snapshot a live schema to JSON
//! martgen introspect --database-url postgres://... --schema public --out snapshot.json
//!
//! # Compile a spec against a snapshot and write the DDL script
//! martgen generate fly.toml --snapshot snapshot.json --out fly_mart.sql
//!
//! # Show the script without writing it
//! martgen generate fly.toml --snapshot snapshot.json --dry-run
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use martgen::catalog::postgres::PgIntrospector;
use martgen::prelude::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "martgen")]
#[command(version = "0.3.0")]
#[command(about = "Denormalized mart generation from declarative specs", long_about = None)]
#[command(after_help = "EXAMPLES:
    martgen introspect --database-url postgres://localhost/chado --out snapshot.json
    martgen generate fly.toml --snapshot snapshot.json --out fly_mart.sql
    martgen explain fly.toml --snapshot snapshot.json")]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a spec into an ordered DDL script
    Generate {
        /// Spec file (JSON or TOML)
        spec: PathBuf,

        /// Catalog snapshot JSON (skips live introspection)
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Database connection URL
        #[arg(long, env = "MARTGEN_DATABASE_URL")]
        database_url: Option<String>,

        /// Source schema to introspect
        #[arg(long, default_value = "public")]
        schema: String,

        /// Output script path
        #[arg(short, long, default_value = "mart.sql")]
        out: PathBuf,

        /// Don't write the script, print it
        #[arg(short, long)]
        dry_run: bool,

        /// Infer keys by column-name matching instead of FK metadata
        #[arg(long)]
        infer_keys: bool,
    },
    /// Snapshot a schema's metadata to JSON
    Introspect {
        /// Database connection URL
        #[arg(long, env = "MARTGEN_DATABASE_URL")]
        database_url: String,

        /// Source schema to introspect
        #[arg(long, default_value = "public")]
        schema: String,

        /// Output snapshot path (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Resolve a spec and report its transformations without emitting SQL
    Explain {
        /// Spec file (JSON or TOML)
        spec: PathBuf,

        /// Catalog snapshot JSON
        #[arg(long)]
        snapshot: PathBuf,

        /// Infer keys by column-name matching instead of FK metadata
        #[arg(long)]
        infer_keys: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> MartResult<()> {
    match &cli.command {
        Commands::Generate {
            spec,
            snapshot,
            database_url,
            schema,
            out,
            dry_run,
            infer_keys,
        } => {
            let snap = load_snapshot(snapshot.as_deref(), database_url.as_deref(), schema).await?;
            let spec = SpecFile::from_file(spec)?;
            let mut session = session_for(snap, *infer_keys);
            session.load_spec(&spec)?;
            session.compile()?;

            if cli.verbose {
                report(&session);
            }
            if *dry_run {
                print!("{}", render_script(&session.emit_items()?));
                return Ok(());
            }
            let path = session.generate_ddl(out)?;
            println!(
                "{} script written to {}",
                "OK".green().bold(),
                path.display().to_string().cyan()
            );
            Ok(())
        }
        Commands::Introspect {
            database_url,
            schema,
            out,
        } => {
            let introspector = PgIntrospector::connect(database_url).await?;
            let snap = introspector.snapshot(schema).await?;
            let json = snap.to_json()?;
            match out {
                Some(path) => {
                    std::fs::write(path, json)?;
                    println!(
                        "{} {} tables snapshotted to {}",
                        "OK".green().bold(),
                        snap.tables.len(),
                        path.display().to_string().cyan()
                    );
                }
                None => println!("{}", json),
            }
            Ok(())
        }
        Commands::Explain {
            spec,
            snapshot,
            infer_keys,
        } => {
            let snap = CatalogSnapshot::from_file(snapshot)?;
            let spec = SpecFile::from_file(spec)?;
            let mut session = session_for(snap, *infer_keys);
            session.load_spec(&spec)?;
            session.compile()?;
            report(&session);
            Ok(())
        }
    }
}

async fn load_snapshot(
    snapshot: Option<&std::path::Path>,
    database_url: Option<&str>,
    schema: &str,
) -> MartResult<CatalogSnapshot> {
    match (snapshot, database_url) {
        (Some(path), _) => CatalogSnapshot::from_file(path),
        (None, Some(url)) => {
            let introspector = PgIntrospector::connect(url).await?;
            introspector.snapshot(schema).await
        }
        (None, None) => Err(MartError::Connection(
            "no catalog source: pass --snapshot, --database-url or set MARTGEN_DATABASE_URL"
                .to_string(),
        )),
    }
}

fn session_for(snapshot: CatalogSnapshot, infer_keys: bool) -> Session {
    let resolver = if infer_keys {
        ResolverKind::Inferred
    } else {
        ResolverKind::Declared
    };
    Session::new(snapshot, SessionOptions { resolver })
}

fn report(session: &Session) {
    for ds in session.datasets() {
        println!(
            "{} {} (schema {}, key {})",
            "Dataset".cyan().bold(),
            ds.name.yellow(),
            ds.target_schema,
            ds.dataset_key
        );
        for tr in &ds.transformations {
            let kind = match (tr.synthetic, tr.central) {
                (true, _) => "synthesized".magenta(),
                (false, true) => "central".yellow(),
                (false, false) => "declared".dimmed(),
            };
            println!(
                "  {} {} [{}] {} steps, {} staging",
                "->".dimmed(),
                tr.final_table_name.white().bold(),
                kind,
                tr.steps.len(),
                tr.staging_tables().len()
            );
        }
    }
}
