use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use citescout_core::error::ExitCode;
use citescout_core::{
    AppConfig, CandidateEntry, ConnectionPool, RankedEntry, ResultStore, SqliteCandidateStore,
    open_database, schema_version,
};
use citescout_science::CitationPipeline;

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "citescout",
    about = "Finds, fetches and ranks candidate literature citations",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format.
    /// Also enabled by setting CITESCOUT_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level logging unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, fetch, score and rank citations for every stored candidate.
    Run,

    /// Import candidate entries from a JSON array.
    Import {
        file: PathBuf,
        /// Replace the active annotator roster with these initials.
        #[arg(long, action = clap::ArgAction::Append)]
        annotator: Vec<String>,
    },

    /// List the stored annotator buckets.
    Buckets,

    /// Show the ranked entries of one bucket.
    Show { bucket: String },

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Write a default config file.
    Init {
        #[arg(long)]
        force: bool,
    },
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "citescout=debug,info" } else { "citescout=info,warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let json_output = cli.json || std::env::var("CITESCOUT_JSON").as_deref() == Ok("1");
    let config = AppConfig::load()?;

    match cli.command {
        // ── Run ────────────────────────────────────────────────────────────

        Commands::Run => {
            let pool = open_db(&config)?;
            let source = Arc::new(SqliteCandidateStore::new(Arc::clone(&pool)));
            let store = Arc::new(ResultStore::new(pool));

            let pipeline = CitationPipeline::from_config(&config, source)?.with_store(store);
            let (_, report) = pipeline.run().await?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":report,"meta":{"duration_ms":dur}}))?;
            } else {
                println!("Run {} finished in {dur}ms", report.run_id);
                println!("  Candidates:     {}", report.candidates);
                println!("  Search terms:   {} ({} with hits)", report.terms, report.terms_with_hits);
                println!("  Records:        {} of {} fetched", report.records_fetched, report.record_ids);
                println!("  Match rows:     {}", report.match_rows);
                println!("  Ranked entries: {}", report.ranked);
                for (bucket, count) in &report.buckets {
                    println!("    {bucket:<8} {count}");
                }
            }
        }

        // ── Import ─────────────────────────────────────────────────────────

        Commands::Import { file, annotator } => {
            let text = match std::fs::read_to_string(&file) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("Cannot read {}: {e}", file.display());
                    std::process::exit(ExitCode::FileSystemError as i32);
                }
            };
            let mut entries: Vec<CandidateEntry> = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    eprintln!("Invalid candidate file {}: {e}", file.display());
                    std::process::exit(ExitCode::InvalidArgs as i32);
                }
            };
            for entry in &mut entries {
                entry.derive_author_terms();
            }

            let pool = open_db(&config)?;
            let store = SqliteCandidateStore::new(pool);
            let written = store.import_candidates(&entries)?;
            if !annotator.is_empty() {
                let initials: Vec<&str> = annotator.iter().map(String::as_str).collect();
                store.set_annotators(&initials)?;
            }
            info!(written, file = %file.display(), "imported candidates");

            let dur = start.elapsed().as_millis();
            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":{"imported":written,"annotators":annotator},"meta":{"duration_ms":dur}}))?;
            } else {
                println!("Imported {written} candidate(s).");
            }
        }

        // ── Buckets ────────────────────────────────────────────────────────

        Commands::Buckets => {
            let results = ResultStore::new(open_db(&config)?);
            let all = results.load_all()?;
            let run_id = results.last_run_id()?;
            let dur = start.elapsed().as_millis();

            if json_output {
                let items: Vec<serde_json::Value> = all
                    .iter()
                    .map(|(name, entries)| serde_json::json!({"bucket":name,"entries":entries.len()}))
                    .collect();
                print_json(&serde_json::json!({"status":"ok","data":{"run_id":run_id,"items":items},"meta":{"duration_ms":dur}}))?;
            } else if all.is_empty() {
                println!("No stored results. Use `citescout run` first.");
            } else {
                for (name, entries) in &all {
                    println!("  {name:<8} {} entries", entries.len());
                }
            }
        }

        // ── Show ───────────────────────────────────────────────────────────

        Commands::Show { bucket } => {
            let results = ResultStore::new(open_db(&config)?);
            let key = bucket.trim().to_uppercase();
            let dur = start.elapsed().as_millis();

            match results.load(&key)? {
                Some(entries) => {
                    if json_output {
                        print_json(&serde_json::json!({"status":"ok","data":{"bucket":key,"items":entries},"meta":{"duration_ms":dur}}))?;
                    } else {
                        print_bucket(&entries);
                    }
                }
                None => {
                    if json_output {
                        print_json(&serde_json::json!({"status":"error","error":"not_found","message":format!("Bucket {key} not found"),"meta":{"duration_ms":dur}}))?;
                    } else {
                        eprintln!("Bucket not found: {key}");
                    }
                    std::process::exit(ExitCode::NotFound as i32);
                }
            }
        }

        // ── Config ─────────────────────────────────────────────────────────

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let db_path = config.database_path();
                let schema = if db_path.exists() {
                    Some(schema_version(&*open_db(&config)?)?)
                } else {
                    None
                };
                if json_output {
                    print_json(&serde_json::json!({"status":"ok","data":{"config":config,"schema_version":schema}}))?;
                } else {
                    println!("# {}", AppConfig::config_path().display());
                    match schema {
                        Some(v) => println!("# database {} (schema v{v})", db_path.display()),
                        None => println!("# database {} (not created yet)", db_path.display()),
                    }
                    print!("{}", toml::to_string_pretty(&config)?);
                }
            }
            ConfigAction::Init { force } => {
                let path = AppConfig::config_path();
                if path.exists() && !force {
                    eprintln!("Config already exists: {} (use --force to overwrite)", path.display());
                    std::process::exit(ExitCode::GeneralError as i32);
                }
                AppConfig::default().save_to(&path)?;
                println!("Wrote {}", path.display());
            }
        },
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn open_db(config: &AppConfig) -> Result<Arc<ConnectionPool>> {
    let db_path = config.database_path();
    let pool = open_database(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    Ok(Arc::new(pool))
}

fn print_bucket(entries: &[RankedEntry]) {
    for entry in entries {
        let c = &entry.candidate;
        println!("{}  {}", c.structure_id, c.title);
        for cite in &entry.citations {
            println!(
                "    {:.3}  {:>9}  {}",
                cite.similarity_score,
                cite.record.pmid,
                cite.record.citation_line()
            );
        }
    }
}
