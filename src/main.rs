use anyhow::Result;
use cex_pumd::{
    export_year, get_runs, init_logging, load_archive, load_grouping, record_year, run_years,
    setup_database, HierarchyCompiler, PipelineConfig,
};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cex-pumd")]
#[command(about = "Consumer Expenditure public-use micro-data interpretation pipeline")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = cex_pumd::default_log_level())]
    log_level: String,

    /// Write rotating log files here instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one or more survey years
    #[command(after_help = "\
Examples:
  cex-pumd run data --years 2018,2019 --db cex.db
  cex-pumd run data --years 2019 --out out --skip-zero --config pipeline.json")]
    Run {
        /// Directory holding <year>/ folders and the dictionaries
        data_dir: PathBuf,

        /// Processing years
        #[arg(long, value_delimiter = ',', required = true)]
        years: Vec<i32>,

        /// JSON pipeline configuration (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// SQLite database to record results in
        #[arg(long)]
        db: Option<PathBuf>,

        /// Directory for CSV exports
        #[arg(long)]
        out: Option<PathBuf>,

        /// Leave all-zero aggregated rows out of the CSV export
        #[arg(long)]
        skip_zero: bool,
    },

    /// Compile a grouping file and print its rules and warnings
    Hierarchy {
        /// Fixed-width grouping file
        grouping: PathBuf,
    },

    /// List the years recorded in a database
    Runs {
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Run {
            data_dir,
            years,
            config,
            db,
            out,
            skip_zero,
        } => run(data_dir, years, config, db, out, skip_zero),
        Commands::Hierarchy { grouping } => show_hierarchy(grouping),
        Commands::Runs { db } => show_runs(db),
    }
}

fn run(
    data_dir: PathBuf,
    years: Vec<i32>,
    config: Option<PathBuf>,
    db: Option<PathBuf>,
    out: Option<PathBuf>,
    skip_zero: bool,
) -> Result<()> {
    println!("📊 CEX PUMD - years {:?}", years);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Configuration
    let config = match config {
        Some(path) => PipelineConfig::from_file(&path)?,
        None => PipelineConfig::default(),
    };

    // 2. Inputs
    println!("\n📂 Loading survey files from {:?}...", data_dir);
    let archive = load_archive(&data_dir, &years)?;
    println!("✓ Loaded {} of {} years", archive.years().len(), years.len());

    // 3. Pipeline
    println!("\n⚙️  Processing...");
    let results = run_years(&archive, &years, &config);

    let mut conn = match &db {
        Some(path) => {
            let conn = Connection::open(path)?;
            setup_database(&conn)?;
            Some(conn)
        }
        None => None,
    };

    // 4. Outputs
    let mut failed = 0;
    for (year, result) in &results {
        match result {
            Ok(output) => {
                println!(
                    "✓ {}: {} households, {} costs, {} categories ({} dropped)",
                    year,
                    output.households.len(),
                    output.expenditures.len(),
                    output.aggregated.codes().len(),
                    output.stats.dropped_rows
                );
                println!("  {}", output.quality.summary());

                if let Some(conn) = conn.as_mut() {
                    let summary = record_year(conn, output)?;
                    println!("  💾 Recorded (tree {})", &summary.fingerprint[..12]);
                }
                if let Some(dir) = &out {
                    let paths = export_year(dir, output, skip_zero)?;
                    println!("  📤 Exported {} files to {:?}", paths.len(), dir);
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("❌ {}: {}", year, e);
            }
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if failed > 0 {
        eprintln!("❌ {} of {} years rejected", failed, results.len());
        std::process::exit(1);
    }
    println!("✅ {} years processed", results.len());
    Ok(())
}

fn show_hierarchy(grouping: PathBuf) -> Result<()> {
    let nodes = load_grouping(&grouping)?;
    let hierarchy = HierarchyCompiler::new().compile(&nodes);

    println!("🌳 {} nodes, {} rules", hierarchy.nodes.len(), hierarchy.rule_count());
    for rule in hierarchy.rules_deepest_first() {
        println!(
            "  L{} {} = {}",
            rule.level,
            rule.parent_code,
            rule.child_codes.join(" + ")
        );
    }
    for warning in &hierarchy.warnings {
        println!("⚠️  {}", warning.describe());
    }
    println!("🔑 {}", hierarchy.fingerprint());
    Ok(())
}

fn show_runs(db: PathBuf) -> Result<()> {
    let conn = Connection::open(&db)?;
    setup_database(&conn)?;

    let runs = get_runs(&conn)?;
    if runs.is_empty() {
        println!("No years recorded in {:?}", db);
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {} households  {} categories  {} issues  {}",
            run.year,
            run.households,
            run.categories,
            run.quality_issues,
            run.recorded_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
