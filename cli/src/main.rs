use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolkit::audit::{audit_profile_references, ReferenceKind};
use toolkit::ddl::{apply, ColumnSpec, SchemaChange};
use toolkit::export::{backup, export_csv, write_backup};
use toolkit::migrate::{manual_script, Ledger, MigrationStatus};
use toolkit::probe::{
    check_catalog, probe_column, probe_table, probe_table_with_discovery, Presence, TableProbe,
};
use toolkit::smoke::run_work_order_smoke;
use toolkit::{Config, RestClient};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "cmms-admin")]
#[command(about = "Admin CLI for the CMMS database")]
struct Cli {
    /// Use the service-role key instead of the anon key
    #[arg(long, global = true, default_value_t = false)]
    service_role: bool,
    /// Debug logging on stderr
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether a table (or one of its columns) exists
    Probe {
        table: String,
        #[arg(long)]
        column: Option<String>,
        /// Learn the columns of an empty table with a throwaway insert
        #[arg(long, default_value_t = false)]
        discover: bool,
    },
    /// Compare the live schema with the expected catalog
    Check,
    /// Run the built-in migrations, printing SQL for anything left manual
    Migrate {
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Also write the pending SQL to this file
        #[arg(long)]
        sql_out: Option<PathBuf>,
    },
    /// Add one column, or print the SQL to do so
    AddColumn {
        #[arg(long)]
        table: String,
        #[arg(long)]
        column: String,
        /// Postgres type, e.g. "numeric" or "timestamptz"
        #[arg(long)]
        sql_type: String,
        /// Default expression, e.g. "now()" or "false"
        #[arg(long)]
        default: Option<String>,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Dump tables to a JSON backup plus a text summary
    Backup {
        #[arg(long, default_value = "backups")]
        out: PathBuf,
        /// Tables to include (repeatable); defaults to the whole catalog
        #[arg(long = "table")]
        tables: Vec<String>,
    },
    /// Export tables to one CSV file each
    ExportCsv {
        #[arg(long, default_value = "exports")]
        out: PathBuf,
        #[arg(long = "table")]
        tables: Vec<String>,
    },
    /// Find work orders that reference auth ids instead of profile ids
    AuditReferences,
    /// Create, update and remove a throwaway work order
    SmokeTest {
        /// Leave the test rows in place
        #[arg(long, default_value_t = false)]
        keep: bool,
    },
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("toolkit=debug,cmms_admin=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "toolkit=info,cmms_admin=info".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn connect(service_role: bool) -> anyhow::Result<(Config, RestClient)> {
    let config = if service_role {
        Config::server_from_env()
    } else {
        Config::from_env()
    }
    .context("Failed to load database configuration")?;

    tracing::debug!(config = ?config, "configuration loaded");
    let client = RestClient::new(&config).context("Failed to build HTTP client")?;
    Ok((config, client))
}

fn tables_or_catalog(tables: Vec<String>) -> Vec<String> {
    if tables.is_empty() {
        shared::catalog::table_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    } else {
        tables
    }
}

fn presence_label(presence: &Presence) -> String {
    match presence {
        Presence::Present => "present".to_string(),
        Presence::Missing => "missing".to_string(),
        Presence::TableAbsent => "table does not exist".to_string(),
        Presence::Unknown { message } => format!("unknown ({})", message),
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run_probe(
    client: &RestClient,
    table: &str,
    column: Option<String>,
    discover: bool,
) -> anyhow::Result<()> {
    if let Some(column) = column {
        let presence = probe_column(client, table, &column).await;
        println!("{}.{}: {}", table, column, presence_label(&presence));
        return Ok(());
    }

    let probe = if discover {
        probe_table_with_discovery(client, table).await
    } else {
        probe_table(client, table).await
    };

    println!("{}: {}", table, probe.label());
    match &probe {
        TableProbe::Exists { columns } => {
            for column in columns {
                println!("  - {}", column);
            }
        }
        TableProbe::ExistsEmpty => {
            println!("  (no rows; re-run with --discover to learn its columns)")
        }
        TableProbe::Unknown { message } => println!("  {}", message),
        TableProbe::Absent => {}
    }
    Ok(())
}

async fn run_check(client: &RestClient) -> anyhow::Result<()> {
    let reports = check_catalog(client, shared::CATALOG).await;

    println!("{:<28} {:<16} {:>8}  {}", "Table", "State", "Rows", "Notes");
    println!("{}", "-".repeat(80));
    for r in &reports {
        let mut notes = Vec::new();
        if !r.missing_columns.is_empty() {
            notes.push(format!("missing: {}", r.missing_columns.join(", ")));
        }
        if !r.unverified_columns.is_empty() {
            notes.push(format!("unverified: {}", r.unverified_columns.join(", ")));
        }
        if !r.unexpected_columns.is_empty() {
            notes.push(format!("extra: {}", r.unexpected_columns.join(", ")));
        }
        if let TableProbe::Unknown { message } = &r.probe {
            notes.push(message.clone());
        }
        println!(
            "{:<28} {:<16} {:>8}  {}",
            r.table,
            r.probe.label(),
            r.row_count.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
            notes.join("; ")
        );
    }

    let unhealthy = reports.iter().filter(|r| !r.is_healthy()).count();
    if unhealthy > 0 {
        anyhow::bail!("{} of {} tables need attention", unhealthy, reports.len());
    }
    println!("\nAll {} tables match the catalog.", reports.len());
    Ok(())
}

async fn run_migrate(
    client: &RestClient,
    config: &Config,
    dry_run: bool,
    sql_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let reports = Ledger::builtin()
        .run(client, &config.exec_sql_function, dry_run)
        .await;

    for r in &reports {
        println!("{:<40} {}", r.id, r.status.label());
        match &r.status {
            MigrationStatus::ManualSqlRequired { reason, .. } => println!("    {}", reason),
            MigrationStatus::Blocked { waiting_on, .. } => {
                println!("    waiting on {}", waiting_on)
            }
            MigrationStatus::AlreadyApplied | MigrationStatus::Applied => {}
        }
    }

    let Some(script) = manual_script(&reports) else {
        println!("\nSchema is up to date.");
        return Ok(());
    };

    emit_manual_sql(&mut std::io::stdout().lock(), &script, sql_out.as_deref())
}

/// Print the pending SQL, and copy it to `sql_out` when given.
fn emit_manual_sql(
    out: &mut impl Write,
    script: &str,
    sql_out: Option<&Path>,
) -> anyhow::Result<()> {
    writeln!(out, "\nRun this SQL in the database SQL editor:\n")?;
    writeln!(out, "{}", script)?;

    if let Some(path) = sql_out {
        std::fs::write(path, format!("{}\n", script))
            .with_context(|| format!("Failed to write SQL to {}", path.display()))?;
        writeln!(out, "\nManual SQL also written to {}", path.display())?;
    }
    Ok(())
}

async fn run_add_column(
    client: &RestClient,
    config: &Config,
    table: String,
    column: String,
    sql_type: String,
    default: Option<String>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let mut spec = ColumnSpec::new(column, sql_type);
    if let Some(expr) = default {
        spec = spec.with_default(expr);
    }
    let change = SchemaChange::add_column(table, spec);

    let outcome = apply(client, &change, &config.exec_sql_function, dry_run).await;
    for line in outcome.render(&change) {
        println!("{}", line);
    }
    Ok(())
}

async fn run_backup(
    client: &RestClient,
    config: &Config,
    out: PathBuf,
    tables: Vec<String>,
) -> anyhow::Result<()> {
    let tables = tables_or_catalog(tables);
    let doc = backup(client, &tables, config.page_size).await;
    let (json_path, txt_path) = write_backup(&doc, &out)
        .with_context(|| format!("Failed to write backup under {}", out.display()))?;

    println!(
        "Backed up {} records from {} tables",
        doc.backup_info.record_count, doc.backup_info.table_count
    );
    for s in &doc.skipped {
        println!("  skipped {}: {}", s.table, s.reason);
    }
    println!("Backup:  {}", json_path.display());
    println!("Summary: {}", txt_path.display());
    Ok(())
}

async fn run_export_csv(
    client: &RestClient,
    config: &Config,
    out: PathBuf,
    tables: Vec<String>,
) -> anyhow::Result<()> {
    let tables = tables_or_catalog(tables);
    let report = export_csv(client, &tables, config.page_size, &out)
        .await
        .with_context(|| format!("Failed to export CSV under {}", out.display()))?;

    println!("{:<28} {:>10}", "Table", "Records");
    println!("{}", "-".repeat(40));
    for (table, n) in &report.files {
        println!("{:<28} {:>10}", table, n);
    }
    for s in &report.skipped {
        println!("  skipped {}: {}", s.table, s.reason);
    }
    println!(
        "\nExported {} records to {}",
        report.total_rows(),
        report.directory.display()
    );
    Ok(())
}

async fn run_audit(client: &RestClient, config: &Config) -> anyhow::Result<()> {
    let report = audit_profile_references(client, config.page_size)
        .await
        .context("Failed to audit work order references")?;

    println!(
        "Checked {} references on {} work orders: {} ok",
        report.references_checked, report.work_orders_checked, report.ok
    );
    if report.is_clean() {
        return Ok(());
    }

    println!();
    println!("{:<24} {:<14} {:<38} {}", "Work order", "Column", "Value", "Problem");
    println!("{}", "-".repeat(100));
    for f in &report.findings {
        let problem = match &f.kind {
            ReferenceKind::AuthIdentity { profile_id } => {
                format!("auth id; should be profile {}", profile_id)
            }
            ReferenceKind::Dangling => "no matching profile".to_string(),
            ReferenceKind::Ok => continue,
        };
        println!("{:<24} {:<14} {:<38} {}", f.work_order_id, f.column, f.value, problem);
    }

    anyhow::bail!("{} work order reference(s) need fixing", report.findings.len())
}

async fn run_smoke(client: &RestClient, keep: bool) -> anyhow::Result<()> {
    let report = run_work_order_smoke(client, keep).await;

    if let Some(id) = &report.work_order_id {
        println!("Work order {}", id);
    }
    for step in &report.steps {
        let mark = if step.passed { "✓" } else { "✗" };
        println!("{} {:<22} {}", mark, step.name, step.detail);
    }
    if report.kept {
        println!("Test rows kept (--keep).");
    }
    for step in &report.cleanup {
        let mark = if step.passed { "✓" } else { "⚠" };
        println!("{} cleanup {:<22} {}", mark, step.name, step.detail);
    }

    let orphaned = report.orphaned();
    if !orphaned.is_empty() {
        let tables: Vec<&str> = orphaned.iter().map(|s| s.name).collect();
        anyhow::bail!("smoke test left rows behind in: {}", tables.join(", "));
    }
    if !report.passed() {
        anyhow::bail!("smoke test failed");
    }
    println!("Smoke test passed.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (config, client) = connect(cli.service_role)?;
    tracing::info!(url = %config.url, key = config.key_kind(), "connected");

    match cli.command {
        Commands::Probe {
            table,
            column,
            discover,
        } => run_probe(&client, &table, column, discover).await?,

        Commands::Check => run_check(&client).await?,

        Commands::Migrate { dry_run, sql_out } => {
            run_migrate(&client, &config, dry_run, sql_out).await?
        }

        Commands::AddColumn {
            table,
            column,
            sql_type,
            default,
            dry_run,
        } => {
            run_add_column(&client, &config, table, column, sql_type, default, dry_run).await?
        }

        Commands::Backup { out, tables } => run_backup(&client, &config, out, tables).await?,

        Commands::ExportCsv { out, tables } => {
            run_export_csv(&client, &config, out, tables).await?
        }

        Commands::AuditReferences => run_audit(&client, &config).await?,

        Commands::SmokeTest { keep } => run_smoke(&client, keep).await?,
    }

    Ok(())
}
