//! Terminal output for bloomdb commands.
//! The human printer uses comfy-table and colored; the test printer writes
//! one uncoloured tab-separated line per event so output can be diffed.

use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use bloomdb_core::commands::migrate::MigrateDetail;
use bloomdb_core::db::DatabaseObject;
use bloomdb_core::directory::MigrationDirectory;
use bloomdb_core::{BaselineReport, DestroyReport, MigrateReport, MigrationInfo, MigrationState, RepairReport};

/// Output style, chosen by `BLOOMDB_PRINTER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Printer {
    Human,
    Test,
}

impl Printer {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("BLOOMDB_PRINTER").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("human") => Printer::Human,
            Some("test") => Printer::Test,
            Some(other) => {
                log::warn!("Unknown printer, using human; BLOOMDB_PRINTER={}", other);
                Printer::Human
            }
        }
    }

    /// Announce a subdirectory target before its command output.
    pub fn directory_header(&self, dir: &MigrationDirectory) {
        match self {
            Printer::Human => println!(
                "{} {} {}",
                "==>".cyan().bold(),
                dir.name.bold(),
                format!("({})", dir.version_table).dimmed()
            ),
            Printer::Test => println!("directory\t{}\t{}", dir.name, dir.version_table),
        }
    }

    pub fn baseline(&self, report: &BaselineReport) {
        match self {
            Printer::Human if report.created => println!(
                "{}",
                format!(
                    "Successfully baselined {} at version {}.",
                    report.table, report.version
                )
                .green()
                .bold()
            ),
            Printer::Human => println!(
                "{}",
                format!(
                    "{} already has a baseline at version {}. Nothing changed.",
                    report.table, report.version
                )
                .yellow()
            ),
            Printer::Test => println!("{}", baseline_line(report)),
        }
    }

    pub fn migrate(&self, report: &MigrateReport) {
        match self {
            Printer::Human => print_migrate_summary(report),
            Printer::Test => migrate_lines(report).iter().for_each(|l| println!("{}", l)),
        }
    }

    pub fn info(&self, infos: &[MigrationInfo]) {
        match self {
            Printer::Human => print_info_table(infos),
            Printer::Test => infos.iter().for_each(|i| println!("{}", info_line(i))),
        }
    }

    pub fn repair(&self, report: &RepairReport) {
        match self {
            Printer::Human => print_repair_result(report),
            Printer::Test => repair_lines(report).iter().for_each(|l| println!("{}", l)),
        }
    }

    pub fn destroy(&self, report: &DestroyReport) {
        match self {
            Printer::Human => print_destroy_result(report),
            Printer::Test => report
                .dropped
                .iter()
                .for_each(|o| println!("dropped\t{}\t{}", o.kind, o.name)),
        }
    }

    /// Prompt for the destroy confirmation on stderr.
    pub fn destroy_prompt(&self) {
        match self {
            Printer::Human => eprint!(
                "{} This drops every object in the database. Type {} to continue: ",
                "WARNING:".red().bold(),
                "DESTROY".bold()
            ),
            Printer::Test => eprint!("confirm\tDESTROY\t"),
        }
    }
}

// ── Test printer lines ──

fn baseline_line(report: &BaselineReport) -> String {
    let outcome = if report.created { "created" } else { "exists" };
    format!("baseline\t{}\t{}\t{}", outcome, report.table, report.version)
}

fn object_lines(detail: &MigrateDetail, lines: &mut Vec<String>) {
    for object in &detail.objects_created {
        lines.push(format!("created\t{}\t{}", object.kind, object.name));
    }
    for object in &detail.objects_dropped {
        lines.push(format!("deleted\t{}\t{}", object.kind, object.name));
    }
}

fn migrate_lines(report: &MigrateReport) -> Vec<String> {
    let mut lines = Vec::new();
    for detail in &report.details {
        lines.push(format!(
            "applied\t{}\t{}",
            detail.migration_type.as_str(),
            detail.script
        ));
        object_lines(detail, &mut lines);
    }
    if let Some(script) = &report.post_migration {
        lines.push(format!("post-migration\t{}", script));
    }
    lines.push(format!(
        "migrate\t{}\t{}",
        report.table, report.migrations_applied
    ));
    lines
}

fn info_line(info: &MigrationInfo) -> String {
    format!(
        "info\t{}\t{}\t{}\t{}",
        info.version.as_deref().unwrap_or(""),
        info.description,
        info.migration_type.as_str(),
        info.state
    )
}

fn repair_lines(report: &RepairReport) -> Vec<String> {
    let mut lines = vec![format!("removed-failed\t{}", report.failed_removed)];
    lines.extend(report.details.iter().map(|d| format!("updated\t{}", d)));
    lines.extend(report.warnings.iter().map(|w| format!("warning\t{}", w)));
    lines
}

// ── Human printer ──

/// Format migration info as a colored table.
fn print_info_table(infos: &[MigrationInfo]) {
    if infos.is_empty() {
        println!("{}", "No migrations found.".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Version"),
            Cell::new("Description"),
            Cell::new("Type"),
            Cell::new("State"),
            Cell::new("Installed On"),
            Cell::new("Execution Time"),
        ]);

    for info in infos {
        let installed_on = info
            .installed_on
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let exec_time = info
            .execution_time
            .map(|t| format!("{}ms", t))
            .unwrap_or_default();

        table.add_row(vec![
            Cell::new(info.version.as_deref().unwrap_or("")),
            Cell::new(&info.description),
            Cell::new(info.migration_type.as_str()),
            Cell::new(format_state(info.state)),
            Cell::new(&installed_on),
            Cell::new(&exec_time),
        ]);
    }

    println!("{table}");
}

/// Return a colored string representation of a migration state.
fn format_state(state: MigrationState) -> String {
    let label = state.to_string();
    match state {
        MigrationState::Pending => label.yellow().to_string(),
        MigrationState::Success => label.green().to_string(),
        MigrationState::Failed => label.red().bold().to_string(),
        MigrationState::Checksum => label.cyan().to_string(),
        MigrationState::Missing => label.red().to_string(),
        MigrationState::Baseline => label.blue().to_string(),
        MigrationState::BelowBaseline => label.dimmed().to_string(),
    }
}

fn print_objects(objects: &[DatabaseObject], marker: &str) {
    for object in objects {
        println!("      {} {}", marker, object);
    }
}

fn print_migrate_summary(report: &MigrateReport) {
    if report.migrations_applied == 0 {
        println!("{}", "Schema is up to date. No migration necessary.".green());
    } else {
        println!(
            "{}",
            format!(
                "Successfully applied {} migration(s) to {} (execution time {}ms)",
                report.migrations_applied, report.table, report.total_time_ms
            )
            .green()
            .bold()
        );
    }

    for detail in &report.details {
        let version = detail.version.as_deref().unwrap_or("(repeatable)");
        println!(
            "  {} {} {} ({}ms)",
            "→".green(),
            version,
            detail.description,
            detail.execution_time_ms
        );
        print_objects(&detail.objects_created, &"+".green().to_string());
        print_objects(&detail.objects_dropped, &"-".red().to_string());
    }

    if let Some(script) = &report.post_migration {
        println!("{}", format!("Ran post-migration script {}", script).dimmed());
    }
}

fn print_repair_result(report: &RepairReport) {
    for warning in &report.warnings {
        println!("{} {}", "WARNING:".yellow().bold(), warning);
    }

    if report.failed_removed == 0 && report.records_updated == 0 {
        println!("{}", "Repair complete. No changes needed.".green());
        return;
    }

    println!("{}", "Repair complete:".green().bold());
    if report.failed_removed > 0 {
        println!(
            "  {} removed {} failed migration record(s)",
            "→".green(),
            report.failed_removed
        );
    }
    for detail in &report.details {
        println!("  {} {}", "→".green(), detail);
    }
}

fn print_destroy_result(report: &DestroyReport) {
    if report.dropped.is_empty() {
        println!("{}", "Nothing to drop.".green());
        return;
    }

    println!(
        "{}",
        format!("Dropped {} object(s):", report.dropped.len())
            .green()
            .bold()
    );
    for object in &report.dropped {
        println!("  {} {}", "✗".red(), object);
    }
}
