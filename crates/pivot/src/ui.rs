//! Console output for the pivot CLI.
//!
//! Logs go to stderr through `tracing`; these helpers write the short,
//! human-facing progress and summary lines to stdout.

use colored::Colorize;

use crate::orchestrator::BootstrapReport;

const RULE_WIDTH: usize = 56;

/// Print the banner shown at the top of a command.
pub fn print_banner(title: &str) {
    let rule = "─".repeat(RULE_WIDTH);
    println!();
    println!("{}", rule.bright_black());
    println!("  {}", title.cyan().bold());
    println!("{}", rule.bright_black());
}

pub fn print_step(message: &str) {
    println!("{} {}", "→".cyan(), message.bold());
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow().bold(), message.yellow());
}

/// Print an error to stderr.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

pub fn print_info(message: &str) {
    println!("{} {}", "·".blue().bold(), message);
}

/// Print an indented `key: value` line.
pub fn print_field(key: &str, value: &str) {
    println!("    {:<12} {}", format!("{key}:").bright_black(), value.green());
}

/// Print the outcome of a bootstrap run.
///
/// The password itself is never printed; `pivot password` reads it back.
pub fn print_report(report: &BootstrapReport, dry_run: bool, remote: &str, repo_url: &str) {
    print_success(if report.tree_created {
        "Manifest tree composed"
    } else {
        "Manifest tree reused"
    });
    if dry_run {
        print_success("Dry run complete, cluster untouched");
    } else {
        print_success(&format!("Pushed {} time(s) to {remote}", report.pushes));
        print_success("Cluster handed off to Argo CD");
    }
    print_field("Repository", repo_url);
    if report.password_generated && !dry_run {
        print_info("A password was generated; read it back with `pivot password`");
    }
}
