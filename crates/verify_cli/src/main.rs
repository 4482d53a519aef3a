//! rcptcheck — verify email deliverability from the command line.

use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use verify_core::{SmtpStatus, VerificationResult, VerifyOptions};

#[derive(Parser, Debug)]
#[command(name = "rcptcheck")]
#[command(about = "Check whether mail to an address is likely to be accepted, without sending any")]
#[command(version, disable_version_flag = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version, global = true)]
    version: Option<bool>,

    /// Emit raw JSON results instead of the human report
    #[arg(short = 'j', long, global = true)]
    json: bool,

    /// Skip the SMTP RCPT-TO probe
    #[arg(long = "no-smtp", global = true)]
    no_smtp: bool,

    /// Skip catch-all differentiation
    #[arg(long = "no-catchall", global = true)]
    no_catchall: bool,

    /// DNS and SMTP timeout in milliseconds
    #[arg(short = 't', long = "timeout", value_name = "ms", global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify one or more email addresses
    Check {
        #[arg(required = true, value_name = "email")]
        emails: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::FAILURE,
            };
        }
    };

    let mut options = VerifyOptions {
        smtp_check: !cli.no_smtp,
        catch_all_check: !cli.no_catchall,
        ..VerifyOptions::default()
    };
    if let Some(timeout) = cli.timeout {
        options.smtp_timeout_ms = timeout;
        options.dns_timeout_ms = timeout;
    }

    let Command::Check { emails } = cli.command;
    let results = verify_core::verify_emails(&emails, &options).await;

    if cli.json {
        match serde_json::to_string_pretty(&results) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                eprintln!("failed to serialize results: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        for result in &results {
            render(result);
        }
    }

    if results.iter().all(|result| result.valid) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn render(result: &VerificationResult) {
    let verdict = if result.valid {
        "deliverable".green().bold()
    } else {
        "undeliverable".red().bold()
    };
    println!(
        "{} {} {} ({:.0}% confidence)",
        if result.valid {
            "✓".green()
        } else {
            "✗".red()
        },
        result.email.bold(),
        verdict,
        result.confidence * 100.0
    );

    let status = match result.details.smtp_status {
        SmtpStatus::Accepted => "accepted".green(),
        SmtpStatus::Rejected => "rejected".red(),
        SmtpStatus::Unknown => "unknown".yellow(),
        SmtpStatus::Skipped => "skipped".dimmed(),
    };
    println!("  smtp: {status}");

    if let Some(catch_all) = result.details.catch_all {
        let rendered = if catch_all {
            "yes".yellow()
        } else {
            "no".green()
        };
        println!("  catch-all: {rendered}");
    }
    if let Some(provider) = &result.details.provider {
        println!("  provider: {}", provider.name);
    }
    if let Some(suggestion) = &result.details.suggestion {
        println!("  {}", format!("did you mean @{suggestion}?").yellow());
    }

    let mut flags = Vec::new();
    if result.checks.is_disposable_email {
        flags.push("disposable");
    }
    if result.checks.is_role_based_account {
        flags.push("role-based");
    }
    if result.checks.is_free_email_provider {
        flags.push("free-provider");
    }
    if !flags.is_empty() {
        println!("  flags: {}", flags.join(", ").yellow());
    }

    let safe = if result.is_safe_to_send {
        "yes".green()
    } else {
        "no".red()
    };
    println!("  safe to send: {safe}");

    for reason in &result.details.confidence_reasons {
        println!("    {}", reason.dimmed());
    }
}
