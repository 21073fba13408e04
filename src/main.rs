// Account Vending - Command line
//
// Runs each pipeline step by hand against the local database and sandbox cloud.
// Configuration comes from the environment (see Config::from_env).

use account_vending::{app, entities::MONTHLY_BUDGET_NAME, AccountRequest, Config, Services};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "account-vending")]
#[command(about = "Account vending pipeline - register, provision, guard, monitor", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level
    #[arg(long, env = "ACCOUNT_VENDING_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "ACCOUNT_VENDING_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,

    /// Register one account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// Registration date, e.g. 2024-04-01 (defaults to today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Process every pending change event
    Drain,

    /// Run one guardrail sweep
    Sweep,

    /// Set an account's accrued spend in the sandbox
    Spend { account_id: String, amount: String },

    /// List accounts whose guardrail could not be created
    Unguarded,

    /// Show the audit trail of one account
    Events { account_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    app::init_tracing(&cli.log_level, cli.json);

    let config = Config::from_env().context("invalid configuration")?;
    let services = Services::local(config).context("failed to open database")?;

    match cli.command {
        Command::Init => {
            println!("✓ Database ready at {}", services.config.store.database_path.display());
            println!("✓ Accounts on record: {}", services.store.count()?);
        }

        Command::Register {
            email,
            first_name,
            last_name,
            date,
        } => {
            let request = AccountRequest {
                email,
                first_name,
                last_name,
                registration_date: date
                    .unwrap_or_else(|| chrono::Utc::now().date_naive().to_string()),
            };
            match services.gate.register(request).await {
                Ok(accepted) => println!("✅ {} (sequence {})", accepted.message, accepted.sequence),
                Err(rejected) => {
                    eprintln!("❌ {} {}", rejected.status_code(), rejected.message());
                    std::process::exit(1);
                }
            }
        }

        Command::Drain => {
            let reports = services.feed.drain_all().await?;
            for report in &reports {
                for (sequence, outcome) in &report.outcomes {
                    println!("  #{:<6} {}", sequence, outcome.label());
                }
            }
            let handled: usize = reports.iter().map(|r| r.outcomes.len()).sum();
            println!("✓ {} change events handled in {} batches", handled, reports.len());
        }

        Command::Sweep => {
            let report = services.monitor.sweep().await?;
            for evaluation in &report.evaluated {
                println!(
                    "  {:<20} {:>12.2}  {:?}{}",
                    evaluation.account_id,
                    evaluation.amount,
                    evaluation.verdict,
                    if evaluation.alerted { "  🚨" } else { "" }
                );
            }
            for skip in &report.skipped {
                println!("  ⚠️  {}", skip);
            }
            println!(
                "✓ {} evaluated, {} skipped, {} alerts sent",
                report.evaluated.len(),
                report.skipped.len(),
                report.alerts_sent()
            );
        }

        Command::Spend { account_id, amount } => {
            services
                .cloud
                .set_actual_spend(&account_id, MONTHLY_BUDGET_NAME, &amount)?;
            println!("✓ {} spend set to {}", account_id, amount);
        }

        Command::Unguarded => {
            let events = services.store.unguarded_accounts()?;
            if events.is_empty() {
                println!("✓ Every provisioned account has a guardrail");
            }
            for event in events {
                println!(
                    "  {:<20} {}  {}",
                    event.entity_id,
                    event.timestamp.to_rfc3339(),
                    event.data.get("error").and_then(|v| v.as_str()).unwrap_or("")
                );
            }
        }

        Command::Events { account_id } => {
            for event in services.store.events_for_account(&account_id)? {
                println!(
                    "  {}  {:<22} {}",
                    event.timestamp.to_rfc3339(),
                    event.event_type,
                    event.data
                );
            }
        }
    }

    Ok(())
}
