use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::application::{EscrowRequest, LedgerService, TransferRequest};
use crate::config::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_RETRIES, DEFAULT_MIN_WITHDRAWAL,
    DEFAULT_PLATFORM_OWNER, DEFAULT_RETRY_BACKOFF_MS, LedgerConfig,
};
use crate::domain::{
    CommissionRate, Currency, EscrowStatus, EscrowTransaction, ReconciliationIssue,
    TransactionResult, format_amount, parse_amount,
};
use crate::storage::AuditFilter;

/// Escrow Ledger - wallet balances and order escrow settlement
#[derive(Parser)]
#[command(name = "escrow-ledger")]
#[command(about = "A wallet ledger with exactly-once transfers and escrow settlement")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "LEDGER_DATABASE", default_value = "ledger.db")]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Owner of the accounts that collect commission
    #[arg(long, global = true, env = "LEDGER_PLATFORM_OWNER", default_value = DEFAULT_PLATFORM_OWNER)]
    pub platform_owner: String,

    /// Actors allowed to settle escrows and resolve disputes (comma-separated)
    #[arg(long, global = true, env = "LEDGER_RESOLVERS", value_delimiter = ',')]
    pub resolvers: Vec<String>,

    /// Smallest withdrawal, in minor units
    #[arg(long, global = true, env = "LEDGER_MIN_WITHDRAWAL", default_value_t = DEFAULT_MIN_WITHDRAWAL)]
    pub min_withdrawal: i64,

    /// Retries for operations that lose a concurrent race
    #[arg(long, global = true, env = "LEDGER_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Credit an account, creating it on first use
    Deposit {
        /// Account owner or account ID
        account: String,

        /// Amount (e.g., "50.00", or "4000" for zero-decimal currencies)
        amount: String,

        /// Currency code (e.g., GNF, EUR)
        #[arg(short, long)]
        currency: String,

        /// Idempotency reference; reusing it replays the first result
        #[arg(short, long)]
        reference: String,
    },

    /// Debit an account
    Withdraw {
        /// Account owner or account ID
        account: String,

        /// Amount
        amount: String,

        /// Currency code
        #[arg(short, long)]
        currency: String,

        /// Idempotency reference
        #[arg(short, long)]
        reference: String,
    },

    /// Move funds between accounts
    Transfer {
        /// Amount
        amount: String,

        /// Sender owner or account ID
        #[arg(long)]
        from: String,

        /// Receiver owner or account ID
        #[arg(long)]
        to: String,

        /// Currency code
        #[arg(short, long)]
        currency: String,

        /// Idempotency reference
        #[arg(short, long)]
        reference: String,

        /// Description of the transfer
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show balances for one owner or all accounts
    Balance {
        /// Account owner (omit for all accounts)
        owner: Option<String>,
    },

    /// List recent ledger transactions
    Transactions {
        /// Restrict to one account (owner requires --currency)
        #[arg(long)]
        account: Option<String>,

        /// Currency of the account filter
        #[arg(short, long)]
        currency: Option<String>,

        /// Maximum number of transactions to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Escrow commands
    #[command(subcommand)]
    Escrow(EscrowCommands),

    /// Account administration
    #[command(subcommand)]
    Account(AccountCommands),

    /// Show audit log entries
    Audit {
        /// Entries caused by one transaction or escrow
        #[arg(long)]
        correlation: Option<String>,

        /// Entries about one wallet or escrow
        #[arg(long)]
        target: Option<String>,

        /// Filter by action (e.g., wallet.debit, escrow.released)
        #[arg(long)]
        action: Option<String>,

        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Export data to CSV or JSON
    Export {
        /// What to export
        #[arg(value_enum)]
        export_type: ExportType,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Output format (the full snapshot is always JSON)
        #[arg(short, long, value_enum, default_value = "csv")]
        format: ExportFormat,
    },

    /// Reconcile balances, escrow holds and the audit log
    Check,
}

#[derive(Subcommand)]
pub enum EscrowCommands {
    /// Hold funds from the payer against an order
    Create {
        /// Order reference (one escrow per order)
        #[arg(long)]
        order: String,

        /// Payer owner ID
        #[arg(long)]
        payer: String,

        /// Payee owner ID
        #[arg(long)]
        payee: String,

        /// Amount
        amount: String,

        /// Currency code
        #[arg(short, long)]
        currency: String,

        /// Platform commission percent, fixed now (e.g., "2.5")
        #[arg(long, default_value = "0")]
        commission: String,
    },

    /// Ask the payer or a resolver to release
    RequestRelease {
        /// Escrow ID
        id: String,

        /// Acting user
        #[arg(long)]
        actor: String,
    },

    /// Pay out to the payee and the platform
    Release {
        /// Escrow ID
        id: String,

        /// Acting user
        #[arg(long)]
        actor: String,

        /// Why the escrow is being released
        #[arg(long)]
        reason: Option<String>,
    },

    /// Return the held amount to the payer
    Refund {
        /// Escrow ID
        id: String,

        /// Acting user
        #[arg(long)]
        actor: String,

        /// Why the escrow is being refunded
        #[arg(long)]
        reason: Option<String>,
    },

    /// Freeze the escrow for manual resolution
    Dispute {
        /// Escrow ID
        id: String,

        /// Acting user
        #[arg(long)]
        actor: String,

        /// Reason for the dispute
        #[arg(long)]
        reason: Option<String>,
    },

    /// Show escrow details (by ID or order reference)
    Show {
        /// Escrow ID or order reference
        id: String,
    },

    /// List escrows
    List {
        /// Filter by status: pending, held, released, refunded, dispute
        #[arg(long)]
        status: Option<String>,

        /// Only escrows where this party is payer or payee
        #[arg(long)]
        party: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Block all balance changes on an account
    Suspend {
        /// Account owner or account ID
        account: String,

        /// Currency code
        #[arg(short, long)]
        currency: String,

        /// Acting administrator
        #[arg(long)]
        actor: String,
    },

    /// Lift a suspension
    Reactivate {
        /// Account owner or account ID
        account: String,

        /// Currency code
        #[arg(short, long)]
        currency: String,

        /// Acting administrator
        #[arg(long)]
        actor: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ExportType {
    Transactions,
    Balances,
    Audit,
    Full,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl Cli {
    /// Ledger settings assembled from arguments and environment.
    pub fn config(&self) -> LedgerConfig {
        LedgerConfig {
            min_withdrawal: self.min_withdrawal,
            platform_owner: self.platform_owner.clone(),
            resolvers: self
                .resolvers
                .iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect(),
            max_retries: self.max_retries,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();

        if matches!(self.command, Commands::Init) {
            let service = LedgerService::init(&self.database, config).await?;
            service.close().await;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = LedgerService::connect(&self.database, config).await?;
        let result = run_command(&service, self.command).await;
        service.close().await;
        result
    }
}

async fn run_command(service: &LedgerService, command: Commands) -> Result<()> {
    match command {
        Commands::Init => anyhow::bail!("init does not run against an open database"),

        Commands::Deposit {
            account,
            amount,
            currency,
            reference,
        } => {
            let currency = parse_currency(&currency)?;
            let amount = parse_amount(&amount, &currency).context("Invalid amount")?;
            let result = service
                .deposit(&account, amount, &currency, &reference)
                .await?;
            print_transaction_result("Deposited", &result);
        }

        Commands::Withdraw {
            account,
            amount,
            currency,
            reference,
        } => {
            let currency = parse_currency(&currency)?;
            let amount = parse_amount(&amount, &currency).context("Invalid amount")?;
            let result = service
                .withdraw(&account, amount, &currency, &reference)
                .await?;
            print_transaction_result("Withdrew", &result);
        }

        Commands::Transfer {
            amount,
            from,
            to,
            currency,
            reference,
            description,
        } => {
            let currency = parse_currency(&currency)?;
            let amount = parse_amount(&amount, &currency).context("Invalid amount")?;
            let result = service
                .transfer(&TransferRequest {
                    sender: from,
                    receiver: to,
                    amount,
                    currency,
                    description,
                    reference,
                })
                .await?;
            print_transaction_result("Transferred", &result);
        }

        Commands::Balance { owner } => run_balance_command(service, owner.as_deref()).await?,

        Commands::Transactions {
            account,
            currency,
            limit,
        } => run_transactions_command(service, account, currency, limit).await?,

        Commands::Escrow(cmd) => run_escrow_command(service, cmd).await?,

        Commands::Account(cmd) => run_account_command(service, cmd).await?,

        Commands::Audit {
            correlation,
            target,
            action,
            limit,
        } => {
            let correlation_id = correlation
                .map(|c| Uuid::parse_str(&c))
                .transpose()
                .context("Invalid correlation ID format (expected UUID)")?;
            let filter = AuditFilter {
                target_id: target,
                correlation_id,
                action,
                limit,
                ..Default::default()
            };
            let entries = service.audit_entries(&filter).await?;
            if entries.is_empty() {
                println!("No audit entries found.");
                return Ok(());
            }
            println!(
                "{:<6} {:<25} {:<12} {:<8} {:<36} METADATA",
                "SEQ", "ACTION", "ACTOR", "TARGET", "TARGET ID"
            );
            println!("{}", "-".repeat(110));
            for entry in entries {
                println!(
                    "{:<6} {:<25} {:<12} {:<8} {:<36} {}",
                    entry.sequence,
                    entry.action,
                    truncate(&entry.actor_id, 12),
                    entry.target_type.as_str(),
                    entry.target_id,
                    entry.metadata
                );
            }
        }

        Commands::Export {
            export_type,
            output,
            format,
        } => run_export_command(service, export_type, output.as_deref(), format).await?,

        Commands::Check => run_check_command(service).await?,
    }

    Ok(())
}

async fn run_balance_command(service: &LedgerService, owner: Option<&str>) -> Result<()> {
    let summaries = service.balances(owner).await?;
    if summaries.is_empty() {
        println!("No accounts found.");
        return Ok(());
    }

    println!(
        "{:<20} {:<8} {:>16} {:>16} {:<10}",
        "OWNER", "CURRENCY", "BALANCE", "IN ESCROW", "STATUS"
    );
    println!("{}", "-".repeat(74));
    for summary in summaries {
        let account = &summary.account;
        println!(
            "{:<20} {:<8} {:>16} {:>16} {:<10}",
            truncate(&account.owner_id, 20),
            account.currency.as_str(),
            format_amount(account.balance, &account.currency),
            format_amount(summary.held_in_escrow, &account.currency),
            account.status.as_str()
        );
    }
    Ok(())
}

async fn run_transactions_command(
    service: &LedgerService,
    account: Option<String>,
    currency: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let account_id = match account {
        Some(identifier) => match Uuid::parse_str(&identifier) {
            Ok(id) => Some(id),
            Err(_) => {
                let currency = currency
                    .as_deref()
                    .context("--currency is required when filtering by owner")?;
                let currency = parse_currency(currency)?;
                Some(service.get_account(&identifier, &currency).await?.id)
            }
        },
        None => None,
    };

    let transactions = service.list_transactions(account_id, limit).await?;
    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<20} {:<9} {:<10} {:>16} {:<25}",
        "REFERENCE", "TYPE", "STATUS", "AMOUNT", "CREATED"
    );
    println!("{}", "-".repeat(84));
    for tx in transactions {
        println!(
            "{:<20} {:<9} {:<10} {:>16} {:<25}",
            truncate(&tx.reference, 20),
            tx.tx_type.as_str(),
            tx.status.as_str(),
            format_amount(tx.amount, &tx.currency),
            tx.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn run_escrow_command(service: &LedgerService, cmd: EscrowCommands) -> Result<()> {
    match cmd {
        EscrowCommands::Create {
            order,
            payer,
            payee,
            amount,
            currency,
            commission,
        } => {
            let currency = parse_currency(&currency)?;
            let amount = parse_amount(&amount, &currency).context("Invalid amount")?;
            let commission_rate =
                CommissionRate::parse_percent(&commission).context("Invalid commission percent")?;
            let escrow = service
                .escrow_create(&EscrowRequest {
                    order_id: order,
                    payer_id: payer,
                    payee_id: payee,
                    amount,
                    currency,
                    commission_rate,
                })
                .await?;
            println!(
                "Escrow {} {} for order {} ({})",
                escrow.status,
                format_amount(escrow.amount, &escrow.currency),
                escrow.order_id,
                escrow.id
            );
        }

        EscrowCommands::RequestRelease { id, actor } => {
            let escrow_id = parse_escrow_id(&id)?;
            service.escrow_request_release(escrow_id, &actor).await?;
            println!("Release requested for escrow {}", escrow_id);
        }

        EscrowCommands::Release { id, actor, reason } => {
            let escrow = service
                .escrow_release(parse_escrow_id(&id)?, &actor, reason.as_deref())
                .await?;
            print_escrow(&escrow);
        }

        EscrowCommands::Refund { id, actor, reason } => {
            let escrow = service
                .escrow_refund(parse_escrow_id(&id)?, &actor, reason.as_deref())
                .await?;
            print_escrow(&escrow);
        }

        EscrowCommands::Dispute { id, actor, reason } => {
            let escrow = service
                .escrow_dispute(parse_escrow_id(&id)?, &actor, reason.as_deref())
                .await?;
            print_escrow(&escrow);
        }

        EscrowCommands::Show { id } => {
            let escrow = match Uuid::parse_str(&id) {
                Ok(escrow_id) => service.get_escrow(escrow_id).await?,
                Err(_) => service.get_escrow_by_order(&id).await?,
            };
            print_escrow(&escrow);
        }

        EscrowCommands::List { status, party } => {
            let status = status
                .map(|s| {
                    EscrowStatus::from_str(&s)
                        .with_context(|| format!("Invalid escrow status '{}'", s))
                })
                .transpose()?;
            let escrows = match party {
                Some(party) => service.list_escrows_for(&party, status).await?,
                None => service.list_escrows(status).await?,
            };
            if escrows.is_empty() {
                println!("No escrows found.");
                return Ok(());
            }

            println!(
                "{:<36} {:<16} {:<9} {:>16} {:<12} {:<12}",
                "ID", "ORDER", "STATUS", "AMOUNT", "PAYER", "PAYEE"
            );
            println!("{}", "-".repeat(106));
            for escrow in escrows {
                println!(
                    "{:<36} {:<16} {:<9} {:>16} {:<12} {:<12}",
                    escrow.id,
                    truncate(&escrow.order_id, 16),
                    escrow.status.as_str(),
                    format_amount(escrow.amount, &escrow.currency),
                    truncate(&escrow.payer_id, 12),
                    truncate(&escrow.payee_id, 12)
                );
            }
        }
    }
    Ok(())
}

async fn run_account_command(service: &LedgerService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Suspend {
            account,
            currency,
            actor,
        } => {
            let currency = parse_currency(&currency)?;
            let account = service.suspend_account(&account, &currency, &actor).await?;
            println!("Suspended account {} ({} {})", account.id, account.owner_id, account.currency);
        }
        AccountCommands::Reactivate {
            account,
            currency,
            actor,
        } => {
            let currency = parse_currency(&currency)?;
            let account = service
                .reactivate_account(&account, &currency, &actor)
                .await?;
            println!("Reactivated account {} ({} {})", account.id, account.owner_id, account.currency);
        }
    }
    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    export_type: ExportType,
    output: Option<&str>,
    format: ExportFormat,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(service);

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    let (count, what) = match (export_type, format) {
        (ExportType::Transactions, ExportFormat::Csv) => {
            (exporter.export_transactions_csv(writer).await?, "transactions")
        }
        (ExportType::Transactions, ExportFormat::Json) => {
            (exporter.export_transactions_json(writer).await?, "transactions")
        }
        (ExportType::Balances, ExportFormat::Csv) => {
            (exporter.export_balances_csv(writer).await?, "balances")
        }
        (ExportType::Balances, ExportFormat::Json) => {
            (exporter.export_balances_json(writer).await?, "balances")
        }
        (ExportType::Audit, ExportFormat::Csv) => {
            (exporter.export_audit_csv(writer).await?, "audit entries")
        }
        (ExportType::Audit, ExportFormat::Json) => {
            (exporter.export_audit_json(writer).await?, "audit entries")
        }
        (ExportType::Full, _) => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full ledger: {} accounts, {} transactions, {} escrows, {} audit entries",
                    snapshot.accounts.len(),
                    snapshot.transactions.len(),
                    snapshot.escrows.len(),
                    snapshot.audit_log.len()
                );
            }
            return Ok(());
        }
    };

    if output.is_some() {
        eprintln!("Exported {} {}", count, what);
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    let report = service.reconcile().await?;

    println!("Ledger Reconciliation");
    println!("=====================");
    println!();
    println!("Accounts:     {}", report.wallet_count);
    println!("Transactions: {}", report.transaction_count);
    println!("Escrows:      {}", report.escrow_count);
    println!();

    for (currency, totals) in &report.totals {
        println!(
            "{}: balances {} + held {} = deposited {} - withdrawn {}",
            currency, totals.wallet_total, totals.held_in_escrow, totals.deposited, totals.withdrawn
        );
    }

    if report.is_healthy() {
        println!();
        println!("Status: OK");
        return Ok(());
    }

    println!();
    println!("Issues found:");
    for issue in &report.issues {
        match issue {
            ReconciliationIssue::TotalsMismatch {
                currency,
                expected,
                actual,
            } => println!(
                "  - {} totals differ: expected {}, found {}",
                currency, expected, actual
            ),
            ReconciliationIssue::AuditMismatch {
                wallet,
                balance,
                audited,
            } => println!(
                "  - account {} balance {} but audit log sums to {}",
                wallet, balance, audited
            ),
            ReconciliationIssue::NegativeBalance { wallet, balance } => {
                println!("  - account {} has negative balance {}", wallet, balance)
            }
            ReconciliationIssue::SplitLeak { escrow } => {
                println!("  - escrow {} split does not add up to its amount", escrow)
            }
        }
    }
    anyhow::bail!("reconciliation found {} issue(s)", report.issues.len())
}

fn print_transaction_result(verb: &str, result: &TransactionResult) {
    let tx = &result.transaction;
    println!(
        "{} {} ({}, reference {})",
        verb,
        format_amount(tx.amount, &tx.currency),
        tx.status,
        tx.reference
    );
    if let Some(balance) = result.sender_balance {
        println!("  Sender balance:   {}", format_amount(balance, &tx.currency));
    }
    if let Some(balance) = result.receiver_balance {
        println!("  Receiver balance: {}", format_amount(balance, &tx.currency));
    }
}

fn print_escrow(escrow: &EscrowTransaction) {
    println!("Escrow: {}", escrow.id);
    println!("  Order:        {}", escrow.order_id);
    println!("  Status:       {}", escrow.status);
    println!("  Payer:        {}", escrow.payer_id);
    println!("  Payee:        {}", escrow.payee_id);
    println!("  Amount:       {}", format_amount(escrow.amount, &escrow.currency));
    println!("  Commission:   {}", escrow.commission_rate);
    if let Some(split) = escrow.split() {
        println!("  Net to payee: {}", format_amount(split.net_amount, &escrow.currency));
        println!(
            "  Platform fee: {}",
            format_amount(split.commission_amount, &escrow.currency)
        );
    }
    if let Some(reason) = &escrow.dispute_reason {
        println!("  Dispute:      {}", reason);
    }
    if let Some(resolver) = &escrow.resolved_by {
        println!("  Resolved by:  {}", resolver);
    }
    if let Some(note) = &escrow.resolution_note {
        println!("  Note:         {}", note);
    }
    println!("  Created:      {}", escrow.created_at.format("%Y-%m-%d %H:%M:%S"));
}

fn parse_currency(code: &str) -> Result<Currency> {
    Currency::new(code).with_context(|| format!("Invalid currency code '{}'", code))
}

fn parse_escrow_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).context("Invalid escrow ID format (expected UUID)")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}
