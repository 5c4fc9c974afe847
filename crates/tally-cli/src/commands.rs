use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use serde::Serialize;
use tally_ledger::{AuditReport, LedgerService, Movement};
use tally_store::SqliteLedgerStore;
use tally_types::{
    Actor, BalanceView, Page, RelationStatus, Relationship, Role, Studio, Transaction,
    TransactionKind, TypeSummary,
};
use tracing::debug;

use crate::cli::*;
use crate::config::TallyConfig;

type Ledger = LedgerService<SqliteLedgerStore>;

pub async fn run_command(cli: Cli, config: TallyConfig) -> anyhow::Result<()> {
    let store = SqliteLedgerStore::connect(&config.database)
        .await
        .with_context(|| format!("opening database {}", config.database.url))?;
    let ledger = LedgerService::with_config(Arc::new(store), config.ledger.clone());
    let out = Output(cli.format);

    let result = dispatch(&ledger, &config, cli.command, out).await;
    ledger.store().close().await;
    result
}

async fn dispatch(
    ledger: &Ledger,
    config: &TallyConfig,
    command: Command,
    out: Output,
) -> anyhow::Result<()> {
    match command {
        Command::Init => {
            ledger.store().health_check().await?;
            let report = InitReport {
                database: &config.database.url,
                schema_ready: true,
            };
            out.emit(&report, || {
                println!(
                    "{} Ledger schema ready in {}",
                    "✓".green().bold(),
                    report.database.bold()
                )
            });
            Ok(())
        }
        Command::Credit(args) => cmd_movement(ledger, TransactionKind::Recharge, args, out).await,
        Command::Consume(args) => cmd_movement(ledger, TransactionKind::Consume, args, out).await,
        Command::Refund(args) => cmd_movement(ledger, TransactionKind::Refund, args, out).await,
        Command::Freeze(args) => cmd_movement(ledger, TransactionKind::Freeze, args, out).await,
        Command::Unfreeze(args) => cmd_movement(ledger, TransactionKind::Unfreeze, args, out).await,
        Command::Balances(args) => cmd_balances(ledger, args, out).await,
        Command::History(args) => cmd_history(ledger, args, out).await,
        Command::Summary(args) => {
            let summary = ledger.summarize_by_type(args.provider).await?;
            out.emit(&summary, || print_summary(&summary));
            Ok(())
        }
        Command::Audit(args) => {
            let report = ledger.audit_balance(args.balance).await?;
            out.emit(&report, || print_audit(&report));
            if report.is_consistent() {
                Ok(())
            } else {
                anyhow::bail!("balance {} failed audit", args.balance)
            }
        }
        Command::Studio { action } => match action {
            StudioAction::Create { owner, name } => {
                let studio = ledger.create_studio(owner, &name).await?;
                out.emit(&studio, || print_studio(&studio));
                Ok(())
            }
        },
        Command::Relation { action } => cmd_relation(ledger, action, out).await,
    }
}

async fn cmd_movement(
    ledger: &Ledger,
    kind: TransactionKind,
    args: MovementArgs,
    out: Output,
) -> anyhow::Result<()> {
    let actor = Actor::new(args.actor, args.role);
    let movement = Movement {
        player_id: args.player,
        provider_id: args.provider,
        studio_id: args.studio,
        balance_type: args.balance_type,
        amount: args.amount,
        description: args.description,
    };
    debug!(%actor, %kind, "running movement");
    let view = ledger.apply(actor, kind, movement).await?;
    out.emit(&view, || {
        println!("{} {} {}", "✓".green().bold(), kind.to_string().cyan(), args.amount);
        print_balance(&view);
    });
    Ok(())
}

async fn cmd_balances(ledger: &Ledger, args: BalancesArgs, out: Output) -> anyhow::Result<()> {
    if let Some(provider) = args.provider {
        let views = ledger
            .balances_with_provider(args.player, provider, args.studio)
            .await?;
        out.emit(&views, || {
            if views.is_empty() {
                println!("No balances.");
            }
            views.iter().for_each(print_balance);
        });
        return Ok(());
    }

    let page = ledger
        .list_balances(
            args.player,
            args.balance_type,
            ledger.page_request(args.page, args.page_size),
        )
        .await?;
    out.emit(&page, || {
        print_page_header(&page, "balances");
        page.items.iter().for_each(print_balance);
    });
    Ok(())
}

async fn cmd_history(ledger: &Ledger, args: HistoryArgs, out: Output) -> anyhow::Result<()> {
    let page = ledger
        .list_transactions(
            args.balance,
            args.player,
            args.kind,
            ledger.page_request(args.page, args.page_size),
        )
        .await?;
    out.emit(&page, || {
        print_page_header(&page, "transactions");
        page.items.iter().for_each(print_transaction);
    });
    Ok(())
}

async fn cmd_relation(ledger: &Ledger, action: RelationAction, out: Output) -> anyhow::Result<()> {
    match action {
        RelationAction::Apply {
            provider,
            studio,
            notes,
        } => {
            let relation = ledger
                .apply_to_studio(Actor::new(provider, Role::Provider), studio, &notes)
                .await?;
            out.emit(&relation, || print_relation(&relation));
        }
        RelationAction::Process {
            owner,
            relation,
            decision,
            notes,
        } => {
            let relation = ledger
                .process_application(Actor::new(owner, Role::Studio), relation, decision, &notes)
                .await?;
            out.emit(&relation, || print_relation(&relation));
        }
        RelationAction::List {
            owner,
            studio,
            status,
            page,
            page_size,
        } => {
            let page = ledger
                .list_applications(
                    Actor::new(owner, Role::Studio),
                    studio,
                    status,
                    ledger.page_request(page, page_size),
                )
                .await?;
            out.emit(&page, || {
                print_page_header(&page, "applications");
                page.items.iter().for_each(print_relation);
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct Output(OutputFormat);

impl Output {
    /// Print `value` as JSON, or run `text` for human output.
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) {
        match self.0 {
            OutputFormat::Json => match serde_json::to_string_pretty(value) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("{} {e}", "error:".red().bold()),
            },
            OutputFormat::Text => text(),
        }
    }
}

#[derive(Serialize)]
struct InitReport<'a> {
    database: &'a str,
    schema_ready: bool,
}

fn print_page_header<T>(page: &Page<T>, what: &str) {
    println!(
        "{} {what} (page {}, {} per page, {} total)",
        page.items.len().to_string().bold(),
        page.page,
        page.page_size,
        page.total
    );
}

fn print_balance(view: &BalanceView) {
    let b = &view.balance;
    let studio = match &view.studio {
        Some(studio) => format!("studio {} ({})", studio.id, studio.name),
        None if b.studio_id.is_independent() => "independent".to_string(),
        None => format!("studio {}", b.studio_id),
    };
    println!(
        "  {} {:<6} player {} · provider {} · {}",
        format!("#{}", b.id).yellow(),
        b.balance_type.to_string().cyan(),
        b.player_id,
        b.provider_id,
        studio.dimmed()
    );
    println!(
        "      amount {}  frozen {}  available {}",
        b.amount.to_string().bold(),
        b.frozen_amount,
        b.available().to_string().green()
    );
}

fn print_transaction(tx: &Transaction) {
    let amount = if tx.amount.is_sign_negative() {
        tx.amount.to_string().red()
    } else {
        format!("+{}", tx.amount).green()
    };
    println!(
        "  {} {} {:<9} {} → {} ({})  by {}{}",
        format!("#{}", tx.id).yellow(),
        tx.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
        tx.kind.to_string().cyan(),
        tx.before_amount,
        tx.after_amount,
        amount,
        tx.operator_id,
        if tx.description.is_empty() {
            String::new()
        } else {
            format!("  \"{}\"", tx.description)
        }
    );
}

fn print_summary(summary: &[TypeSummary]) {
    if summary.is_empty() {
        println!("No balances.");
        return;
    }
    for row in summary {
        println!(
            "  {:<6} total {}  players {}",
            row.balance_type.to_string().cyan(),
            row.total_amount.to_string().bold(),
            row.player_count
        );
    }
}

fn print_audit(report: &AuditReport) {
    if report.is_consistent() {
        println!(
            "{} Balance {} consistent: {} transactions replay to amount {}, frozen {}",
            "✓".green().bold(),
            report.balance_id,
            report.transaction_count,
            report.replayed_amount,
            report.replayed_frozen
        );
        return;
    }
    println!(
        "{} Balance {} has {} violation(s)",
        "✗".red().bold(),
        report.balance_id,
        report.violations.len()
    );
    for v in &report.violations {
        let at = v
            .transaction_id
            .map(|id| format!("tx {id}"))
            .unwrap_or_else(|| "final".into());
        println!("  {} {:?}: {}", at.yellow(), v.kind, v.description);
    }
}

fn print_studio(studio: &Studio) {
    println!(
        "{} Studio {} \"{}\" owned by {}",
        "✓".green().bold(),
        studio.id.to_string().yellow(),
        studio.name.bold(),
        studio.owner_id
    );
}

fn print_relation(relation: &Relationship) {
    let status = match relation.status {
        RelationStatus::Pending => relation.status.to_string().yellow(),
        RelationStatus::Approved => relation.status.to_string().green(),
        RelationStatus::Rejected => relation.status.to_string().red(),
    };
    println!(
        "  {} provider {} → studio {}  {}{}",
        format!("#{}", relation.id).yellow(),
        relation.provider_id,
        relation.studio_id,
        status,
        if relation.notes.is_empty() {
            String::new()
        } else {
            format!("  \"{}\"", relation.notes)
        }
    );
}
