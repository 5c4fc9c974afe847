use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tally_types::{
    BalanceId, BalanceType, RelationId, RelationStatus, Role, StudioId, TransactionKind, UserId,
};

#[derive(Parser)]
#[command(
    name = "tally",
    about = "Tally: balance ledger for players, providers, and studios",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (default: ./tally.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the database schema
    Init,
    /// Credit a balance, creating it on first use
    Credit(MovementArgs),
    /// Spend from an available balance
    Consume(MovementArgs),
    /// Return value to a balance
    Refund(MovementArgs),
    /// Reserve part of an available balance
    Freeze(MovementArgs),
    /// Release reserved value
    Unfreeze(MovementArgs),
    /// List a player's balances
    Balances(BalancesArgs),
    /// Show a balance's transaction history
    History(HistoryArgs),
    /// Per-type totals for a provider
    Summary(SummaryArgs),
    /// Replay a balance's transaction log and check it against the balance
    Audit(AuditArgs),
    /// Manage studios
    Studio {
        #[command(subcommand)]
        action: StudioAction,
    },
    /// Manage provider applications to studios
    Relation {
        #[command(subcommand)]
        action: RelationAction,
    },
}

#[derive(Args, Clone, Debug)]
pub struct MovementArgs {
    /// Acting user id
    #[arg(long)]
    pub actor: UserId,
    #[arg(long)]
    pub role: Role,
    #[arg(long)]
    pub player: UserId,
    #[arg(long)]
    pub provider: UserId,
    /// Ignored when acting as a studio
    #[arg(long, default_value = "0")]
    pub studio: StudioId,
    #[arg(long = "type", value_name = "TYPE")]
    pub balance_type: BalanceType,
    #[arg(long)]
    pub amount: Decimal,
    #[arg(short, long, default_value = "")]
    pub description: String,
}

#[derive(Args, Debug)]
pub struct BalancesArgs {
    #[arg(long)]
    pub player: UserId,
    /// Only balances held with this provider, all types
    #[arg(long)]
    pub provider: Option<UserId>,
    /// Studio for the per-provider lookup
    #[arg(long, default_value = "0")]
    pub studio: StudioId,
    #[arg(long = "type", value_name = "TYPE", conflicts_with = "provider")]
    pub balance_type: Option<BalanceType>,
    #[arg(long, default_value = "1")]
    pub page: i64,
    #[arg(long, default_value = "0")]
    pub page_size: i64,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[arg(long)]
    pub balance: BalanceId,
    /// Requesting player; must own the balance
    #[arg(long)]
    pub player: UserId,
    #[arg(long)]
    pub kind: Option<TransactionKind>,
    #[arg(long, default_value = "1")]
    pub page: i64,
    #[arg(long, default_value = "0")]
    pub page_size: i64,
}

#[derive(Args, Debug)]
pub struct SummaryArgs {
    #[arg(long)]
    pub provider: UserId,
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    #[arg(long)]
    pub balance: BalanceId,
}

#[derive(Subcommand, Debug)]
pub enum StudioAction {
    /// Register a studio for an owner
    Create {
        #[arg(long)]
        owner: UserId,
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum RelationAction {
    /// Apply to a studio as a provider
    Apply {
        #[arg(long)]
        provider: UserId,
        #[arg(long)]
        studio: StudioId,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Approve or reject a pending application
    Process {
        /// Studio owner
        #[arg(long)]
        owner: UserId,
        #[arg(long)]
        relation: RelationId,
        /// approved or rejected
        #[arg(long)]
        decision: RelationStatus,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// List applications to a studio
    List {
        /// Studio owner
        #[arg(long)]
        owner: UserId,
        #[arg(long)]
        studio: StudioId,
        #[arg(long)]
        status: Option<RelationStatus>,
        #[arg(long, default_value = "1")]
        page: i64,
        #[arg(long, default_value = "0")]
        page_size: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_credit() {
        let cli = Cli::try_parse_from([
            "tally", "credit", "--actor", "3", "--role", "provider", "--player", "7",
            "--provider", "3", "--type", "money", "--amount", "100.00",
        ])
        .unwrap();
        let Command::Credit(args) = cli.command else {
            panic!("expected credit");
        };
        assert_eq!(args.role, Role::Provider);
        assert_eq!(args.studio, StudioId::INDEPENDENT);
        assert_eq!(args.amount, Decimal::new(10000, 2));
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn rejects_unknown_balance_type() {
        let err = Cli::try_parse_from([
            "tally", "credit", "--actor", "3", "--role", "provider", "--player", "7",
            "--provider", "3", "--type", "gold", "--amount", "1",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn parses_relation_process_with_global_flags() {
        let cli = Cli::try_parse_from([
            "tally", "relation", "process", "--owner", "9", "--relation", "1",
            "--decision", "approved", "--format", "json", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Relation {
                action: RelationAction::Process { decision, .. },
            } => assert_eq!(decision, RelationStatus::Approved),
            _ => panic!("expected relation process"),
        }
    }
}
