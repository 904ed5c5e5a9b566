use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use xpr::core::log::init_logging;
use xpr::core::model::{ExpenseCategory, ExpenseStatus, ExpenseUpdate, ReportStatus};
use xpr::{AppCommand, ExpenseCommand, ReportCommand, UserCommand};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    /// Id of the user running the command
    #[arg(short, long, global = true)]
    user: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Manage users
    #[command(subcommand)]
    User(UserCommands),
    /// Record and manage expenses
    #[command(subcommand)]
    Expense(ExpenseCommands),
    /// Group expenses into reports and submit them
    #[command(subcommand)]
    Report(ReportCommands),
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a new user
    Add { name: String, email: String },
    /// Show a user, the acting user by default
    Show { id: Option<u64> },
    /// Rename the acting user
    Rename { name: String },
}

#[derive(Subcommand)]
enum ExpenseCommands {
    /// Record an expense
    Add {
        amount: f64,
        currency: String,
        #[arg(long)]
        category: ExpenseCategory,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        receipt: String,
    },
    /// List expenses, newest first
    List {
        #[arg(long)]
        category: Option<ExpenseCategory>,
        #[arg(long)]
        status: Option<ExpenseStatus>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        per_page: u32,
    },
    /// Change fields of an expense
    Update {
        id: u64,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        category: Option<ExpenseCategory>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        receipt: Option<String>,
        #[arg(long)]
        status: Option<ExpenseStatus>,
    },
    /// Delete an expense that is not part of a report
    Delete { id: u64 },
}

#[derive(Subcommand)]
enum ReportCommands {
    /// Start a draft report
    Create { title: String },
    /// Attach expenses to a draft report
    Add {
        id: u64,
        #[arg(required = true, num_args = 1..)]
        expenses: Vec<u64>,
    },
    /// Detach expenses from a draft report
    Remove {
        id: u64,
        #[arg(required = true, num_args = 1..)]
        expenses: Vec<u64>,
    },
    /// Submit a draft report
    Submit { id: u64 },
    /// Show a report and its total
    Show { id: u64 },
    /// List reports, newest first
    List {
        #[arg(long)]
        status: Option<ReportStatus>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        per_page: u32,
    },
    /// Delete a report
    Delete { id: u64 },
}

impl From<UserCommands> for UserCommand {
    fn from(cmd: UserCommands) -> UserCommand {
        match cmd {
            UserCommands::Add { name, email } => UserCommand::Add { name, email },
            UserCommands::Show { id } => UserCommand::Show { id },
            UserCommands::Rename { name } => UserCommand::Rename { name },
        }
    }
}

impl From<ExpenseCommands> for ExpenseCommand {
    fn from(cmd: ExpenseCommands) -> ExpenseCommand {
        match cmd {
            ExpenseCommands::Add {
                amount,
                currency,
                category,
                description,
                receipt,
            } => ExpenseCommand::Add {
                amount,
                currency,
                category,
                description,
                receipt,
            },
            ExpenseCommands::List {
                category,
                status,
                page,
                per_page,
            } => ExpenseCommand::List {
                category,
                status,
                page,
                per_page,
            },
            ExpenseCommands::Update {
                id,
                amount,
                currency,
                category,
                description,
                receipt,
                status,
            } => ExpenseCommand::Update {
                id,
                update: ExpenseUpdate {
                    amount,
                    currency,
                    category,
                    description,
                    receipt,
                    status,
                },
            },
            ExpenseCommands::Delete { id } => ExpenseCommand::Delete { id },
        }
    }
}

impl From<ReportCommands> for ReportCommand {
    fn from(cmd: ReportCommands) -> ReportCommand {
        match cmd {
            ReportCommands::Create { title } => ReportCommand::Create { title },
            ReportCommands::Add { id, expenses } => ReportCommand::Add { id, expenses },
            ReportCommands::Remove { id, expenses } => ReportCommand::Remove { id, expenses },
            ReportCommands::Submit { id } => ReportCommand::Submit { id },
            ReportCommands::Show { id } => ReportCommand::Show { id },
            ReportCommands::List {
                status,
                page,
                per_page,
            } => ReportCommand::List {
                status,
                page,
                per_page,
            },
            ReportCommands::Delete { id } => ReportCommand::Delete { id },
        }
    }
}

impl From<Commands> for AppCommand {
    fn from(cmd: Commands) -> AppCommand {
        match cmd {
            Commands::User(cmd) => AppCommand::User(cmd.into()),
            Commands::Expense(cmd) => AppCommand::Expense(cmd.into()),
            Commands::Report(cmd) => AppCommand::Report(cmd.into()),
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => xpr::cli::setup::setup_at_path(path),
            None => xpr::cli::setup::setup(),
        },
        Some(cmd) => xpr::run_command(cmd.into(), cli.config_path.as_deref(), cli.user).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
