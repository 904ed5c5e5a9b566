pub mod cli;
pub mod core;
pub mod entity_cache;
pub mod expenses;
pub mod normalizer;
pub mod providers;
pub mod reports;
pub mod store;
pub mod users;

use crate::core::cache::Store;
use crate::core::config::AppConfig;
use crate::core::model::{
    ExpenseCategory, ExpenseId, ExpenseStatus, ExpenseUpdate, ReportId, ReportStatus, UserId,
};
use crate::entity_cache::EntityCache;
use crate::expenses::ExpenseService;
use crate::normalizer::CurrencyNormalizer;
use crate::providers::{ExchangeRateApiProvider, RateCache};
use crate::reports::{ReportLifecycle, ReportSettings};
use crate::store::KeyValueStore;
use crate::store::repository::StoreRepository;
use crate::users::UserService;
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Services wired to one store and one upstream rate source.
pub struct App {
    pub users: UserService,
    pub expenses: ExpenseService,
    pub reports: Arc<ReportLifecycle>,
    pub currency: String,
    _store: KeyValueStore,
}

impl App {
    /// Opens the persistent store under the configured data path.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let data_path = config.default_data_path()?;
        let store = KeyValueStore::open(&data_path)?;
        let repo = Arc::new(StoreRepository::new(&store, true)?);
        let cache_collection = store.get_collection("cache", true)?;

        let provider_config = &config.providers.exchange_rate;
        let upstream = ExchangeRateApiProvider::new(
            &provider_config.base_url,
            Duration::from_secs(provider_config.timeout_secs),
        )
        .context("Failed to create exchange rate client")?;
        let rates = RateCache::with_ttl(
            Arc::new(upstream),
            Arc::clone(&cache_collection),
            config.cache.rate_ttl(),
        );
        let normalizer = Arc::new(CurrencyNormalizer::new(Arc::new(rates)));
        let entity_cache = Arc::new(EntityCache::new(cache_collection));

        let reports = Arc::new(ReportLifecycle::new(
            repo.clone(),
            repo.clone(),
            repo.clone(),
            normalizer,
            Arc::clone(&entity_cache),
            ReportSettings::from_config(config),
        ));
        let expenses = ExpenseService::new(
            repo.clone(),
            repo.clone(),
            repo.clone(),
            Arc::clone(&reports),
            Arc::clone(&entity_cache),
            config.cache.list_ttl(),
        );
        let users = UserService::new(repo, entity_cache, config.cache.user_ttl());

        Ok(Self {
            users,
            expenses,
            reports,
            currency: crate::core::currency::normalize_code(&config.currency),
            _store: store,
        })
    }
}

pub enum UserCommand {
    Add { name: String, email: String },
    Show { id: Option<UserId> },
    Rename { name: String },
}

pub enum ExpenseCommand {
    Add {
        amount: f64,
        currency: String,
        category: ExpenseCategory,
        description: String,
        receipt: String,
    },
    List {
        category: Option<ExpenseCategory>,
        status: Option<ExpenseStatus>,
        page: u32,
        per_page: u32,
    },
    Update {
        id: ExpenseId,
        update: ExpenseUpdate,
    },
    Delete {
        id: ExpenseId,
    },
}

pub enum ReportCommand {
    Create {
        title: String,
    },
    Add {
        id: ReportId,
        expenses: Vec<ExpenseId>,
    },
    Remove {
        id: ReportId,
        expenses: Vec<ExpenseId>,
    },
    Submit {
        id: ReportId,
    },
    Show {
        id: ReportId,
    },
    List {
        status: Option<ReportStatus>,
        page: u32,
        per_page: u32,
    },
    Delete {
        id: ReportId,
    },
}

pub enum AppCommand {
    User(UserCommand),
    Expense(ExpenseCommand),
    Report(ReportCommand),
}

fn require_user(acting_user: Option<UserId>) -> Result<UserId> {
    acting_user.ok_or_else(|| anyhow!("This command needs the acting user, pass --user <ID>"))
}

pub async fn run_command(
    command: AppCommand,
    config_path: Option<&str>,
    acting_user: Option<UserId>,
) -> Result<()> {
    info!("Expense reports starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let app = App::open(&config)?;

    let output = match command {
        AppCommand::User(UserCommand::Add { name, email }) => {
            cli::users::add(&app, &name, &email).await?
        }
        AppCommand::User(cmd) => cli::users::run(&app, require_user(acting_user)?, cmd).await?,
        AppCommand::Expense(cmd) => {
            cli::expenses::run(&app, require_user(acting_user)?, cmd).await?
        }
        AppCommand::Report(cmd) => {
            cli::reports::run(&app, require_user(acting_user)?, cmd).await?
        }
    };
    println!("{output}");
    Ok(())
}
