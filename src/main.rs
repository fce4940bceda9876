use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "vouch", version, about = "Import card transaction vouchers from Gmail")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,

    /// SQLite database path
    #[arg(long, global = true, env = "VOUCH_DB_PATH")]
    db: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import vouchers received during one month
    Sync(SyncArgs),
    /// Run the HTTP sync trigger
    Serve,
    /// Manage users and their Gmail credentials
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage merchant categorization rules
    Rules {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// List imported transactions
    Transactions(TransactionsArgs),
    /// Spend per category for one month
    Summary(SummaryArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Month to import, as YYYY-MM
    #[arg(long)]
    month: String,
    /// Only sync this user (id or email)
    #[arg(long)]
    user: Option<String>,
}

#[derive(Debug, Args)]
struct TransactionsArgs {
    /// User id or email
    user: String,
    /// Only transactions in this month (YYYY-MM)
    #[arg(long)]
    month: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

#[derive(Debug, Args)]
struct SummaryArgs {
    /// User id or email
    user: String,
    /// Month to summarize (YYYY-MM), defaults to the current month
    #[arg(long)]
    month: Option<String>,
}

#[derive(Debug, Subcommand)]
enum UserCommands {
    /// Register a user with an OAuth token set
    Add {
        email: String,
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: Option<String>,
        /// Access token expiry, unix seconds or RFC 3339
        #[arg(long)]
        expires_at: Option<String>,
    },
    /// List users
    List,
}

#[derive(Debug, Subcommand)]
enum RuleCommands {
    /// Add a rule mapping a merchant pattern to a category
    Add {
        /// User id or email
        user: String,
        name: String,
        /// Case-insensitive regular expression over the normalized merchant
        pattern: String,
        /// Category name, created if missing
        category: String,
        /// Lower numbers are evaluated first
        #[arg(long, default_value_t = 100)]
        priority: i64,
        #[arg(long, default_value_t = false)]
        inactive: bool,
    },
    /// List a user's rules in evaluation order
    List {
        /// User id or email
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, bail, Context, Result};
    use chrono::{DateTime, Utc};
    use regex::RegexBuilder;
    use tokio_util::sync::CancellationToken;
    use tracing::{info, warn};
    use uuid::Uuid;

    use vouch::config::Settings;
    use vouch::db::models::{Credential, MerchantRule, User};
    use vouch::db::{Database, TransactionFilters};
    use vouch::gmail::credentials::{CredentialBroker, GoogleTokenEndpoint};
    use vouch::gmail::GmailClient;
    use vouch::output::{self, OutputFormat, RuleItem, TransactionItem, UserItem};
    use vouch::parsing::VoucherParser;
    use vouch::server::{self, AppState};
    use vouch::sync::{SyncMonth, SyncOptions, SyncOrchestrator};

    use super::{
        Cli, Commands, RuleCommands, SummaryArgs, SyncArgs, TransactionsArgs, UserCommands,
    };

    const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let settings = Settings::from_env(cli.db)?;

        match cli.command {
            Commands::Sync(args) => handle_sync(&settings, args, cli.json).await,
            Commands::Serve => handle_serve(&settings).await,
            Commands::Users { command } => handle_users(&settings, command, cli.json),
            Commands::Rules { command } => handle_rules(&settings, command, cli.json),
            Commands::Transactions(args) => handle_transactions(&settings, args, cli.json),
            Commands::Summary(args) => handle_summary(&settings, args, cli.json),
        }
    }

    fn open_database(settings: &Settings) -> Result<Arc<Database>> {
        let db = Database::open(&settings.db_path)
            .with_context(|| format!("open vouch database at {}", settings.db_path.display()))?;
        Ok(Arc::new(db))
    }

    fn build_orchestrator(settings: &Settings, db: Arc<Database>) -> Result<SyncOrchestrator> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("build http client")?;
        let endpoint = GoogleTokenEndpoint::new(
            client.clone(),
            settings.token_url.clone(),
            settings.google_client_id.clone(),
            settings.google_client_secret.clone(),
        );
        let broker = Arc::new(CredentialBroker::new(db.clone(), Arc::new(endpoint)));
        let gmail = GmailClient::new(client, settings.gmail_api_base.clone(), broker);

        Ok(SyncOrchestrator::new(
            db,
            Arc::new(gmail),
            VoucherParser::new(settings.usd_to_crc),
            SyncOptions {
                page_size: settings.page_size,
                max_pages: settings.max_pages,
            },
        ))
    }

    fn resolve_user(db: &Database, key: &str) -> Result<User> {
        db.get_user(key)?
            .ok_or_else(|| anyhow!("user not found for '{key}'"))
    }

    async fn handle_sync(settings: &Settings, args: SyncArgs, json: bool) -> Result<()> {
        let db = open_database(settings)?;
        let orchestrator = build_orchestrator(settings, db)?;

        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, finishing current message and stopping");
                    cancel.cancel();
                }
            })
        };

        let result = orchestrator
            .run(&args.month, args.user.as_deref(), &cancel)
            .await;
        watcher.abort();
        let reports = result?;

        let formatted =
            output::format_sync_reports(OutputFormat::from_json_flag(json), &args.month, &reports)?;
        println!("{formatted}");
        Ok(())
    }

    async fn handle_serve(settings: &Settings) -> Result<()> {
        let db = open_database(settings)?;
        let orchestrator = build_orchestrator(settings, db)?;
        if settings.cron_secret.is_none() {
            warn!("VOUCH_CRON_SECRET is not set; every sync trigger request will be rejected");
        }

        let state = AppState {
            orchestrator: Arc::new(orchestrator),
            cron_secret: settings.cron_secret.as_deref().map(Arc::from),
            shutdown: CancellationToken::new(),
        };
        server::serve(state, settings.listen_addr).await
    }

    fn handle_users(settings: &Settings, command: UserCommands, json: bool) -> Result<()> {
        let db = open_database(settings)?;

        match command {
            UserCommands::Add {
                email,
                access_token,
                refresh_token,
                expires_at,
            } => {
                let expires_at = expires_at.as_deref().map(parse_expires_at).transpose()?;
                let user = db
                    .insert_user(&email)
                    .with_context(|| format!("add user {email}"))?;
                db.upsert_credential(&Credential {
                    user_id: user.id.clone(),
                    provider: "google".to_string(),
                    access_token,
                    refresh_token,
                    expires_at,
                    updated_at: None,
                })?;
                info!(user_id = %user.id, "user registered");
                println!("Added user: {} ({})", user.email, user.id);
            }
            UserCommands::List => {
                let counts: HashMap<String, i64> = db
                    .transaction_counts()?
                    .into_iter()
                    .map(|row| (row.user_id, row.count))
                    .collect();
                let items = db
                    .list_users()?
                    .into_iter()
                    .map(|user| UserItem {
                        transactions: counts.get(&user.id).copied().unwrap_or(0),
                        user,
                    })
                    .collect::<Vec<_>>();
                let formatted = output::format_users(OutputFormat::from_json_flag(json), &items)?;
                println!("{formatted}");
            }
        }
        Ok(())
    }

    fn handle_rules(settings: &Settings, command: RuleCommands, json: bool) -> Result<()> {
        let db = open_database(settings)?;

        match command {
            RuleCommands::Add {
                user,
                name,
                pattern,
                category,
                priority,
                inactive,
            } => {
                if let Err(err) = RegexBuilder::new(&pattern).case_insensitive(true).build() {
                    bail!("invalid rule pattern '{pattern}': {err}");
                }
                let user = resolve_user(&db, &user)?;
                let category = db.ensure_category(&user.id, category.trim())?;
                let rule = MerchantRule {
                    id: Uuid::new_v4().to_string(),
                    user_id: user.id,
                    name,
                    pattern,
                    category_id: category.id,
                    priority,
                    is_active: !inactive,
                };
                db.insert_rule(&rule)?;
                println!("Added rule '{}' -> {}", rule.name, category.name);
            }
            RuleCommands::List { user } => {
                let user = resolve_user(&db, &user)?;
                let names = category_names(&db, &user.id)?;
                let items = db
                    .list_rules(&user.id)?
                    .into_iter()
                    .map(|rule| RuleItem {
                        category: names.get(&rule.category_id).cloned(),
                        rule,
                    })
                    .collect::<Vec<_>>();
                let formatted = output::format_rules(OutputFormat::from_json_flag(json), &items)?;
                println!("{formatted}");
            }
        }
        Ok(())
    }

    fn handle_transactions(settings: &Settings, args: TransactionsArgs, json: bool) -> Result<()> {
        let db = open_database(settings)?;
        let user = resolve_user(&db, &args.user)?;

        let mut filters = TransactionFilters {
            user_id: user.id.clone(),
            limit: args.limit,
            ..TransactionFilters::default()
        };
        if let Some(month) = args.month.as_deref() {
            let month = SyncMonth::parse(month)?;
            filters.occurred_from = Some(format!("{}T00:00:00Z", month.start()));
            filters.occurred_until = Some(format!("{}T00:00:00Z", month.end()));
        }

        let names = category_names(&db, &user.id)?;
        let items = db
            .list_transactions(&filters)?
            .into_iter()
            .map(|transaction| TransactionItem {
                category: names.get(&transaction.category_id).cloned(),
                transaction,
            })
            .collect::<Vec<_>>();
        let formatted = output::format_transactions(OutputFormat::from_json_flag(json), &items)?;
        println!("{formatted}");
        Ok(())
    }

    fn handle_summary(settings: &Settings, args: SummaryArgs, json: bool) -> Result<()> {
        let db = open_database(settings)?;
        let user = resolve_user(&db, &args.user)?;

        let month = match args.month {
            Some(month) => month,
            None => Utc::now().format("%Y-%m").to_string(),
        };
        let window = SyncMonth::parse(&month)?;
        let summary = db.month_summary(
            &user.id,
            &format!("{}T00:00:00Z", window.start()),
            &format!("{}T00:00:00Z", window.end()),
        )?;

        let formatted =
            output::format_summary(OutputFormat::from_json_flag(json), &window.to_string(), &summary)?;
        println!("{formatted}");
        Ok(())
    }

    fn category_names(db: &Database, user_id: &str) -> Result<HashMap<String, String>> {
        Ok(db
            .list_categories(user_id)?
            .into_iter()
            .map(|category| (category.id, category.name))
            .collect())
    }

    fn parse_expires_at(raw: &str) -> Result<i64> {
        let raw = raw.trim();
        if let Ok(seconds) = raw.parse::<i64>() {
            return Ok(seconds);
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|value| value.timestamp())
            .with_context(|| format!("invalid --expires-at '{raw}', expected unix seconds or RFC 3339"))
    }
}
