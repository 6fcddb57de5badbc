use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kai_rewards::account::Account;
use kai_rewards::backend::{HttpBackend, RewardBackend};
use kai_rewards::catalog::{coins_per_unit, Catalog};
use kai_rewards::config::{Config, ConfirmationMode};
use kai_rewards::controller::{ClaimController, ClaimState, Notification};
use kai_rewards::health::HealthChecker;
use kai_rewards::metrics::MetricsCollector;
use kai_rewards::push::{PushTransport, SseChannel};
use kai_rewards::scan::SupervisorScanner;
use kai_rewards::server::HealthServer;
use kai_rewards::store::SessionStore;
use kai_rewards::tier::{next_tier_message, progress_percent};
use kai_rewards::transport::{ConfirmationTransport, PollingTransport};

#[derive(Parser, Debug)]
#[command(name = "kai-rewards")]
#[command(about = "Kai Mall loyalty rewards client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Log in and cache the user locally
    Login { username: String, password: String },
    Register { name: String, username: String, password: String },
    Logout,
    /// Show coins, points and tier progress
    Profile,
    /// Claim coins for a purchase and wait for the supervisor
    Claim {
        terminal: String,
        #[arg(value_name = "SI_NO")]
        pos_no: String,
    },
    /// Confirm a scanned claim code (supervisor)
    Scan { payload: String },
    Outlets,
    Menu { outlet_id: u64 },
    Redeem {
        outlet_id: u64,
        item_id: u64,
        #[arg(default_value_t = 1)]
        quantity: u32,
    },
    /// List redeemed vouchers
    History,
}

struct App {
    config: Config,
    backend: Arc<dyn RewardBackend>,
    store: Arc<SessionStore>,
    metrics: Arc<MetricsCollector>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.validate()?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let metrics = Arc::new(MetricsCollector::new());
    if config.metrics_enabled {
        if let Some(port) = config.status_port {
            let checker = Arc::new(HealthChecker::new(Arc::clone(&metrics), config.clone()));
            tokio::spawn(async move {
                if let Err(e) = HealthServer::new(checker, port).start().await {
                    tracing::error!("Status server stopped: {}", e);
                }
            });
        }
    }

    let backend: Arc<dyn RewardBackend> = Arc::new(HttpBackend::new(&config)?);
    let store = Arc::new(
        SessionStore::open(&config.session_file)
            .with_context(|| format!("opening session file {}", config.session_file.display()))?,
    );
    store.logout_if_idle(config.get_idle_logout())?;

    let app = App { config, backend, store, metrics };
    app.run(cli.command).await
}

impl App {
    async fn run(&self, command: Commands) -> anyhow::Result<()> {
        let account = Account::new(Arc::clone(&self.backend), Arc::clone(&self.store));
        let catalog = Catalog::new(Arc::clone(&self.backend), Arc::clone(&self.store));

        match command {
            Commands::Login { username, password } => {
                let user = account.login(&username, &password).await?;
                println!("Welcome, {}! You have {} Kai Coins.", user.name, user.coins_earned);
            }
            Commands::Register { name, username, password } => {
                account.register(&name, &username, &password).await?;
                println!("Registration successful. You can now log in.");
            }
            Commands::Logout => {
                account.logout()?;
                println!("Logged out.");
            }
            Commands::Profile => {
                let details = account.profile().await?;
                println!("{} ({})", details.name, details.user_id);
                println!("Kai Coins: {}", details.coins_earned);
                println!("Points: {}", details.user_points);
                println!("{}: {:.0}%", next_tier_message(details.user_points), progress_percent(details.user_points));
            }
            Commands::Claim { terminal, pos_no } => self.claim(&terminal, &pos_no).await?,
            Commands::Scan { payload } => {
                let mut scanner = SupervisorScanner::new(
                    Arc::clone(&self.backend),
                    Arc::clone(&self.metrics),
                    self.config.terminal_count,
                );
                println!("{}", scanner.confirm_scanned(&payload).await?);
            }
            Commands::Outlets => {
                println!("Food outlets:");
                for outlet in catalog.food_outlets().await? {
                    println!("  {:>4}  {}", outlet.outlet_id, outlet.name);
                }
                println!("Activity outlets:");
                for outlet in catalog.activity_outlets().await? {
                    println!("  {:>4}  {}", outlet.outlet_id, outlet.name);
                }
            }
            Commands::Menu { outlet_id } => {
                for item in catalog.menus(outlet_id).await? {
                    println!("  {:>4}  {}  ({} coins)", item.item_id, item.item_name, coins_per_unit(item.price));
                }
            }
            Commands::Redeem { outlet_id, item_id, quantity } => {
                let item = catalog
                    .menus(outlet_id)
                    .await?
                    .into_iter()
                    .find(|item| item.item_id == item_id)
                    .ok_or_else(|| anyhow!("no item {} at outlet {}", item_id, outlet_id))?;

                let redemption = catalog.redeem(&item, quantity).await?;
                println!("{}", redemption.message);
                if let Some(receipt) = redemption.receipt {
                    println!("Voucher {}: {} for {}", receipt.code, receipt.item_name, receipt.name);
                }
                if let Some(coins) = redemption.coins_remaining {
                    println!("Remaining Kai Coins: {}", coins);
                }
            }
            Commands::History => {
                for receipt in catalog.redeemed_items().await? {
                    println!("  {}  {}  {}", receipt.date.format("%Y-%m-%d %H:%M"), receipt.code, receipt.item_name);
                }
            }
        }
        Ok(())
    }

    async fn claim(&self, terminal: &str, pos_no: &str) -> anyhow::Result<()> {
        let transport: Arc<dyn ConfirmationTransport> = match (self.config.confirmation_mode(), &self.config.push_url) {
            (ConfirmationMode::Push, Some(url)) => Arc::new(PushTransport::new(Arc::new(SseChannel::new(url.clone())))),
            _ => Arc::new(PollingTransport::new(
                Arc::clone(&self.backend),
                self.config.get_poll_interval(),
                self.config.max_poll_attempts,
                Arc::clone(&self.metrics),
            )),
        };
        let mut controller = ClaimController::new(
            &self.config,
            Arc::clone(&self.backend),
            transport,
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
        );

        let payload = controller.submit_for_current_user(terminal, pos_no).await?;
        println!("Show this code to the supervisor:");
        println!("{}", payload);
        println!("Waiting for confirmation (Ctrl-C to cancel)...");

        let outcome = tokio::select! {
            state = controller.await_outcome() => Some(state),
            _ = tokio::signal::ctrl_c() => None,
        };
        if outcome.is_none() && controller.state() == ClaimState::AwaitingSupervisor {
            controller.cancel()?;
            println!("Claim cancelled.");
        }

        for notification in controller.drain_notifications() {
            match notification {
                Notification::ClaimResult { message, .. } => println!("{}", message),
                Notification::TierAchieved { tier, points } => {
                    println!("Congratulations! You've reached the {} tier with {} points.", tier, points)
                }
            }
        }
        if let Some(receipt) = controller.session().and_then(|s| s.result_receipt.as_ref()) {
            println!("Receipt {}: {}", receipt.code, receipt.item_name);
        }

        match outcome {
            Some(ClaimState::Rejected) | Some(ClaimState::Failed) => bail!("claim was not confirmed"),
            _ => Ok(()),
        }
    }
}
