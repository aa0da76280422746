use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input, Select};
use keyward_adapters::configuration;
use keyward_adapters::telemetry;
use keyward_adapters::{
    build_registry, FileAccountStore, FileInstanceCatalog, KeyringCredentialStore, LoopbackBroker,
};
use keyward_core::access::InstanceAccessGate;
use keyward_core::config::Settings;
use keyward_core::entities::{
    Account, Credentials, InstanceId, LoginRequest, LoginResult, ProviderKind, SessionState,
};
use keyward_core::ports::{AccountStore, InstanceCatalog, SessionHooks};
use keyward_core::use_cases::SessionManager;
use keyward_core::{Error, RejectionReason};
use tracing::{debug, error};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore the last session, logging in interactively if needed
    Start,

    /// Log in with a new account
    Login {
        /// offline, managed-oauth or self-hosted
        #[arg(short, long)]
        provider: Option<ProviderKind>,
    },

    /// List saved accounts
    Accounts,

    /// List instances and whether the active account may join them
    Instances,

    /// Select the instance to launch
    SelectInstance { id: String },

    /// Check that the active account may launch the selected instance
    Launch,
}

/// Terminal stand-in for the launcher UI
struct CliHooks;

impl SessionHooks for CliHooks {
    fn set_active_account(&self, account: &Account) {
        println!(
            "Logged in as {} ({})",
            account.display_name, account.provider
        );
    }

    fn navigate_home(&self) {
        debug!("session ready");
    }
}

type Manager = SessionManager<FileAccountStore, FileInstanceCatalog, CliHooks>;
type Gate = InstanceAccessGate<FileAccountStore, FileInstanceCatalog>;

struct App {
    store: Arc<FileAccountStore>,
    catalog: Arc<FileInstanceCatalog>,
    manager: Manager,
}

impl App {
    fn new(settings: &Settings) -> anyhow::Result<Self> {
        let config_dir = configuration::config_dir();
        let store = Arc::new(FileAccountStore::new(
            config_dir.clone(),
            Arc::new(KeyringCredentialStore::new()),
        ));

        let instances_path = settings
            .instances
            .path
            .clone()
            .unwrap_or_else(|| config_dir.join("instances.json"));
        let catalog = Arc::new(FileInstanceCatalog::new(instances_path));

        let broker = LoopbackBroker::from_settings(&settings.auth).on_authorize_url(|url| {
            println!("Open this URL in your browser to sign in:");
            println!("  {}", url);
        });
        let providers = build_registry(settings, Arc::new(broker))
            .context("identity provider configuration is incomplete")?;

        let manager =
            SessionManager::new(store.clone(), catalog.clone(), providers, Arc::new(CliHooks))
                .with_refresh_timeout(settings.network.refresh_timeout());

        Ok(Self {
            store,
            catalog,
            manager,
        })
    }

    fn accounts_path(&self) -> PathBuf {
        self.store.store_path().clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = configuration::get_configuration().context("configuration loading failed")?;
    let _guard = telemetry::init_subscriber("keyward_cli", &settings.log_level, telemetry::log_dir())?;

    let cli = Cli::parse();
    let app = App::new(&settings)?;

    match cli.command {
        Commands::Start => {
            match app.manager.bootstrap().await? {
                SessionState::AutoLoggedIn(_) => {}
                SessionState::InteractiveLoginRequired => {
                    println!("No active session.");
                    interactive_login(&app, None).await?;
                }
                other => debug!(state = ?other, "bootstrap settled"),
            }
        }

        Commands::Login { provider } => {
            interactive_login(&app, provider).await?;
        }

        Commands::Accounts => {
            let accounts = app.store.list_accounts().await?;
            let selected = app.store.client_config().await?.selected_account_id;

            if accounts.is_empty() {
                println!("No accounts saved.");
                println!("Use 'keyward login' to add one.");
            } else {
                println!("Saved accounts ({}):", app.accounts_path().display());
                for account in &accounts {
                    println!(
                        "  {} [{}] {} ({})",
                        if selected == Some(account.id) { "*" } else { " " },
                        account.id,
                        account.display_name,
                        account.provider,
                    );
                }
            }
        }

        Commands::Instances => {
            let selected = app.store.client_config().await?.selected_instance_id;
            let marker = |id: &InstanceId| if selected.as_ref() == Some(id) { "*" } else { " " };

            match app.store.get_selected().await? {
                Some(account) => {
                    let listing = app.manager.gate().instances_for(&account).await?;
                    if listing.is_empty() {
                        println!("No instances available.");
                    }
                    for entry in listing {
                        println!(
                            "  {} {}{}",
                            marker(&entry.instance.id),
                            entry.instance.id,
                            if entry.allowed { "" } else { " [not whitelisted]" },
                        );
                    }
                }
                None => {
                    let instances = app.catalog.instances().await?;
                    if instances.is_empty() {
                        println!("No instances available.");
                    }
                    for instance in instances {
                        println!(
                            "  {} {}{}",
                            marker(&instance.id),
                            instance.id,
                            if instance.whitelist_enabled { " [whitelist]" } else { "" },
                        );
                    }
                }
            }
        }

        Commands::SelectInstance { id } => {
            let instance = app.manager.gate().select_instance(&InstanceId::new(id)).await?;
            println!("Selected instance '{}'.", instance.id);

            if let Some(account) = app.store.get_selected().await? {
                if !Gate::is_allowed(&account, &instance) {
                    println!(
                        "Warning: '{}' is not whitelisted on this instance.",
                        account.display_name
                    );
                }
            }
        }

        Commands::Launch => match app.manager.authorize_launch().await {
            Ok((account, instance)) => {
                println!(
                    "Launch authorized: {} on instance '{}'.",
                    account.display_name, instance.id
                );
            }
            Err(e @ (Error::AccessDenied { .. } | Error::NoActiveAccount | Error::NoInstanceSelected)) => {
                println!("Launch refused: {}", e);
            }
            Err(e) => return Err(e.into()),
        },
    }

    Ok(())
}

/// Prompt until the user logs in, cancels or gives up
async fn interactive_login(app: &App, provider: Option<ProviderKind>) -> anyhow::Result<()> {
    let available = app.manager.providers().kinds();
    let kind = match provider {
        Some(kind) => kind,
        None if available.len() == 1 => available[0],
        None => {
            let labels: Vec<&str> = available.iter().map(|k| k.as_str()).collect();
            let choice = Select::new()
                .with_prompt("Login with")
                .items(&labels)
                .default(0)
                .interact()?;
            available[choice]
        }
    };

    loop {
        let request = match kind {
            ProviderKind::Offline => LoginRequest::Offline {
                display_name: Input::new().with_prompt("Player name").interact_text()?,
            },
            ProviderKind::ManagedOauth => LoginRequest::ManagedOauth,
            ProviderKind::SelfHosted => {
                let username: String = Input::new().with_prompt("Username").interact_text()?;
                let password = rpassword::prompt_password("Password: ")?;
                LoginRequest::Password(Credentials::new(username, password))
            }
        };

        let result = match app.manager.login(request.clone()).await {
            Ok(LoginResult::SecondFactorRequired) => second_factor(app, &request).await,
            other => other,
        };

        match result {
            Ok(LoginResult::LoggedIn(_)) => return Ok(()),
            Ok(LoginResult::Cancelled) => {
                println!("Login cancelled.");
                return Ok(());
            }
            // Second-factor step was abandoned, back to the credentials
            Ok(LoginResult::SecondFactorRequired) => continue,
            Err(e @ (Error::Validation(_)
            | Error::ProviderRejected(_)
            | Error::Network(_)
            | Error::Timeout(_)
            | Error::InvalidServerResponse(_))) => {
                println!("Login failed: {}", e);
                let again = Confirm::new()
                    .with_prompt("Try again?")
                    .default(true)
                    .interact()?;
                if !again {
                    return Ok(());
                }
            }
            Err(e) => {
                error!(error = %e, "login failed");
                return Err(e.into());
            }
        }
    }
}

/// Ask for the code and resubmit the same credentials. An empty code leaves
/// the step.
async fn second_factor(app: &App, request: &LoginRequest) -> Result<LoginResult, Error> {
    let LoginRequest::Password(credentials) = request else {
        return Ok(LoginResult::SecondFactorRequired);
    };

    loop {
        let code: String = Input::new()
            .with_prompt("Second-factor code (empty to go back)")
            .allow_empty(true)
            .interact_text()
            .map_err(|e| Error::Other(e.to_string()))?;

        if code.trim().is_empty() {
            app.manager.cancel_second_factor().await;
            return Ok(LoginResult::SecondFactorRequired);
        }

        let retry = LoginRequest::Password(credentials.clone().with_otp(code));
        match app.manager.login(retry).await {
            Err(Error::ProviderRejected(reason @ RejectionReason::InvalidSecondFactor)) => {
                println!("{}", reason);
            }
            other => return other,
        }
    }
}
