// Command handlers

use crate::Commands;
use anyhow::{anyhow, bail, Context as _, Result};
use chrono::Utc;
use tokenward_core::auth::lifecycle::TokenLifecycle;
use tokenward_core::auth::policy::TokenKind;
use tokenward_core::config::Config;
use tokenward_core::db::migrations::{ensure_database_exists, run_migrations};
use tokenward_core::db::pool::{close_pool, create_pool, health_check};
use tokenward_core::models::account::{Account, AccountActivation, AccountAuthentication, NewAccount};
use tokenward_core::models::token::{NewToken, TokenRecord};
use tokenward_core::store::postgres::PgStorage;
use tokenward_core::store::{ResourceStore, Storage, Transaction};
use tracing::info;

pub(crate) async fn run(command: Commands) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    if let Commands::Migrate = command {
        ensure_database_exists(&config.database.url)
            .await
            .context("Failed to create database")?;
    }

    let pool = create_pool(config.database.clone())
        .await
        .context("Failed to connect to database")?;
    health_check(&pool).await.context("Database health check failed")?;

    let storage = PgStorage::new(pool.clone());
    let result = dispatch(command, storage, &config).await;

    close_pool(pool).await;
    result
}

async fn dispatch(command: Commands, storage: PgStorage, config: &Config) -> Result<()> {
    let policy = config.policy;

    match command {
        Commands::Migrate => {
            run_migrations(storage.pool()).await.context("Migrations failed")?;
            info!("Migrations applied");
            Ok(())
        }
        Commands::Register { email, password } => {
            let activation = AccountActivation::new(storage, policy);
            let mut account = Account::build(NewAccount { email, password }, Utc::now())?;
            activation.enroll(&mut account, None).await?;

            println!("Registered {} ({})", account.email, account.id);
            println!("Activation token: {}", account.activation_token.unwrap_or_default());
            Ok(())
        }
        Commands::Activate { email, token } => {
            let activation = AccountActivation::new(storage, policy);
            if !activation.find_and_activate(&email, &token).await? {
                bail!("Activation failed");
            }
            println!("Activated {}", email);
            Ok(())
        }
        Commands::Login { email, password } => {
            let auth = AccountAuthentication::new(storage, policy);
            let mut account = auth
                .find_and_authenticate(&email, &password)
                .await?
                .ok_or_else(|| anyhow!("Invalid email or password"))?;

            let assigned = auth.ensure_auth_token_persisted(&mut account).await?;
            if !assigned && auth.is_token_expired(&account) {
                auth.reset_auth_token_persisted(&mut account).await?;
            }
            println!("Auth token: {}", account.auth_token.unwrap_or_default());
            Ok(())
        }
        Commands::Verify { email, token } => {
            let auth = AccountAuthentication::new(storage, policy);
            if !auth.authenticate_securely(&email, &token).await? {
                bail!("Authentication failed");
            }
            println!("Token valid for {}", email);
            Ok(())
        }
        Commands::Issue { email, kind, realm } => {
            let account = find_account(&storage, &email).await?;
            let lifecycle = TokenLifecycle::new(storage, policy);
            let record = lifecycle
                .issue(NewToken {
                    resource_id: account.id,
                    kind,
                    realm,
                })
                .await?;

            print_record(&record);
            Ok(())
        }
        Commands::Refresh { kind, token } => {
            let lifecycle = TokenLifecycle::new(storage, policy);
            let mut record = find_record(&lifecycle, kind, &token).await?;
            lifecycle.refresh_persisted(&mut record).await?;
            print_record(&record);
            Ok(())
        }
        Commands::Reset { kind, token } => {
            let lifecycle = TokenLifecycle::new(storage, policy);
            let mut record = find_record(&lifecycle, kind, &token).await?;
            lifecycle.reset_persisted(&mut record).await?;
            print_record(&record);
            Ok(())
        }
        Commands::Confirm { kind, token } => {
            let lifecycle = TokenLifecycle::new(storage, policy);
            let mut record = find_record(&lifecycle, kind, &token).await?;
            if !lifecycle.confirm_persisted(&mut record).await? {
                println!("Already confirmed");
            }
            print_record(&record);
            Ok(())
        }
        Commands::Expire { kind, token } => {
            let lifecycle = TokenLifecycle::new(storage, policy);
            let mut record = find_record(&lifecycle, kind, &token).await?;
            if !lifecycle.expire_persisted(&mut record).await? {
                println!("Already expired");
            }
            print_record(&record);
            Ok(())
        }
    }
}

async fn find_account(storage: &PgStorage, email: &str) -> Result<Account> {
    let mut tx = storage.begin().await?;
    let account: Option<Account> = tx.find_by_identifier(email).await?;
    tx.commit().await?;
    account.ok_or_else(|| anyhow!("No account for {}", email))
}

async fn find_record(
    lifecycle: &TokenLifecycle<PgStorage>,
    kind: TokenKind,
    token: &str,
) -> Result<TokenRecord> {
    lifecycle
        .find(kind, token)
        .await?
        .ok_or_else(|| anyhow!("No {} token found", kind))
}

fn print_record(record: &TokenRecord) {
    println!("id:        {}", record.id);
    println!("kind:      {}", record.kind);
    println!("realm:     {}", record.realm);
    println!("token:     {}", record.token);
    println!("expires:   {}", record.expires_at);
    match record.confirmed_at {
        Some(at) => println!("confirmed: {}", at),
        None => println!("confirmed: no"),
    }
}
