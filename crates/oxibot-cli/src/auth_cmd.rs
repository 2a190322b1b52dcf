//! `oxibot auth` — manage Antigravity OAuth accounts.
//!
//! - `oxibot auth login` — open a browser and run the PKCE flow
//! - `oxibot auth status` — show the active account and token expiry
//! - `oxibot auth list` — list every stored account
//! - `oxibot auth switch <email>` — change the active account
//! - `oxibot auth logout [<email>] [--all]` — remove stored credentials

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use oxibot_providers::antigravity::{login, CredentialStore, LogoutTarget};

/// Auth subcommands.
#[derive(Subcommand)]
pub enum AuthCommands {
    /// Log in via the browser (OAuth + PKCE)
    Login,

    /// Show the active account
    Status,

    /// List all stored accounts
    List,

    /// Switch the active account
    Switch {
        /// Account email
        email: String,
    },

    /// Remove stored credentials
    Logout {
        /// Account email (defaults to the active account)
        email: Option<String>,

        /// Remove every stored account
        #[arg(long, default_value_t = false)]
        all: bool,
    },
}

/// Dispatch an auth subcommand.
pub async fn dispatch(cmd: AuthCommands) -> Result<()> {
    match cmd {
        AuthCommands::Login => login_cmd().await,
        AuthCommands::Status => status_cmd(),
        AuthCommands::List => list_cmd(),
        AuthCommands::Switch { email } => switch_cmd(&email),
        AuthCommands::Logout { email, all } => logout_cmd(email, all),
    }
}

/// `oxibot auth login`
async fn login_cmd() -> Result<()> {
    println!();
    println!("  {}", "Starting Antigravity login...".cyan().bold());
    println!("  A browser window will open. Sign in and grant access.");
    println!();

    let credential = login().await.map_err(|e| anyhow::anyhow!(e))?;
    let store = CredentialStore::new(None);
    let email = credential.email.clone();
    store.upsert(credential)?;

    println!("  {} Logged in as {}", "✓".green(), email.cyan());
    println!();

    Ok(())
}

/// `oxibot auth status`
fn status_cmd() -> Result<()> {
    let store = CredentialStore::new(None);

    println!();
    match store.active_email() {
        Some(email) => {
            println!("  {} Active account: {}", "✓".green(), email.cyan());
        }
        None => {
            println!("  {} Not authenticated. Run `oxibot auth login`.", "✗".red());
        }
    }

    let accounts = store.accounts();
    println!("  Accounts: {}", accounts.len());
    println!();

    Ok(())
}

/// `oxibot auth list`
fn list_cmd() -> Result<()> {
    let store = CredentialStore::new(None);
    let accounts = store.accounts();

    if accounts.is_empty() {
        println!("  No stored accounts. Run `oxibot auth login`.");
        return Ok(());
    }

    let active = store.active_email();

    println!();
    println!("{}", "  Antigravity Accounts".cyan().bold());
    println!();

    for email in &accounts {
        let marker = if Some(email) == active.as_ref() {
            "*".green().to_string()
        } else {
            " ".to_string()
        };
        println!("  {} {}", marker, email);
    }
    println!();

    Ok(())
}

/// `oxibot auth switch <email>`
fn switch_cmd(email: &str) -> Result<()> {
    let store = CredentialStore::new(None);

    if store.switch(email) {
        println!("  {} Switched to {}", "✓".green(), email.cyan());
        Ok(())
    } else {
        println!("  {} No stored account for {}", "✗".red(), email);
        Ok(())
    }
}

/// `oxibot auth logout [<email>] [--all]`
fn logout_cmd(email: Option<String>, all: bool) -> Result<()> {
    let store = CredentialStore::new(None);

    let target = if all {
        LogoutTarget::All
    } else if let Some(email) = email {
        LogoutTarget::Email(email)
    } else {
        LogoutTarget::Active
    };

    let label = match &target {
        LogoutTarget::All => "all accounts".to_string(),
        LogoutTarget::Email(e) => e.clone(),
        LogoutTarget::Active => store
            .active_email()
            .unwrap_or_else(|| "the active account".to_string()),
    };

    store.logout(target)?;
    println!("  {} Logged out {}", "✓".green(), label);

    Ok(())
}
