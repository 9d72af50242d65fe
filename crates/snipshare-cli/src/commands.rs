//! Command dispatch and the interactive prompts behind each command.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use snipshare_core::api::ApiClient;
use snipshare_core::auth::{
    AuthState, CredentialStore, KeyProvider, KeyringKeyProvider, PassphraseKeyProvider,
};
use snipshare_core::models::{PasswordUpdate, ProfileUpdate, RegisterRequest, ResetPasswordRequest};
use snipshare_core::validation;
use snipshare_core::Config;
use tracing::{debug, warn};

/// Derive the store key from this passphrase instead of the OS keyring
const PASSPHRASE_ENV: &str = "SNIPSHARE_PASSPHRASE";

/// Salt for the passphrase-derived key, next to the encrypted records
const SALT_FILE: &str = "store.salt";

/// Lines shown by `snippet` before the body is cut off
const SNIPPET_PREVIEW_LINES: usize = 40;

const USAGE: &str = "\
Usage: snipshare <command> [args]

Account:
  login [email|username]        Sign in
  register <username> <email>   Create an account and sign in
  logout                        Sign out this device
  logout-all                    Sign out every device
  status                        Show the local sign-in state
  whoami                        Fetch the signed-in profile
  profile <field=value>...      Update profile fields
  password                      Change the password
  delete-account                Delete the account

Password reset:
  forgot-password <email>       Send a reset code
  verify-otp <code>             Verify the emailed code
  resend-otp                    Send a new code
  reset-password                Choose a new password

Snippets:
  snippet <id>                  Print a snippet";

pub fn print_usage() {
    eprintln!("{}", USAGE);
}

/// Shared state for every command.
struct Session {
    config: Config,
    store: Arc<CredentialStore>,
    client: ApiClient,
}

impl Session {
    fn open() -> Result<Self> {
        let config = Config::load()?;
        let data_dir = Config::data_dir()?;
        let store = Arc::new(
            CredentialStore::open(&data_dir, key_provider(&data_dir))
                .with_context(|| format!("Failed to open credential store in {}", data_dir.display()))?,
        );
        let client = ApiClient::from_config(&config, store.clone())?;
        debug!(base_url = %client.base_url(), "Session opened");
        Ok(Self {
            config,
            store,
            client,
        })
    }
}

fn key_provider(data_dir: &Path) -> Arc<dyn KeyProvider> {
    match std::env::var(PASSPHRASE_ENV) {
        Ok(passphrase) if !passphrase.is_empty() => {
            Arc::new(PassphraseKeyProvider::new(passphrase, data_dir.join(SALT_FILE)))
        }
        _ => Arc::new(KeyringKeyProvider::new()),
    }
}

pub async fn run(command: &str, args: &[String]) -> Result<()> {
    if matches!(command, "help" | "-h" | "--help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut session = Session::open()?;
    match command {
        "login" => login(&mut session, args.first()).await,
        "register" => register(&session, args).await,
        "logout" => {
            let response = session.client.logout().await?;
            println!("{}", response.message.as_deref().unwrap_or("Logged out"));
            Ok(())
        }
        "logout-all" => {
            let response = session.client.logout_all().await?;
            println!("{}", response.message.as_deref().unwrap_or("Logged out"));
            Ok(())
        }
        "status" => status(&session),
        "whoami" => {
            let user = session.client.current_user().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        }
        "profile" => update_profile(&session, args).await,
        "password" => change_password(&session).await,
        "delete-account" => delete_account(&session).await,
        "forgot-password" => forgot_password(&session, args.first()).await,
        "verify-otp" => verify_otp(&session, args.first()).await,
        "resend-otp" => resend_otp(&session).await,
        "reset-password" => reset_password(&session).await,
        "snippet" => show_snippet(&session, args.first()).await,
        other => {
            print_usage();
            bail!("Unknown command '{}'", other)
        }
    }
}

// ============================================================================
// Account
// ============================================================================

async fn login(session: &mut Session, login: Option<&String>) -> Result<()> {
    let login = match login {
        Some(login) => login.clone(),
        None => prompt_line("Email or username", session.config.remember_login.as_deref())?,
    };
    validation::validate_login(&login)?;
    let password = prompt_password("Password: ")?;
    if password.is_empty() {
        bail!("Password is required");
    }

    let device_name = session.config.device_name().to_string();
    let user = session.client.login(&login, &password, &device_name).await?;

    session.config.remember_login = Some(login);
    if let Err(e) = session.config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Login successful! Welcome, {}.", user.display_name());
    Ok(())
}

async fn register(session: &Session, args: &[String]) -> Result<()> {
    let [username, email] = args else {
        bail!("Usage: snipshare register <username> <email>");
    };
    validation::validate_username(username)?;
    validation::validate_email(email)?;

    let password = prompt_password("Password: ")?;
    validation::validate_password(&password)?;
    let confirmation = prompt_password("Confirm password: ")?;
    validation::validate_passwords_match(&password, &confirmation)?;

    let request = RegisterRequest {
        username: username.trim().to_string(),
        email: email.trim().to_string(),
        password,
        password_confirmation: confirmation,
        device_name: session.config.device_name().to_string(),
    };
    let user = session.client.register(&request).await?;
    println!("Account created. Signed in as {}.", user.username);
    Ok(())
}

fn status(session: &Session) -> Result<()> {
    match session.store.state() {
        AuthState::SignedOut => println!("Signed out"),
        AuthState::SignedIn { user } => {
            match user {
                Some(user) => println!("Signed in as {} <{}>", user.username, user.email),
                None => println!("Signed in"),
            }
            let expiry = session
                .store
                .load()?
                .and_then(|credential| credential.minutes_until_expiry());
            if let Some(minutes) = expiry {
                println!("Session expires in {} minute(s)", minutes);
            }
        }
    }
    println!("API: {}", session.client.base_url());
    Ok(())
}

async fn update_profile(session: &Session, args: &[String]) -> Result<()> {
    let mut update = ProfileUpdate::default();
    for arg in args {
        let (field, value) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected field=value, got '{}'", arg))?;
        if !update.set(field, value.to_string()) {
            bail!("Unknown profile field '{}'", field);
        }
    }
    if update.is_empty() {
        bail!("Usage: snipshare profile <field=value>...");
    }
    if let Some(username) = &update.username {
        validation::validate_username(username)?;
    }
    if let Some(email) = &update.email {
        validation::validate_email(email)?;
    }

    let user = session.client.update_profile(&update).await?;
    println!("Profile updated for {}.", user.display_name());
    Ok(())
}

async fn change_password(session: &Session) -> Result<()> {
    let current_password = prompt_password("Current password: ")?;
    let password = prompt_password("New password: ")?;
    validation::validate_password(&password)?;
    let confirmation = prompt_password("Confirm new password: ")?;
    validation::validate_passwords_match(&password, &confirmation)?;

    let response = session
        .client
        .update_password(&PasswordUpdate {
            current_password,
            password,
            password_confirmation: confirmation,
        })
        .await?;
    println!("{}", response.message.as_deref().unwrap_or("Password updated"));
    Ok(())
}

async fn delete_account(session: &Session) -> Result<()> {
    let confirm = prompt_line("Type DELETE to permanently delete your account", None)?;
    if confirm != "DELETE" {
        println!("Cancelled.");
        return Ok(());
    }
    let password = prompt_password("Password: ")?;
    let response = session.client.delete_account(&password).await?;
    println!("{}", response.message.as_deref().unwrap_or("Account deleted"));
    Ok(())
}

// ============================================================================
// Password reset
// ============================================================================

async fn forgot_password(session: &Session, email: Option<&String>) -> Result<()> {
    let email = match email {
        Some(email) => email.trim().to_string(),
        None => {
            let remembered = session
                .config
                .remember_login
                .as_deref()
                .filter(|login| validation::validate_email(login).is_ok());
            prompt_line("Email", remembered)?
        }
    };
    validation::validate_email(&email)?;

    let data = session.client.forgot_password(&email).await?;
    println!(
        "A 6-digit code was sent to {}. It expires in {} minute(s).",
        email,
        (data.expires_in / 60).max(1)
    );
    println!("Run `snipshare verify-otp <code>` to continue.");
    Ok(())
}

async fn verify_otp(session: &Session, otp: Option<&String>) -> Result<()> {
    let pending = pending_reset(session)?;
    let otp = match otp {
        Some(otp) => otp.trim().to_string(),
        None => prompt_line("Code", None)?,
    };
    validation::validate_otp(&otp)?;

    session
        .client
        .verify_otp(&pending.email, &otp, &pending.token)
        .await?;
    println!("Code verified. Run `snipshare reset-password` to choose a new password.");
    Ok(())
}

async fn resend_otp(session: &Session) -> Result<()> {
    let pending = pending_reset(session)?;
    session.client.resend_otp(&pending.email, &pending.token).await?;
    println!("A new code was sent to {}.", pending.email);
    Ok(())
}

async fn reset_password(session: &Session) -> Result<()> {
    let pending = pending_reset(session)?;
    let password = prompt_password("New password: ")?;
    validation::validate_password(&password)?;
    let confirmation = prompt_password("Confirm new password: ")?;
    validation::validate_passwords_match(&password, &confirmation)?;

    let response = session
        .client
        .reset_password(&ResetPasswordRequest {
            email: pending.email,
            token: pending.token,
            password,
            password_confirmation: confirmation,
        })
        .await?;
    println!("{}", response.message.as_deref().unwrap_or("Password reset"));
    println!("You can now log in with your new password.");
    Ok(())
}

fn pending_reset(session: &Session) -> Result<snipshare_core::models::PasswordReset> {
    session
        .store
        .load_password_reset()?
        .ok_or_else(|| anyhow!("No password reset in progress. Run `snipshare forgot-password` first."))
}

// ============================================================================
// Snippets
// ============================================================================

async fn show_snippet(session: &Session, id: Option<&String>) -> Result<()> {
    let id: i64 = id
        .ok_or_else(|| anyhow!("Usage: snipshare snippet <id>"))?
        .parse()
        .context("Snippet id must be a number")?;

    let snippet = session.client.snippet(id).await?;
    if let Some(title) = &snippet.title {
        println!("# {}", title);
    }
    if let Some(language) = &snippet.language {
        println!("[{}]", language);
    }
    println!("{}", snippet.preview(SNIPPET_PREVIEW_LINES));
    Ok(())
}

// ============================================================================
// Prompts
// ============================================================================

fn prompt_line(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => print!("{} [{}]: ", label, default),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let line = line.trim();
    Ok(match default {
        Some(default) if line.is_empty() => default.to_string(),
        _ => line.to_string(),
    })
}

fn prompt_password(prompt: &str) -> Result<String> {
    let password = rpassword::prompt_password(prompt)?;
    Ok(password)
}
