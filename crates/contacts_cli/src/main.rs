//! Command-line entry point.
//!
//! # Responsibility
//! - Load settings, start stderr logging and run one auth use case.
//! - Convert core errors into a non-zero exit through `anyhow`.

mod args;

use anyhow::{Context, Result};
use args::{Cli, Command};
use clap::Parser;
use contacts_core::{
    init_stderr_logging, AuthService, ConfirmOutcome, RequestEmailOutcome, Settings,
    SignupRequest, TokenAuthority, TokenPair, User,
};
use log::debug;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_stderr_logging(&cli.log_level).map_err(anyhow::Error::msg)?;

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    debug!("event=cli_start module=cli status=ok settings={settings:?}");

    run(&settings, cli.command)
}

fn run(settings: &Settings, command: Command) -> Result<()> {
    // Token-only commands never open the store.
    let service = || AuthService::from_settings(settings).context("failed to start auth service");

    match command {
        Command::Signup {
            username,
            email,
            password,
        } => {
            let outcome = service()?.signup(&SignupRequest {
                username,
                email,
                password,
            })?;
            print_user(&outcome.user);
            println!("email_token={}", outcome.email_token);
        }
        Command::Login { email, password } => print_pair(&service()?.login(&email, &password)?),
        Command::Refresh { token } => print_pair(&service()?.refresh(&token)?),
        Command::Whoami { token } => print_user(&service()?.current_user(&token)?),
        Command::Confirm { token } => match service()?.confirm_email(&token)? {
            ConfirmOutcome::Confirmed => println!("email confirmed"),
            ConfirmOutcome::AlreadyConfirmed => println!("email already confirmed"),
        },
        Command::RequestEmail { email } => match service()?.request_email(&email)? {
            RequestEmailOutcome::Issued { email_token } => println!("email_token={email_token}"),
            RequestEmailOutcome::AlreadyConfirmed => println!("email already confirmed"),
            RequestEmailOutcome::NoAccount => println!("no account for {email}"),
        },
        Command::Avatar { token, url } => print_user(&service()?.update_avatar(&token, &url)?),
        Command::HashPassword { password } => {
            println!("{}", TokenAuthority::new(settings)?.hash_password(&password)?);
        }
        Command::Inspect { token } => {
            let claims = TokenAuthority::new(settings)?.inspect(&token)?;
            println!("sub={}", claims.sub);
            println!("iat={}", claims.iat);
            println!("exp={}", claims.exp);
            match claims.scope {
                Some(scope) => println!("scope={scope:?}"),
                None => println!("scope=<none>"),
            }
        }
    }
    Ok(())
}

fn print_pair(pair: &TokenPair) {
    println!("access_token={}", pair.access_token);
    println!("refresh_token={}", pair.refresh_token);
    println!("token_type={}", pair.token_type);
}

fn print_user(user: &User) {
    println!("id={}", user.id);
    println!("username={}", user.username);
    println!("email={}", user.email);
    println!("confirmed={}", user.confirmed);
    if let Some(avatar) = &user.avatar {
        println!("avatar={avatar}");
    }
}
