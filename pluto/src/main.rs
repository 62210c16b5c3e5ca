mod server;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use pluto_user::config::*;
use pluto_user::login::{hash_password, verify_password};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// A special mode dedicated to developers, NOT INTENDED FOR PRODUCTION
    #[clap(long)]
    dev: bool,

    #[clap(short, long, env = "PLUTO_CONFIG", default_value = "pluto.toml")]
    /// Path to the main Pluto configuration file
    config_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the front-end distributor
    Distributor,

    /// Runs one worker replica
    Worker {
        #[clap(short, long, default_value = "worker-1")]
        name: String,
    },

    /// Runs the storage replica
    Storage,

    /// Manage static accounts
    #[clap(subcommand)]
    Account(AccountManagement),

    /// Specific tooling, should not be part of a normal workflow, for debug & experimentation only
    #[clap(subcommand)]
    Tools(ToolsCommand),
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    PasswordHash {
        #[clap(env = "PLUTO_PASSWORD")]
        maybe_password: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AccountManagement {
    /// Add an account
    Add {
        #[clap(short, long)]
        login: String,
    },
    /// Delete an account
    Delete {
        #[clap(short, long)]
        login: String,
    },
    /// Change password for a given account
    ChangePassword {
        #[clap(env = "PLUTO_OLD_PASSWORD")]
        maybe_old_password: Option<String>,

        #[clap(env = "PLUTO_NEW_PASSWORD")]
        maybe_new_password: Option<String>,

        #[clap(short, long)]
        login: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "main=info,pluto=info")
    }

    // A replica that cannot trust its own state must stop, not limp on.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{}", panic_info);
        eprintln!("{:?}", backtrace::Backtrace::new());
        std::process::abort();
    }));

    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = if args.dev {
        server::dev_config()
    } else {
        read_config(args.config_file.clone())
            .context(format!("'{:?}' must be a config file", args.config_file))?
    };

    match &args.command {
        Command::Distributor => server::run_distributor(config).await?,
        Command::Worker { name } => server::run_worker(config, name, args.dev).await?,
        Command::Storage => server::run_storage(config, args.dev).await?,
        Command::Account(cmd) => account_management(cmd, config.users.user_list)?,
        Command::Tools(subcommand) => match subcommand {
            ToolsCommand::PasswordHash { maybe_password } => {
                let password = match maybe_password {
                    Some(pwd) => pwd.clone(),
                    None => rpassword::prompt_password("Enter password: ")?,
                };
                println!("{}", hash_password(&password)?);
            }
        },
    }

    Ok(())
}

fn account_management(cmd: &AccountManagement, users: PathBuf) -> Result<()> {
    let mut ulist: UserList = read_config(users.clone()).unwrap_or_default();

    match cmd {
        AccountManagement::Add { login } => {
            tracing::debug!(user = login.as_str(), "will-create");
            let password = rpassword::prompt_password("Enter password: ")?;
            let password_confirm = rpassword::prompt_password("Confirm password: ")?;
            if password != password_confirm {
                bail!("Passwords don't match.");
            }
            let hash = hash_password(password.as_str()).context("unable to hash password")?;

            ulist.insert(
                login.clone(),
                UserEntry {
                    email_addresses: vec![],
                    password: hash,
                },
            );
            write_config(users, &ulist)?;
        }
        AccountManagement::Delete { login } => {
            tracing::debug!(user = login.as_str(), "will-delete");
            ulist.remove(login).context("user must exist first")?;
            write_config(users, &ulist)?;
        }
        AccountManagement::ChangePassword {
            maybe_old_password,
            maybe_new_password,
            login,
        } => {
            let mut user = ulist.remove(login).context("user must exist first")?;

            let old_password = match maybe_old_password {
                Some(pwd) => pwd.to_string(),
                None => rpassword::prompt_password("Enter old password: ")?,
            };
            if !verify_password(&old_password, &user.password)? {
                bail!(format!("invalid password for login {}", login));
            }

            let new_password = match maybe_new_password {
                Some(pwd) => pwd.to_string(),
                None => {
                    let password = rpassword::prompt_password("Enter new password: ")?;
                    let password_confirm = rpassword::prompt_password("Confirm new password: ")?;
                    if password != password_confirm {
                        bail!("Passwords don't match.");
                    }
                    password
                }
            };
            user.password = hash_password(&new_password)?;

            ulist.insert(login.clone(), user);
            write_config(users, &ulist)?;
        }
    };

    Ok(())
}
