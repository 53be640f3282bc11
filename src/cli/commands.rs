//! CLI commands

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::auth::{self, Registration};
use crate::config::Config;
use crate::db::repositories::now_utc;
use crate::db::{migrations, Database, UserUpdate};

#[derive(Parser)]
#[command(name = "authstore")]
#[command(about = "Manage the user account and session store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ~/.authstore/config.yml)
    #[arg(long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate {
        /// Print the migration SQL instead of applying it
        #[arg(long)]
        offline: bool,
    },

    /// Show connectivity, pending migrations and schema drift
    Status,

    /// Register a new user
    Register {
        #[arg(long)]
        user_name: String,

        #[arg(long)]
        first_name: String,

        #[arg(long)]
        last_name: String,

        #[arg(long)]
        email: String,

        /// Avatar path or URL
        #[arg(long, default_value = "")]
        image: String,

        #[arg(long)]
        password: String,
    },

    /// List all users
    Users,

    /// Update a user's profile
    UpdateUser {
        user_id: Uuid,

        #[arg(long)]
        first_name: Option<String>,

        #[arg(long)]
        last_name: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        image: Option<String>,
    },

    /// Delete a user and all of their sessions
    DeleteUser { user_id: Uuid },

    /// Log in and print the new session id
    Login {
        #[arg(long)]
        user_name: String,

        #[arg(long)]
        password: String,
    },

    /// Print whether a session is active, expired or revoked
    CheckSession { session_id: Uuid },

    /// Delete a session
    Logout { session_id: Uuid },

    /// Delete expired sessions now
    PurgeSessions,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Offline mode needs no database at all
    if let Commands::Migrate { offline: true } = cli.command {
        print!("{}", migrations::offline_sql());
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let db = Database::initialize(&config).context("Failed to initialize database")?;

    let result = execute(&db, cli.command);
    db.shutdown();
    result
}

fn execute(db: &Database, command: Commands) -> Result<()> {
    if !matches!(command, Commands::Migrate { .. } | Commands::Status) {
        let pending = db.pending_migrations()?;
        if !pending.is_empty() {
            bail!(
                "{} migration(s) pending; run `authstore migrate` first",
                pending.len()
            );
        }
    }

    match command {
        Commands::Migrate { .. } => {
            let applied = db.migrate()?;
            println!("Applied {} migration(s)", applied);
        }

        Commands::Status => {
            db.health_check()?;
            println!("Database: {} (reachable)", db.url());

            let pending = db.pending_migrations()?;
            if pending.is_empty() {
                println!("Migrations: up to date");
            } else {
                println!("Migrations pending: {}", pending.join(", "));
            }

            let drift = db.verify_schema()?;
            if drift.is_empty() {
                println!("Schema: matches table definitions");
            } else {
                for d in drift {
                    println!("Schema drift: {}", d);
                }
            }
        }

        Commands::Register {
            user_name,
            first_name,
            last_name,
            email,
            image,
            password,
        } => {
            let reg = Registration {
                user_image: image,
                user_name,
                first_name,
                last_name,
                email_address: email,
                password,
            };
            let user = db.with_unit_of_work(|uow| auth::register(uow, &reg))?;
            println!("Registered user: {} ({})", user.user_name, user.user_id);
        }

        Commands::Users => {
            let users = db.with_read_unit_of_work(|uow| uow.users().list())?;
            if users.is_empty() {
                println!("No users found");
            }
            for user in users {
                println!("{}", serde_json::to_string(&user)?);
            }
        }

        Commands::UpdateUser {
            user_id,
            first_name,
            last_name,
            email,
            image,
        } => {
            let update = UserUpdate {
                user_image: image,
                first_name,
                last_name,
                email_address: email,
            };
            if update.is_empty() {
                bail!("Nothing to update");
            }
            match db.with_unit_of_work(|uow| uow.users().update_profile(user_id, &update))? {
                Some(user) => println!("{}", serde_json::to_string(&user)?),
                None => bail!("User not found: {}", user_id),
            }
        }

        Commands::DeleteUser { user_id } => {
            if !db.with_unit_of_work(|uow| uow.users().delete(user_id))? {
                bail!("User not found: {}", user_id);
            }
            println!("Deleted user: {}", user_id);
        }

        Commands::Login {
            user_name,
            password,
        } => match db.with_unit_of_work(|uow| auth::login(uow, &user_name, &password))? {
            Some(session) => {
                println!("{}", session.session_id);
                tracing::info!(expires = %session.expiration_time, "session created");
            }
            None => bail!("Invalid credentials"),
        },

        Commands::CheckSession { session_id } => {
            let state =
                db.with_read_unit_of_work(|uow| auth::check_session(uow, session_id, now_utc()))?;
            println!("{}", state);
        }

        Commands::Logout { session_id } => {
            if !db.with_unit_of_work(|uow| auth::logout(uow, session_id))? {
                bail!("Session not found: {}", session_id);
            }
            println!("Logged out: {}", session_id);
        }

        Commands::PurgeSessions => {
            let removed =
                db.with_unit_of_work(|uow| auth::purge_expired_sessions(uow, now_utc()))?;
            println!("Removed {} expired session(s)", removed);
        }
    }
    Ok(())
}
