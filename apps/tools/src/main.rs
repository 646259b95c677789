use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use server_api::{hash_password, validate_user, DEFAULT_INITIAL_PASSWORD};
use shared::{domain::User, protocol::UserPayload};
use storage::{Storage, UserRecord};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/admin.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert `count` numbered demo users; every third one is inactive.
    SeedUsers { count: u32 },
    CreateUser {
        name: String,
        email: String,
        #[arg(long)]
        inactive: bool,
        #[arg(long, default_value = DEFAULT_INITIAL_PASSWORD)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::SeedUsers { count } => {
            let password_hash = hash_password(DEFAULT_INITIAL_PASSWORD)?;
            let mut created = 0;
            for n in 1..=count {
                let name = format!("Demo User {n}");
                let email = format!("demo{n}@example.com");
                if storage.email_taken(&email, None).await? {
                    continue;
                }
                let record = UserRecord {
                    name: &name,
                    email: &email,
                    is_active: n % 3 != 0,
                };
                storage.create_user(record, &password_hash).await?;
                created += 1;
            }
            info!(requested = count, created, "seeded users");
            println!("created {created} user(s)");
        }
        Command::CreateUser {
            name,
            email,
            inactive,
            password,
        } => {
            let payload = UserPayload::new(name, email, !inactive);
            let user = create_user(&storage, &payload, &password).await?;
            println!("created user_id={}", user.id);
        }
    }

    Ok(())
}

/// Inserts a user after the same checks the API applies.
async fn create_user(storage: &Storage, payload: &UserPayload, password: &str) -> Result<User> {
    let valid = validate_user(storage, payload, None).await.map_err(|err| {
        let fields: Vec<String> = err
            .errors
            .iter()
            .flat_map(|(field, messages)| messages.iter().map(move |m| format!("{field}: {m}")))
            .collect();
        anyhow!("invalid user: {}", fields.join("; "))
    })?;
    let record = UserRecord {
        name: &valid.name,
        email: &valid.email,
        is_active: valid.is_active,
    };
    storage.create_user(record, &hash_password(password)?).await
}
