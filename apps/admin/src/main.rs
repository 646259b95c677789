use std::{
    io::{self, Write},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    AlwaysConfirm, Confirm, ConfirmFn, DestroyOutcome, ListController, LoadMoreOutcome,
    SubmitOutcome, NO_PARAMS,
};
use reqwest::header::{self, HeaderMap, HeaderValue};
use shared::{
    domain::{ActivityFilter, User, UserId},
    protocol::UserPayload,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Manage users of a running admin server")]
struct Args {
    #[arg(long, env = "ADMIN_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[arg(long, env = "ADMIN_TOKEN", hide_env_values = true)]
    token: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print users, newest first.
    List {
        #[arg(long)]
        search: Option<String>,
        /// all, active or inactive
        #[arg(long, default_value = "all")]
        status: String,
        /// How many pages to load.
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        inactive: bool,
    },
    /// Change a user; omitted fields keep their current value.
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    Delete {
        id: i64,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let users_url = format!("{}/users", args.server_url.trim_end_matches('/'));
    let confirm: Arc<dyn Confirm> = match &args.command {
        Command::Delete { yes: true, .. } => Arc::new(AlwaysConfirm),
        _ => Arc::new(ConfirmFn(prompt_on_stdin)),
    };
    let list = ListController::<User>::with_client(http_client(&args.token)?, confirm);

    match args.command {
        Command::List {
            search,
            status,
            pages,
        } => {
            let mut params = Vec::new();
            if let Some(search) = search.filter(|s| !s.trim().is_empty()) {
                params.push(("search", search));
            }
            let filter = ActivityFilter::parse(Some(status.as_str()));
            if filter != ActivityFilter::All {
                params.push(("is_active", filter.as_str().to_string()));
            }

            list.fetch(&users_url, &params).await?;
            for _ in 1..pages {
                if list.load_more(NO_PARAMS).await? == LoadMoreOutcome::Exhausted {
                    break;
                }
            }

            let state = list.snapshot();
            for user in &state.items {
                print_user(user);
            }
            println!("showing {} of {} user(s)", state.items.len(), state.total);
            if state.next_page_url.is_some() {
                println!("more available, pass a larger --pages to see them");
            }
        }
        Command::Create {
            name,
            email,
            inactive,
        } => {
            list.open_sheet(None);
            let payload = UserPayload::new(name, email, !inactive);
            report(list.submit(&users_url, &payload).await?)?;
        }
        Command::Update {
            id,
            name,
            email,
            active,
        } => {
            let current = find_user(&list, &users_url, UserId(id)).await?;
            let payload = UserPayload::new(
                name.unwrap_or_else(|| current.name.clone()),
                email.unwrap_or_else(|| current.email.clone()),
                active.unwrap_or(current.is_active),
            );
            list.open_sheet(Some(current));
            report(list.submit(&users_url, &payload).await?)?;
        }
        Command::Delete { id, .. } => match list.destroy(&users_url, &UserId(id)).await? {
            DestroyOutcome::Deleted => println!("deleted user {id}"),
            DestroyOutcome::Declined => println!("kept user {id}"),
        },
    }

    Ok(())
}

fn http_client(token: &str) -> Result<reqwest::Client> {
    let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
        .context("admin token is not a valid header value")?;
    auth.set_sensitive(true);
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, auth);

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build http client")
}

/// Walks the listing page by page until `id` shows up.
async fn find_user(list: &ListController<User>, users_url: &str, id: UserId) -> Result<User> {
    list.fetch(users_url, NO_PARAMS).await?;
    loop {
        if let Some(user) = list.items().into_iter().find(|user| user.id == id) {
            return Ok(user);
        }
        if list.load_more(NO_PARAMS).await? == LoadMoreOutcome::Exhausted {
            bail!("user {id} not found");
        }
        debug!(%id, loaded = list.items().len(), "user not on loaded pages yet");
    }
}

fn report(outcome: SubmitOutcome<User>) -> Result<()> {
    match outcome {
        SubmitOutcome::Saved(user) => {
            print_user(&user);
            Ok(())
        }
        SubmitOutcome::Rejected(errors) => {
            for (field, messages) in &errors {
                for message in messages {
                    eprintln!("{field}: {message}");
                }
            }
            bail!("the server rejected the user")
        }
    }
}

fn print_user(user: &User) {
    let status = if user.is_active { "active" } else { "inactive" };
    println!(
        "{:>6}  {:<8}  {:<24}  {}",
        user.id.0, status, user.name, user.email
    );
}

fn prompt_on_stdin(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
