use anyhow::Context;
use futures::stream::TryStreamExt;
use messaging_service::config::Config;
use messaging_service::db::{open_store, require_database};
use messaging_service::services::{parse_seed, parse_seed_csv, MessageService, UserDirectory};
use messaging_service::MessagingError;
use query_cache::QueryCache;
use resilience::{with_retry_if, RetryConfig};
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  messaging-cli seed <users.json|users.csv>");
    eprintln!("  messaging-cli stream-users <chunk_size>");
    eprintln!("  messaging-cli users-over-age <chunk_size> <min_age>");
    eprintln!("  messaging-cli average-age [chunk_size]");
    eprintln!("  messaging-cli history <message_uuid>");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn chunk_arg(raw: &str) -> anyhow::Result<i64> {
    raw.parse()
        .with_context(|| format!("chunk size must be an integer, got {:?}", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    init_tracing();

    let config = Config::from_env()?;
    tracing::debug!(?config, "Loaded configuration");
    if matches!(
        args[1].as_str(),
        "stream-users" | "users-over-age" | "average-age" | "history"
    ) {
        require_database(&config, &args[1])?;
    }
    let store = open_store(&config).await?;
    let directory = UserDirectory::new(store.clone());

    match (args[1].as_str(), args.len()) {
        ("seed", 3) => {
            let raw = tokio::fs::read_to_string(&args[2])
                .await
                .with_context(|| format!("reading {}", args[2]))?;
            let batch = if args[2].ends_with(".csv") {
                parse_seed_csv(&raw)?
            } else {
                parse_seed(&raw)?
            };

            let users = with_retry_if(
                RetryConfig::default(),
                |e: &MessagingError| e.is_transient(),
                || directory.seed_users(batch.clone()),
            )
            .await
            .map_err(|e| e.into_inner())?;
            println!("Seeded {} users", users.len());
        }
        ("stream-users", 3) => {
            let mut chunks = directory.stream_users(chunk_arg(&args[2])?)?;
            let mut index = 0;
            while let Some(chunk) = chunks.try_next().await? {
                index += 1;
                println!("-- chunk {} ({} rows) --", index, chunk.len());
                for user in chunk {
                    println!("{}", serde_json::to_string(&user)?);
                }
            }
        }
        ("users-over-age", 4) => {
            let min_age: i32 = args[3]
                .parse()
                .with_context(|| format!("min_age must be an integer, got {:?}", args[3]))?;
            let mut users = directory.users_over_age(chunk_arg(&args[2])?, min_age)?;
            while let Some(user) = users.try_next().await? {
                println!("{}", serde_json::to_string(&user)?);
            }
        }
        ("average-age", 2) | ("average-age", 3) => {
            let chunk_size = match args.get(2) {
                Some(raw) => chunk_arg(raw)?,
                None => config.stream_chunk_size,
            };
            match directory.average_age(chunk_size).await? {
                Some(avg) => println!("Average age of users: {:.2}", avg),
                None => println!("No users"),
            }
        }
        ("history", 3) => {
            let id = Uuid::parse_str(&args[2])?;
            let cache = QueryCache::registered("message_history", config.history_cache);
            let service = MessageService::new(store, cache);
            for (n, version) in service.message_versions(id).await?.iter().enumerate() {
                println!("v{}: {}", n + 1, version);
            }
        }
        _ => {
            eprintln!("Invalid arguments");
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}
