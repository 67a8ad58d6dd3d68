//! intake CLI: run the services, or talk to a running messaging service.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use intake_rs::classify::{Classifier, RetryPolicy, SentimentClassifier};
use intake_rs::config::{CATEGORISING_SERVICE, Config};
use intake_rs::coordinator::{ClaimConfig, ClaimCoordinator};
use intake_rs::model::{Category, CustomerMessage, NewMessage, Status};
use intake_rs::rpc::client::{MessagingClient, RemoteClassifier};
use intake_rs::rpc::wire::SearchRequest;
use intake_rs::rpc::{self, categorising, messaging, storage};
use intake_rs::store::StorageEngine;
use intake_rs::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "intake", about = "Customer message intake and claiming")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the storage service
    Storage {
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,
    },
    /// Run the categorising service (needs ANTHROPIC_API_KEY)
    Categorising {
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,
    },
    /// Run the messaging service against remote storage and categorising
    Messaging {
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,
        #[command(flatten)]
        claim: ClaimArgs,
        /// Override the storage service URL
        #[arg(long)]
        storage_url: Option<String>,
        /// Override the categorising service URL
        #[arg(long)]
        categorising_url: Option<String>,
    },
    /// Run storage and messaging in one process
    Standalone {
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,
        #[command(flatten)]
        claim: ClaimArgs,
        /// Override the categorising service URL; ignored when
        /// ANTHROPIC_API_KEY is set and classification runs in-process
        #[arg(long)]
        categorising_url: Option<String>,
    },
    /// Talk to a running messaging service
    Message {
        /// Messaging service URL
        #[arg(long, default_value = "http://localhost:8080")]
        server: String,
        #[command(subcommand)]
        action: MessageAction,
    },
}

#[derive(clap::Args)]
struct ClaimArgs {
    /// Candidates per claim round
    #[arg(long, default_value_t = 10)]
    page_size: usize,
    /// Give up a claim after this many contended rounds
    #[arg(long)]
    max_rounds: Option<u32>,
    /// Classification attempts per submission
    #[arg(long, default_value_t = 3)]
    attempts: u32,
    /// Seconds allowed per classification attempt
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

impl ClaimArgs {
    fn into_config(self) -> ClaimConfig {
        ClaimConfig {
            page_size: self.page_size,
            retry: RetryPolicy {
                attempts: self.attempts,
                timeout: Duration::from_secs(self.timeout_secs),
            },
            max_rounds: self.max_rounds,
        }
    }
}

#[derive(Subcommand)]
enum MessageAction {
    /// Submit a new message
    Submit {
        sender: String,
        body: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Claim the next message in a category
    Claim { category: Category },
    /// Show a message
    Show { name: String },
    /// List messages
    List {
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Move a message to another status
    Status { name: String, status: Status },
    /// Delete a message
    Delete { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Storage { listen } => cmd_storage(listen).await,
        Command::Categorising { listen } => cmd_categorising(listen).await,
        Command::Messaging {
            listen,
            claim,
            storage_url,
            categorising_url,
        } => cmd_messaging(listen, claim.into_config(), storage_url, categorising_url).await,
        Command::Standalone {
            listen,
            claim,
            categorising_url,
        } => cmd_standalone(listen, claim.into_config(), categorising_url).await,
        Command::Message { server, action } => {
            let client = MessagingClient::new(&server)?;
            cmd_message(&client, action).await
        }
    }
}

fn telemetry(config: &Config, service: &str) -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: format!("intake-{service}"),
        log_level: config.log_level.clone(),
    })?)
}

async fn bind(listen: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(listen)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {listen}: {e}"))
}

async fn cmd_storage(listen: String) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _guard = telemetry(&config, "storage")?;

    let engine = Arc::new(StorageEngine::new());
    let app = storage::router(engine).merge(rpc::health_routes("storage"));
    rpc::serve(bind(&listen).await?, app).await?;
    Ok(())
}

async fn cmd_categorising(listen: String) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _guard = telemetry(&config, "categorising")?;

    let classifier = SentimentClassifier::new(config.require_api_key()?, &config.classifier_model)?;
    tracing::info!(model = %config.classifier_model, "sentiment classifier ready");

    let app = categorising::router(Arc::new(classifier)).merge(rpc::health_routes("categorising"));
    rpc::serve(bind(&listen).await?, app).await?;
    Ok(())
}

async fn cmd_messaging(
    listen: String,
    claim: ClaimConfig,
    storage_url: Option<String>,
    categorising_url: Option<String>,
) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    let _guard = telemetry(&config, "messaging")?;

    if let Some(url) = storage_url {
        config.services.insert(intake_rs::config::STORAGE_SERVICE, url);
    }
    if let Some(url) = categorising_url {
        config.services.insert(CATEGORISING_SERVICE, url);
    }
    tracing::info!(services = ?config.services, "messaging service starting");

    let coordinator = Arc::new(ClaimCoordinator::connect(&config.services, claim)?);
    let app = messaging::router(coordinator).merge(rpc::health_routes("messaging"));
    rpc::serve(bind(&listen).await?, app).await?;
    Ok(())
}

async fn cmd_standalone(
    listen: String,
    claim: ClaimConfig,
    categorising_url: Option<String>,
) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    let _guard = telemetry(&config, "standalone")?;
    let engine = Arc::new(StorageEngine::new());
    let listener = bind(&listen).await?;

    match config.anthropic_api_key.as_ref() {
        Some(key) => {
            let classifier = SentimentClassifier::new(key, &config.classifier_model)?;
            tracing::info!(model = %config.classifier_model, "classifying in-process");
            serve_standalone(listener, engine, classifier, claim).await
        }
        None => {
            if let Some(url) = categorising_url {
                config.services.insert(CATEGORISING_SERVICE, url);
            }
            let addr = config.services.address(CATEGORISING_SERVICE)?;
            tracing::info!(%addr, "classifying through the categorising service");
            let classifier = RemoteClassifier::new(addr, claim.retry.timeout)?;
            serve_standalone(listener, engine, classifier, claim).await
        }
    }
}

async fn serve_standalone<C: Classifier>(
    listener: TcpListener,
    engine: Arc<StorageEngine>,
    classifier: C,
    claim: ClaimConfig,
) -> anyhow::Result<()> {
    let coordinator = Arc::new(ClaimCoordinator::new(Arc::clone(&engine), classifier, claim));
    let app = storage::router(engine)
        .merge(messaging::router(coordinator))
        .merge(rpc::health_routes("standalone"));
    rpc::serve(listener, app).await?;
    Ok(())
}

async fn cmd_message(client: &MessagingClient, action: MessageAction) -> anyhow::Result<()> {
    match action {
        MessageAction::Submit {
            sender,
            body,
            email,
        } => {
            let mut new = NewMessage::new(sender, body);
            if let Some(email) = email {
                new = new.email(email);
            }
            let message = client.submit(&new).await?;
            println!("Stored: {} ({})", message.name, message.category);
        }
        MessageAction::Claim { category } => match client.claim_next(category).await? {
            Some(message) => print_message(&message),
            None => println!("No {category} message waiting."),
        },
        MessageAction::Show { name } => match client.get_message(&name).await? {
            Some(message) => print_message(&message),
            None => anyhow::bail!("no message named '{name}'"),
        },
        MessageAction::List {
            category,
            status,
            limit,
        } => {
            let filter = SearchRequest {
                category,
                status,
                limit: Some(limit),
            };
            let messages = client.list_messages(&filter).await?;
            if messages.is_empty() {
                println!("No messages found.");
                return Ok(());
            }

            println!(
                "{:<40}  {:<10}  {:<10}  {:<16}  BODY",
                "NAME", "CATEGORY", "STATUS", "CREATED"
            );
            println!("{}", "-".repeat(100));
            for m in &messages {
                let body: String = m.body.chars().take(30).collect();
                println!(
                    "{:<40}  {:<10}  {:<10}  {:<16}  {}",
                    m.name,
                    m.category,
                    m.status,
                    m.created_at.format("%Y-%m-%d %H:%M"),
                    body
                );
            }
            println!("\n{} message(s)", messages.len());
        }
        MessageAction::Status { name, status } => match client.update_status(&name, status).await? {
            Some(message) => println!("{}: {}", message.name, message.status),
            None => anyhow::bail!("no message named '{name}'"),
        },
        MessageAction::Delete { name } => {
            client.delete_message(&name).await?;
            println!("Deleted: {name}");
        }
    }
    Ok(())
}

fn print_message(m: &CustomerMessage) {
    println!("Name:       {}", m.name);
    println!("Sender:     {}", m.sender.name);
    println!("Email:      {}", m.sender.email.as_deref().unwrap_or("-"));
    println!("Category:   {}", m.category);
    println!("Status:     {}", m.status);
    println!("Created:    {}", m.created_at);
    println!("Body:       {}", m.body);
}
