use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use advisor_chat::chat::open_conversation;
use advisor_chat::store::{Conversation, CustomerRecord, StoredMessage};
use advisor_chat::tools::builtin;
use advisor_chat::{
    AppConfig, ChatController, ChatEvent, ConversationStore, Scenario, SqliteStore, ToolRegistry,
};

#[derive(Parser)]
#[command(name = "advisor-chat", version)]
#[command(about = "A financial advisor chat service with tool calling", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// LLM provider to use (anthropic, openai)
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Model to use (provider-specific)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Conversation database (defaults to ~/.advisor-chat/advisor.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover the built-in tools and print the report
    Tools,

    /// Open a conversation and print its id
    Start {
        /// existing (needs --customer) or new
        #[arg(long, default_value = "new")]
        scenario: Scenario,

        /// Customer id for an existing-customer conversation
        #[arg(long)]
        customer: Option<String>,

        /// Session id for a new-visitor conversation (generated when omitted)
        #[arg(long)]
        session: Option<String>,
    },

    /// Send a message and print the reply
    Chat {
        /// Conversation id
        conversation_id: String,

        /// The user's message
        message: String,

        /// Wait for the full reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Print a conversation's messages
    History {
        /// Conversation id
        conversation_id: String,

        /// Print the messages as JSON
        #[arg(long)]
        json: bool,
    },

    /// List conversations
    Conversations,

    /// Title and summarize a conversation
    Summarize {
        /// Conversation id
        conversation_id: String,
    },

    /// Close a conversation to further messages
    Close {
        /// Conversation id
        conversation_id: String,
    },

    /// Delete a conversation and its messages
    DeleteConversation {
        /// Conversation id
        conversation_id: String,
    },

    /// Hide one message from a conversation's history
    DeleteMessage {
        /// Conversation id
        conversation_id: String,

        /// Message id
        message_id: String,
    },

    /// Add or update a customer record
    AddCustomer {
        #[arg(long)]
        id: String,

        #[arg(long)]
        name: String,

        /// Annual income
        #[arg(long)]
        income: f64,

        /// Monthly debt payments
        #[arg(long, default_value_t = 0.0)]
        debt: f64,

        #[arg(long)]
        credit_score: i64,

        #[arg(long, default_value_t = 0.0)]
        savings: f64,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive("info".parse().expect("valid log directive"))
    };

    // stdout carries replies, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Configuration with precedence: CLI > env > project > global > defaults
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load().context("failed to load configuration")?;
    if let Some(provider) = &cli.provider {
        config.provider = provider.clone();
    }
    if cli.model.is_some() {
        config.model = cli.model.clone();
    }
    if cli.db.is_some() {
        config.database_path = cli.db.clone();
    }
    debug!(provider = %config.provider, db = ?config.database_path, "configuration resolved");
    Ok(config)
}

fn open_store(config: &AppConfig) -> Result<SqliteStore> {
    let path = config.database_path()?;
    SqliteStore::new(&path)
        .with_context(|| format!("failed to open conversation store at {}", path.display()))
}

fn build_controller(config: AppConfig) -> Result<ChatController> {
    ChatController::builder()
        .config(config)
        .context("failed to configure the chat controller")?
        .builtin_tools()
        .build()
        .context("failed to build the chat controller")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Tools => {
            let ctx = config.tool_context()?;
            let registry = ToolRegistry::discovered(&builtin::catalog(), &ctx)
                .context("tool discovery failed")?;
            if let Some(report) = registry.last_report() {
                print!("{}", report);
            }
            for tool in registry.all() {
                println!("{:<16} {}", tool.name(), tool.description());
            }
        }

        Commands::Start {
            scenario,
            customer,
            session,
        } => {
            let store = open_store(&config)?;
            let conversation =
                open_conversation(&store, scenario, customer.as_deref(), session.as_deref())
                    .await?;
            println!("{}", conversation.id);
        }

        Commands::Chat {
            conversation_id,
            message,
            no_stream,
        } => {
            let stream = config.stream && !no_stream;
            let controller = build_controller(config)?;
            info!(id = %conversation_id, stream, "sending message");

            if stream {
                stream_turn(&controller, &conversation_id, &message).await?;
            } else {
                let reply = controller.send(&conversation_id, &message, None).await?;
                print_payloads(&reply.message);
                println!("{}", reply.message.content);
            }
        }

        Commands::History {
            conversation_id,
            json,
        } => {
            let store = open_store(&config)?;
            if store.get_conversation(&conversation_id).await?.is_none() {
                anyhow::bail!("conversation '{}' not found", conversation_id);
            }
            let messages = store.messages(&conversation_id, false).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else if messages.is_empty() {
                println!("No messages.");
            } else {
                for message in &messages {
                    print_message(message);
                }
            }
        }

        Commands::Conversations => {
            let store = open_store(&config)?;
            let conversations = store.list_conversations().await?;
            if conversations.is_empty() {
                println!("No conversations found.");
                return Ok(());
            }

            println!(
                "{:<38} {:<9} {:<8} {:>5}  IDENTITY",
                "ID", "SCENARIO", "STATUS", "MSGS"
            );
            println!("{}", "-".repeat(90));
            for conversation in &conversations {
                print_conversation(conversation);
            }
        }

        Commands::Summarize { conversation_id } => {
            let controller = build_controller(config)?;
            let summary = controller.summarize(&conversation_id).await?;
            println!("{}\n\n{}", summary.title, summary.summary);
        }

        Commands::Close { conversation_id } => {
            let store = open_store(&config)?;
            if store.get_conversation(&conversation_id).await?.is_none() {
                anyhow::bail!("conversation '{}' not found", conversation_id);
            }
            store.set_active(&conversation_id, false).await?;
            println!("Closed conversation: {}", conversation_id);
        }

        Commands::DeleteConversation { conversation_id } => {
            let store = open_store(&config)?;
            if !store.delete_conversation(&conversation_id).await? {
                anyhow::bail!("conversation '{}' not found", conversation_id);
            }
            println!("Deleted conversation: {}", conversation_id);
        }

        Commands::DeleteMessage {
            conversation_id,
            message_id,
        } => {
            let store = open_store(&config)?;
            if !store
                .soft_delete_message(&conversation_id, &message_id)
                .await?
            {
                anyhow::bail!(
                    "message '{}' not found in conversation '{}'",
                    message_id,
                    conversation_id
                );
            }
            println!("Deleted message: {}", message_id);
        }

        Commands::AddCustomer {
            id,
            name,
            income,
            debt,
            credit_score,
            savings,
        } => {
            let store = open_store(&config)?;
            let record = CustomerRecord {
                customer_id: id,
                name,
                annual_income: income,
                monthly_debt_payments: debt,
                credit_score,
                savings,
                created_at: Utc::now(),
            };
            store.upsert_customer(&record).await?;
            println!("Saved customer: {}", record.customer_id);
        }
    }

    Ok(())
}

/// Print text deltas as they arrive; Ctrl-C abandons the turn
async fn stream_turn(
    controller: &ChatController,
    conversation_id: &str,
    message: &str,
) -> Result<()> {
    let mut handle = controller
        .send_stream(conversation_id, message, None)
        .await?;
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(ChatEvent::Data { text }) => {
                    print!("{}", text);
                    stdout.flush()?;
                }
                Some(ChatEvent::Tool { note, .. }) => eprintln!("[{}]", note),
                Some(ChatEvent::Error { message }) => {
                    println!();
                    error!(error = %message, "turn failed");
                }
                Some(ChatEvent::Complete { message_id, .. }) => {
                    println!();
                    debug!(message_id = %message_id, "reply persisted");
                }
                Some(payload) => eprintln!("[{}] {}", payload.kind(), payload.data()),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                warn!("interrupted, keeping the delivered part of the reply");
                let _ = handle.abandon().await;
                anyhow::bail!("interrupted");
            }
        }
    }

    handle.wait().await?;
    Ok(())
}

fn print_payloads(message: &StoredMessage) {
    for payload in &message.tool_payload {
        if let Some(event) = ChatEvent::from_payload(payload) {
            eprintln!("[{}] {}", event.kind(), event.data());
        }
    }
}

fn print_message(message: &StoredMessage) {
    let tool = message
        .tool_name
        .as_deref()
        .map(|t| format!(" ({})", t))
        .unwrap_or_default();
    println!("#{} {}{}: {}", message.seq, message.role, tool, message.content);
    if let Some(error) = &message.error {
        println!("   error: {}", error);
    }
}

fn print_conversation(conversation: &Conversation) {
    let identity = conversation
        .identity
        .customer_id()
        .or(conversation.identity.session_id())
        .unwrap_or("-");
    let status = if conversation.is_active { "active" } else { "closed" };
    println!(
        "{:<38} {:<9} {:<8} {:>5}  {}",
        conversation.id,
        conversation.scenario().to_string(),
        status,
        conversation.message_count,
        identity
    );
}
