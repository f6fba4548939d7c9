use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use leadpipe::Crm;
use leadpipe::ai::{GeminiClient, GenerativeModel};
use leadpipe::config::Config;
use leadpipe::db::local::LocalStore;
use leadpipe::db::{
    CreateTaskParams, EntityRepository, Identity, LeadStatus, QuoteRepository, Repositories,
    TaskRepository, TaskType,
};
use leadpipe::transcode::{decode, encode};
use leadpipe::web::{ApiState, start_server};

const ENV_LOG_FORMAT: &str = "LEADPIPE_LOG_FORMAT";

#[derive(Parser)]
#[command(name = "leadpipe", version, about = "Sales pipeline: leads, tasks, quotes and AI drafts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API over a local store
    Serve,
    #[command(flatten)]
    Data(DataCommand),
}

/// Commands that run against the configured repositories.
#[derive(Subcommand)]
enum DataCommand {
    /// Print the board: one column per pipeline stage
    Board,
    #[command(subcommand)]
    Leads(LeadsCommand),
    #[command(subcommand)]
    Tasks(TasksCommand),
    #[command(subcommand)]
    Quotes(QuotesCommand),
    #[command(subcommand)]
    Ai(AiCommand),
}

#[derive(Subcommand)]
enum LeadsCommand {
    List,
    /// Show one lead with its quotes
    Show { id: String },
    /// Create a lead from a snake_case JSON object
    Create { json: String },
    /// Patch a lead with a snake_case JSON object
    Update { id: String, json: String },
    /// Move a lead one stage forward
    Advance { id: String },
    /// Set a lead's stage directly
    Move { id: String, status: LeadStatus },
    Delete { id: String },
}

#[derive(Subcommand)]
enum TasksCommand {
    /// List tasks, open first then by priority
    List,
    Create(TaskArgs),
    Toggle { id: String },
    Delete { id: String },
}

#[derive(Args)]
struct TaskArgs {
    title: String,
    #[arg(long = "type", value_parser = parse_task_type, default_value = "call")]
    kind: TaskType,
    /// YYYY-MM-DD, defaults to today
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    time: Option<String>,
    #[arg(long)]
    priority: bool,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Subcommand)]
enum QuotesCommand {
    /// List quotes, optionally for one lead
    List {
        #[arg(long)]
        lead: Option<String>,
    },
    /// Create a quote from a snake_case JSON object
    Create { json: String },
    Delete { id: String },
    /// Totals across all quotes
    Summary,
}

#[derive(Subcommand)]
enum AiCommand {
    /// Score a lead
    Score {
        id: String,
        /// Store the score on the lead
        #[arg(long)]
        save: bool,
    },
    /// Draft a follow-up email
    Email { id: String },
    /// Suggest quote items
    Quote {
        id: String,
        /// Save the suggestion as a draft quote
        #[arg(long)]
        save: bool,
    },
}

fn parse_task_type(raw: &str) -> Result<TaskType, String> {
    TaskType::from_db_value(&raw.to_ascii_lowercase())
        .ok_or_else(|| format!("unknown task type '{raw}'"))
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("leadpipe=info"));
    let json = std::env::var(ENV_LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let value = encode(value)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn parse_payload<T: serde::de::DeserializeOwned>(raw: &str) -> anyhow::Result<T> {
    let value: Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    decode(value).context("payload does not match the expected fields")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Command::Serve => serve(&config).await,
        Command::Data(command) => {
            let crm = Crm::from_config(&config)?;
            run(&crm, command).await
        }
    }
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let Some(token) = config.server.token.clone() else {
        bail!("LEADPIPE_SERVER_TOKEN must be set to serve the API");
    };

    let identity = Identity {
        id: config.server.user_id.clone(),
        email: config.server.email.clone(),
    };
    let store = Arc::new(LocalStore::open(&config.store)?.with_identity(identity.clone()));

    let api_key = config.ai.api_key.as_ref().filter(|_| config.ai.enabled);
    let generator: Option<Arc<dyn GenerativeModel>> = match api_key {
        Some(key) => Some(Arc::new(GeminiClient::new(
            key,
            config.ai.base_url.clone(),
            config.ai.model.clone(),
            config.ai.timeout,
        )?)),
        None => {
            tracing::info!("No generative model configured; /api/ai answers 503 with fallbacks");
            None
        }
    };

    let state = Arc::new(ApiState::new(
        Repositories::local(store),
        generator,
        identity,
    ));
    start_server(config.server.bind, Arc::clone(&state), token).await?;

    tokio::signal::ctrl_c().await?;
    leadpipe::web::shutdown(&state).await;
    Ok(())
}

async fn run(crm: &Crm, command: DataCommand) -> anyhow::Result<()> {
    match command {
        DataCommand::Board => print_json(&crm.board().await?),
        DataCommand::Leads(command) => leads(crm, command).await,
        DataCommand::Tasks(command) => tasks(crm, command).await,
        DataCommand::Quotes(command) => quotes(crm, command).await,
        DataCommand::Ai(command) => ai(crm, command).await,
    }
}

async fn leads(crm: &Crm, command: LeadsCommand) -> anyhow::Result<()> {
    let repo = &crm.repos.leads;
    match command {
        LeadsCommand::List => print_json(&repo.get_all().await?),
        LeadsCommand::Show { id } => print_json(&crm.lead_with_quotes(&id).await?),
        LeadsCommand::Create { json } => print_json(&repo.create(parse_payload(&json)?).await?),
        LeadsCommand::Update { id, json } => {
            print_json(&repo.update(&id, parse_payload(&json)?).await?)
        }
        LeadsCommand::Advance { id } => print_json(&crm.pipeline.advance(&id).await?),
        LeadsCommand::Move { id, status } => print_json(&crm.pipeline.move_to(&id, status).await?),
        LeadsCommand::Delete { id } => {
            repo.delete(&id).await?;
            Ok(())
        }
    }
}

async fn tasks(crm: &Crm, command: TasksCommand) -> anyhow::Result<()> {
    let repo = &crm.repos.tasks;
    match command {
        TasksCommand::List => print_json(&crm.tasks_for_display().await?),
        TasksCommand::Create(args) => {
            let date = args
                .date
                .unwrap_or_else(|| chrono::Utc::now().date_naive());
            let mut input = CreateTaskParams::new(args.title, args.kind, date);
            input.time = args.time;
            input.priority = args.priority;
            input.description = args.description;
            print_json(&repo.create(input).await?)
        }
        TasksCommand::Toggle { id } => print_json(&repo.toggle(&id).await?),
        TasksCommand::Delete { id } => {
            repo.delete(&id).await?;
            Ok(())
        }
    }
}

async fn quotes(crm: &Crm, command: QuotesCommand) -> anyhow::Result<()> {
    let repo = &crm.repos.quotes;
    match command {
        QuotesCommand::List { lead: Some(lead) } => print_json(&repo.list_for_lead(&lead).await?),
        QuotesCommand::List { lead: None } => print_json(&repo.get_all().await?),
        QuotesCommand::Create { json } => print_json(&repo.create(parse_payload(&json)?).await?),
        QuotesCommand::Delete { id } => {
            repo.delete(&id).await?;
            Ok(())
        }
        QuotesCommand::Summary => print_json(&crm.quote_summary().await?),
    }
}

async fn ai(crm: &Crm, command: AiCommand) -> anyhow::Result<()> {
    match command {
        AiCommand::Score { id, save } => {
            let lead = crm.repos.leads.get_one(&id).await?;
            let analysis = crm.ai.score_lead(&lead).await;
            if save {
                crm.record_score(&id, &analysis).await?;
            }
            print_json(&analysis)
        }
        AiCommand::Email { id } => {
            let lead = crm.repos.leads.get_one(&id).await?;
            print_json(&crm.ai.draft_email(&lead).await)
        }
        AiCommand::Quote { id, save } => {
            let lead = crm.repos.leads.get_one(&id).await?;
            let draft = crm.ai.draft_quote(&lead).await;
            if save && !draft.items.is_empty() {
                let quote = crm.save_quote_draft(&id, draft.items).await?;
                return print_json(&quote);
            }
            print_json(&draft)
        }
    }
}
