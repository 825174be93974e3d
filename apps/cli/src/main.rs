use std::io::Write;

use anyhow::{bail, ensure, Context, Result};
use clap::{Args, Parser, Subcommand};

use polychat_core_sdk::{
    chat::{ChatSession, NotificationLevel, TurnOutcome},
    db::SqliteStore,
    models::{ProviderConfig, ProviderKind, Role},
    store::ConversationStore,
    telemetry,
};

/**
 * \brief Command-line front end over the chat session.
 */
#[derive(Parser, Debug)]
#[command(name = "polychat", version, about = "Multi-provider LLM chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /** \brief Inspect or change the provider configuration. */
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /** \brief Start a new conversation and make it active. */
    New,

    /** \brief List conversations; `*` marks the active one. */
    List,

    Select { id: String },

    Rename { id: String, name: String },

    Delete { id: String },

    /** \brief Drop all turns of the active conversation. */
    Clear,

    /** \brief Print the active conversation as a transcript. */
    Show,

    /**
     * \brief Send a message in the active conversation.
     * \param no_stream Wait for the whole reply instead of printing it as it arrives
     */
    Send {
        prompt: String,
        #[arg(long, default_value_t = false)]
        no_stream: bool,
    },

    /** \brief Write the export document to a file or stdout. */
    Export {
        #[arg(long, short)]
        output: Option<String>,
    },

    /** \brief Replace config and conversations from an export document. */
    Import { file: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /** \brief Print the current config with the API key masked. */
    Show,

    /** \brief Switch provider, resetting provider-specific fields to their defaults. */
    Use {
        #[arg(value_parser = parse_provider)]
        provider: ProviderKind,
    },

    /** \brief Update fields of the current provider's config. */
    Set(ConfigArgs),

    /** \brief Enable or disable file logging. */
    Telemetry {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Args, Debug, Default)]
struct ConfigArgs {
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /** \brief Azure only. */
    #[arg(long)]
    endpoint: Option<String>,
    /** \brief Azure only. */
    #[arg(long)]
    deployment: Option<String>,
    /** \brief Azure only. */
    #[arg(long)]
    api_version: Option<String>,
    #[arg(long)]
    temperature: Option<f64>,
    #[arg(long)]
    max_tokens: Option<u32>,
    #[arg(long)]
    top_p: Option<f64>,
    /** \brief Gemini only. */
    #[arg(long)]
    top_k: Option<u32>,
    #[arg(long)]
    frequency_penalty: Option<f64>,
    #[arg(long)]
    presence_penalty: Option<f64>,
    /** \brief Groq only; repeatable. */
    #[arg(long)]
    stop: Vec<String>,
}

fn parse_provider(s: &str) -> Result<ProviderKind, String> {
    s.parse::<ProviderKind>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let kv = SqliteStore::open_default().context("open database failed")?;
    let store = ConversationStore::new(kv);
    telemetry::set_enabled(store.get_telemetry_enabled().unwrap_or(false));

    let mut session = ChatSession::load(store).context("load session failed")?;

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => print_config(session.config())?,
            ConfigAction::Use { provider } => {
                let config = ProviderConfig::default_for(provider, session.config());
                session.save_config(config).context("save config failed")?;
                println!("Switched to {}", provider.label());
            }
            ConfigAction::Set(args) => {
                let mut config = session.config().clone();
                apply_overrides(&mut config, args)?;
                session.save_config(config).context("save config failed")?;
                if !session.service().validate_config() {
                    println!(
                        "{} settings are still incomplete",
                        session.service().provider_name()
                    );
                }
            }
            ConfigAction::Telemetry { enabled } => {
                session
                    .store()
                    .set_telemetry_enabled(enabled)
                    .context("save telemetry failed")?;
                telemetry::set_enabled(enabled);
                println!("Telemetry {}", if enabled { "enabled" } else { "disabled" });
            }
        },
        Commands::New => {
            let conversation = session.new_conversation().context("create conversation failed")?;
            println!("Created {} ({})", conversation.name, conversation.id);
        }
        Commands::List => {
            let active = session.active_id().map(str::to_string);
            for c in session.conversations() {
                let marker = if active.as_deref() == Some(c.id.as_str()) { "*" } else { " " };
                println!(
                    "{} {}  {}  [{}] updated {}",
                    marker,
                    c.id,
                    c.name,
                    c.provider.as_deref().unwrap_or("-"),
                    c.updated_at
                );
            }
        }
        Commands::Select { id } => {
            if !session.select_conversation(&id)? {
                bail!("no conversation with id {}", id);
            }
        }
        Commands::Rename { id, name } => {
            if !session.rename_conversation(&id, &name)? {
                bail!("rename failed: unknown id or empty name");
            }
        }
        Commands::Delete { id } => session.delete_conversation(&id).context("delete failed")?,
        Commands::Clear => {
            if !session.clear_conversation()? {
                bail!("no active conversation");
            }
        }
        Commands::Show => match session.transcript() {
            Some(text) => println!("{}", text),
            None => bail!("no active conversation"),
        },
        Commands::Send { prompt, no_stream } => {
            session.set_streaming(!no_stream);
            let mut printed = 0usize;
            let outcome = session
                .send_message(&prompt, |conversation| {
                    let Some(last) = conversation.messages.last() else {
                        return;
                    };
                    if last.role != Role::Assistant || last.content.len() <= printed {
                        return;
                    }
                    print!("{}", &last.content[printed..]);
                    printed = last.content.len();
                    std::io::stdout().flush().ok();
                })
                .await?;
            if matches!(outcome, TurnOutcome::Completed(_)) {
                println!();
            }
        }
        Commands::Export { output } => {
            let doc = session.export_data().context("export failed")?;
            match output {
                Some(path) => {
                    std::fs::write(&path, doc).with_context(|| format!("write {} failed", path))?;
                    println!("Exported to {}", path);
                }
                None => println!("{}", doc),
            }
        }
        Commands::Import { file } => {
            let text =
                std::fs::read_to_string(&file).with_context(|| format!("read {} failed", file))?;
            session.import_data(&text)?;
        }
    }

    let mut failed = false;
    for n in session.take_notifications() {
        match n.level {
            NotificationLevel::Info => println!("{}", n.message),
            NotificationLevel::Error => {
                failed = true;
                eprintln!("error: {}", n.message);
                if n.opens_config {
                    eprintln!("hint: run `polychat config set --help`");
                }
            }
        }
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_config(config: &ProviderConfig) -> Result<()> {
    let mut value = serde_json::to_value(config)?;
    if let Some(key) = value.get_mut("apiKey") {
        *key = serde_json::Value::String(mask(config.api_key()));
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    println!("valid: {}", config.is_valid());
    Ok(())
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", tail)
}

/**
 * \brief Applies the given flags to the current provider's config.
 * \details Flags that do not exist for the provider are rejected rather than dropped.
 */
fn apply_overrides(config: &mut ProviderConfig, args: ConfigArgs) -> Result<()> {
    if let Some(t) = args.temperature {
        ensure!((0.0..=2.0).contains(&t), "temperature must be between 0 and 2");
    }
    if let Some(p) = args.top_p {
        ensure!((0.0..=1.0).contains(&p), "top-p must be between 0 and 1");
    }

    let kind = config.kind();
    let reject = |flag: &str, present: bool| -> Result<()> {
        ensure!(!present, "--{} does not apply to {}", flag, kind.label());
        Ok(())
    };

    match config {
        ProviderConfig::Azure(c) => {
            reject("model", args.model.is_some())?;
            reject("top-k", args.top_k.is_some())?;
            reject("stop", !args.stop.is_empty())?;
            set(&mut c.api_key, args.api_key);
            set(&mut c.endpoint, args.endpoint);
            set(&mut c.deployment_name, args.deployment);
            set(&mut c.api_version, args.api_version);
            set_opt(&mut c.temperature, args.temperature);
            set_opt(&mut c.max_tokens, args.max_tokens);
            set_opt(&mut c.top_p, args.top_p);
            set_opt(&mut c.frequency_penalty, args.frequency_penalty);
            set_opt(&mut c.presence_penalty, args.presence_penalty);
        }
        ProviderConfig::OpenAi(c) => {
            reject_azure_fields(&reject, &args)?;
            reject("top-k", args.top_k.is_some())?;
            reject("stop", !args.stop.is_empty())?;
            set(&mut c.api_key, args.api_key);
            set(&mut c.model, args.model);
            set_opt(&mut c.temperature, args.temperature);
            set_opt(&mut c.max_tokens, args.max_tokens);
            set_opt(&mut c.top_p, args.top_p);
            set_opt(&mut c.frequency_penalty, args.frequency_penalty);
            set_opt(&mut c.presence_penalty, args.presence_penalty);
        }
        ProviderConfig::Claude(c) => {
            reject_azure_fields(&reject, &args)?;
            reject("top-p", args.top_p.is_some())?;
            reject("top-k", args.top_k.is_some())?;
            reject("stop", !args.stop.is_empty())?;
            reject_penalties(&reject, &args)?;
            set(&mut c.api_key, args.api_key);
            set(&mut c.model, args.model);
            set_opt(&mut c.temperature, args.temperature);
            set_opt(&mut c.max_tokens, args.max_tokens);
        }
        ProviderConfig::Gemini(c) => {
            reject_azure_fields(&reject, &args)?;
            reject("stop", !args.stop.is_empty())?;
            reject_penalties(&reject, &args)?;
            set(&mut c.api_key, args.api_key);
            set(&mut c.model, args.model);
            set_opt(&mut c.temperature, args.temperature);
            set_opt(&mut c.max_tokens, args.max_tokens);
            set_opt(&mut c.top_p, args.top_p);
            set_opt(&mut c.top_k, args.top_k);
        }
        ProviderConfig::Groq(c) => {
            reject_azure_fields(&reject, &args)?;
            reject("top-k", args.top_k.is_some())?;
            reject_penalties(&reject, &args)?;
            set(&mut c.api_key, args.api_key);
            set(&mut c.model, args.model);
            set_opt(&mut c.temperature, args.temperature);
            set_opt(&mut c.max_tokens, args.max_tokens);
            set_opt(&mut c.top_p, args.top_p);
            if !args.stop.is_empty() {
                c.stop = Some(args.stop);
            }
        }
    }
    Ok(())
}

fn reject_azure_fields(
    reject: &impl Fn(&str, bool) -> Result<()>,
    args: &ConfigArgs,
) -> Result<()> {
    reject("endpoint", args.endpoint.is_some())?;
    reject("deployment", args.deployment.is_some())?;
    reject("api-version", args.api_version.is_some())
}

fn reject_penalties(reject: &impl Fn(&str, bool) -> Result<()>, args: &ConfigArgs) -> Result<()> {
    reject("frequency-penalty", args.frequency_penalty.is_some())?;
    reject("presence-penalty", args.presence_penalty.is_some())
}

fn set(field: &mut String, value: Option<String>) {
    if let Some(v) = value {
        *field = v.trim().to_string();
    }
}

fn set_opt<T>(field: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *field = value;
    }
}
