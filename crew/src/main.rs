//! Customer-support crew CLI.
//!
//! Resolves an inquiry through three agent stages (support, QA, final review)
//! and prints the final answer on stdout. Diagnostics go to stderr.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crew::core::types::InputBindings;
use crew::exit_codes;
use crew::io::config::{CrewConfig, DEFAULT_CONFIG_PATH, env_credential, load_config, write_config};
use crew::io::transcript::write_transcript;
use crew::logging;
use crew::pipeline::{Pipeline, PipelineError};
use crew::reasoning::AgentReasoner;
use crew::reasoning::openai::OpenAiChatModel;
use crew::support::{DEFAULT_CUSTOMER, DEFAULT_PERSON, SupportTools, support_crew};
use crew::tools::{ScrapeWebsiteTool, SerperSearchTool};

#[derive(Parser)]
#[command(
    name = "crew",
    version,
    about = "Resolve customer-support inquiries with a sequential agent crew"
)]
struct Cli {
    /// Config file (TOML). Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log stage progress to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Check config and resolve every template for the given bindings. No network.
    Validate(BindingArgs),
    /// Run the crew and print the final answer.
    Run(BindingArgs),
}

#[derive(Args, Debug, Clone)]
struct BindingArgs {
    #[arg(long, default_value = DEFAULT_CUSTOMER)]
    customer: String,

    #[arg(long, default_value = DEFAULT_PERSON)]
    person: String,

    /// The customer's question. `run` reads one line from stdin when omitted.
    #[arg(long)]
    inquiry: Option<String>,

    /// Extra template binding, `KEY=VALUE`. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_binding)]
    set: Vec<(String, String)>,
}

impl BindingArgs {
    fn bindings(&self, inquiry: Option<&str>) -> InputBindings {
        let mut pairs = vec![
            ("customer".to_string(), self.customer.clone()),
            ("person".to_string(), self.person.clone()),
        ];
        if let Some(inquiry) = inquiry {
            pairs.push(("inquiry".to_string(), inquiry.to_string()));
        }
        pairs.extend(self.set.iter().cloned());
        pairs.into_iter().collect()
    }
}

fn parse_binding(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    let valid = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(format!("`{key}` is not a valid binding name"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match dispatch(cli).await {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Validate(args) => cmd_validate(&cli.config, &args),
        Command::Run(args) => cmd_run(&cli.config, &args).await,
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::Failed { .. }) => exit_codes::FAILED,
        Some(PipelineError::Cancelled { .. }) => exit_codes::CANCELLED,
        _ => exit_codes::INVALID,
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    write_config(path, &CrewConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_validate(config_path: &Path, args: &BindingArgs) -> Result<()> {
    let cfg = load_config(config_path)?;
    let api_key = env_credential(&cfg.model.api_key_env).unwrap_or_default();
    let pipeline = build_crew(&cfg, api_key)?;
    let bindings = args.bindings(args.inquiry.as_deref());
    pipeline.validate(&bindings)?;

    let keys: Vec<String> = pipeline.required_bindings().into_iter().collect();
    println!(
        "ok: {} stages, bindings: {}",
        pipeline.tasks().len(),
        keys.join(", ")
    );
    Ok(())
}

async fn cmd_run(config_path: &Path, args: &BindingArgs) -> Result<()> {
    let cfg = load_config(config_path)?;
    let api_key = env_credential(&cfg.model.api_key_env)
        .ok_or_else(|| anyhow!("{} is not set", cfg.model.api_key_env))?;

    let inquiry = match &args.inquiry {
        Some(inquiry) => inquiry.trim().to_string(),
        None => read_inquiry().context("read inquiry from stdin")?,
    };
    if inquiry.is_empty() {
        bail!("inquiry must not be empty");
    }
    let bindings = args.bindings(Some(&inquiry));
    let pipeline = build_crew(&cfg, api_key)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling at the next boundary");
            on_signal.cancel();
        }
    });

    let report = pipeline
        .execute_with(&bindings, &cancel, |record| {
            info!(stage = record.index + 1, role = %record.role, "stage done");
        })
        .await?;

    if let Some(dir) = &cfg.transcript.dir {
        let paths = write_transcript(dir, &bindings, &report)?;
        info!(dir = %paths.dir.display(), "transcript written");
    }
    println!("{}", report.output);
    Ok(())
}

fn read_inquiry() -> Result<String> {
    eprint!("Enter inquiry: ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn build_crew(cfg: &CrewConfig, api_key: String) -> Result<Pipeline> {
    let docs_scope = cfg.docs_scope()?;
    let model = OpenAiChatModel::new(
        &cfg.model.api_base,
        api_key,
        &cfg.model.model,
        cfg.request_timeout(),
    )
    .context("build model client")?
    .with_temperature(cfg.model.temperature);
    let reasoner = AgentReasoner::new(Arc::new(model), cfg.reasoning_limits());

    let search_key = env_credential(&cfg.tools.search_api_key_env);
    if search_key.is_none() {
        warn!(
            var = %cfg.tools.search_api_key_env,
            "search api key not set; searches will fail and answers fall back to unsourced text"
        );
    }
    let search = SerperSearchTool::new(&cfg.tools.search_api_base, search_key)
        .context("build search client")?
        .with_results_per_query(cfg.tools.results_per_query)
        .with_scope(docs_scope.clone());
    let tools = SupportTools {
        search: Arc::new(search),
        scrape: Arc::new(ScrapeWebsiteTool::new().context("build page client")?),
    };
    Ok(support_crew(tools, Arc::new(reasoner), docs_scope)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew::reasoning::ReasoningError;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["crew", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn parse_run_with_bindings() {
        let cli = Cli::parse_from([
            "crew",
            "run",
            "--customer",
            "Acme",
            "--inquiry",
            "How?",
            "--set",
            "tier=gold",
            "--verbose",
        ]);
        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let bindings = args.bindings(args.inquiry.as_deref());
        assert_eq!(bindings.get("customer"), Some("Acme"));
        assert_eq!(bindings.get("person"), Some(DEFAULT_PERSON));
        assert_eq!(bindings.get("inquiry"), Some("How?"));
        assert_eq!(bindings.get("tier"), Some("gold"));
    }

    #[test]
    fn parse_binding_rejects_bad_input() {
        assert_eq!(
            parse_binding("plan=pro=max"),
            Ok(("plan".to_string(), "pro=max".to_string()))
        );
        assert!(parse_binding("no-equals").is_err());
        assert!(parse_binding("1bad=x").is_err());
    }

    #[test]
    fn pipeline_errors_map_to_exit_codes() {
        let failed = anyhow::Error::new(PipelineError::Failed {
            index: 1,
            role: "QA".to_string(),
            cause: ReasoningError::EmptyAnswer,
        });
        assert_eq!(exit_code_for(&failed), exit_codes::FAILED);

        let cancelled = anyhow::Error::new(PipelineError::Cancelled { index: 0 });
        assert_eq!(exit_code_for(&cancelled), exit_codes::CANCELLED);

        assert_eq!(exit_code_for(&anyhow!("bad config")), exit_codes::INVALID);
    }
}
