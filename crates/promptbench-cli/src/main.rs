use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use promptbench_cli::chat::{run_chat, ChatInvocation};
use promptbench_cli::config::{config_dir, load_registry, providers_config_path, ProviderRegistry};
use promptbench_cli::logging::init_tracing;
use promptbench_llm::{
    map_reasoning_parameters, ModelParameters, ProviderKind, ReasoningConfig, ReasoningEffort,
};

#[derive(Parser, Debug)]
#[command(
    name = "promptbench",
    version,
    about = "Stream chat completions from any configured provider"
)]
struct Cli {
    #[arg(long, global = true)]
    conf_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: RootCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum RootCommand {
    /// Send one prompt and stream the answer.
    Chat(ChatArgs),
    /// Print the request fields a reasoning effort maps to.
    Reasoning(ReasoningArgs),
    /// List configured providers.
    Providers,
}

#[derive(Args, Debug, Clone)]
struct ChatArgs {
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: String,
    #[arg(long, value_parser = parse_effort)]
    effort: Option<ReasoningEffort>,
    #[arg(long)]
    system: Option<String>,
    #[arg(long = "file")]
    files: Vec<PathBuf>,
    #[arg(long)]
    temperature: Option<f64>,
    #[arg(long)]
    top_p: Option<f64>,
    #[arg(long)]
    max_tokens: Option<u32>,
    #[arg(long, conflicts_with = "json_object")]
    json_schema: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    json_object: bool,
    #[arg(long, default_value_t = false)]
    hide_reasoning: bool,
    #[arg(long, default_value_t = false)]
    no_reattach: bool,
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct ReasoningArgs {
    #[arg(long, value_parser = parse_kind)]
    kind: ProviderKind,
    #[arg(long)]
    model: String,
    #[arg(long, value_parser = parse_effort)]
    effort: ReasoningEffort,
}

fn parse_effort(value: &str) -> Result<ReasoningEffort, String> {
    ReasoningEffort::parse(value)
        .ok_or_else(|| format!("unknown effort '{value}', expected none|low|medium|high|default"))
}

fn parse_kind(value: &str) -> Result<ProviderKind, String> {
    ProviderKind::parse(value).ok_or_else(|| {
        format!(
            "unknown provider kind '{value}', expected openai-compatible|anthropic|gemini|openrouter|custom-gateway"
        )
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let home = config_dir(cli.conf_dir.as_deref());
    let result = match load_registry(&home) {
        Ok(registry) => {
            init_tracing(&registry.log_level);
            run(cli.command, &registry, &home).await
        }
        Err(error) => Err(error.to_string()),
    };

    if let Err(error) = result {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run(
    command: RootCommand,
    registry: &ProviderRegistry,
    home: &std::path::Path,
) -> Result<(), String> {
    match command {
        RootCommand::Chat(args) => {
            let provider = registry
                .select(args.provider.as_deref())
                .map_err(|error| error.to_string())?;
            run_chat(provider, chat_invocation(args)).await
        }
        RootCommand::Reasoning(args) => {
            let fragment = map_reasoning_parameters(
                args.kind,
                &args.model,
                &ReasoningConfig::with_effort(args.effort),
            );
            let rendered = serde_json::to_string_pretty(&fragment)
                .map_err(|error| format!("render reasoning fragment failed: {error}"))?;
            println!("{rendered}");
            Ok(())
        }
        RootCommand::Providers => {
            println!("# {}", providers_config_path(home).display());
            for entry in registry.providers.values() {
                let marker = if registry.default_provider.as_deref() == Some(entry.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {:<16} {:<18} {:<48} {}",
                    entry.name,
                    entry.kind.as_str(),
                    entry.base_url,
                    entry.key_source()
                );
            }
            Ok(())
        }
    }
}

fn chat_invocation(args: ChatArgs) -> ChatInvocation {
    ChatInvocation {
        model: args.model,
        prompt: args.prompt.join(" "),
        system: args.system,
        files: args.files,
        effort: args.effort,
        parameters: ModelParameters {
            temperature: args.temperature,
            top_p: args.top_p,
            max_tokens: args.max_tokens,
            ..ModelParameters::default()
        },
        json_schema: args.json_schema,
        json_object: args.json_object,
        hide_reasoning: args.hide_reasoning,
        no_reattach: args.no_reattach,
    }
}
