use std::{env, fs};

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use insideai::assistant::{AssistantApi, AssistantTool, AssistantUpdate, OpenAiAssistant};
use insideai::config::AppConfig;
use insideai::utils::text::take_chars;

const USAGE: &str =
    "Usage: assistant_admin update <instructions-file> [--name NAME] [--model MODEL]";
const DEFAULT_NAME: &str = "Coach Ella (InsideAI)";
const DEFAULT_MODEL: &str = "gpt-4-turbo-preview";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("update") => update_assistant(args.collect()).await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn update_assistant(args: Vec<String>) -> Result<()> {
    let mut instructions_path = None;
    let mut name = DEFAULT_NAME.to_string();
    let mut model = DEFAULT_MODEL.to_string();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--name" => name = iter.next().context("--name needs a value")?,
            "--model" => model = iter.next().context("--model needs a value")?,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
            _ if instructions_path.is_none() => instructions_path = Some(arg),
            _ => bail!("unexpected argument {arg}\n{USAGE}"),
        }
    }
    let instructions_path = instructions_path.context(USAGE)?;

    let instructions = fs::read_to_string(&instructions_path)
        .with_context(|| format!("failed to read instructions from {instructions_path}"))?;

    let config = AppConfig::from_env()?;
    let client = OpenAiAssistant::from_config(&config)?;
    tracing::info!(
        component = "assistant_admin",
        assistant_id = %config.chat_assistant_id,
        %name,
        %model,
        "updating assistant"
    );

    let update = AssistantUpdate {
        instructions,
        name,
        model,
        tools: vec![AssistantTool::CodeInterpreter, AssistantTool::FileSearch],
    };
    let summary = client
        .update_assistant(&config.chat_assistant_id, &update)
        .await
        .context("assistant update failed")?;

    println!("Assistant {} updated.", summary.id);
    println!("Name: {}", summary.name.as_deref().unwrap_or("-"));
    println!("Model: {}", summary.model);
    if let Some(instructions) = summary.instructions.as_deref() {
        println!("Instructions: {}...", take_chars(instructions, 100));
    }
    Ok(())
}
