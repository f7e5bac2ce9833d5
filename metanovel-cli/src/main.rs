//! The `metanovel` binary: structured generation from the command line.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use metanovel::prelude::*;
use metanovel::resilience::extract;
use metanovel::templates::ScopedTemplateCache;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Project used when `--project` is not given.
const DEFAULT_PROJECT: &str = "default";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a schema-valid JSON value, falling back to a default
    Generate {
        /// Task name used in logs
        #[arg(long)]
        task: String,
        /// JSON Schema file the result must satisfy
        #[arg(long)]
        schema: PathBuf,
        /// JSON file with the value returned when generation fails
        #[arg(long)]
        default: PathBuf,
        /// Literal prompt text
        #[arg(long, conflicts_with = "template", required_unless_present = "template")]
        prompt: Option<String>,
        /// Key of a prompt template of the project
        #[arg(long)]
        template: Option<String>,
        /// Extra instructions merged into the template
        #[arg(long, requires = "template")]
        user_prompt: Option<String>,
        /// Template variable as key=value (repeatable)
        #[arg(long = "var", value_parser = parse_var, requires = "template")]
        vars: Vec<(String, String)>,
        /// Project whose templates are used
        #[arg(long, default_value = DEFAULT_PROJECT)]
        project: String,
    },
    /// Run the extraction pipeline on a saved reply, without any network call
    Extract {
        /// JSON Schema file the result must satisfy
        #[arg(long)]
        schema: PathBuf,
        /// File holding the raw reply (stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Print the merged prompt templates of a project
    Templates {
        /// Project name
        #[arg(long)]
        project: String,
    },
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the result.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    run(cli.command, Settings::from_env).await
}

/// Executes `command`; settings are loaded only by the subcommands that use them.
async fn run(
    command: Commands,
    load_settings: impl FnOnce() -> Result<Settings, metanovel::Error>,
) -> Result<()> {
    match command {
        Commands::Generate {
            task,
            schema,
            default,
            prompt,
            template,
            user_prompt,
            vars,
            project,
        } => {
            let settings = load_settings().context("Failed to load settings")?;
            let schema = SchemaDescriptor::new(read_json(&schema)?)?;
            let default = read_json(&default)?;
            let prompt = match (prompt, template) {
                (Some(text), _) => PromptSource::Text(text),
                (None, Some(key)) => PromptSource::Template {
                    key,
                    user_prompt: user_prompt.unwrap_or_default(),
                    vars: vars.into_iter().collect::<BTreeMap<_, _>>(),
                },
                (None, None) => bail!("either --prompt or --template is required"),
            };
            let project = Arc::new(ActiveProject::new(ProjectId::new(&project)?));
            let generator = Generator::from_settings(&settings, project)?
                .with_observer(Arc::new(|event: &ProgressEvent| eprintln!("{event}")));
            run_generate(&generator, &task, prompt, schema, default).await
        }
        Commands::Extract { schema, input } => run_extract(&schema, input.as_deref()),
        Commands::Templates { project } => {
            let settings = load_settings().context("Failed to load settings")?;
            let cache = ScopedTemplateCache::new(Arc::new(settings.template_source()));
            let templates = cache.resolve(&ProjectId::new(&project)?)?;
            println!("{}", serde_json::to_string_pretty(templates.as_ref())?);
            Ok(())
        }
    }
}

async fn run_generate(
    generator: &Generator,
    task: &str,
    prompt: PromptSource,
    schema: SchemaDescriptor,
    default: Value,
) -> Result<()> {
    let resolution = tokio::select! {
        resolution = generator.generate(task, prompt, schema, default) => resolution?,
        _ = tokio::signal::ctrl_c() => bail!("Cancelled"),
    };

    tracing::info!(
        transport_attempts = resolution.metrics.transport_attempts,
        recovery_attempts = resolution.metrics.recovery_attempts,
        wall_ms = u64::try_from(resolution.metrics.wall_time.as_millis()).unwrap_or(u64::MAX),
        "Generation finished"
    );
    println!("{}", serde_json::to_string_pretty(&resolution.value)?);
    Ok(())
}

fn run_extract(schema: &Path, input: Option<&Path>) -> Result<()> {
    let schema = SchemaDescriptor::new(read_json(schema)?)?;
    let raw = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    match extract(&raw, &schema) {
        Ok(extraction) => {
            for attempt in &extraction.attempts {
                eprintln!("{}", describe_attempt(attempt));
            }
            eprintln!("Extracted with strategy '{}'", extraction.strategy);
            println!("{}", serde_json::to_string_pretty(&extraction.value)?);
            Ok(())
        }
        Err(failure) => {
            for attempt in &failure.attempts {
                eprintln!("{}", describe_attempt(attempt));
            }
            bail!("No strategy produced a schema-valid value: {}", failure.reason())
        }
    }
}

fn describe_attempt(attempt: &metanovel::resilience::ExtractionAttempt) -> String {
    match &attempt.failure_reason {
        Some(reason) => format!("  {:<14} failed: {reason}", attempt.strategy.as_str()),
        None => format!("  {:<14} ok", attempt.strategy.as_str()),
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("genre=noir").unwrap(),
            ("genre".to_string(), "noir".to_string())
        );
        assert_eq!(
            parse_var("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_cli_requires_prompt_or_template() {
        let parsed = Cli::try_parse_from([
            "metanovel", "generate", "--task", "t", "--schema", "s.json", "--default", "d.json",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "metanovel", "generate", "--task", "t", "--schema", "s.json", "--default", "d.json",
            "--template", "theme", "--var", "genre=noir", "--var", "tone=bleak",
        ])
        .unwrap();
        match parsed.command {
            Commands::Generate { vars, project, .. } => {
                assert_eq!(vars.len(), 2);
                assert_eq!(project, DEFAULT_PROJECT);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_cli_rejects_prompt_with_template() {
        let parsed = Cli::try_parse_from([
            "metanovel", "generate", "--task", "t", "--schema", "s.json", "--default", "d.json",
            "--prompt", "hi", "--template", "theme",
        ]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_extract_runs_without_settings() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema.json");
        let input = dir.path().join("reply.txt");
        std::fs::write(&schema, r#"{"type": "object", "required": ["name"]}"#).unwrap();
        std::fs::write(&input, "Sure! {\"name\": \"Vera\"}").unwrap();

        let command = Commands::Extract {
            schema,
            input: Some(input),
        };
        run(command, || Err(metanovel::Error::Config("RETRY_DELAY is invalid".into())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_templates_reports_bad_settings() {
        let command = Commands::Templates {
            project: "noir".to_string(),
        };
        let err = run(command, || Err(metanovel::Error::Config("RETRY_DELAY is invalid".into())))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}
