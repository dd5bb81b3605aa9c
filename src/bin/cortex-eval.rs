use clap::{command, Parser};
use cortex_expressions::{
    config, AccessContext, EngineConfig, Error, ExpressionEngine, InternalResult, Value,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Evaluate a JSON expression", long_about = None)]
struct Cli {
    /// Expression literal, or a path to a JSON file holding one
    expression: String,

    /// Document bound to $$ROOT
    #[arg(short, long)]
    document: Option<PathBuf>,

    /// Access context (org, principal, req, script, locale)
    #[arg(long)]
    context: Option<PathBuf>,

    /// Host variables, a JSON object
    #[arg(long)]
    vars: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Pretty-print the result
    #[arg(short, long)]
    pretty: bool,
}

fn read_json(path: &Path) -> InternalResult<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Internal(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&content)?)
}

fn read_optional(path: &Option<PathBuf>) -> InternalResult<serde_json::Value> {
    path.as_deref()
        .map(read_json)
        .unwrap_or(Ok(serde_json::Value::Null))
}

async fn run(cli: &Cli) -> InternalResult<serde_json::Value> {
    let config: EngineConfig = if cli.config.exists() {
        config::from_file(&cli.config)?
    } else {
        EngineConfig::default()
    };
    info!("config loaded.");
    debug!("config: {:?}", config);

    let literal = if Path::new(&cli.expression).is_file() {
        read_json(Path::new(&cli.expression))?
    } else {
        serde_json::from_str(&cli.expression)?
    };
    let document = Value::from(read_optional(&cli.document)?);
    let ac: AccessContext = match read_optional(&cli.context)? {
        serde_json::Value::Null => AccessContext::default(),
        json => serde_json::from_value(json)?,
    };
    let vars = match Value::from(read_optional(&cli.vars)?) {
        Value::Object(vars) => vars,
        Value::Null => Default::default(),
        other => {
            return Err(Error::Internal(format!(
                "--vars must hold an object, got {}",
                other.type_name()
            )))
        }
    };

    let engine = ExpressionEngine::from_config(config);
    let root = engine.parse(&literal)?;
    debug!(
        "parsed expression, registered: {:?}",
        root.registered_variables().collect::<Vec<_>>()
    );
    let value = match engine.evaluate(&root, ac, document, vars).await? {
        Value::Cursor(cursor) => Value::Array(cursor.to_array(None).await?),
        other => other,
    };
    engine.shutdown().await;
    Ok(value.to_json())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(value) => {
            let rendered = if cli.pretty {
                serde_json::to_string_pretty(&value)
            } else {
                serde_json::to_string(&value)
            };
            match rendered {
                Ok(out) => println!("{}", out),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(Error::Fault(fault)) => {
            eprintln!("{}", fault.to_json());
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
