//! Command-line front end: compiles a request file against a schema file.
#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use gqlcypher::error::TranslateErrorWithCode;
use gqlcypher::query::Value;
use gqlcypher::{AuthContext, Schema, Translation, Translator, TranslatorConfig};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "gqlcypher",
    version,
    about = "Compiles graph-query request trees into parameterized Cypher",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "GQLCYPHER_CONFIG",
        help = "Translator config (TOML); defaults to the user config directory"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile one request.
    Translate(TranslateCmd),
    /// Validate a schema definition.
    CheckSchema(SchemaArgs),
}

#[derive(Args, Debug)]
struct SchemaArgs {
    #[arg(long, value_name = "FILE", help = "Schema definition (.json or .toml)")]
    schema: PathBuf,
}

#[derive(Args, Debug)]
struct TranslateCmd {
    #[command(flatten)]
    schema: SchemaArgs,

    #[arg(long, value_name = "FILE", help = "Request tree (JSON); '-' reads stdin")]
    request: PathBuf,

    #[arg(long, value_name = "FILE", help = "Caller claims (JSON object)")]
    claims: Option<PathBuf>,

    #[arg(long, help = "Treat the caller as authenticated")]
    authenticated: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_writer(io::stderr).try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::CheckSchema(args) => {
            let schema = load_schema(&args.schema)?;
            let relationships: usize = schema.entities().iter().map(|e| e.relationships.len()).sum();
            match cli.format {
                OutputFormat::Json => {
                    let report = serde_json::json!({
                        "ok": true,
                        "entities": schema.entities().len(),
                        "relationships": relationships,
                    });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                OutputFormat::Text => println!(
                    "Schema OK: {} entities, {} relationships",
                    schema.entities().len(),
                    relationships
                ),
            }
        }
        Command::Translate(cmd) => {
            let config = TranslatorConfig::load(cli.config)?;
            let schema = load_schema(&cmd.schema.schema)?;
            let auth = load_auth(cmd.claims.as_deref(), cmd.authenticated)?;
            let request = read_input(&cmd.request)?;
            let translator = Translator::with_config(Arc::new(schema), config);
            let translation = translator
                .translate_json(&request, &auth)
                .map_err(|err| TranslateErrorWithCode(&err).to_string())?;
            emit(cli.format, &translation)?;
        }
    }
    Ok(())
}

fn load_schema(path: &Path) -> Result<Schema, Box<dyn Error>> {
    let contents = fs::read_to_string(path).map_err(|err| format!("{}: {err}", path.display()))?;
    let schema = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Schema::from_toml_str(&contents)?,
        _ => Schema::from_json_str(&contents)?,
    };
    Ok(schema)
}

fn load_auth(claims: Option<&Path>, authenticated: bool) -> Result<AuthContext, Box<dyn Error>> {
    let claims: BTreeMap<String, Value> = match claims {
        Some(path) => serde_json::from_str(&read_input(path)?)?,
        None => BTreeMap::new(),
    };
    Ok(AuthContext { authenticated, claims })
}

fn read_input(path: &Path) -> Result<String, Box<dyn Error>> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    Ok(fs::read_to_string(path).map_err(|err| format!("{}: {err}", path.display()))?)
}

fn emit(format: OutputFormat, translation: &Translation) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "cypher": translation.cypher,
                "params": translation.params_json(),
                "fingerprint": format!("{:016x}", translation.fingerprint()),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            println!("{}", translation.cypher);
            println!();
            println!("Params:");
            println!("{}", serde_json::to_string_pretty(&translation.params_json())?);
        }
    }
    Ok(())
}
