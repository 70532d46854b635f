use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use flow_core::Clock;
use flow_core::model::FieldMap;
use storage::repository::Storage;
use storage::seed::{SeedBundle, install_bundle};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    file: Option<PathBuf>,
    slug: String,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("FLOW_DB_URL").unwrap_or_else(|_| "sqlite:dev.sqlite3?mode=rwc".into());
        let mut slug =
            std::env::var("FLOW_FORM_SLUG").unwrap_or_else(|_| "demo-health-survey".into());
        let mut file: Option<PathBuf> = None;
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--file" => {
                    let value = require_value(&mut args, "--file")?;
                    file = Some(PathBuf::from(value));
                }
                "--slug" => {
                    slug = require_value(&mut args, "--slug")?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            file,
            slug,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:dev.sqlite3?mode=rwc)");
    eprintln!("  --file <path>             Seed bundle JSON (default: built-in demo form)");
    eprintln!("  --slug <slug>             Form slug to verify after seeding");
    eprintln!("                            (default: demo-health-survey)");
    eprintln!("  --now <rfc3339>           Fixed time for the sample draft response");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  FLOW_DB_URL, FLOW_FORM_SLUG, RUST_LOG");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let bundle = match &args.file {
        Some(path) => SeedBundle::from_json(&std::fs::read_to_string(path)?)?,
        None => SeedBundle::demo()?,
    };

    let clock = args.now.map_or_else(Clock::default, Clock::fixed);
    let storage = Storage::sqlite(&args.db_url, clock).await?;
    let installed = install_bundle(storage.forms.as_ref(), bundle).await?;

    let form = storage
        .forms
        .published_form_by_slug(&args.slug)
        .await?
        .ok_or_else(|| format!("no published form with slug {}", args.slug))?;
    let version_id = form
        .active_version_id
        .clone()
        .ok_or_else(|| format!("form {} has no active version", form.slug))?;
    let catalog = storage.forms.load_version(&version_id).await?.into_catalog();

    let mut utm = FieldMap::new();
    utm.insert("utm_source".into(), "seed".into());
    let response = storage
        .responses
        .create_response(&version_id, "seed", Some(utm), clock.now())
        .await?;

    tracing::info!(
        form = %form.slug,
        version = %version_id,
        questions = catalog.len(),
        rules = catalog.rules().len(),
        response = %response.id,
        "Seed complete"
    );
    println!(
        "Seeded {installed} form version(s) into {}; sample draft response {} for {}",
        args.db_url, response.id, form.slug
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
