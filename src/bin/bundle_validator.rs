use clap::{Parser, Subcommand};
use fhir_bundle_validator::*;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bundle-validator")]
#[command(
    about = "Validate FHIR JSON bundles against grammar, business rules and integrity checks"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a bundle
    Validate {
        /// Path to the bundle JSON file
        #[arg(short, long)]
        bundle: PathBuf,
        /// Path to a rule-set JSON file
        #[arg(short, long)]
        rules: Option<PathBuf>,
        /// Path to a code-catalog JSON file
        #[arg(short, long)]
        catalog: Option<PathBuf>,
        /// FHIR version (R4, R5, 4.0.1, 5.0.0)
        #[arg(short, long, default_value = "R4")]
        version: String,
        /// Validation mode (standard, full)
        #[arg(short, long, default_value = "standard")]
        mode: String,
        /// Path to a validator config JSON file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Dump the enum/binding index of a FHIR version
    Enums {
        #[arg(short, long, default_value = "R4")]
        version: String,
        /// Only show entries of this resource type
        #[arg(short, long)]
        resource_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate {
            bundle,
            rules,
            catalog,
            version,
            mode,
            config,
            format,
        } => {
            let valid = validate(
                &bundle,
                rules.as_deref(),
                catalog.as_deref(),
                &version,
                &mode,
                config.as_deref(),
                &format,
            )
            .await?;
            if !valid {
                std::process::exit(1);
            }
        }
        Commands::Enums {
            version,
            resource_type,
        } => {
            show_enums(&version, resource_type.as_deref())?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn validate(
    bundle_path: &Path,
    rules_path: Option<&Path>,
    catalog_path: Option<&Path>,
    version: &str,
    mode: &str,
    config_path: Option<&Path>,
    format: &str,
) -> std::result::Result<bool, Box<dyn std::error::Error>> {
    let read_optional = |path: Option<&Path>| -> std::io::Result<String> {
        path.map(std::fs::read_to_string)
            .transpose()
            .map(Option::unwrap_or_default)
    };

    let config = match config_path {
        Some(path) => ValidatorConfig::from_json_file(path)?,
        None => ValidatorConfig::default(),
    };
    let mode: ValidationMode = mode.parse()?;
    let request = ValidationRequest::new(std::fs::read_to_string(bundle_path)?, version)
        .with_rules(read_optional(rules_path)?)
        .with_catalog(read_optional(catalog_path)?)
        .with_mode(mode);

    let response = ValidationPipeline::new()
        .with_config(config)
        .validate(&request)
        .await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&response)?),
        _ => print_text(&response),
    }
    Ok(response.is_valid())
}

fn print_text(response: &ValidationResponse) {
    if response.errors.is_empty() {
        println!("✅ Bundle is valid");
        return;
    }

    println!(
        "{} {} findings ({} errors, {} warnings, {} info)\n",
        if response.is_valid() { "⚠️" } else { "❌" },
        response.counts.total,
        response.counts.severity(Severity::Error),
        response.counts.severity(Severity::Warning),
        response.counts.severity(Severity::Info),
    );
    for error in &response.errors {
        let entry = error
            .entry_index
            .map(|i| format!("entry[{i}] "))
            .unwrap_or_default();
        println!(
            "  {} [{}/{}] {}{}: {}",
            match error.severity {
                Severity::Error => "ERROR",
                Severity::Warning => "WARN",
                Severity::Info => "INFO",
            },
            error.source,
            error.error_code,
            entry,
            error.path,
            error.message
        );
        if let Some(pointer) = &error.json_pointer {
            println!("    at: {pointer}");
        }
        if let Some(reason) = &error.downgrade_reason {
            println!("    note: {reason}");
        }
    }
    if response.truncated {
        println!("\n  ... output truncated by maxErrors");
    }
}

fn show_enums(
    version: &str,
    resource_type: Option<&str>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let version: FhirVersion = version.parse()?;
    let index = SchemaRegistry::global().enum_index(version)?;

    println!("Enum bindings for FHIR {version}:");
    println!("==============================");
    for (rt, path, binding) in index.iter() {
        if resource_type.is_some_and(|filter| filter != rt) {
            continue;
        }
        println!(
            "  {rt}.{path} ({}): {}",
            binding.strength.as_str(),
            binding.allowed.join(", ")
        );
    }
    Ok(())
}
