//! Demo CLI: build a small signup-form schema, apply `--set field=value`
//! overrides, run `validateAll`, and print the resulting validation summary.
//!
//! Grounded in the retrieval pack's CLI style (`kimberlite-cli`/`chem-cli`:
//! `clap` derive, `anyhow` at the binary boundary,
//! `reactive_model::telemetry::init_tracing` for the `fmt` layer). This
//! binary is demo scaffolding exercising `reactive_model::config` and
//! `reactive_model::rules` end to end — it is not part of the engine itself.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use reactive_model::{FieldSchema, ModelCoordinator, ModelOptions, Reaction, Schema, Value, ValueKind};

#[derive(Parser)]
#[command(name = "reactive-model", about = "Run the demo signup-form schema through the reactive model engine")]
struct Cli {
    /// Path to a TOML or JSON ModelOptions file. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Field overrides as `field=value`, applied in order via `setFields`.
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    sets: Vec<String>,
}

fn demo_schema() -> Schema {
    let display_name = Reaction::new(vec!["first_name".into(), "last_name".into()], |deps| {
        let first = deps.get("first_name").and_then(|v| v.clone()).and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
        let last = deps.get("last_name").and_then(|v| v.clone()).and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
        Value::String(format!("{first} {last}").trim().to_string())
    });

    Schema::builder()
        .field("first_name", FieldSchema::new(ValueKind::String).validator(reactive_model::rules::required()))
        .field("last_name", FieldSchema::new(ValueKind::String).validator(reactive_model::rules::required()))
        .field("display_name", FieldSchema::new(ValueKind::String).reaction(display_name))
        .field(
            "email",
            FieldSchema::new(ValueKind::String)
                .validator(reactive_model::rules::required())
                .validator(reactive_model::rules::email()),
        )
        .field(
            "age",
            FieldSchema::new(ValueKind::Number)
                .validator(reactive_model::rules::number())
                .validator(reactive_model::rules::min(13.0)),
        )
        .field(
            "confirm_email",
            FieldSchema::new(ValueKind::String).validator(reactive_model::rules::same_as("email")),
        )
        .build()
        .expect("demo schema has no undeclared reaction dependencies")
}

fn parse_override(raw: &str) -> Result<(String, Value)> {
    let Some((field, raw_value)) = raw.split_once('=') else {
        bail!("expected FIELD=VALUE, got {raw:?}");
    };
    let value = match raw_value.parse::<f64>() {
        Ok(n) => Value::Number(n),
        Err(_) => Value::String(raw_value.to_string()),
    };
    Ok((field.to_string(), value))
}

async fn run(cli: Cli) -> Result<()> {
    let options = match &cli.config {
        Some(path) if path.extension().is_some_and(|ext| ext == "json") => {
            ModelOptions::from_json_file(path).with_context(|| format!("loading {}", path.display()))?
        }
        Some(path) => ModelOptions::from_toml_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => ModelOptions::default(),
    };

    let model = ModelCoordinator::new(demo_schema(), options);

    let overrides = cli.sets.iter().map(|raw| parse_override(raw)).collect::<Result<Vec<_>>>()?;
    let results = model.set_fields(overrides).await;
    model.settled().await;

    let is_valid = model.validate_all().await;
    let errors = model.get_validation_errors();

    let set_results: std::collections::BTreeMap<_, _> = results.iter().map(|(k, v)| (k.clone(), *v)).collect();
    tracing::info!(?set_results, "field overrides applied");
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "isValid": is_valid,
        "setResults": set_results,
        "displayName": model.get_field("display_name"),
        "validationSummary": model.get_validation_summary(),
        "errors": errors
            .errors
            .iter()
            .map(|(field, records)| (field.clone(), records.iter().map(|r| r.message.clone()).collect::<Vec<_>>()))
            .collect::<std::collections::BTreeMap<_, _>>(),
    }))?);

    Ok(())
}

fn main() -> Result<()> {
    reactive_model::telemetry::init_tracing();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(cli))
}
