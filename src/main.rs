use severity_predict::form::{self, FormKind, FormSchema};
use severity_predict::input::{self, LoadedModel, SourceFlags};
use severity_predict::mlflow::MlflowClient;
use severity_predict::predictor::{self, OutputFormat};
use severity_predict::utils::{HttpConfig, Prediction};

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "severity-predict",
    about = "Predict cancer severity from a patient form with a trained classifier",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// HTTP timeout in seconds for remote and MLflow sources
    #[arg(long, env = "SEVERITY_HTTP_TIMEOUT", default_value_t = 30, global = true)]
    timeout_secs: u64,
}

#[derive(clap::Args, Debug, Clone)]
struct SourceArgs {
    /// Path to a local model card
    #[arg(long)]
    model: Option<PathBuf>,
    /// URL to download the model card from
    #[arg(long, env = "SEVERITY_MODEL_URL")]
    url: Option<String>,
    /// Git repository URL holding the model card
    #[arg(long)]
    git: Option<String>,
    /// Path of the model card within the git repo (required when using --git)
    #[arg(long, value_name = "RELATIVE_PATH")]
    git_path: Option<PathBuf>,
    /// MLflow tracking server URI
    #[arg(long, env = "MLFLOW_TRACKING_URI")]
    mlflow_uri: Option<String>,
    /// MLflow experiment name (first experiment when omitted)
    #[arg(long)]
    experiment: Option<String>,
    /// MLflow run id (most recent run when omitted)
    #[arg(long)]
    run_id: Option<String>,
    /// MLflow model URI, e.g. runs:/<run_id>/model
    #[arg(long)]
    model_uri: Option<String>,
    /// Artifact path of the model card inside the run
    #[arg(long)]
    artifact_path: Option<String>,
    /// Read the model card from stdin
    #[arg(long, default_value_t = false)]
    upload: bool,
}

impl From<SourceArgs> for SourceFlags {
    fn from(a: SourceArgs) -> Self {
        SourceFlags {
            model: a.model,
            url: a.url,
            git: a.git,
            git_path: a.git_path,
            mlflow_uri: a.mlflow_uri,
            experiment: a.experiment,
            run_id: a.run_id,
            model_uri: a.model_uri,
            artifact_path: a.artifact_path,
            upload: a.upload,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Collect one patient form and predict its severity
    Predict {
        #[command(flatten)]
        source: SourceArgs,
        /// Form to collect: basic, regional or clinical
        #[arg(long, default_value = "regional")]
        form: FormKind,
        /// Field answer as NAME=VALUE (repeatable)
        #[arg(long = "field", value_name = "NAME=VALUE")]
        fields: Vec<String>,
        /// JSON file of field answers
        #[arg(long)]
        answers: Option<PathBuf>,
        /// Prompt for every field on stdin
        #[arg(long, default_value_t = false)]
        interactive: bool,
        /// Drop the first level of each one-hot expanded field
        #[arg(long, default_value_t = false)]
        drop_first: bool,
        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Load a model once, then predict for each form entered on stdin until EOF
    Session {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value = "regional")]
        form: FormKind,
        #[arg(long, default_value_t = false)]
        drop_first: bool,
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Show a model's name, estimator, classes and expected columns
    Inspect {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Show the fields of a form
    Schema {
        #[arg(long, default_value = "regional")]
        form: FormKind,
    },
    /// List experiments on an MLflow tracking server
    Experiments {
        #[arg(long, env = "MLFLOW_TRACKING_URI")]
        mlflow_uri: String,
    },
    /// List runs of an MLflow experiment, most recent first
    Runs {
        #[arg(long, env = "MLFLOW_TRACKING_URI")]
        mlflow_uri: String,
        /// Experiment name (first experiment when omitted)
        #[arg(long)]
        experiment: Option<String>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // RUST_LOG wins over -v when set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn load(source: SourceArgs, http: &HttpConfig) -> Result<LoadedModel> {
    let source = input::select_source(&source.into())?;
    info!(source = %source.describe(), "resolving model");
    input::resolve_model(&source, http)
}

struct PredictRequest {
    schema: FormSchema,
    fields: Vec<String>,
    answers: Option<PathBuf>,
    interactive: bool,
    drop_first: bool,
}

/// Load the model and answer one form. Every failure lands in the result so it
/// can be presented; `origin` is set once the model has loaded.
fn predict_once(
    source: SourceArgs,
    request: &PredictRequest,
    http: &HttpConfig,
    origin: &mut String,
) -> Result<Prediction> {
    if request.interactive && source.upload {
        return Err(anyhow!("--interactive cannot be combined with --upload; both read stdin"));
    }
    let loaded = load(source, http)?;
    origin.clone_from(&loaded.origin);

    let mut collected = match &request.answers {
        Some(path) => form::load_answers(path)?,
        None => Vec::new(),
    };
    collected.extend(form::parse_field_args(&request.fields)?);
    if request.interactive {
        let stdin = io::stdin();
        let mut reader = stdin.lock();
        if let Some(prompted) = request.schema.prompt(&mut reader, &mut io::stderr())? {
            collected.extend(prompted);
        }
    }

    let record = request.schema.collect(&collected)?;
    predictor::predict_record(&loaded.model, &record, request.drop_first)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let http = HttpConfig {
        timeout: Duration::from_secs(args.timeout_secs),
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Commands::Predict {
            source,
            form,
            fields,
            answers,
            interactive,
            drop_first,
            format,
        } => {
            info!(%form, fields = fields.len(), interactive, drop_first, %format, "starting predict");
            let mut origin = String::from("unresolved");
            let request = PredictRequest {
                schema: FormSchema::new(form),
                fields,
                answers,
                interactive,
                drop_first,
            };
            let outcome = predict_once(source, &request, &http, &mut origin);
            if !predictor::present(&outcome, &origin, format, &mut out)? {
                out.flush()?;
                std::process::exit(1);
            }
        }
        Commands::Session {
            source,
            form,
            drop_first,
            format,
        } => {
            if source.upload {
                return Err(anyhow!("session reads forms from stdin; load the model with another source"));
            }
            let loaded = load(source, &http)?;
            let schema = FormSchema::new(form);
            let stdin = io::stdin();
            let mut reader = stdin.lock();
            let mut submissions = 0usize;
            let mut failures = 0usize;

            while let Some(answers) = schema.prompt(&mut reader, &mut io::stderr())? {
                submissions += 1;
                let outcome = schema
                    .collect(&answers)
                    .map_err(anyhow::Error::from)
                    .and_then(|record| predictor::predict_record(&loaded.model, &record, drop_first));
                if !predictor::present(&outcome, &loaded.origin, format, &mut out)? {
                    failures += 1;
                }
                out.flush()?;
            }
            info!(submissions, failures, "session finished");
        }
        Commands::Inspect { source } => {
            let loaded = load(source, &http)?;
            let model = &loaded.model;
            writeln!(out, "Model:    {}", model.name())?;
            writeln!(out, "Origin:   {}", loaded.origin)?;
            writeln!(out, "Kind:     {}", model.kind())?;
            writeln!(out, "Classes:  {}", model.classes().join(", "))?;
            match model.feature_names() {
                Ok(names) => {
                    writeln!(out, "Columns:  {}", names.len())?;
                    for name in names {
                        writeln!(out, "  {name}")?;
                    }
                }
                Err(err) => writeln!(out, "Columns:  unavailable ({err})")?,
            }
        }
        Commands::Schema { form } => {
            let schema = FormSchema::new(form);
            writeln!(out, "{} ({})", schema.title, schema.kind)?;
            for field in &schema.fields {
                writeln!(
                    out,
                    "  {:<20} {:<48} default {}",
                    field.name,
                    field.hint(),
                    field.default_text()
                )?;
            }
        }
        Commands::Experiments { mlflow_uri } => {
            let client = MlflowClient::new(&mlflow_uri, &http)?;
            let experiments = client.search_experiments()?;
            if experiments.is_empty() {
                writeln!(out, "No experiments found.")?;
            }
            for e in experiments {
                writeln!(out, "{:<12} {}", e.experiment_id, e.name)?;
            }
        }
        Commands::Runs {
            mlflow_uri,
            experiment,
        } => {
            let client = MlflowClient::new(&mlflow_uri, &http)?;
            let experiment = client.select_experiment(experiment.as_deref())?;
            let runs = client.search_runs(&experiment.experiment_id)?;
            if runs.is_empty() {
                writeln!(out, "No runs available in experiment {}.", experiment.name)?;
            }
            for run in runs {
                writeln!(
                    out,
                    "{:<34} {:<10} {:<16} {}",
                    run.run_id,
                    run.status.as_deref().unwrap_or("-"),
                    run.start_time.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
                    run.run_name.as_deref().unwrap_or("")
                )?;
            }
        }
    }

    Ok(())
}
