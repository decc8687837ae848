use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use tracing::{info, warn};

use crate::mlflow::{MlflowClient, parse_runs_uri};
use crate::model::Model;
use crate::utils::{HttpConfig, MlflowSelection, ModelSource};

/// Source flags as given on the command line, before a source is chosen.
#[derive(Debug, Clone, Default)]
pub struct SourceFlags {
    pub model: Option<PathBuf>,
    pub url: Option<String>,
    pub git: Option<String>,
    pub git_path: Option<PathBuf>,
    pub mlflow_uri: Option<String>,
    pub experiment: Option<String>,
    pub run_id: Option<String>,
    pub model_uri: Option<String>,
    pub artifact_path: Option<String>,
    pub upload: bool,
}

/// A classifier together with where it came from.
#[derive(Debug)]
pub struct LoadedModel {
    pub model: Model,
    pub origin: String,
}

/// Pick one model source; upload, local file, URL, git and MLflow are tried in that order.
pub fn select_source(flags: &SourceFlags) -> Result<ModelSource> {
    if flags.upload {
        return Ok(ModelSource::Upload);
    }
    if let Some(path) = &flags.model {
        return Ok(ModelSource::Local { path: path.clone() });
    }
    if let Some(url) = &flags.url {
        return Ok(ModelSource::Remote { url: url.clone() });
    }
    if let Some(repo) = &flags.git {
        let path = flags
            .git_path
            .clone()
            .ok_or_else(|| anyhow!("--git-path is required when using --git"))?;
        return Ok(ModelSource::Git {
            repo: repo.clone(),
            path,
        });
    }
    if let Some(uri) = &flags.mlflow_uri {
        let (run_id, artifact_path) = match (&flags.model_uri, &flags.run_id) {
            (Some(_), Some(_)) => {
                return Err(anyhow!("pass either --model-uri or --run-id, not both"));
            }
            (Some(_), None) if flags.artifact_path.is_some() => {
                return Err(anyhow!(
                    "--artifact-path cannot be combined with --model-uri; the URI names the artifact"
                ));
            }
            (Some(model_uri), None) => {
                let (run, path) = parse_runs_uri(model_uri)?;
                (Some(run), path)
            }
            (None, run_id) => (
                run_id.clone(),
                flags
                    .artifact_path
                    .clone()
                    .unwrap_or_else(|| crate::utils::DEFAULT_ARTIFACT_PATH.to_string()),
            ),
        };
        return Ok(ModelSource::Mlflow(MlflowSelection {
            tracking_uri: uri.clone(),
            experiment: flags.experiment.clone(),
            run_id,
            artifact_path,
        }));
    }

    Err(anyhow!(
        "no model source provided; pass --model, --url, --git, --mlflow-uri, or --upload"
    ))
}

pub fn http_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .user_agent(concat!("severity-predict/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

pub fn fetch_url(url: &str, config: &HttpConfig) -> Result<Vec<u8>> {
    info!(url, "downloading model");
    let response = http_client(config)?
        .get(url)
        .send()
        .with_context(|| format!("failed to download model from {url}"))?;
    let status = response.status();
    if !status.is_success() {
        warn!(url, status = status.as_u16(), "model download rejected");
        return Err(anyhow!(
            "failed to download model; status code {}",
            status.as_u16()
        ));
    }
    let bytes = response
        .bytes()
        .with_context(|| format!("failed to read model body from {url}"))?;
    info!(url, bytes = bytes.len(), "downloaded model");
    Ok(bytes.to_vec())
}

/// Read an uploaded model from any reader (stdin in the binary).
pub fn read_upload<R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    reader
        .read_to_end(&mut buffer)
        .context("failed to read uploaded model")?;
    if buffer.is_empty() {
        return Err(anyhow!("uploaded model is empty"));
    }
    info!(bytes = buffer.len(), "loaded uploaded model");
    Ok(buffer)
}

fn clone_and_read(repo: &str, git_path: &Path) -> Result<Vec<u8>> {
    let tmpdir = tempfile::tempdir().context("failed to create temp dir for git clone")?;
    let repo_dir = tmpdir.path().join("repo");
    info!(repo, path = %git_path.display(), "cloning model repository");
    let mut fo = git2::FetchOptions::new();
    fo.download_tags(git2::AutotagOption::None);
    fo.update_fetchhead(true);
    let mut co = git2::build::RepoBuilder::new();
    co.fetch_options(fo);
    co.clone(repo, &repo_dir)
        .with_context(|| format!("failed to clone repo {repo}"))?;

    let target_path = repo_dir.join(git_path);
    if !target_path.exists() {
        warn!(path = %target_path.display(), "model path not found in repo");
        return Err(anyhow!("git path not found: {}", git_path.display()));
    }
    let bytes = std::fs::read(&target_path)
        .with_context(|| format!("failed to read {} from git repo", git_path.display()))?;
    info!(path = %git_path.display(), bytes = bytes.len(), "loaded model from git");
    Ok(bytes)
}

/// Fetch raw model bytes and the origin label for `source`.
pub fn load_model_bytes(source: &ModelSource, config: &HttpConfig) -> Result<(Vec<u8>, String)> {
    match source {
        ModelSource::Local { path } => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read model file at {}", path.display()))?;
            info!(path = %path.display(), bytes = bytes.len(), "loaded model file");
            Ok((bytes, source.describe()))
        }
        ModelSource::Remote { url } => Ok((fetch_url(url, config)?, source.describe())),
        ModelSource::Git { repo, path } => Ok((clone_and_read(repo, path)?, source.describe())),
        ModelSource::Mlflow(selection) => {
            let client = MlflowClient::new(&selection.tracking_uri, config)?;
            let (run_id, bytes) = client.fetch_model(selection)?;
            Ok((bytes, format!("mlflow:{run_id}")))
        }
        ModelSource::Upload => Ok((read_upload(io::stdin().lock())?, source.describe())),
    }
}

/// Resolve a source into a validated model handle.
pub fn resolve_model(source: &ModelSource, config: &HttpConfig) -> Result<LoadedModel> {
    let (bytes, origin) = load_model_bytes(source, config)?;
    let model = Model::from_slice(&bytes)
        .with_context(|| format!("failed to load model from {origin}"))?;
    info!(origin = %origin, name = model.name(), kind = model.kind(), "model ready");
    Ok(LoadedModel { model, origin })
}
