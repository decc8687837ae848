//! Minimal MLflow tracking-server client: list experiments, list runs,
//! and download a model card artifact from a run.

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::utils::{HttpConfig, MlflowSelection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    #[serde(default)]
    pub lifecycle_stage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    #[serde(default)]
    pub run_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub start_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ExperimentsResponse {
    #[serde(default)]
    experiments: Vec<Experiment>,
}

#[derive(Debug, Deserialize)]
struct Run {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct RunsResponse {
    #[serde(default)]
    runs: Vec<Run>,
}

/// Split a `runs:/<run_id>/<dir>` model URI into the run id and model card path.
pub fn parse_runs_uri(uri: &str) -> Result<(String, String)> {
    let rest = uri
        .strip_prefix("runs:/")
        .ok_or_else(|| anyhow!("model URI `{uri}` must start with runs:/"))?;
    let (run_id, dir) = rest.split_once('/').unwrap_or((rest, "model"));
    if run_id.is_empty() {
        return Err(anyhow!("model URI `{uri}` has no run id"));
    }
    let dir = match dir.trim_matches('/') {
        "" => "model",
        dir => dir,
    };
    let artifact = if dir.ends_with(".json") {
        dir.to_string()
    } else {
        format!("{dir}/model.json")
    };
    Ok((run_id.to_string(), artifact))
}

pub struct MlflowClient {
    base: String,
    http: Client,
}

impl MlflowClient {
    pub fn new(tracking_uri: &str, config: &HttpConfig) -> Result<Self> {
        let base = tracking_uri.trim().trim_end_matches('/').to_string();
        if base.is_empty() {
            return Err(anyhow!("MLflow tracking URI is empty"));
        }
        Ok(Self {
            base,
            http: crate::input::http_client(config)?,
        })
    }

    fn post<T: for<'de> Deserialize<'de>>(&self, endpoint: &str, body: serde_json::Value) -> Result<T> {
        let url = format!("{}/api/2.0/mlflow/{endpoint}", self.base);
        debug!(%url, "mlflow request");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .with_context(|| format!("failed to connect to MLflow at {}", self.base))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "MLflow {endpoint} failed with status {}: {}",
                status.as_u16(),
                text.trim()
            ));
        }
        response
            .json()
            .with_context(|| format!("MLflow {endpoint} returned an unexpected payload"))
    }

    pub fn search_experiments(&self) -> Result<Vec<Experiment>> {
        let response: ExperimentsResponse =
            self.post("experiments/search", json!({ "max_results": 1000 }))?;
        info!(count = response.experiments.len(), "listed MLflow experiments");
        Ok(response.experiments)
    }

    /// Runs of one experiment, most recent first.
    pub fn search_runs(&self, experiment_id: &str) -> Result<Vec<RunInfo>> {
        let response: RunsResponse = self.post(
            "runs/search",
            json!({
                "experiment_ids": [experiment_id],
                "order_by": ["attributes.start_time DESC"],
                "max_results": 1000,
            }),
        )?;
        let mut runs: Vec<RunInfo> = response.runs.into_iter().map(|r| r.info).collect();
        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        info!(experiment_id, count = runs.len(), "listed MLflow runs");
        Ok(runs)
    }

    pub fn download_artifact(&self, run_id: &str, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/get-artifact", self.base);
        let response = self
            .http
            .get(&url)
            .query(&[("path", path), ("run_uuid", run_id)])
            .send()
            .with_context(|| format!("failed to connect to MLflow at {}", self.base))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(
                "failed to download artifact {path} of run {run_id}; status code {}",
                status.as_u16()
            ));
        }
        let bytes = response
            .bytes()
            .context("failed to read MLflow artifact body")?;
        info!(run_id, path, bytes = bytes.len(), "downloaded MLflow artifact");
        Ok(bytes.to_vec())
    }

    /// Find the experiment by name, or the first listed one when no name is given.
    pub fn select_experiment(&self, name: Option<&str>) -> Result<Experiment> {
        let experiments = self.search_experiments()?;
        if experiments.is_empty() {
            return Err(anyhow!("no experiments found on {}", self.base));
        }
        match name {
            Some(name) => experiments
                .into_iter()
                .find(|e| e.name == name)
                .ok_or_else(|| anyhow!("experiment `{name}` not found on {}", self.base)),
            None => {
                let first = experiments.into_iter().next();
                first.ok_or_else(|| anyhow!("no experiments found"))
            }
        }
    }

    /// Resolve a selection to a run id and download its model card.
    pub fn fetch_model(&self, selection: &MlflowSelection) -> Result<(String, Vec<u8>)> {
        let run_id = match &selection.run_id {
            Some(run_id) => run_id.clone(),
            None => {
                let experiment = self.select_experiment(selection.experiment.as_deref())?;
                let runs = self.search_runs(&experiment.experiment_id)?;
                let latest = runs.into_iter().next().ok_or_else(|| {
                    warn!(experiment = %experiment.name, "experiment has no runs");
                    anyhow!("no runs available in experiment `{}`", experiment.name)
                })?;
                info!(experiment = %experiment.name, run_id = %latest.run_id, "selected latest run");
                latest.run_id
            }
        };
        let bytes = self.download_artifact(&run_id, &selection.artifact_path)?;
        Ok((run_id, bytes))
    }
}
