use super::analysis::{annotate_port_duplicates, annotate_route_duplicates};
use super::Environment;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// A data file holds a single environment or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum EnvironmentFile {
    Many(Vec<Environment>),
    Single(Box<Environment>),
}

impl EnvironmentFile {
    fn into_vec(self) -> Vec<Environment> {
        match self {
            EnvironmentFile::Many(envs) => envs,
            EnvironmentFile::Single(env) => vec![*env],
        }
    }
}

/// Load environments from a JSON or YAML file and annotate duplicates.
///
/// The format follows the extension; files without a recognised extension are
/// tried as JSON first, then YAML.
pub fn load_environments<P: AsRef<Path>>(path: P) -> Result<Vec<Environment>, anyhow::Error> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read environment file '{}'", path.display()))?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let environments = match extension.as_deref() {
        Some("json") => parse_json(&content)?,
        Some("yaml") | Some("yml") => parse_yaml(&content)?,
        _ => parse_environments(&content)?,
    };

    debug!(
        "Loaded {} environment(s) from {}",
        environments.len(),
        path.display()
    );
    Ok(environments)
}

/// Parse environments from text, accepting JSON or YAML.
pub fn parse_environments(content: &str) -> Result<Vec<Environment>, anyhow::Error> {
    parse_json(content).or_else(|json_err| {
        parse_yaml(content).with_context(|| format!("Not valid JSON ({json_err}) nor YAML"))
    })
}

fn parse_json(content: &str) -> Result<Vec<Environment>, anyhow::Error> {
    let file: EnvironmentFile =
        serde_json::from_str(content).context("Failed to parse environments as JSON")?;
    Ok(annotate(file.into_vec()))
}

fn parse_yaml(content: &str) -> Result<Vec<Environment>, anyhow::Error> {
    let file: EnvironmentFile =
        serde_yaml::from_str(content).context("Failed to parse environments as YAML")?;
    Ok(annotate(file.into_vec()))
}

fn annotate(mut environments: Vec<Environment>) -> Vec<Environment> {
    for env in &mut environments {
        annotate_route_duplicates(env);
    }
    annotate_port_duplicates(&mut environments);
    environments
}
