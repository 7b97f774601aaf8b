//! Configuration file support.
//!
//! A `.kubeload.yaml` file may live anywhere above the working directory; the
//! closest one wins. Command line flags override whatever it sets.

use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = ".kubeload.yaml";

/// Field manager recorded on server-side applied objects unless configured otherwise.
pub const DEFAULT_FIELD_MANAGER: &str = "kubeload";

/// Default timeout for a single Kubernetes API request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeloadConfig {
	/// Cluster selection, see [`ClusterConfig`].
	#[serde(flatten)]
	pub cluster: ClusterConfig,

	#[serde(default)]
	pub apply: ApplyConfig,
}

/// Which kubeconfig context to connect through.
///
/// At most one of the two may be set. With neither, the kubeconfig's current
/// context is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
	/// API server URL; the context whose cluster points there is used.
	#[serde(default)]
	pub api_server: Option<String>,

	/// Candidate context names; the first one present in kubeconfig is used.
	#[serde(default)]
	pub context_names: Option<Vec<String>>,

	#[serde(default)]
	pub request_timeout_seconds: Option<u64>,
}

impl ClusterConfig {
	pub fn request_timeout(&self) -> Duration {
		self.request_timeout_seconds
			.map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplyConfig {
	/// Use server-side apply instead of client-side strategic merge patches.
	pub server_side: bool,
	/// Take over conflicting fields owned by other managers.
	pub force: bool,
	pub field_manager: String,
}

impl Default for ApplyConfig {
	fn default() -> Self {
		Self {
			server_side: true,
			force: false,
			field_manager: DEFAULT_FIELD_MANAGER.to_string(),
		}
	}
}

impl KubeloadConfig {
	/// Load config by searching from the given directory upward
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>> {
		find_config_file(start_dir)
			.map(|path| Self::load_from_file(&path))
			.transpose()
	}

	pub fn load_from_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)
			.with_context(|| format!("failed to read config file: {}", path.display()))?;
		serde_yaml_with_quirks::from_str(&content)
			.with_context(|| format!("failed to parse config file: {}", path.display()))
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let start = start_dir
		.canonicalize()
		.unwrap_or_else(|_| start_dir.to_path_buf());

	start
		.ancestors()
		.map(|dir| dir.join(CONFIG_FILE_NAME))
		.find(|candidate| candidate.exists())
}
