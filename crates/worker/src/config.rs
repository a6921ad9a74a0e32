use std::path::PathBuf;

use anyhow::{bail, Context};
use indexmap::IndexSet;
use roboqa_core::plan::GripperPolicy;
use roboqa_core::types::EpisodeIndex;
use roboqa_pipeline::ExportConfig;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Dataset root holding source episodes, annotations and edits.
    pub data_root: PathBuf,
    /// Exported episodes land here.
    pub output_dir: PathBuf,
    pub dataset: String,
    /// Explicit episode selection; `None` means every episode with a trajectory.
    pub episodes: Option<Vec<EpisodeIndex>>,
    /// Run quality analysis and save suggested annotations before exporting.
    pub analyze: bool,
    pub export: ExportConfig,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                        |
    /// |-------------------------|--------------------------------|
    /// | `ROBOQA_DATA_ROOT`      | `./data`                       |
    /// | `ROBOQA_OUTPUT_DIR`     | `./export`                     |
    /// | `ROBOQA_DATASET`        | required                       |
    /// | `ROBOQA_EPISODES`       | all episodes with a trajectory |
    /// | `ROBOQA_EXPORT_WORKERS` | `4`                            |
    /// | `ROBOQA_PROGRESS_BATCH` | `10`                           |
    /// | `ROBOQA_FAIL_FAST`      | `false`                        |
    /// | `ROBOQA_APPLY_EDITS`    | `true`                         |
    /// | `ROBOQA_ANALYZE`        | `true`                         |
    /// | `ROBOQA_GRIPPER_POLICY` | `nearest`                      |
    ///
    /// `ROBOQA_EPISODES` takes a comma-separated list of indices and
    /// inclusive ranges, e.g. `0,3,10-12`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`WorkerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let dataset = var("ROBOQA_DATASET").context("ROBOQA_DATASET must be set")?;
        let data_root = PathBuf::from(var("ROBOQA_DATA_ROOT").unwrap_or_else(|| "./data".into()));
        let output_dir = PathBuf::from(var("ROBOQA_OUTPUT_DIR").unwrap_or_else(|| "./export".into()));

        let episodes = var("ROBOQA_EPISODES")
            .map(|v| parse_episodes(&v))
            .transpose()
            .context("ROBOQA_EPISODES must be a list of episode indices")?;

        let defaults = ExportConfig::default();
        let export = ExportConfig {
            workers: parse_or("ROBOQA_EXPORT_WORKERS", var("ROBOQA_EXPORT_WORKERS"), defaults.workers)?,
            progress_batch_size: parse_or(
                "ROBOQA_PROGRESS_BATCH",
                var("ROBOQA_PROGRESS_BATCH"),
                defaults.progress_batch_size,
            )?,
            fail_fast: flag_or("ROBOQA_FAIL_FAST", var("ROBOQA_FAIL_FAST"), defaults.fail_fast)?,
            apply_edits: flag_or("ROBOQA_APPLY_EDITS", var("ROBOQA_APPLY_EDITS"), defaults.apply_edits)?,
            gripper_policy: match var("ROBOQA_GRIPPER_POLICY") {
                Some(v) => v
                    .parse::<GripperPolicy>()
                    .context("ROBOQA_GRIPPER_POLICY must be `nearest` or `linear`")?,
                None => defaults.gripper_policy,
            },
            ..defaults
        };

        Ok(Self {
            data_root,
            output_dir,
            dataset,
            episodes,
            analyze: flag_or("ROBOQA_ANALYZE", var("ROBOQA_ANALYZE"), true)?,
            export,
        })
    }
}

fn parse_or(key: &str, value: Option<String>, default: usize) -> anyhow::Result<usize> {
    match value {
        Some(v) => v
            .parse()
            .with_context(|| format!("{key} must be a non-negative integer, got {v:?}")),
        None => Ok(default),
    }
}

fn flag_or(key: &str, value: Option<String>, default: bool) -> anyhow::Result<bool> {
    match value {
        Some(v) => parse_flag(&v).with_context(|| format!("{key} must be a boolean")),
        None => Ok(default),
    }
}

/// Accepts `true/false`, `1/0`, `yes/no` and `on/off`, case-insensitively.
pub fn parse_flag(value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("not a boolean: {other:?}"),
    }
}

/// Most episodes a single `start-end` range may expand to.
pub const MAX_RANGE_LEN: u64 = 100_000;

/// Parse `0,3,10-12` into `[0, 3, 10, 11, 12]`, keeping first-seen order.
pub fn parse_episodes(value: &str) -> anyhow::Result<Vec<EpisodeIndex>> {
    let mut out = IndexSet::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let range = match part.split_once('-') {
            Some((start, end)) => {
                let start: EpisodeIndex = start.trim().parse().with_context(|| format!("bad range start in {part:?}"))?;
                let end: EpisodeIndex = end.trim().parse().with_context(|| format!("bad range end in {part:?}"))?;
                if end < start {
                    bail!("range {part:?} runs backwards");
                }
                if u64::from(end - start) >= MAX_RANGE_LEN {
                    bail!("range {part:?} spans more than {MAX_RANGE_LEN} episodes");
                }
                start..=end
            }
            None => {
                let ep: EpisodeIndex = part.parse().with_context(|| format!("bad episode index {part:?}"))?;
                ep..=ep
            }
        };
        out.extend(range);
    }
    if out.is_empty() {
        bail!("no episodes listed");
    }
    Ok(out.into_iter().collect())
}
