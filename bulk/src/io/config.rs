//! Batch configuration loaded from `bulk.toml`.

use std::collections::BTreeSet;
use std::f64::consts::FRAC_PI_2;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::expand::{AxisOption, ConfigurationAxis, colliding_ids, expand};
use crate::core::filter::{AcceptRule, FilePredicate, ParticipantFilter};
use crate::core::layout::{NameScheme, TrialTagger};
use crate::core::retry::RetrySweep;
use crate::core::types::Variant;
use crate::io::collaborator::CommandLimits;

/// Axis name reserved for the model files in `[models]`.
pub const MODEL_AXIS: &str = "model";

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "bulk.toml";

/// Batch configuration (TOML).
///
/// Every section is optional; missing fields fall back to the values used for
/// the lab's IMU gait dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub workers: WorkersConfig,
    pub filter: FilterConfig,
    pub trial: TrialConfig,
    pub layout: LayoutConfig,
    pub models: ModelsConfig,
    pub axes: Vec<AxisConfig>,
    pub naming: NamingConfig,
    pub retry: RetryConfig,
    pub solver: SolverConfig,
    pub calibration: CalibrationConfig,
    pub prepare: PrepareConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkersConfig {
    /// Upper bound on solve workers (actual count is `min(cpus, max_workers)`).
    pub max_workers: usize,
    /// Upper bound on preparation-phase workers.
    pub prepare_workers: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_workers: 64,
            prepare_workers: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilterConfig {
    /// Participant ids to include. Omitted means every participant.
    pub participants: Option<Vec<String>>,
    /// Ancestor directory holding the participant id (1 = the file's parent).
    pub participant_ancestor: usize,
    pub rules: Vec<RuleConfig>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            participants: None,
            participant_ancestor: 2,
            rules: vec![RuleConfig::imu_orientations()],
        }
    }
}

impl FilterConfig {
    pub fn predicate(&self) -> FilePredicate {
        FilePredicate {
            rules: self
                .rules
                .iter()
                .map(|rule| AcceptRule::new(&rule.extension, rule.prefixes.clone(), &rule.suffix))
                .collect(),
            participants: ParticipantFilter::from(self.participants.clone()),
            participant_ancestor: self.participant_ancestor,
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.participant_ancestor == 0 {
            return Err(anyhow!("{section}.participant_ancestor must be >= 1"));
        }
        if self.rules.is_empty() {
            return Err(anyhow!("{section}.rules must contain at least one rule"));
        }
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.extension.trim_start_matches('.').is_empty() {
                return Err(anyhow!("{section}.rules[{idx}].extension must be non-empty"));
            }
        }
        Ok(())
    }
}

/// One acceptance rule: a file matches when its extension equals `extension`,
/// its stem starts with any of `prefixes` and ends with `suffix`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleConfig {
    pub extension: String,
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub suffix: String,
}

impl RuleConfig {
    /// `data_l_*_orientations.sto` / `data_r_*_orientations.sto`
    pub fn imu_orientations() -> Self {
        Self {
            extension: "sto".to_string(),
            prefixes: vec!["data_l_".to_string(), "data_r_".to_string()],
            suffix: "_orientations".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrialConfig {
    /// Regex locating the trial tag inside a file stem.
    pub tag_pattern: String,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            tag_pattern: r"[rl]_(fast|slow|comf)_\d{2}".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LayoutConfig {
    /// Trailing parent segments re-rooted under the output directory.
    pub mirror_depth: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self { mirror_depth: 2 }
    }
}

/// Where model files live under `models_dir`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelLayout {
    /// `models_dir/<file>`
    #[default]
    Shared,
    /// `models_dir/<participant>/<file>`
    PerParticipant,
}

impl ModelLayout {
    pub fn resolve(self, models_dir: &Path, participant: &str, file: &str) -> PathBuf {
        match self {
            ModelLayout::Shared => models_dir.join(file),
            ModelLayout::PerParticipant => models_dir.join(participant).join(file),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelsConfig {
    pub layout: ModelLayout,
    pub files: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            layout: ModelLayout::Shared,
            files: vec!["kg_gait2392_thelen2003muscle_scaled.osim".to_string()],
        }
    }
}

/// A user-defined configuration axis. Labels default to each value's file stem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AxisConfig {
    pub name: String,
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl AxisConfig {
    fn to_axis(&self) -> ConfigurationAxis {
        let options = self
            .values
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                let label = self
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(idx).cloned())
                    .unwrap_or_else(|| file_stem_label(value));
                AxisOption {
                    label,
                    value: value.clone(),
                }
            })
            .collect();
        ConfigurationAxis {
            name: self.name.clone(),
            options,
        }
    }
}

fn default_axes() -> Vec<AxisConfig> {
    vec![AxisConfig {
        name: "weights".to_string(),
        values: vec![
            "setup_OrientationWeightSet_uniform.xml".to_string(),
            "setup_OrientationWeightSet_pelvis_tibia_calcn.xml".to_string(),
        ],
        labels: Some(vec![
            "uniform".to_string(),
            "pelvis_tibia_calcn".to_string(),
        ]),
    }]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NamingConfig {
    pub prefix: String,
    pub suffix: String,
    /// Fixed artifact extension; omitted means "same as the model file".
    pub extension: Option<String>,
    pub separator: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: "kg".to_string(),
            suffix: "imu_ik_output".to_string(),
            extension: Some("mot".to_string()),
            separator: "_".to_string(),
        }
    }
}

impl NamingConfig {
    pub fn scheme(&self) -> NameScheme {
        NameScheme {
            prefix: self.prefix.clone(),
            suffix: self.suffix.clone(),
            extension: self.extension.clone(),
            separator: self.separator.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub start: f64,
    pub end: f64,
    pub increment: f64,
    /// Wall-clock limit for one collaborator invocation.
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 1.0,
            increment: 0.1,
            attempt_timeout_secs: 60 * 60,
        }
    }
}

impl RetryConfig {
    pub fn sweep(&self) -> RetrySweep {
        RetrySweep {
            start: self.start,
            end: self.end,
            increment: self.increment,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    /// argv of the solver; each element is a template over the task variables.
    pub command: Vec<String>,
    pub accuracy: f64,
    /// Sensor-to-model frame rotations (radians, XYZ).
    pub rotations: [f64; 3],
    /// Truncate collaborator stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            accuracy: 1e-6,
            rotations: [-FRAC_PI_2, 0.0, 0.0],
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    pub command: Vec<String>,
    pub rotations: [f64; 3],
    pub base_imu_label: String,
    pub base_heading_axis: String,
    /// Truncate calibration tool stdout/stderr logs beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Overrides `[filter]` for calibration runs.
    pub filter: Option<FilterConfig>,
    pub naming: NamingConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        let participants = [
            "08", "09", "12", "17", "19", "21", "24", "28", "31", "34", "36", "38", "40", "41",
        ];
        Self {
            command: Vec::new(),
            rotations: [-FRAC_PI_2, FRAC_PI_2, 0.0],
            base_imu_label: "pelvis_imu".to_string(),
            base_heading_axis: "-z".to_string(),
            output_limit_bytes: 100_000,
            filter: Some(FilterConfig {
                participants: Some(participants.iter().map(|id| id.to_string()).collect()),
                ..FilterConfig::default()
            }),
            naming: NamingConfig {
                prefix: "kg".to_string(),
                suffix: "and_IMUs".to_string(),
                extension: None,
                separator: "_".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrepareConfig {
    /// Files under `models_dir` copied into every result directory before solving.
    pub copy_files: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: WorkersConfig::default(),
            filter: FilterConfig::default(),
            trial: TrialConfig::default(),
            layout: LayoutConfig::default(),
            models: ModelsConfig::default(),
            axes: default_axes(),
            naming: NamingConfig::default(),
            retry: RetryConfig::default(),
            solver: SolverConfig::default(),
            calibration: CalibrationConfig::default(),
            prepare: PrepareConfig::default(),
        }
    }
}

impl RunConfig {
    /// Checks that hold for every variant.
    pub fn validate(&self) -> Result<()> {
        if self.workers.max_workers == 0 {
            return Err(anyhow!("workers.max_workers must be > 0"));
        }
        if self.workers.prepare_workers == 0 {
            return Err(anyhow!("workers.prepare_workers must be > 0"));
        }
        self.filter.validate("filter")?;
        if let Some(filter) = &self.calibration.filter {
            filter.validate("calibration.filter")?;
        }
        TrialTagger::new(&self.trial.tag_pattern)
            .with_context(|| format!("trial.tag_pattern {:?}", self.trial.tag_pattern))?;
        if self.models.files.is_empty() || self.models.files.iter().any(|f| f.trim().is_empty()) {
            return Err(anyhow!("models.files must be a non-empty array of file names"));
        }

        let mut names = BTreeSet::new();
        for axis in &self.axes {
            if axis.name.trim().is_empty() {
                return Err(anyhow!("axes[].name must be non-empty"));
            }
            if axis.name == MODEL_AXIS {
                return Err(anyhow!("axis name {MODEL_AXIS:?} is reserved for [models]"));
            }
            if !names.insert(axis.name.as_str()) {
                return Err(anyhow!("duplicate axis name {:?}", axis.name));
            }
            if axis.values.is_empty() {
                return Err(anyhow!("axis {:?} must have at least one value", axis.name));
            }
            if let Some(labels) = &axis.labels
                && labels.len() != axis.values.len()
            {
                return Err(anyhow!(
                    "axis {:?} has {} labels for {} values",
                    axis.name,
                    labels.len(),
                    axis.values.len()
                ));
            }
        }

        if self.naming.separator.is_empty() || self.calibration.naming.separator.is_empty() {
            return Err(anyhow!("naming.separator must be non-empty"));
        }
        self.retry.sweep().validate().map_err(|msg| anyhow!(msg))?;
        if self.retry.attempt_timeout_secs == 0 {
            return Err(anyhow!("retry.attempt_timeout_secs must be > 0"));
        }
        if self.solver.output_limit_bytes == 0 {
            return Err(anyhow!("solver.output_limit_bytes must be > 0"));
        }
        if self.calibration.output_limit_bytes == 0 {
            return Err(anyhow!("calibration.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    /// Variant-specific checks: a collaborator command and collision-free tuple ids.
    pub fn validate_for(&self, variant: Variant) -> Result<()> {
        self.validate()?;
        let (section, command) = match variant {
            Variant::Ik => ("solver", &self.solver.command),
            Variant::Calibrate => ("calibration", &self.calibration.command),
        };
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(anyhow!("{section}.command must be a non-empty array"));
        }

        let separator = &self.naming_for(variant).separator;
        let collisions = colliding_ids(&expand(&self.axes_for(variant)), separator);
        if !collisions.is_empty() {
            return Err(anyhow!(
                "configuration tuples produce colliding output names: {}",
                collisions.join(", ")
            ));
        }
        Ok(())
    }

    pub fn filter_for(&self, variant: Variant) -> &FilterConfig {
        match variant {
            Variant::Ik => &self.filter,
            Variant::Calibrate => self.calibration.filter.as_ref().unwrap_or(&self.filter),
        }
    }

    pub fn naming_for(&self, variant: Variant) -> &NamingConfig {
        match variant {
            Variant::Ik => &self.naming,
            Variant::Calibrate => &self.calibration.naming,
        }
    }

    /// Model axis first, then (for `ik`) the configured axes in order.
    pub fn axes_for(&self, variant: Variant) -> Vec<ConfigurationAxis> {
        let model_axis = ConfigurationAxis {
            name: MODEL_AXIS.to_string(),
            options: self
                .models
                .files
                .iter()
                .map(|file| AxisOption {
                    label: file_stem_label(file),
                    value: file.clone(),
                })
                .collect(),
        };
        let mut axes = vec![model_axis];
        if variant == Variant::Ik {
            axes.extend(self.axes.iter().map(AxisConfig::to_axis));
        }
        axes
    }

    /// Calibration runs once per task; `ik` walks the configured sweep.
    pub fn sweep_for(&self, variant: Variant) -> RetrySweep {
        match variant {
            Variant::Ik => self.retry.sweep(),
            Variant::Calibrate => RetrySweep::single(self.retry.start),
        }
    }

    /// Per-attempt timeout and transcript cap for the variant's collaborator.
    pub fn command_limits(&self, variant: Variant) -> CommandLimits {
        let output_limit_bytes = match variant {
            Variant::Ik => self.solver.output_limit_bytes,
            Variant::Calibrate => self.calibration.output_limit_bytes,
        };
        CommandLimits {
            timeout: self.retry.attempt_timeout(),
            output_limit_bytes,
        }
    }

    pub fn tagger(&self) -> Result<TrialTagger> {
        TrialTagger::new(&self.trial.tag_pattern)
            .with_context(|| format!("trial.tag_pattern {:?}", self.trial.tag_pattern))
    }
}

fn file_stem_label(value: &str) -> String {
    Path::new(value)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| value.to_string())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
