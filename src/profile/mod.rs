//! Attack profiles
//!
//! Profiles are declarative: active profiles carry steps that mutate the
//! request, passive profiles only carry greps evaluated against traffic
//! that is sent anyway. Profiles are loaded from a JSON array and validated
//! on load; invalid ones are skipped with a warning.

pub mod grep;
pub mod step;

use crate::error::{GauntletError, Result};
use crate::models::{Issue, ProfileKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

pub use grep::{Grep, GrepOperator, GrepOptions, GrepType, RequestScope};
pub use step::{
    Encoder, InsertionPointMode, MatchAndReplace, MethodChange, Payload, ReplaceKind,
    ReplaceScope, Step,
};

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveProfile {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub steps: Vec<Step>,
}

/// Passive request and passive response profiles share this shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveProfile {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub greps: Vec<Grep>,
    #[serde(default)]
    pub issue: Issue,
}

impl PassiveProfile {
    /// Greps evaluated by the matcher (enabled, not blind-host)
    pub fn enabled_greps(&self) -> impl Iterator<Item = &Grep> {
        self.greps
            .iter()
            .filter(|g| g.enabled && g.match_type != GrepType::BlindHost)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Profile {
    Active(ActiveProfile),
    PassiveRequest(PassiveProfile),
    PassiveResponse(PassiveProfile),
}

impl Profile {
    pub fn name(&self) -> &str {
        match self {
            Profile::Active(p) => &p.name,
            Profile::PassiveRequest(p) | Profile::PassiveResponse(p) => &p.name,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Profile::Active(p) => p.enabled,
            Profile::PassiveRequest(p) | Profile::PassiveResponse(p) => p.enabled,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Profile::Active(p) => &p.tags,
            Profile::PassiveRequest(p) | Profile::PassiveResponse(p) => &p.tags,
        }
    }

    pub fn kind(&self) -> ProfileKind {
        match self {
            Profile::Active(_) => ProfileKind::Active,
            Profile::PassiveRequest(_) => ProfileKind::PassiveRequest,
            Profile::PassiveResponse(_) => ProfileKind::PassiveResponse,
        }
    }
}

/// Validates a profile for correctness
pub fn validate_profile(profile: &Profile) -> std::result::Result<(), String> {
    if profile.name().trim().is_empty() {
        return Err("Profile name is empty".to_string());
    }

    match profile {
        Profile::Active(active) => {
            if active.steps.is_empty() {
                return Err("Active profile has no steps".to_string());
            }
            for (i, step) in active.steps.iter().enumerate() {
                if step.insertion_points.is_empty() {
                    return Err(format!("Step {i} has no insertion points"));
                }
                if step.payloads.is_empty() {
                    return Err(format!("Step {i} has no payloads"));
                }
                for grep in &step.greps {
                    grep.validate().map_err(|e| format!("Step {i}: {e}"))?;
                }
            }
        }
        Profile::PassiveRequest(passive) | Profile::PassiveResponse(passive) => {
            if passive.greps.is_empty() {
                return Err("Passive profile has no greps".to_string());
            }
            for grep in &passive.greps {
                grep.validate()?;
            }
        }
    }

    Ok(())
}

/// Source of profiles for a scan
pub trait ProfileProvider: Send + Sync {
    fn actives(&self) -> Vec<&ActiveProfile>;

    fn actives_enabled(&self) -> Vec<&ActiveProfile> {
        self.actives().into_iter().filter(|p| p.enabled).collect()
    }

    fn passive_reqs(&self) -> Vec<&PassiveProfile>;

    fn passive_reqs_enabled(&self) -> Vec<&PassiveProfile> {
        self.passive_reqs().into_iter().filter(|p| p.enabled).collect()
    }

    fn passive_res(&self) -> Vec<&PassiveProfile>;

    fn passive_res_enabled(&self) -> Vec<&PassiveProfile> {
        self.passive_res().into_iter().filter(|p| p.enabled).collect()
    }

    /// Every tag used by any profile, sorted
    fn tags(&self) -> Vec<String>;

    /// Where the profiles came from
    fn from(&self) -> &str;

    fn is_empty(&self) -> bool {
        self.actives().is_empty() && self.passive_reqs().is_empty() && self.passive_res().is_empty()
    }
}

/// In-memory profile provider
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    profiles: Vec<Profile>,
    source: String,
}

impl ProfileSet {
    pub fn new(profiles: Vec<Profile>, source: impl Into<String>) -> Self {
        Self {
            profiles,
            source: source.into(),
        }
    }

    /// Parses a JSON array of profiles, skipping invalid ones
    pub fn from_json(raw: &str, source: impl Into<String>) -> Result<Self> {
        let parsed: Vec<Profile> = serde_json::from_str(raw)?;
        let source = source.into();

        let profiles: Vec<Profile> = parsed
            .into_iter()
            .filter(|profile| match validate_profile(profile) {
                Ok(()) => true,
                Err(msg) => {
                    warn!("Skipping profile {} from {}: {}", profile.name(), source, msg);
                    false
                }
            })
            .collect();

        info!("Loaded {} profiles from {}", profiles.len(), source);
        Ok(Self { profiles, source })
    }

    /// Loads profiles from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GauntletError::ConfigError(format!(
                "Profiles file does not exist: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content, path.display().to_string())
    }

    /// Keeps the profiles carrying at least one of `tags`; an empty filter
    /// keeps everything
    pub fn filter_by_tags(&self, tags: &[String]) -> Self {
        if tags.is_empty() {
            return self.clone();
        }
        let profiles = self
            .profiles
            .iter()
            .filter(|p| p.tags().iter().any(|t| tags.iter().any(|f| f.eq_ignore_ascii_case(t))))
            .cloned()
            .collect();
        Self {
            profiles,
            source: self.source.clone(),
        }
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }
}

impl ProfileProvider for ProfileSet {
    fn actives(&self) -> Vec<&ActiveProfile> {
        self.profiles
            .iter()
            .filter_map(|p| match p {
                Profile::Active(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    fn passive_reqs(&self) -> Vec<&PassiveProfile> {
        self.profiles
            .iter()
            .filter_map(|p| match p {
                Profile::PassiveRequest(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    fn passive_res(&self) -> Vec<&PassiveProfile> {
        self.profiles
            .iter()
            .filter_map(|p| match p {
                Profile::PassiveResponse(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    fn tags(&self) -> Vec<String> {
        self.profiles
            .iter()
            .flat_map(|p| p.tags().iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn from(&self) -> &str {
        &self.source
    }
}
