//! Per-template work: entrypoint discovery and task generation
//!
//! A [`LineOfWork`] owns everything needed to turn one template into
//! requests. Tasks are generated in a fixed order (profile, step,
//! entrypoint, payload) so that a rerun of the same template produces the
//! same tasks.

use crate::entrypoint::{find_all, marker, Entrypoint, Finder, InsertionPointType};
use crate::http::{Request, Response};
use crate::models::{Issue, PayloadStrategy, Template};
use crate::modifier::{mentions_blind_host, EMAIL_MARKER};
use crate::profile::{ActiveProfile, InsertionPointMode, Step};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One unit of work within a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Sends (or reuses) the template request once for passive analysis
    Base,
    /// One payload of one step against one or more entrypoints
    Active {
        profile: usize,
        step: usize,
        /// Index into the step's parsed payload lines
        payload: usize,
        /// Indexes into [`LineOfWork::entrypoints`]; several in same mode
        entrypoints: Vec<usize>,
    },
}

/// Features a payload may depend on
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub blind_host: bool,
    pub email: bool,
}

impl Capabilities {
    fn supports(&self, payload: &str) -> bool {
        (self.blind_host || !mentions_blind_host(payload))
            && (self.email || !payload.contains(EMAIL_MARKER))
    }
}

/// A blind-host request waiting for its interaction
#[derive(Debug, Clone)]
pub struct PendingInteraction {
    pub uid: String,
    pub profile_name: String,
    pub issue: Issue,
    /// Report dedup key, see [`signature`]
    pub signature: String,
    pub param: Option<String>,
    pub payload: String,
    pub request: Request,
    pub response: Response,
}

pub struct LineOfWork<'a> {
    pub template: &'a Template,
    /// Template request with user markers removed
    pub base: Request,
    pub entrypoints: Vec<Entrypoint>,
    pub tasks: Vec<Task>,
    /// Tasks dropped because their payload needs an unconfigured feature
    pub skipped: usize,
    finders: Vec<Arc<dyn Finder>>,
    reported: Mutex<HashSet<String>>,
    pending: Mutex<Vec<PendingInteraction>>,
}

impl<'a> LineOfWork<'a> {
    pub fn new(template: &'a Template, finders: &[Arc<dyn Finder>]) -> Self {
        Self {
            template,
            base: marker::strip_markers(&template.request),
            entrypoints: Vec::new(),
            tasks: Vec::new(),
            skipped: 0,
            finders: finders.to_vec(),
            reported: Mutex::new(HashSet::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Finds the entrypoints of the template. User markers, when present,
    /// restrict the scan to the marked locations; otherwise the finders run
    /// over the unmarked base.
    pub fn discover(&mut self) {
        if self.base == self.template.request {
            self.entrypoints = find_all(&self.finders, &self.base);
            return;
        }

        self.entrypoints = find_all(&self.finders, &self.template.request)
            .into_iter()
            .filter(|e| e.kind() == InsertionPointType::UserProvided)
            .collect();
        debug!("{} user-marked entrypoints", self.entrypoints.len());
    }

    /// Builds the task list. The base task comes first when passive
    /// profiles need it.
    pub fn generate(
        &mut self,
        actives: &[&ActiveProfile],
        with_base: bool,
        strategy: PayloadStrategy,
        capabilities: Capabilities,
    ) {
        let mut tasks = Vec::new();
        let mut skipped = 0;
        if with_base {
            tasks.push(Task::Base);
        }

        for (p, profile) in actives.iter().enumerate() {
            for (s, step) in profile.steps.iter().enumerate() {
                let targets: Vec<usize> = self
                    .entrypoints
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| {
                        e.kind() == InsertionPointType::UserProvided || step.accepts(e.kind())
                    })
                    .map(|(i, _)| i)
                    .collect();
                if targets.is_empty() {
                    continue;
                }

                let mut payloads: Vec<(usize, String)> = step
                    .parsed_payloads()
                    .into_iter()
                    .enumerate()
                    .filter(|(_, p)| p.enabled)
                    .map(|(i, p)| (i, p.value))
                    .collect();
                if strategy == PayloadStrategy::OnlyOnce {
                    payloads.truncate(1);
                }

                let groups: Vec<Vec<usize>> = match step.insertion_point_mode {
                    InsertionPointMode::Any => targets.into_iter().map(|t| vec![t]).collect(),
                    InsertionPointMode::Same => vec![targets],
                };

                for group in &groups {
                    for (index, value) in &payloads {
                        if !capabilities.supports(value) {
                            skipped += 1;
                            continue;
                        }
                        tasks.push(Task::Active {
                            profile: p,
                            step: s,
                            payload: *index,
                            entrypoints: group.clone(),
                        });
                    }
                }
            }
        }

        debug!(
            "Template {}: {} tasks, {} skipped",
            self.template.index,
            tasks.len(),
            skipped
        );
        self.tasks = tasks;
        self.skipped = skipped;
    }

    /// The request carrying `payload` at every entrypoint of `targets`.
    /// In same mode each injection is applied on top of the previous one;
    /// later entrypoints are re-discovered on the modified request so their
    /// context reflects the earlier injections.
    pub fn inject(&self, step: &Step, targets: &[usize], payload: &str) -> Request {
        let mut current = self.base.clone();

        for (n, &target) in targets.iter().enumerate() {
            let Some(entrypoint) = self.entrypoints.get(target) else {
                continue;
            };
            let located = if n == 0 {
                Some(entrypoint.clone())
            } else {
                self.relocate(target, &current)
            };
            let located = located.unwrap_or_else(|| entrypoint.clone());
            current = located.inject(&current, step.payload_position, payload);
        }

        current
    }

    /// Finds the entrypoint matching `target` (same kind, same ordinal) in
    /// a request derived from the base one
    fn relocate(&self, target: usize, request: &Request) -> Option<Entrypoint> {
        let kind = self.entrypoints.get(target)?.kind();
        if kind == InsertionPointType::UserProvided {
            return None;
        }
        let ordinal = self.entrypoints[..target]
            .iter()
            .filter(|e| e.kind() == kind)
            .count();
        find_all(&self.finders, request)
            .into_iter()
            .filter(|e| e.kind() == kind)
            .nth(ordinal)
    }

    /// Records a report signature; false when it was already reported
    pub fn should_report(&self, signature: String) -> bool {
        self.reported
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(signature)
    }

    pub fn defer(&self, pending: PendingInteraction) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(pending);
    }

    pub fn take_pending(&self) -> Vec<PendingInteraction> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Dedup key: one report per profile and location
pub fn signature(profile: &str, entrypoint: Option<&Entrypoint>) -> String {
    match entrypoint {
        Some(e) => format!(
            "{}|{}|{}",
            profile,
            e.kind(),
            e.param_name().unwrap_or_default()
        ),
        None => format!("{profile}|base"),
    }
}
