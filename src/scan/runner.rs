//! Scan orchestration
//!
//! The [`Runner`] feeds templates to a bounded pool of template workers.
//! Each worker turns its template into tasks, runs them through the shared
//! requester pool and reports matches, errors and stats. A template whose
//! processing is interrupted by cancellation has its stats contribution
//! rolled back and stays unmarked, so a resumed scan processes it again.

use super::fs::FileSystem;
use super::stats::{Stats, StatsCollector, StatsDelta, StatsHandle};
use super::task::{signature, Capabilities, LineOfWork, PendingInteraction, Task};
use crate::context::ScanContext;
use crate::entrypoint::Finder;
use crate::error::{GauntletError, Result};
use crate::http::{Request, Requester, RequesterFactory, RequesterPool, Response};
use crate::matcher::{GrepSource, MatchInput, Matcher, PayloadEcho};
use crate::models::{ErrorRecord, Match, ProfileKind, ScanConfig, TaskSummary, Template};
use crate::modifier::{apply_chain, default_chain, ModifyContext, Modifier};
use crate::oob::{BlindHostPoller, Interaction};
use crate::profile::{ActiveProfile, ProfileProvider, Step};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Buffer of the stats collector channel
const STATS_BUFFER: usize = 1024;

/// Called for every template left unprocessed by a cancelled scan
pub type DiscardHook = Arc<dyn Fn(&Template) + Send + Sync>;

/// Scan runner. Dependencies are checked when the scan starts.
pub struct Runner {
    config: ScanConfig,
    ctx: Option<ScanContext>,
    profiles: Option<Arc<dyn ProfileProvider>>,
    finders: Vec<Arc<dyn Finder>>,
    requester_factory: Option<RequesterFactory>,
    fs: Option<Arc<dyn FileSystem>>,
    modifiers: Option<Vec<Arc<dyn Modifier>>>,
    poller: Option<Arc<BlindHostPoller>>,
    on_discarded: Option<DiscardHook>,
}

impl Runner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            ctx: None,
            profiles: None,
            finders: Vec::new(),
            requester_factory: None,
            fs: None,
            modifiers: None,
            poller: None,
            on_discarded: None,
        }
    }

    pub fn with_context(mut self, ctx: ScanContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileProvider>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn with_finders(mut self, finders: Vec<Arc<dyn Finder>>) -> Self {
        self.finders = finders;
        self
    }

    /// Builds the requesters of the scan's pool
    pub fn with_requester_factory(mut self, factory: RequesterFactory) -> Self {
        self.requester_factory = Some(factory);
        self
    }

    /// Shares one requester across the whole pool
    pub fn with_requester(self, requester: Arc<dyn Requester>) -> Self {
        self.with_requester_factory(Arc::new(move || Ok(Arc::clone(&requester))))
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Replaces the default modifier chain
    pub fn with_modifiers(mut self, modifiers: Vec<Arc<dyn Modifier>>) -> Self {
        self.modifiers = Some(modifiers);
        self
    }

    pub fn with_poller(mut self, poller: Arc<BlindHostPoller>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn on_discarded<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Template) + Send + Sync + 'static,
    {
        self.on_discarded = Some(Arc::new(hook));
        self
    }

    /// Scans `templates` and returns the final stats. Templates recorded as
    /// ended by a previous run on the same storage are skipped.
    pub async fn start(&self, templates: Vec<Template>) -> Result<Stats> {
        let ctx = self.ctx.clone().ok_or(GauntletError::MissingContext)?;
        let profiles = self
            .profiles
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or(GauntletError::NoProfiles)?;
        if self.finders.is_empty() {
            return Err(GauntletError::NoEntrypointFinders);
        }
        let factory = self
            .requester_factory
            .clone()
            .ok_or(GauntletError::NoRequesterBuilder)?;
        let fs = self.fs.clone().ok_or(GauntletError::NoFileSystem)?;

        let mut initial = fs.load_stats().await?.unwrap_or_default();
        if !initial.templates_ended.is_empty() {
            info!(
                "Resuming scan: {} templates already processed",
                initial.templates_ended.len()
            );
        }
        initial.total_templates = templates.len();

        info!(
            "Scanning {} templates with profiles from {}",
            templates.len(),
            profiles.from()
        );

        let collector = StatsCollector::spawn(initial.clone(), Some(Arc::clone(&fs)), STATS_BUFFER);
        let worker = Arc::new(Worker {
            ctx: ctx.clone(),
            profiles,
            finders: self.finders.clone(),
            pool: RequesterPool::new(factory, self.config.max_connections).with_rps(self.config.rps),
            fs: Arc::clone(&fs),
            modifiers: self
                .modifiers
                .clone()
                .unwrap_or_else(|| default_chain(&self.config)),
            poller: self.poller.clone(),
            stats: collector.handle(),
            config: self.config.clone(),
        });

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut workers = JoinSet::new();
        let mut queue = templates.into_iter();

        while let Some(template) = queue.next() {
            if initial.is_template_ended(template.index) {
                debug!("Template {} already processed, skipping", template.index);
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = ctx.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                self.discard(&template);
                for rest in queue.by_ref() {
                    if !initial.is_template_ended(rest.index) {
                        self.discard(&rest);
                    }
                }
                break;
            };

            let worker = Arc::clone(&worker);
            workers.spawn(async move {
                let _permit = permit;
                worker.process(template).await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Template worker failed: {}", e);
            }
        }

        drop(worker);
        let stats = collector.finish().await;

        let cancelled = ctx.is_cancelled();
        if !cancelled || self.config.save_on_stop {
            fs.store_stats(&stats).await?;
        }

        info!(
            "Scan {}: {}/{} templates, {} requests ({} failed), {} matches",
            if cancelled { "stopped" } else { "finished" },
            stats.templates_ended.len(),
            stats.total_templates,
            stats.performed_requests,
            stats.failed_requests,
            stats.matches_found
        );
        Ok(stats)
    }

    fn discard(&self, template: &Template) {
        debug!("Template {} discarded", template.index);
        if let Some(hook) = &self.on_discarded {
            hook(template);
        }
    }
}

/// State shared by every template worker of a scan
struct Worker {
    config: ScanConfig,
    ctx: ScanContext,
    profiles: Arc<dyn ProfileProvider>,
    finders: Vec<Arc<dyn Finder>>,
    pool: RequesterPool,
    fs: Arc<dyn FileSystem>,
    modifiers: Vec<Arc<dyn Modifier>>,
    poller: Option<Arc<BlindHostPoller>>,
    stats: StatsHandle,
}

impl Worker {
    async fn process(&self, template: Template) {
        let span = info_span!("template", index = template.index, url = %template.url);
        self.run_template(&template).instrument(span).await;
    }

    async fn run_template(&self, template: &Template) {
        let actives = if template.is_passive_only() || self.config.passive_only {
            Vec::new()
        } else {
            self.profiles.actives_enabled()
        };
        let with_base = template.is_passive_only()
            || !self.profiles.passive_reqs_enabled().is_empty()
            || !self.profiles.passive_res_enabled().is_empty();

        let mut lw = LineOfWork::new(template, &self.finders);
        if !actives.is_empty() {
            lw.discover();
        }
        lw.generate(
            &actives,
            with_base,
            self.config.payload_strategy,
            Capabilities {
                blind_host: self.config.blind_host.is_some(),
                email: self.config.email.is_some(),
            },
        );
        debug!(
            "{} entrypoints, {} tasks",
            lw.entrypoints.len(),
            lw.tasks.len()
        );

        let mut contributed = StatsDelta {
            total_requests: (lw.tasks.len() + lw.skipped) as i64,
            skipped_requests: lw.skipped as i64,
            entrypoints_found: lw.entrypoints.len() as i64,
            ..StatsDelta::default()
        };
        self.stats.record(template.index, contributed).await;

        let lw = &lw;
        let actives = &actives;
        let task_futures: Vec<_> = lw
            .tasks
            .iter()
            .map(|task| self.run_task(lw, actives, task))
            .collect();
        let deltas: Vec<StatsDelta> = stream::iter(task_futures)
            .buffer_unordered(self.pool.max_size())
            .collect()
            .await;
        for delta in deltas {
            contributed += delta;
        }
        contributed += self.resolve_pending(lw).await;

        if self.ctx.is_cancelled() {
            warn!(
                "Template {} interrupted, rolling back its stats",
                template.index
            );
            self.stats.record(template.index, contributed.negated()).await;
            return;
        }

        if let Err(e) = self.fs.store_template(template).await {
            warn!("Failed to store template {}: {}", template.index, e);
        }
        self.stats.template_ended(template.index).await;
    }

    async fn run_task(
        &self,
        lw: &LineOfWork<'_>,
        actives: &[&ActiveProfile],
        task: &Task,
    ) -> StatsDelta {
        let delta = match task {
            Task::Base => self.run_base(lw).await,
            Task::Active {
                profile,
                step,
                payload,
                entrypoints,
            } => {
                let Some(profile) = actives.get(*profile) else {
                    return StatsDelta::default();
                };
                let Some(step_def) = profile.steps.get(*step) else {
                    return StatsDelta::default();
                };
                self.run_active(lw, profile, *step, step_def, *payload, entrypoints)
                    .await
            }
        };
        self.stats.record(lw.template.index, delta).await;
        delta
    }

    async fn run_base(&self, lw: &LineOfWork<'_>) -> StatsDelta {
        let template = lw.template;
        let mut delta = StatsDelta::default();
        let mut summary = TaskSummary {
            template_index: template.index,
            url: template.url.clone(),
            profile_name: None,
            step_index: None,
            param: None,
            payload: None,
            requests: 0,
            matched: false,
            error: None,
        };

        let (request, response) = match &template.response {
            Some(response) => (lw.base.clone(), response.clone()),
            None => {
                let mut request =
                    apply_chain(&self.modifiers, &ModifyContext::base(template), lw.base.clone());
                match self.pool.execute(&self.ctx, &mut request).await {
                    Ok(response) => {
                        delta.performed_requests = 1;
                        delta.succeeded_requests = 1;
                        summary.requests = 1;
                        (request, response)
                    }
                    Err(GauntletError::Cancelled) => return delta,
                    Err(e) => {
                        delta.performed_requests = 1;
                        delta.failed_requests = 1;
                        summary.requests = 1;
                        summary.error = Some(e.to_string());
                        self.record_error(template, &request, &e).await;
                        self.store_summary(&summary).await;
                        return delta;
                    }
                }
            }
        };

        let input = MatchInput {
            request: &request,
            response: &response,
            payload: None,
        };
        let matcher = Matcher::new(&self.ctx).with_original(&self.pool, &lw.base);

        let passes = [
            (ProfileKind::PassiveRequest, self.profiles.passive_reqs_enabled()),
            (ProfileKind::PassiveResponse, self.profiles.passive_res_enabled()),
        ];
        for (kind, profiles) in passes {
            for profile in profiles {
                let source = if kind == ProfileKind::PassiveRequest {
                    delta.requests_to_analyze += 1;
                    GrepSource::PassiveRequest(profile)
                } else {
                    delta.responses_to_analyze += 1;
                    GrepSource::PassiveResponse(profile)
                };

                let (matched, occurrences) = matcher.evaluate(source, &input).await;
                if !matched {
                    continue;
                }
                summary.matched = true;
                if !lw.should_report(signature(&profile.name, None)) {
                    continue;
                }
                self.store_match(Match {
                    id: uuid::Uuid::new_v4().to_string(),
                    url: template.url.clone(),
                    template_index: template.index,
                    profile_name: profile.name.clone(),
                    profile_kind: kind,
                    issue: profile.issue.clone(),
                    param: None,
                    payload: None,
                    requests: vec![request.clone()],
                    responses: vec![response.clone()],
                    occurrences,
                    interaction: None,
                    found_at: chrono::Utc::now(),
                })
                .await;
                delta.matches_found += 1;
            }
        }

        count_baseline(&mut delta, &matcher);
        self.store_summary(&summary).await;
        delta
    }

    async fn run_active(
        &self,
        lw: &LineOfWork<'_>,
        profile: &ActiveProfile,
        step_index: usize,
        step: &Step,
        payload_index: usize,
        targets: &[usize],
    ) -> StatsDelta {
        let template = lw.template;
        let mut delta = StatsDelta::default();
        let Some(raw) = step
            .parsed_payloads()
            .into_iter()
            .nth(payload_index)
            .map(|p| p.value)
        else {
            return delta;
        };
        let encoded = step.encode_payload(&raw);
        let entrypoint = targets.first().and_then(|&i| lw.entrypoints.get(i));

        let injected = lw.inject(step, targets, &encoded);
        let modify_ctx = ModifyContext {
            step: Some(step),
            template,
            entrypoint,
            payload: Some(&raw),
        };
        let mut request = apply_chain(&self.modifiers, &modify_ctx, injected);
        let param = entrypoint.map(|e| e.param(&encoded));

        let mut summary = TaskSummary {
            template_index: template.index,
            url: template.url.clone(),
            profile_name: Some(profile.name.clone()),
            step_index: Some(step_index),
            param: param.clone(),
            payload: Some(raw.clone()),
            requests: 1,
            matched: false,
            error: None,
        };

        let response = match self.pool.execute(&self.ctx, &mut request).await {
            Ok(response) => response,
            Err(GauntletError::Cancelled) => return delta,
            Err(e) => {
                delta.performed_requests = 1;
                delta.failed_requests = 1;
                summary.error = Some(e.to_string());
                self.record_error(template, &request, &e).await;
                self.store_summary(&summary).await;
                return delta;
            }
        };
        delta.performed_requests = 1;
        delta.succeeded_requests = 1;

        let input = MatchInput {
            request: &request,
            response: &response,
            payload: Some(PayloadEcho {
                raw: &raw,
                encoded: &encoded,
            }),
        };
        let matcher = Matcher::new(&self.ctx).with_original(&self.pool, &lw.base);
        let (matched, occurrences) = matcher.evaluate(GrepSource::Step(step), &input).await;
        count_baseline(&mut delta, &matcher);

        let sig = signature(&profile.name, entrypoint);
        if matched {
            summary.matched = true;
            if lw.should_report(sig.clone()) {
                debug!("{} matched on {:?}", profile.name, param);
                self.store_match(Match {
                    id: uuid::Uuid::new_v4().to_string(),
                    url: template.url.clone(),
                    template_index: template.index,
                    profile_name: profile.name.clone(),
                    profile_kind: ProfileKind::Active,
                    issue: step.issue.clone(),
                    param: param.clone(),
                    payload: Some(raw.clone()),
                    requests: vec![request.clone()],
                    responses: vec![response.clone()],
                    occurrences,
                    interaction: None,
                    found_at: chrono::Utc::now(),
                })
                .await;
                delta.matches_found += 1;
            }
        }

        if step.has_blind_host_grep() && !request.uid.is_empty() {
            if let Some(poller) = &self.poller {
                let pending = PendingInteraction {
                    uid: request.uid.clone(),
                    profile_name: profile.name.clone(),
                    issue: step.issue.clone(),
                    signature: sig,
                    param,
                    payload: raw,
                    request,
                    response,
                };
                match poller.search(&pending.uid) {
                    Some(interaction) => {
                        summary.matched = true;
                        delta.matches_found += self.report_interaction(lw, pending, interaction).await;
                    }
                    None => lw.defer(pending),
                }
            }
        }

        self.store_summary(&summary).await;
        delta
    }

    /// Last chance for deferred blind-host requests, once every task of the
    /// template has run
    async fn resolve_pending(&self, lw: &LineOfWork<'_>) -> StatsDelta {
        let mut delta = StatsDelta::default();
        let Some(poller) = &self.poller else {
            return delta;
        };
        let pending = lw.take_pending();
        if pending.is_empty() {
            return delta;
        }
        // Callbacks may land after the poller's last tick
        poller.refresh(&self.ctx).await;
        for pending in pending {
            let found = poller
                .search(&pending.uid)
                .or_else(|| poller.brute_search(&pending.uid));
            if let Some(interaction) = found {
                delta.matches_found += self.report_interaction(lw, pending, interaction).await;
            }
        }
        self.stats.record(lw.template.index, delta).await;
        delta
    }

    /// Reports a confirmed blind-host match; returns how many were stored
    async fn report_interaction(
        &self,
        lw: &LineOfWork<'_>,
        pending: PendingInteraction,
        interaction: Interaction,
    ) -> i64 {
        if !lw.should_report(pending.signature.clone()) {
            return 0;
        }
        info!(
            "Blind host interaction {} ({:?}) confirms {}",
            interaction.id, interaction.protocol, pending.profile_name
        );
        self.store_match(Match {
            id: uuid::Uuid::new_v4().to_string(),
            url: lw.template.url.clone(),
            template_index: lw.template.index,
            profile_name: pending.profile_name,
            profile_kind: ProfileKind::Active,
            issue: pending.issue,
            param: pending.param,
            payload: Some(pending.payload),
            requests: vec![pending.request],
            responses: vec![pending.response],
            occurrences: Vec::new(),
            interaction: Some(interaction),
            found_at: chrono::Utc::now(),
        })
        .await;
        1
    }

    async fn store_match(&self, record: Match) {
        info!(
            "[{}] {} at {}",
            record.issue.severity, record.profile_name, record.url
        );
        if let Err(e) = self.fs.store_match(&record).await {
            warn!("Failed to store match: {}", e);
        }
    }

    async fn store_summary(&self, summary: &TaskSummary) {
        if let Err(e) = self.fs.store_summary(summary).await {
            warn!("Failed to store task summary: {}", e);
        }
    }

    async fn record_error(&self, template: &Template, request: &Request, err: &GauntletError) {
        debug!("Request to {} failed: {}", request.full_url(), err);
        let record = ErrorRecord {
            url: template.url.clone(),
            template_index: template.index,
            requests: vec![request.clone()],
            responses: Vec::<Response>::new(),
            message: err.to_string(),
            at: chrono::Utc::now(),
        };
        if let Err(e) = self.fs.store_error(&record).await {
            warn!("Failed to store error record: {}", e);
        }
    }
}

/// Adds the baseline requests a matcher sent to the task's counters
fn count_baseline(delta: &mut StatsDelta, matcher: &Matcher<'_>) {
    let sent = matcher.baseline_requests();
    let (succeeded, failed) = (sent.succeeded as i64, sent.failed as i64);
    delta.performed_requests += succeeded + failed;
    delta.succeeded_requests += succeeded;
    delta.failed_requests += failed;
}
