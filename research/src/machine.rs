//! State machine driving the fixed research stage sequence.
//!
//! Orchestrates the clarification gate, the ordered stages, transition
//! logging, cache markers, and resume. Stage handlers form a fixed ordered
//! list of injected functions of run state; extension replaces a handler
//! rather than subclassing.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::core::citations::{CitationManager, SourceMeta};
use crate::core::clarify::Clarifier;
use crate::core::types::{
    Citation, ClarificationRecord, ClarificationStatus, Depth, ExtractedSource, FetchedSource,
    ParagraphDraft, PlanParams, Stage, VerificationResult,
};
use crate::core::verify::Verifier;
use crate::io::acquire::{FetchRequest, SearchProvider, SearchRequest, SourceFetcher};
use crate::io::answers::AnswerSource;
use crate::io::artifact::{
    read_citations, read_paragraphs, read_paragraphs_text, write_citations, write_paragraphs,
};
use crate::io::cache::CacheManager;
use crate::io::config::EngineConfig;
use crate::io::layout::RunPaths;
use crate::io::persist::{read_json, write_json_atomic, write_text_atomic};
use crate::io::report::{render_report, render_verification_summary};
use crate::io::run_state::{RunState, load_run_state, write_run_state};
use crate::io::transition_log::{
    TransitionRecord, TransitionStatus, append_transition, completed_stages,
};
use crate::io::{now_rfc3339, slugify};
use crate::pool::WorkerPool;

/// Interactive clarification gives up after this many unresolved rounds.
const MAX_CLARIFY_ROUNDS: usize = 5;

/// A stage reported failure or raised an error; the pipeline halted.
///
/// Re-invocation with the same run id is the retry mechanism: completed
/// stages are skipped via the transition log and the cache.
#[derive(Debug, Clone)]
pub struct StageFailedError {
    pub stage: Stage,
    pub reason: String,
}

impl fmt::Display for StageFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} failed: {}", self.stage.as_str(), self.reason)
    }
}

impl std::error::Error for StageFailedError {}

/// Interactive clarification produced no usable answer.
#[derive(Debug, Clone)]
pub struct ClarificationFailedError {
    pub reason: String,
}

impl fmt::Display for ClarificationFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clarification failed: {}", self.reason)
    }
}

impl std::error::Error for ClarificationFailedError {}

/// Caller-visible outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// All stages completed and verification passed.
    Completed,
    /// Non-interactive run needs answers before it can proceed.
    ClarificationRequired { questions: Vec<String> },
    /// The audit ran but structural verification failed. Artifacts are left
    /// on disk for diagnosis.
    VerificationFailed,
}

/// Result of a [`StateMachine::run`] invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub state: RunState,
}

/// Per-invocation options for [`StateMachine::run`].
#[derive(Default)]
pub struct RunOptions<'a> {
    /// Existing run id to resume; a fresh id is generated when absent.
    pub run_id: Option<String>,
    pub workers: Option<usize>,
    pub depth: Option<Depth>,
    pub budget: Option<usize>,
    pub lang: Option<String>,
    /// Interactive answer source; absent means non-interactive mode.
    pub answers: Option<&'a dyn AnswerSource>,
}

/// Capabilities and paths available to stage handlers.
pub struct StageContext<'a> {
    pub paths: &'a RunPaths,
    pub pool: &'a WorkerPool,
    pub cache: &'a CacheManager,
    pub search: &'a dyn SearchProvider,
    pub fetcher: &'a dyn SourceFetcher,
}

/// One stage handler: mutate run state, report success.
pub type StageHandler = Box<dyn Fn(&StageContext<'_>, &mut RunState) -> Result<bool>>;

/// Orchestrates the fixed ordered stage sequence for one run at a time.
pub struct StateMachine<'a> {
    config: EngineConfig,
    clarifier: Clarifier,
    cache: CacheManager,
    search: &'a dyn SearchProvider,
    fetcher: &'a dyn SourceFetcher,
    handlers: Vec<(Stage, StageHandler)>,
}

impl<'a> StateMachine<'a> {
    pub fn new(
        config: EngineConfig,
        search: &'a dyn SearchProvider,
        fetcher: &'a dyn SourceFetcher,
    ) -> Self {
        let cache = CacheManager::new(&config.runs_dir);
        Self {
            config,
            clarifier: Clarifier,
            cache,
            search,
            fetcher,
            handlers: default_handlers(),
        }
    }

    /// Replace the handler for one stage. The stage order itself is fixed.
    pub fn replace_handler(&mut self, stage: Stage, handler: StageHandler) {
        for slot in &mut self.handlers {
            if slot.0 == stage {
                slot.1 = handler;
                return;
            }
        }
    }

    /// Execute (or resume) the pipeline for a topic.
    ///
    /// Completed stages recorded in the transition log are skipped and their
    /// artifacts loaded from disk rather than recomputed. Stage failure halts
    /// immediately; there is no implicit retry.
    pub fn run(&self, topic: &str, opts: &RunOptions<'_>) -> Result<RunReport> {
        self.config.validate()?;

        let topic = topic.trim();
        let run_id = match &opts.run_id {
            Some(id) => id.clone(),
            None => generate_run_id(topic),
        };
        let paths = RunPaths::new(&self.config.runs_dir, &run_id);
        paths.ensure_dirs()?;

        let completed = completed_stages(&paths.pipeline_log_path)?;
        if !completed.is_empty() {
            info!(run_id = %run_id, completed = completed.len(), "resuming existing run");
        }
        let mut state = self.load_or_new_state(&run_id, topic, &paths, &completed, opts)?;

        // Clarification gate: applies until the plan stage has completed.
        if !completed.contains(&Stage::Plan) {
            let gate = self.clarify(&mut state, opts);
            // The record is persisted regardless of outcome, for audit.
            if let Some(record) = &state.clarification {
                write_json_atomic(&paths.clarify_path, record)?;
            }
            write_run_state(&paths.run_state_path, &state)?;
            match gate? {
                ClarifyOutcome::Proceed => {}
                ClarifyOutcome::Suspend(questions) => {
                    info!(run_id = %run_id, "clarification required before the run can proceed");
                    return Ok(RunReport {
                        run_id,
                        outcome: RunOutcome::ClarificationRequired { questions },
                        state,
                    });
                }
            }
        }

        let pool = WorkerPool::new(state.plan.workers);
        let ctx = StageContext {
            paths: &paths,
            pool: &pool,
            cache: &self.cache,
            search: self.search,
            fetcher: self.fetcher,
        };

        for (stage, handler) in &self.handlers {
            let stage = *stage;
            if completed.contains(&stage) {
                debug!(stage = stage.as_str(), "stage already completed, loading artifacts");
                load_stage_artifacts(stage, &ctx, &mut state)?;
                continue;
            }

            state.current_stage = Some(stage);
            self.log(&paths, &run_id, stage, TransitionStatus::Started, json!({}))?;
            info!(stage = stage.as_str(), run_id = %run_id, "stage started");

            match handler(&ctx, &mut state) {
                Ok(true) => {
                    self.log(
                        &paths,
                        &run_id,
                        stage,
                        TransitionStatus::Completed,
                        json!({ "success": true }),
                    )?;
                    self.cache
                        .put(&run_id, stage, stage_artifact_ref(stage), &now_rfc3339())?;
                    state.updated_at = now_rfc3339();
                    write_run_state(&paths.run_state_path, &state)?;
                }
                Ok(false) => {
                    state.failed = true;
                    state.updated_at = now_rfc3339();
                    if stage == Stage::Audit {
                        self.log(
                            &paths,
                            &run_id,
                            stage,
                            TransitionStatus::Failed,
                            verification_details(&state),
                        )?;
                        write_run_state(&paths.run_state_path, &state)?;
                        warn!(run_id = %run_id, "verification failed; artifacts retained for diagnosis");
                        return Ok(RunReport {
                            run_id,
                            outcome: RunOutcome::VerificationFailed,
                            state,
                        });
                    }
                    let reason = format!("stage {} reported failure", stage.as_str());
                    self.log(
                        &paths,
                        &run_id,
                        stage,
                        TransitionStatus::Failed,
                        json!({ "reason": reason }),
                    )?;
                    write_run_state(&paths.run_state_path, &state)?;
                    return Err(StageFailedError { stage, reason }.into());
                }
                Err(err) => {
                    state.failed = true;
                    state.updated_at = now_rfc3339();
                    self.log(
                        &paths,
                        &run_id,
                        stage,
                        TransitionStatus::Failed,
                        json!({ "error": format!("{err:#}") }),
                    )?;
                    write_run_state(&paths.run_state_path, &state)?;
                    return Err(err.context(StageFailedError {
                        stage,
                        reason: "stage raised an error".to_string(),
                    }));
                }
            }
        }

        info!(run_id = %run_id, "pipeline completed");
        Ok(RunReport {
            run_id,
            outcome: RunOutcome::Completed,
            state,
        })
    }

    fn load_or_new_state(
        &self,
        run_id: &str,
        topic: &str,
        paths: &RunPaths,
        completed: &BTreeSet<Stage>,
        opts: &RunOptions<'_>,
    ) -> Result<RunState> {
        let now = now_rfc3339();
        let mut state = if paths.run_state_path.exists() {
            let mut loaded = load_run_state(&paths.run_state_path)?;
            // The stored, possibly clarified topic wins on resume.
            if loaded.topic.trim().is_empty() {
                loaded.topic = topic.to_string();
            }
            loaded.failed = false;
            loaded
        } else {
            RunState::new(
                run_id,
                topic,
                PlanParams {
                    workers: self.config.workers,
                    depth: self.config.depth,
                    budget: self.config.budget,
                    lang: self.config.lang.clone(),
                    queries: Vec::new(),
                },
                &now,
            )
        };

        // Overrides apply until the plan stage freezes the parameters.
        if !completed.contains(&Stage::Plan) {
            if let Some(workers) = opts.workers {
                state.plan.workers = workers;
            }
            if let Some(depth) = opts.depth {
                state.plan.depth = depth;
            }
            if let Some(budget) = opts.budget {
                state.plan.budget = budget;
            }
            if let Some(lang) = &opts.lang {
                state.plan.lang = lang.clone();
            }
        }
        if state.plan.workers == 0 {
            bail!("workers must be > 0");
        }
        if state.plan.budget == 0 {
            bail!("budget must be > 0");
        }
        Ok(state)
    }

    fn clarify(&self, state: &mut RunState, opts: &RunOptions<'_>) -> Result<ClarifyOutcome> {
        let original = state.topic.clone();
        if !self.clarifier.needs_clarification(&state.topic) {
            // Gate passed as given: record the accepted topic as its own
            // answer so clarified status always carries a non-empty answer
            // list.
            if state.clarification.is_none() {
                state.clarification = Some(ClarificationRecord {
                    status: ClarificationStatus::Clarified,
                    original_topic: original.clone(),
                    final_topic: original.clone(),
                    questions: Vec::new(),
                    answers: vec![original],
                    failure_reason: None,
                });
            }
            return Ok(ClarifyOutcome::Proceed);
        }

        let mut record = state.clarification.clone().unwrap_or(ClarificationRecord {
            status: ClarificationStatus::Pending,
            original_topic: original.clone(),
            final_topic: original,
            questions: Vec::new(),
            answers: Vec::new(),
            failure_reason: None,
        });

        for _round in 0..MAX_CLARIFY_ROUNDS {
            let questions = self.clarifier.generate_questions(&state.topic);
            record.status = ClarificationStatus::Pending;
            record.questions = questions.clone();

            let Some(answer_source) = opts.answers else {
                state.clarification = Some(record);
                return Ok(ClarifyOutcome::Suspend(questions));
            };

            let answers: Vec<String> = answer_source
                .ask(&questions)?
                .into_iter()
                .map(|answer| answer.trim().to_string())
                .filter(|answer| !answer.is_empty())
                .collect();
            if answers.is_empty() {
                let reason = "no clarification answers provided".to_string();
                record.status = ClarificationStatus::Failed;
                record.failure_reason = Some(reason.clone());
                state.clarification = Some(record);
                return Err(ClarificationFailedError { reason }.into());
            }

            // The answers restate the topic; the merged topic is rebuilt from
            // them rather than appended, so a vague token in the original
            // cannot keep the gate firing forever.
            state.topic = answers.join(" ").trim().to_string();
            record.answers.extend(answers);
            record.final_topic = state.topic.clone();

            if !self.clarifier.needs_clarification(&state.topic) {
                record.status = ClarificationStatus::Clarified;
                state.clarification = Some(record);
                return Ok(ClarifyOutcome::Proceed);
            }
            debug!(topic = %state.topic, "merged topic still ambiguous, asking again");
        }

        let reason = format!("topic still ambiguous after {MAX_CLARIFY_ROUNDS} rounds");
        record.status = ClarificationStatus::Failed;
        record.failure_reason = Some(reason.clone());
        state.clarification = Some(record);
        Err(ClarificationFailedError { reason }.into())
    }

    fn log(
        &self,
        paths: &RunPaths,
        run_id: &str,
        stage: Stage,
        status: TransitionStatus,
        details: Value,
    ) -> Result<()> {
        append_transition(
            &paths.pipeline_log_path,
            &TransitionRecord {
                timestamp: now_rfc3339(),
                run_id: run_id.to_string(),
                stage,
                status,
                details,
            },
        )
    }
}

enum ClarifyOutcome {
    Proceed,
    Suspend(Vec<String>),
}

/// Re-run structural verification over an existing run directory without
/// touching the acquisition stages.
pub fn verify_run(config: &EngineConfig, run_id: &str) -> Result<RunReport> {
    let paths = RunPaths::new(&config.runs_dir, run_id);
    if !paths.run_dir.exists() {
        bail!("unknown run id {run_id}");
    }

    let mut state = load_run_state(&paths.run_state_path)?;
    if state.citations.is_empty() && paths.citations_path.exists() {
        state.citations = read_citations(&paths.citations_path)?;
    }

    let result = run_verification(&paths, &state.citations)?;
    let passed = result.passed;
    state.verification = Some(result);
    state.failed = !passed;
    state.updated_at = now_rfc3339();
    write_run_state(&paths.run_state_path, &state)?;

    let outcome = if passed {
        RunOutcome::Completed
    } else {
        RunOutcome::VerificationFailed
    };
    Ok(RunReport {
        run_id: run_id.to_string(),
        outcome,
        state,
    })
}

fn generate_run_id(topic: &str) -> String {
    let slug = slugify(topic, 20);
    let slug = if slug.is_empty() { "run".to_string() } else { slug };
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    format!("{slug}_{stamp}")
}

/// Primary artifact path for a stage, relative to the run directory.
fn stage_artifact_ref(stage: Stage) -> &'static str {
    match stage {
        Stage::Intake => "clarify.json",
        Stage::Plan => "logs/plan.json",
        Stage::Harvest => "evidence/harvest.json",
        Stage::Fetch => "evidence/fetch.json",
        Stage::Extract => "evidence/extract.json",
        Stage::Verify => "drafts/paragraphs.jsonl",
        Stage::Write => "final/report.md",
        Stage::Audit => "evidence/verify.json",
        Stage::Cache => "run_state.json",
    }
}

/// Reload a completed stage's artifacts into run state instead of
/// recomputing them.
fn load_stage_artifacts(stage: Stage, ctx: &StageContext<'_>, state: &mut RunState) -> Result<()> {
    let paths = ctx.paths;
    match stage {
        Stage::Intake => {
            if paths.clarify_path.exists() {
                let record: ClarificationRecord = read_json(&paths.clarify_path)?;
                if !record.final_topic.trim().is_empty() {
                    state.topic = record.final_topic.clone();
                }
                state.clarification = Some(record);
            }
        }
        Stage::Plan => {
            if paths.plan_path.exists() {
                state.plan = read_json(&paths.plan_path)?;
            }
        }
        Stage::Harvest => {
            if paths.harvest_path.exists() {
                state.harvest = read_json(&paths.harvest_path)?;
            }
        }
        Stage::Fetch => {
            if paths.fetch_path.exists() {
                state.fetched = read_json(&paths.fetch_path)?;
            }
        }
        Stage::Extract => {
            if paths.extract_path.exists() {
                state.extracts = read_json(&paths.extract_path)?;
            }
            if paths.citations_path.exists() {
                state.citations = read_citations(&paths.citations_path)?;
            }
        }
        Stage::Verify => {
            if paths.paragraphs_path.exists() {
                state.paragraphs = read_paragraphs(&paths.paragraphs_path)?;
            }
        }
        Stage::Write => {}
        Stage::Audit => {
            if paths.verify_json_path.exists() {
                state.verification = Some(read_json(&paths.verify_json_path)?);
            }
        }
        Stage::Cache => {}
    }
    Ok(())
}

fn default_handlers() -> Vec<(Stage, StageHandler)> {
    vec![
        (Stage::Intake, Box::new(stage_intake) as StageHandler),
        (Stage::Plan, Box::new(stage_plan) as StageHandler),
        (Stage::Harvest, Box::new(stage_harvest) as StageHandler),
        (Stage::Fetch, Box::new(stage_fetch) as StageHandler),
        (Stage::Extract, Box::new(stage_extract) as StageHandler),
        (Stage::Verify, Box::new(stage_verify) as StageHandler),
        (Stage::Write, Box::new(stage_write) as StageHandler),
        (Stage::Audit, Box::new(stage_audit) as StageHandler),
        (Stage::Cache, Box::new(stage_cache) as StageHandler),
    ]
}

/// Validate the topic and persist the clarification record.
fn stage_intake(ctx: &StageContext<'_>, state: &mut RunState) -> Result<bool> {
    if state.topic.trim().is_empty() {
        return Err(anyhow!("topic is empty after clarification"));
    }
    state.topic = state.topic.trim().to_string();
    if let Some(record) = &state.clarification {
        write_json_atomic(&ctx.paths.clarify_path, record)?;
    }
    Ok(true)
}

/// Freeze plan parameters and derive the harvest queries.
fn stage_plan(ctx: &StageContext<'_>, state: &mut RunState) -> Result<bool> {
    if state.plan.queries.is_empty() {
        state.plan.queries = vec![state.topic.clone()];
    }
    write_json_atomic(&ctx.paths.plan_path, &state.plan)?;
    Ok(true)
}

/// Discover candidate sources for each plan query through the pool.
///
/// Fails the stage when no query yields a source.
fn stage_harvest(ctx: &StageContext<'_>, state: &mut RunState) -> Result<bool> {
    let requests: Vec<SearchRequest> = state
        .plan
        .queries
        .iter()
        .map(|query| SearchRequest {
            query: query.clone(),
            limit: state.plan.budget,
            lang: state.plan.lang.clone(),
        })
        .collect();

    let results = ctx.pool.submit(requests, |request| ctx.search.search(request));

    let mut seen = BTreeSet::new();
    let mut sources = Vec::new();
    for (query_index, result) in results.into_iter().enumerate() {
        match result {
            Ok(found) => {
                for source in found {
                    if sources.len() >= state.plan.budget {
                        break;
                    }
                    if seen.insert(source.url.clone()) {
                        sources.push(source);
                    }
                }
            }
            Err(err) => warn!(query_index, "harvest query failed: {err:#}"),
        }
    }

    if sources.is_empty() {
        warn!("no sources discovered");
        return Ok(false);
    }
    write_json_atomic(&ctx.paths.harvest_path, &sources)?;
    state.harvest = sources;
    Ok(true)
}

/// Retrieve content for each discovered source.
///
/// A prior invocation's results for the same run id are reused via the cache
/// entry's fetch artifact. Per-item failures yield fewer sources; the stage
/// fails only when nothing was fetched.
fn stage_fetch(ctx: &StageContext<'_>, state: &mut RunState) -> Result<bool> {
    if let Some(artifact) = ctx.cache.artifact(&state.run_id, Stage::Fetch)? {
        let cached_path = ctx.paths.run_dir.join(&artifact);
        if cached_path.exists() {
            state.fetched = read_json(&cached_path)?;
            debug!(artifact = %artifact, "fetch cache hit, skipping acquisition");
            return Ok(true);
        }
    }

    let requests: Vec<FetchRequest> = state
        .harvest
        .iter()
        .map(|source| FetchRequest {
            url: source.url.clone(),
            title: source.title.clone(),
        })
        .collect();
    let total = requests.len();

    let results = ctx.pool.submit(requests, |request| ctx.fetcher.fetch(request));

    let mut fetched = Vec::new();
    for (source_index, result) in results.into_iter().enumerate() {
        match result {
            Ok(source) => fetched.push(source),
            Err(err) => warn!(source_index, "fetch failed: {err:#}"),
        }
    }

    if fetched.is_empty() {
        warn!(total, "no sources fetched");
        return Ok(false);
    }
    write_json_atomic(&ctx.paths.fetch_path, &fetched)?;
    state.fetched = fetched;
    Ok(true)
}

/// Extract key points and register one citation per fetched source.
///
/// Safe to re-enter: sources already covered by a registered citation are
/// not registered again, so cids are never renumbered.
fn stage_extract(ctx: &StageContext<'_>, state: &mut RunState) -> Result<bool> {
    let mut manager = CitationManager::from_existing(std::mem::take(&mut state.citations));
    let mut extracts = Vec::new();

    for (position, source) in state.fetched.iter().enumerate() {
        let extract = extract_source(source);
        if position >= manager.len() {
            manager.register(SourceMeta {
                url: source.url.clone(),
                title: source.title.clone(),
                locator: source.url.clone(),
                fetched_at: source.fetched_at.clone(),
                excerpt: extract.excerpt.clone(),
                local_path: None,
            });
        }
        extracts.push(extract);
    }

    state.citations = manager.into_citations();
    write_json_atomic(&ctx.paths.extract_path, &extracts)?;
    write_citations(&ctx.paths.citations_path, &state.citations)?;
    state.extracts = extracts;
    Ok(true)
}

/// Derive key points from fetched content: first non-empty line, clamped.
fn extract_source(source: &FetchedSource) -> ExtractedSource {
    let first_line: String = source
        .content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .chars()
        .take(240)
        .collect();

    let (key_point, excerpt) = if first_line.is_empty() {
        (format!("Key finding from {}.", source.title), None)
    } else {
        (first_line.clone(), Some(first_line))
    };
    ExtractedSource {
        url: source.url.clone(),
        title: source.title.clone(),
        key_points: vec![key_point],
        excerpt,
    }
}

/// Build paragraph drafts from the extracts and persist them as JSONL.
///
/// Every draft must cite a registered citation; a dangling id is a bug in
/// the extract stage, not a verification finding.
fn stage_verify(ctx: &StageContext<'_>, state: &mut RunState) -> Result<bool> {
    let known: BTreeSet<&str> = state.citations.iter().map(|c| c.cid.as_str()).collect();

    let mut paragraphs = Vec::new();
    for (extract, citation) in state.extracts.iter().zip(&state.citations) {
        let Some(text) = extract.key_points.first() else {
            continue;
        };
        paragraphs.push(ParagraphDraft {
            text: text.clone(),
            cite_ids: vec![citation.cid.clone()],
        });
    }

    for paragraph in &paragraphs {
        for cid in &paragraph.cite_ids {
            if !known.contains(cid.as_str()) {
                return Err(anyhow!("paragraph cites unregistered citation {cid}"));
            }
        }
    }

    if paragraphs.is_empty() {
        warn!("no paragraphs drafted");
        return Ok(false);
    }
    write_paragraphs(&ctx.paths.paragraphs_path, &paragraphs)?;
    state.paragraphs = paragraphs;
    Ok(true)
}

/// Render the final report; every paragraph ends with its citation markers.
fn stage_write(ctx: &StageContext<'_>, state: &mut RunState) -> Result<bool> {
    let report = render_report(&state.topic, &state.paragraphs)?;
    write_text_atomic(&ctx.paths.report_path, &report)?;
    Ok(true)
}

/// Run structural verification over the rendered report and the drafts.
fn stage_audit(ctx: &StageContext<'_>, state: &mut RunState) -> Result<bool> {
    let result = run_verification(ctx.paths, &state.citations)?;
    let passed = result.passed;
    state.verification = Some(result);
    if !passed {
        warn!("structural verification failed");
    }
    Ok(passed)
}

/// Finalize the per-run cache entry. Fetch results were already cached when
/// the fetch stage completed.
fn stage_cache(ctx: &StageContext<'_>, state: &mut RunState) -> Result<bool> {
    match ctx.cache.get(&state.run_id)? {
        Some(entry) => {
            debug!(artifacts = entry.artifacts.len(), "cache entry finalized");
            Ok(true)
        }
        None => {
            warn!("no cache entry recorded for run");
            Ok(false)
        }
    }
}

/// Verify the persisted report and drafts, writing both verification
/// artifacts.
fn run_verification(paths: &RunPaths, citations: &[Citation]) -> Result<VerificationResult> {
    let report = fs::read_to_string(&paths.report_path)
        .with_context(|| format!("read report {}", paths.report_path.display()))?;
    let drafts = read_paragraphs_text(&paths.paragraphs_path)?;

    let verifier = Verifier;
    let draft_check = verifier.verify_paragraph_drafts(&drafts)?;
    let report_check = verifier.verify_report(&report, citations);
    let result = verifier.combine(&draft_check, &report_check);

    write_json_atomic(&paths.verify_json_path, &result)?;
    write_text_atomic(&paths.verification_md_path, &render_verification_summary(&result))?;
    Ok(result)
}

fn verification_details(state: &RunState) -> Value {
    match &state.verification {
        Some(result) => json!({
            "passed": result.passed,
            "report_passed": result.report_passed,
            "paragraphs_jsonl_cite_ids_passed": result.paragraphs_jsonl_cite_ids_passed,
            "paragraph_end_citation_passed": result.paragraph_end_citation_passed,
            "paragraph_without_citation_count": result.paragraph_without_citation_count,
        }),
        None => json!({ "passed": false }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::test_support::{CountingFetcher, CountingSearch, ScriptedAnswers};

    const TOPIC: &str = "quantum computing applications";

    fn test_config(root: &Path) -> EngineConfig {
        EngineConfig {
            runs_dir: root.join("runs"),
            workers: 2,
            budget: 2,
            ..EngineConfig::default()
        }
    }

    fn run_opts(run_id: &str) -> RunOptions<'static> {
        RunOptions {
            run_id: Some(run_id.to_string()),
            ..RunOptions::default()
        }
    }

    /// End-to-end with budget 2: exactly C001 and C002 are registered, every
    /// paragraph cites only those, and combined verification passes.
    #[test]
    fn pipeline_completes_with_deterministic_citations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let search = CountingSearch::default();
        let fetcher = CountingFetcher::default();
        let machine = StateMachine::new(config.clone(), &search, &fetcher);

        let report = machine.run(TOPIC, &run_opts("e2e")).expect("run");
        assert_eq!(report.outcome, RunOutcome::Completed);

        let cids: Vec<&str> = report.state.citations.iter().map(|c| c.cid.as_str()).collect();
        assert_eq!(cids, vec!["C001", "C002"]);
        for paragraph in &report.state.paragraphs {
            assert!(!paragraph.cite_ids.is_empty());
            for cid in &paragraph.cite_ids {
                assert!(cid == "C001" || cid == "C002", "unexpected cid {cid}");
            }
        }

        let verification = report.state.verification.as_ref().expect("verification");
        assert!(verification.passed);
        assert!(verification.report_passed);
        assert!(verification.paragraph_end_citation_passed);
        assert!(verification.paragraphs_jsonl_cite_ids_passed);
        assert_eq!(verification.paragraph_without_citation_count, 0);

        let paths = RunPaths::new(&config.runs_dir, "e2e");
        assert!(paths.report_path.is_file());
        assert!(paths.citations_path.is_file());
        assert!(paths.paragraphs_path.is_file());
        assert!(paths.verify_json_path.is_file());
        assert!(paths.verification_md_path.is_file());
        assert!(paths.pipeline_log_path.is_file());
        assert!(paths.plan_path.is_file());

        // Gate passed as given: the record is clarified with the topic as its
        // accepted answer.
        let record: ClarificationRecord = read_json(&paths.clarify_path).expect("clarify");
        assert_eq!(record.status, ClarificationStatus::Clarified);
        assert_eq!(record.answers, vec![TOPIC.to_string()]);

        assert_eq!(search.call_count(), 1);
        assert_eq!(fetcher.call_count(), 2);
    }

    /// Non-interactive vague topic: distinguished clarification-required
    /// outcome, no stage executed, record persisted as pending.
    #[test]
    fn non_interactive_vague_topic_suspends() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let search = CountingSearch::default();
        let fetcher = CountingFetcher::default();
        let machine = StateMachine::new(config.clone(), &search, &fetcher);

        let report = machine.run("ai", &run_opts("vague")).expect("run");
        let RunOutcome::ClarificationRequired { questions } = &report.outcome else {
            panic!("expected clarification-required outcome, got {:?}", report.outcome);
        };
        assert!(!questions.is_empty());
        assert!(questions.len() <= 3);

        let paths = RunPaths::new(&config.runs_dir, "vague");
        let record: ClarificationRecord = read_json(&paths.clarify_path).expect("clarify");
        assert_eq!(record.status, ClarificationStatus::Pending);
        assert_eq!(record.questions, *questions);
        assert!(!paths.pipeline_log_path.exists(), "no stage should have run");
        assert_eq!(search.call_count(), 0);
        assert_eq!(fetcher.call_count(), 0);
    }

    /// Interactive mode rebuilds the topic from the answers and proceeds
    /// once the rebuilt topic passes the gate.
    #[test]
    fn interactive_clarification_merges_answers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let search = CountingSearch::default();
        let fetcher = CountingFetcher::default();
        let machine = StateMachine::new(config.clone(), &search, &fetcher);

        let answers = ScriptedAnswers::new(&["impact of machine learning on radiology workflows"]);
        let opts = RunOptions {
            run_id: Some("interactive".to_string()),
            answers: Some(&answers),
            ..RunOptions::default()
        };
        let report = machine.run("ml", &opts).expect("run");
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.state.topic, "impact of machine learning on radiology workflows");

        let paths = RunPaths::new(&config.runs_dir, "interactive");
        let record: ClarificationRecord = read_json(&paths.clarify_path).expect("clarify");
        assert_eq!(record.status, ClarificationStatus::Clarified);
        assert!(!record.answers.is_empty());
        assert_eq!(record.final_topic, report.state.topic);
    }

    /// Interactive mode with no usable answers fails with a distinguished
    /// clarification error and a failed record.
    #[test]
    fn interactive_blank_answers_fail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let search = CountingSearch::default();
        let fetcher = CountingFetcher::default();
        let machine = StateMachine::new(config.clone(), &search, &fetcher);

        let answers = ScriptedAnswers::new(&["   "]);
        let opts = RunOptions {
            run_id: Some("no-answers".to_string()),
            answers: Some(&answers),
            ..RunOptions::default()
        };
        let err = machine.run("ai", &opts).expect_err("should fail");
        let clarification = err
            .downcast_ref::<ClarificationFailedError>()
            .expect("clarification error");
        assert!(clarification.reason.contains("no clarification answers"));

        let paths = RunPaths::new(&config.runs_dir, "no-answers");
        let record: ClarificationRecord = read_json(&paths.clarify_path).expect("clarify");
        assert_eq!(record.status, ClarificationStatus::Failed);
        assert!(record.failure_reason.is_some());
    }

    /// A failing injected stage halts the pipeline after fetch; re-invoking
    /// with the same run id skips harvest/fetch via the log and produces
    /// artifacts identical to an uninterrupted run.
    #[test]
    fn resume_skips_completed_acquisition_stages() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());

        // First invocation: extract is scripted to fail.
        let search = CountingSearch::default();
        let fetcher = CountingFetcher::default();
        let mut machine = StateMachine::new(config.clone(), &search, &fetcher);
        machine.replace_handler(
            Stage::Extract,
            Box::new(|_ctx: &StageContext<'_>, _state: &mut RunState| {
                Err(anyhow!("extract backend offline"))
            }),
        );

        let err = machine.run(TOPIC, &run_opts("resumable")).expect_err("should halt");
        let failed = err.downcast_ref::<StageFailedError>().expect("stage error");
        assert_eq!(failed.stage, Stage::Extract);
        assert_eq!(search.call_count(), 1);
        assert_eq!(fetcher.call_count(), 2);

        let paths = RunPaths::new(&config.runs_dir, "resumable");
        let completed = completed_stages(&paths.pipeline_log_path).expect("replay");
        assert!(completed.contains(&Stage::Fetch));
        assert!(!completed.contains(&Stage::Extract));

        // Second invocation with default handlers: acquisition is skipped.
        let search2 = CountingSearch::default();
        let fetcher2 = CountingFetcher::default();
        let machine2 = StateMachine::new(config.clone(), &search2, &fetcher2);
        let report = machine2.run("", &run_opts("resumable")).expect("resume");
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(search2.call_count(), 0, "harvest must be skipped on resume");
        assert_eq!(fetcher2.call_count(), 0, "fetch must be skipped on resume");

        let cids: Vec<&str> = report.state.citations.iter().map(|c| c.cid.as_str()).collect();
        assert_eq!(cids, vec!["C001", "C002"]);

        // Equivalence with an uninterrupted control run.
        let search3 = CountingSearch::default();
        let fetcher3 = CountingFetcher::default();
        let machine3 = StateMachine::new(config.clone(), &search3, &fetcher3);
        let control = machine3.run(TOPIC, &run_opts("control")).expect("control run");
        assert_eq!(control.outcome, RunOutcome::Completed);

        let control_paths = RunPaths::new(&config.runs_dir, "control");
        let resumed_report = fs::read_to_string(&paths.report_path).expect("resumed report");
        let control_report = fs::read_to_string(&control_paths.report_path).expect("control report");
        assert_eq!(resumed_report, control_report);

        let resumed_citations = fs::read_to_string(&paths.citations_path).expect("resumed citations");
        let control_citations =
            fs::read_to_string(&control_paths.citations_path).expect("control citations");
        assert_eq!(resumed_citations, control_citations);
    }

    /// Corrupting the drafts and re-running verification alone yields the
    /// distinguished verification-failed outcome and leaves artifacts intact.
    #[test]
    fn corrupted_drafts_fail_standalone_verification() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let search = CountingSearch::default();
        let fetcher = CountingFetcher::default();
        let machine = StateMachine::new(config.clone(), &search, &fetcher);

        let report = machine.run(TOPIC, &run_opts("audit-me")).expect("run");
        assert_eq!(report.outcome, RunOutcome::Completed);

        let paths = RunPaths::new(&config.runs_dir, "audit-me");
        fs::write(&paths.paragraphs_path, "{\"text\":\"x\",\"cite_ids\":[]}\n").expect("corrupt");

        let reverified = verify_run(&config, "audit-me").expect("verify");
        assert_eq!(reverified.outcome, RunOutcome::VerificationFailed);
        let result = reverified.state.verification.expect("verification");
        assert!(!result.passed);
        assert!(!result.paragraphs_jsonl_cite_ids_passed);
        assert_eq!(result.paragraph_without_citation_count, 1);

        // Artifacts are retained for diagnosis.
        assert!(paths.report_path.is_file());
        assert!(paths.citations_path.is_file());
        let detail: VerificationResult = read_json(&paths.verify_json_path).expect("detail");
        assert!(!detail.passed);
    }

    /// Audit failure inside the pipeline surfaces as a verification-failed
    /// outcome (not a stage error) and logs the audit as failed so a resumed
    /// run re-enters at audit.
    #[test]
    fn audit_failure_is_not_a_stage_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let search = CountingSearch::default();
        let fetcher = CountingFetcher::default();
        let mut machine = StateMachine::new(config.clone(), &search, &fetcher);

        // Sabotage the write stage so the report misses its end citations.
        machine.replace_handler(
            Stage::Write,
            Box::new(|ctx: &StageContext<'_>, state: &mut RunState| {
                let mut report = format!("# Research Report: {}\n\n", state.topic);
                for paragraph in &state.paragraphs {
                    report.push_str(&paragraph.text);
                    report.push('\n');
                }
                write_text_atomic(&ctx.paths.report_path, &report)?;
                Ok(true)
            }),
        );

        let report = machine.run(TOPIC, &run_opts("bad-report")).expect("run");
        assert_eq!(report.outcome, RunOutcome::VerificationFailed);

        let paths = RunPaths::new(&config.runs_dir, "bad-report");
        let completed = completed_stages(&paths.pipeline_log_path).expect("replay");
        assert!(completed.contains(&Stage::Write));
        assert!(!completed.contains(&Stage::Audit), "failed audit must not count as completed");

        let result = report.state.verification.expect("verification");
        assert!(!result.paragraph_end_citation_passed);
        assert!(result.paragraphs_jsonl_cite_ids_passed, "draft check is independent");
    }

    /// With the transition log gone but the cache entry present, a re-run
    /// re-executes harvest but skips acquisition in fetch via the cache, and
    /// extract keeps the original cids.
    #[test]
    fn fetch_cache_hit_survives_log_loss() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let search = CountingSearch::default();
        let fetcher = CountingFetcher::default();
        let machine = StateMachine::new(config.clone(), &search, &fetcher);

        machine.run(TOPIC, &run_opts("cache-hit")).expect("first run");
        assert_eq!(fetcher.call_count(), 2);

        let paths = RunPaths::new(&config.runs_dir, "cache-hit");
        fs::remove_file(&paths.pipeline_log_path).expect("drop log");

        let report = machine.run(TOPIC, &run_opts("cache-hit")).expect("second run");
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(search.call_count(), 2, "harvest re-runs without the log");
        assert_eq!(fetcher.call_count(), 2, "fetch must hit the cache");

        let cids: Vec<&str> = report.state.citations.iter().map(|c| c.cid.as_str()).collect();
        assert_eq!(cids, vec!["C001", "C002"], "cids are never renumbered");
    }

    /// Per-item fetch failures reduce the source set without failing the
    /// stage; citations cover only the fetched sources.
    #[test]
    fn partial_fetch_failure_yields_fewer_sources() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let search = CountingSearch::default();
        let fetcher = CountingFetcher::failing_on("/source/0");
        let machine = StateMachine::new(config, &search, &fetcher);

        let report = machine.run(TOPIC, &run_opts("partial")).expect("run");
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.state.fetched.len(), 1);
        let cids: Vec<&str> = report.state.citations.iter().map(|c| c.cid.as_str()).collect();
        assert_eq!(cids, vec!["C001"]);
    }

    /// All fetches failing is a stage failure, halting the pipeline.
    #[test]
    fn empty_fetch_result_fails_the_stage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let search = CountingSearch::default();
        let fetcher = CountingFetcher::failing_on("/source/");
        let machine = StateMachine::new(config.clone(), &search, &fetcher);

        let err = machine.run(TOPIC, &run_opts("all-fail")).expect_err("should halt");
        let failed = err.downcast_ref::<StageFailedError>().expect("stage error");
        assert_eq!(failed.stage, Stage::Fetch);

        let paths = RunPaths::new(&config.runs_dir, "all-fail");
        let completed = completed_stages(&paths.pipeline_log_path).expect("replay");
        assert!(completed.contains(&Stage::Harvest));
        assert!(!completed.contains(&Stage::Fetch));
    }
}
