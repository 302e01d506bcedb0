//! Parallel build scheduling
//!
//! A build invocation resolves the requested labels to their dependency
//! closure and turns it into a plan: one node per target, each holding an
//! atomic count of unfinished dependencies. Targets with no dependencies
//! start in the ready queue; a fixed pool of workers drains it. When a
//! target succeeds, every dependent's counter is decremented, and the worker
//! that brings a counter to zero moves that dependent from `Unresolved` to
//! `Pending` with a compare-and-swap and enqueues it. Only the winner of
//! that swap enqueues, so every target is built at most once.
//!
//! A failed target marks its transitive dependents `Failed` without queuing
//! them. Without `keep_going` it also aborts the invocation; cancellation
//! does the same from outside. After an abort, workers stop dequeuing,
//! in-flight actions are dropped and every target left unfinished is
//! reported as cancelled.

use crate::config::package_dir;
use crate::outputs::clear_outputs;
use crate::state::{AtomicState, BuildState, FailureReason};
use crate::{ActionRequest, BuildConfig, Executor, Fingerprinter, Result};
use kiln_cache::{Artifact, Cache, Fingerprint, get_or_miss, put_best_effort};
use kiln_graph::{BuildGraph, Label, Target};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Final outcome of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResult {
    /// Target label
    pub label: Label,
    /// Terminal state: `Succeeded`, `CacheHit` or `Failed`
    pub state: BuildState,
    /// Fingerprint, if it was computed
    pub fingerprint: Option<Fingerprint>,
    /// Why the target failed
    pub failure: Option<FailureReason>,
    /// Whether the target is a test
    pub test: bool,
    /// Time spent on the target by its worker
    pub duration: Duration,
}

impl TargetResult {
    /// Whether the target's outputs are available.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.state.is_success()
    }

    /// Whether the target failed because the build was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.failure, Some(FailureReason::Cancelled))
    }
}

/// Results of a finished build invocation.
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// One result per target in the closure, sorted by label
    pub results: Vec<TargetResult>,
    /// Wall-clock time of the invocation
    pub duration: Duration,
}

impl BuildSummary {
    /// Whether every target succeeded or was served from the cache.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results.iter().all(TargetResult::is_success)
    }

    /// Targets built by running their action.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|r| r.state == BuildState::Succeeded)
    }

    /// Targets served from the cache.
    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.count(|r| r.state == BuildState::CacheHit)
    }

    /// Failed targets, including dependents of failures and cancelled ones.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|r| r.state == BuildState::Failed)
    }

    /// Targets that failed only because the build was cancelled.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.count(TargetResult::is_cancelled)
    }

    /// Result for `label`.
    #[must_use]
    pub fn get(&self, label: &Label) -> Option<&TargetResult> {
        self.results
            .binary_search_by(|r| r.label.cmp(label))
            .ok()
            .map(|i| &self.results[i])
    }

    fn count(&self, f: impl Fn(&TargetResult) -> bool) -> usize {
        self.results.iter().filter(|r| f(r)).count()
    }
}

/// Builds targets of a graph through a cache and an executor.
pub struct Scheduler {
    graph: Arc<BuildGraph>,
    cache: Arc<dyn Cache>,
    executor: Arc<dyn Executor>,
    config: BuildConfig,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(
        graph: Arc<BuildGraph>,
        cache: Arc<dyn Cache>,
        executor: Arc<dyn Executor>,
        config: BuildConfig,
    ) -> Self {
        Self {
            graph,
            cache,
            executor,
            config,
        }
    }

    /// Build configuration
    #[must_use]
    pub const fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Start building `labels` and their dependencies.
    ///
    /// Results stream from the returned invocation as targets finish. Must
    /// be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a label is not in the graph; nothing is built.
    #[tracing::instrument(
        name = "build",
        skip(self, labels),
        fields(requested = labels.len(), executor = self.executor.name(), cache = self.cache.name())
    )]
    pub fn start(&self, labels: &[Label]) -> Result<BuildInvocation> {
        let closure = self.graph.resolve(labels)?;
        let jobs = self.config.effective_jobs().min(closure.len()).max(1);
        tracing::info!(targets = closure.len(), jobs, "Starting build");

        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let abort = CancellationToken::new();
        let done = CancellationToken::new();

        let shared = Arc::new(Shared {
            nodes: plan(&closure),
            cache: Arc::clone(&self.cache),
            executor: Arc::clone(&self.executor),
            fingerprinter: Fingerprinter::new(&self.config.workspace_root),
            workspace_root: self.config.workspace_root.clone(),
            output_root: self.config.resolved_output_root(),
            default_timeout: self.config.default_timeout,
            keep_going: self.config.keep_going,
            ready: ready_tx,
            results: results_tx,
            outstanding: AtomicUsize::new(closure.len()),
            abort: abort.clone(),
            done: done.clone(),
        });

        if shared.nodes.is_empty() {
            done.cancel();
        }
        for (idx, node) in shared.nodes.iter().enumerate() {
            if node.remaining.load(Ordering::Acquire) == 0 {
                shared.enqueue(idx);
            }
        }

        let driver = tokio::spawn(drive(shared, Arc::new(Mutex::new(ready_rx)), jobs));
        Ok(BuildInvocation {
            results: results_rx,
            seen: Vec::new(),
            cancel: abort,
            driver: Some(driver),
            started: Instant::now(),
        })
    }

    /// Build `labels` and wait for every result.
    ///
    /// # Errors
    ///
    /// Returns an error if a label is not in the graph. Target failures are
    /// reported in the summary, not as errors.
    pub async fn run(&self, labels: &[Label]) -> Result<BuildSummary> {
        Ok(self.start(labels)?.finish().await)
    }
}

/// A running build.
///
/// Dropping the invocation does not stop the build; call
/// [`BuildInvocation::cancel`] first.
pub struct BuildInvocation {
    results: mpsc::UnboundedReceiver<TargetResult>,
    seen: Vec<TargetResult>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
    started: Instant,
}

impl BuildInvocation {
    /// Next finished target, or `None` once every target has a result.
    pub async fn next(&mut self) -> Option<TargetResult> {
        let result = self.results.recv().await?;
        self.seen.push(result.clone());
        Some(result)
    }

    /// Stop the build.
    ///
    /// Nothing more is dequeued, running actions are stopped and unfinished
    /// targets are reported as cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this build when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the build to finish and summarize every target, including
    /// those already returned by [`BuildInvocation::next`].
    pub async fn finish(mut self) -> BuildSummary {
        while self.next().await.is_some() {}
        if let Some(driver) = self.driver.take()
            && let Err(e) = driver.await
        {
            tracing::error!(error = %e, "Build driver failed");
        }

        let mut results = std::mem::take(&mut self.seen);
        results.sort_by(|a, b| a.label.cmp(&b.label));
        let summary = BuildSummary {
            results,
            duration: self.started.elapsed(),
        };
        tracing::info!(
            built = summary.succeeded(),
            cached = summary.cache_hits(),
            failed = summary.failed(),
            duration_ms = summary.duration.as_millis(),
            "Build finished"
        );
        summary
    }
}

struct Node {
    target: Target,
    deps: Vec<usize>,
    dependents: Vec<usize>,
    remaining: AtomicUsize,
    state: AtomicState,
    fingerprint: OnceLock<Fingerprint>,
    failure: OnceLock<FailureReason>,
}

fn plan(closure: &[&Target]) -> Vec<Node> {
    let index: HashMap<&Label, usize> = closure
        .iter()
        .enumerate()
        .map(|(i, t)| (&t.label, i))
        .collect();

    let mut nodes: Vec<Node> = closure
        .iter()
        .map(|target| {
            let mut deps: Vec<usize> = target
                .deps
                .iter()
                .filter_map(|dep| index.get(dep).copied())
                .collect();
            deps.sort_unstable();
            deps.dedup();
            Node {
                target: (*target).clone(),
                remaining: AtomicUsize::new(deps.len()),
                deps,
                dependents: Vec::new(),
                state: AtomicState::new(),
                fingerprint: OnceLock::new(),
                failure: OnceLock::new(),
            }
        })
        .collect();

    for idx in 0..nodes.len() {
        for dep in nodes[idx].deps.clone() {
            nodes[dep].dependents.push(idx);
        }
    }
    nodes
}

struct Shared {
    nodes: Vec<Node>,
    cache: Arc<dyn Cache>,
    executor: Arc<dyn Executor>,
    fingerprinter: Fingerprinter,
    workspace_root: PathBuf,
    output_root: PathBuf,
    default_timeout: Option<Duration>,
    keep_going: bool,
    ready: mpsc::UnboundedSender<usize>,
    results: mpsc::UnboundedSender<TargetResult>,
    /// Targets without a terminal state
    outstanding: AtomicUsize,
    /// Fail-fast abort or external cancellation
    abort: CancellationToken,
    /// Every target has a terminal state
    done: CancellationToken,
}

async fn drive(
    shared: Arc<Shared>,
    ready: Arc<Mutex<mpsc::UnboundedReceiver<usize>>>,
    jobs: usize,
) {
    let mut workers = JoinSet::new();
    for _ in 0..jobs {
        workers.spawn(worker(Arc::clone(&shared), Arc::clone(&ready)));
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            // a lost worker leaves its target unfinished; stop the rest
            tracing::error!(error = %e, "Build worker panicked");
            shared.abort.cancel();
        }
    }

    for node in &shared.nodes {
        if node.state.fail_if_unfinished() {
            let _ = node.failure.set(FailureReason::Cancelled);
            shared.emit(node, Duration::ZERO);
        }
    }
}

async fn worker(shared: Arc<Shared>, ready: Arc<Mutex<mpsc::UnboundedReceiver<usize>>>) {
    loop {
        let next = tokio::select! {
            biased;
            () = shared.abort.cancelled() => None,
            () = shared.done.cancelled() => None,
            idx = async { ready.lock().await.recv().await } => idx,
        };
        let Some(idx) = next else {
            break;
        };
        Arc::clone(&shared).process(idx).await;
    }
}

impl Shared {
    fn enqueue(&self, idx: usize) {
        if self.nodes[idx]
            .state
            .transition(BuildState::Unresolved, BuildState::Pending)
        {
            // workers hold a clone of the queue, so the send cannot fail
            let _ = self.ready.send(idx);
        }
    }

    fn emit(&self, node: &Node, duration: Duration) {
        let result = TargetResult {
            label: node.target.label.clone(),
            state: node.state.load(),
            fingerprint: node.fingerprint.get().copied(),
            failure: node.failure.get().cloned(),
            test: node.target.test,
            duration,
        };
        // the receiver may have been dropped by a caller not reading results
        let _ = self.results.send(result);
    }

    fn retire(&self, count: usize) {
        if self.outstanding.fetch_sub(count, Ordering::AcqRel) == count {
            self.done.cancel();
        }
    }

    async fn process(self: Arc<Self>, idx: usize) {
        let node = &self.nodes[idx];
        if !node.state.transition(BuildState::Pending, BuildState::Building) {
            return;
        }

        let started = Instant::now();
        match Arc::clone(&self).build(idx).await {
            Ok(state) => {
                node.state.transition(BuildState::Building, state);
                self.emit(node, started.elapsed());
                for &dependent in &node.dependents {
                    if self.nodes[dependent].remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        self.enqueue(dependent);
                    }
                }
                self.retire(1);
            }
            Err(reason) => self.fail(idx, reason, started.elapsed()),
        }
    }

    fn fail(&self, idx: usize, reason: FailureReason, duration: Duration) {
        let node = &self.nodes[idx];
        let cancelled = reason == FailureReason::Cancelled;
        if cancelled {
            tracing::debug!(label = %node.target.label, "Target cancelled");
        } else {
            tracing::error!(label = %node.target.label, reason = %reason, "Target failed");
        }
        let _ = node.failure.set(reason);
        node.state.transition(BuildState::Building, BuildState::Failed);
        self.emit(node, duration);

        let mut retired = 1;
        if !cancelled {
            let mut stack = vec![idx];
            while let Some(current) = stack.pop() {
                let failed = &self.nodes[current].target.label;
                for &dependent in &self.nodes[current].dependents {
                    let target = &self.nodes[dependent];
                    if target.state.transition(BuildState::Unresolved, BuildState::Failed) {
                        let _ = target
                            .failure
                            .set(FailureReason::DependencyFailed(failed.clone()));
                        self.emit(target, Duration::ZERO);
                        retired += 1;
                        stack.push(dependent);
                    }
                }
            }
            if !self.keep_going && !self.abort.is_cancelled() {
                tracing::warn!(label = %node.target.label, "Target failed, aborting build");
                self.abort.cancel();
            }
        }
        self.retire(retired);
    }

    async fn build(self: Arc<Self>, idx: usize) -> std::result::Result<BuildState, FailureReason> {
        if self.abort.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }
        let node = &self.nodes[idx];
        let target = &node.target;

        let fingerprint = self.compute_fingerprint(idx).await?;
        let _ = node.fingerprint.set(fingerprint);
        let outdir = package_dir(&self.output_root, &target.label);

        if target.cacheable
            && let Some(artifact) = get_or_miss(self.cache.as_ref(), &fingerprint).await
        {
            match restore(target, &outdir, artifact).await {
                Ok(files) => {
                    tracing::info!(
                        label = %target.label,
                        fingerprint = %fingerprint,
                        files,
                        "Cache hit"
                    );
                    return Ok(BuildState::CacheHit);
                }
                Err(e) => tracing::warn!(
                    label = %target.label,
                    error = %e,
                    "Cannot materialize cached outputs, building instead"
                ),
            }
        }

        let request = ActionRequest {
            label: target.label.clone(),
            action: target.action.clone(),
            sources: target
                .sources
                .iter()
                .map(|source| self.workspace_root.join(source))
                .collect(),
            inputs: node
                .deps
                .iter()
                .flat_map(|&dep| {
                    let dep = &self.nodes[dep].target;
                    let dir = package_dir(&self.output_root, &dep.label);
                    dep.outputs.iter().map(move |output| dir.join(output))
                })
                .collect(),
            outputs: target.outputs.clone(),
            workdir: outdir.clone(),
            workspace_root: self.workspace_root.clone(),
        };

        let timeout = target.timeout.or(self.default_timeout);
        tracing::info!(label = %target.label, fingerprint = %fingerprint, "Building");
        let run = async {
            let execution = self.executor.execute(request);
            let output = match timeout {
                Some(limit) => tokio::time::timeout(limit, execution)
                    .await
                    .map_err(|_| FailureReason::TimedOut(limit))?,
                None => execution.await,
            };
            output.map_err(|e| FailureReason::Action(e.to_string()))
        };
        let output = tokio::select! {
            biased;
            () = self.abort.cancelled() => return Err(FailureReason::Cancelled),
            output = run => output?,
        };
        tracing::debug!(
            label = %target.label,
            duration_ms = output.duration.as_millis(),
            "Action finished"
        );

        if target.cacheable {
            let outputs = target.outputs.clone();
            let collected = tokio::task::spawn_blocking(move || Artifact::collect(&outdir, &outputs))
                .await
                .map_err(kiln_cache::Error::from)
                .and_then(|artifact| artifact);
            match collected {
                Ok(artifact) => {
                    put_best_effort(self.cache.as_ref(), &fingerprint, &artifact).await;
                }
                Err(e) => {
                    tracing::warn!(label = %target.label, error = %e, "Cannot collect outputs, not caching");
                }
            }
        }
        Ok(BuildState::Succeeded)
    }

    async fn compute_fingerprint(
        self: &Arc<Self>,
        idx: usize,
    ) -> std::result::Result<Fingerprint, FailureReason> {
        let deps: BTreeMap<Label, Fingerprint> = self.nodes[idx]
            .deps
            .iter()
            .filter_map(|&dep| {
                let node = &self.nodes[dep];
                node.fingerprint
                    .get()
                    .map(|fp| (node.target.label.clone(), *fp))
            })
            .collect();

        let shared = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            shared
                .fingerprinter
                .fingerprint(&shared.nodes[idx].target, &deps)
        })
        .await
        .map_err(|e| FailureReason::Fingerprint(e.to_string()))?
        .map_err(|e| FailureReason::Fingerprint(e.to_string()))
    }
}

/// Replace a target's declared outputs with the files of a cached artifact.
///
/// Returns the number of files written.
async fn restore(
    target: &Target,
    outdir: &Path,
    artifact: Artifact,
) -> std::result::Result<usize, String> {
    clear_outputs(&target.label, outdir, &target.outputs)
        .await
        .map_err(|e| e.to_string())?;
    let dir = outdir.to_path_buf();
    tokio::task::spawn_blocking(move || artifact.materialize(&dir))
        .await
        .map_err(kiln_cache::Error::from)
        .and_then(|written| written)
        .map(|written| written.len())
        .map_err(|e| e.to_string())
}
