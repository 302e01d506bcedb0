//! Build scenarios run through the scheduler.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use kiln_cache::{Cache, CacheMode, ChainCache, LocalStore, MemoryCache};
use kiln_engine::{
    ActionOutput, ActionRequest, BuildConfig, BuildState, Error, ExecutionError, Executor,
    FailureReason, HostExecutor, Scheduler,
};
use kiln_graph::{Action, BuildGraph, Label, Package, Target};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn label(raw: &str) -> Label {
    Label::parse(raw).unwrap()
}

fn graph(targets: Vec<Target>) -> Arc<BuildGraph> {
    let mut by_package: BTreeMap<String, Vec<Target>> = BTreeMap::new();
    for target in targets {
        by_package
            .entry(target.label.package().to_string())
            .or_default()
            .push(target);
    }
    let packages = by_package
        .into_iter()
        .map(|(path, targets)| Package::new(path, targets).unwrap());
    Arc::new(BuildGraph::from_packages(packages).unwrap())
}

/// Records every action it runs and fails the labels it is told to.
#[derive(Default)]
struct RecordingExecutor {
    runs: Mutex<Vec<Label>>,
    failing: HashSet<Label>,
    delay: Duration,
}

impl RecordingExecutor {
    fn failing(labels: &[&str]) -> Self {
        Self {
            failing: labels.iter().map(|l| label(l)).collect(),
            ..Self::default()
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn runs(&self) -> Vec<Label> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, request: ActionRequest) -> Result<ActionOutput, ExecutionError> {
        self.runs.lock().unwrap().push(request.label.clone());
        tokio::time::sleep(self.delay).await;
        if self.failing.contains(&request.label) {
            return Err(ExecutionError::Failed {
                label: request.label.clone(),
                code: Some(1),
                summary: format!("{} failed on purpose", request.label),
            });
        }
        Ok(ActionOutput {
            outputs: vec![],
            stdout: String::new(),
            stderr: String::new(),
            duration: self.delay,
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct Workspace {
    root: TempDir,
    cache_dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("src")).unwrap();
        Self {
            root,
            cache_dir: TempDir::new().unwrap(),
        }
    }

    fn write(&self, path: &str, content: &str) {
        fs::write(self.root.path().join(path), content).unwrap();
    }

    fn read_output(&self, path: &str) -> String {
        fs::read_to_string(self.root.path().join("kiln-out").join(path)).unwrap()
    }

    fn store(&self) -> Arc<LocalStore> {
        Arc::new(LocalStore::open(self.cache_dir.path()).unwrap())
    }

    fn config(&self) -> BuildConfig {
        BuildConfig::default()
            .with_workspace_root(self.root.path())
            .with_jobs(4)
    }

    fn host_scheduler(&self, targets: Vec<Target>) -> Scheduler {
        Scheduler::new(
            graph(targets),
            self.store(),
            Arc::new(HostExecutor::new()),
            self.config(),
        )
    }
}

/// `//app:upper` uppercases `src/in.txt` into `upper.txt`.
fn upper_target() -> Target {
    Target::new(
        label("//app:upper"),
        Action::shell("tr a-z A-Z < \"$KILN_SRCS\" > upper.txt"),
    )
    .with_source("src/in.txt")
    .with_output("upper.txt")
}

#[tokio::test]
async fn second_build_is_a_cache_hit() {
    let ws = Workspace::new();
    ws.write("src/in.txt", "hello");
    let scheduler = ws.host_scheduler(vec![upper_target()]);

    let first = scheduler.run(&[label("//app:upper")]).await.unwrap();
    assert!(first.is_success());
    assert_eq!(first.succeeded(), 1);
    assert_eq!(ws.read_output("app/upper.txt"), "HELLO");

    fs::remove_dir_all(ws.root.path().join("kiln-out")).unwrap();
    let second = scheduler.run(&[label("//app:upper")]).await.unwrap();
    assert_eq!(second.cache_hits(), 1);
    assert_eq!(second.succeeded(), 0);
    assert_eq!(ws.read_output("app/upper.txt"), "HELLO");
    assert_eq!(
        first.results[0].fingerprint,
        second.results[0].fingerprint
    );
}

#[tokio::test]
async fn changed_source_rebuilds() {
    let ws = Workspace::new();
    ws.write("src/in.txt", "hello");
    let scheduler = ws.host_scheduler(vec![upper_target()]);
    let first = scheduler.run(&[label("//app:upper")]).await.unwrap();

    ws.write("src/in.txt", "world");
    let second = scheduler.run(&[label("//app:upper")]).await.unwrap();
    assert_eq!(second.succeeded(), 1);
    assert_ne!(first.results[0].fingerprint, second.results[0].fingerprint);
    assert_eq!(ws.read_output("app/upper.txt"), "WORLD");
}

#[tokio::test]
async fn cache_hit_replaces_stale_directory_output() {
    let ws = Workspace::new();
    let gen_target = Target::new(
        label("//app:gen"),
        Action::shell("mkdir -p gen && touch \"gen/$(cat \"$KILN_SRCS\")\""),
    )
    .with_source("src/in.txt")
    .with_output("gen");
    let scheduler = ws.host_scheduler(vec![gen_target]);
    let listing = || {
        let mut names = fs::read_dir(ws.root.path().join("kiln-out/app/gen"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        names.sort();
        names
    };

    ws.write("src/in.txt", "x");
    assert_eq!(scheduler.run(&[label("//app:gen")]).await.unwrap().succeeded(), 1);
    ws.write("src/in.txt", "y");
    assert_eq!(scheduler.run(&[label("//app:gen")]).await.unwrap().succeeded(), 1);
    assert_eq!(listing(), vec!["y"]);

    ws.write("src/in.txt", "x");
    let third = scheduler.run(&[label("//app:gen")]).await.unwrap();
    assert_eq!(third.results[0].state, BuildState::CacheHit);
    assert_eq!(listing(), vec!["x"]);
}

#[tokio::test]
async fn dependency_outputs_are_passed_as_inputs() {
    let ws = Workspace::new();
    ws.write("src/in.txt", "abc");
    let wrap = Target::new(
        label("//pkg:wrap"),
        Action::shell("printf '[%s]' \"$(cat $KILN_INPUTS)\" > wrapped.txt"),
    )
    .with_dep(label("//app:upper"))
    .with_output("wrapped.txt");

    let summary = ws
        .host_scheduler(vec![upper_target(), wrap])
        .run(&[label("//pkg:wrap")])
        .await
        .unwrap();
    assert!(summary.is_success());
    assert_eq!(ws.read_output("pkg/wrapped.txt"), "[ABC]");
}

#[tokio::test]
async fn dependency_change_rebuilds_dependents() {
    let ws = Workspace::new();
    ws.write("src/in.txt", "abc");
    let copy = Target::new(label("//pkg:copy"), Action::shell("cat $KILN_INPUTS > copy.txt"))
        .with_dep(label("//app:upper"))
        .with_output("copy.txt");
    let scheduler = ws.host_scheduler(vec![upper_target(), copy]);

    scheduler.run(&[label("//pkg:copy")]).await.unwrap();
    let unchanged = scheduler.run(&[label("//pkg:copy")]).await.unwrap();
    assert_eq!(unchanged.cache_hits(), 2);

    ws.write("src/in.txt", "xyz");
    let changed = scheduler.run(&[label("//pkg:copy")]).await.unwrap();
    assert_eq!(changed.succeeded(), 2);
    assert_eq!(ws.read_output("pkg/copy.txt"), "XYZ");
}

#[tokio::test]
async fn fail_fast_along_a_chain() {
    let ws = Workspace::new();
    let executor = Arc::new(RecordingExecutor::failing(&["//c:a"]));
    let targets = vec![
        Target::new(label("//c:a"), Action::shell("false")),
        Target::new(label("//c:b"), Action::shell("true")).with_dep(label("//c:a")),
        Target::new(label("//c:c"), Action::shell("true")).with_dep(label("//c:b")),
    ];
    let scheduler = Scheduler::new(graph(targets), ws.store(), executor.clone(), ws.config());

    let summary = scheduler.run(&[label("//c:c")]).await.unwrap();
    assert!(!summary.is_success());
    assert_eq!(summary.failed(), 3);
    assert_eq!(executor.runs(), vec![label("//c:a")]);

    let a = summary.get(&label("//c:a")).unwrap();
    assert!(matches!(a.failure, Some(FailureReason::Action(_))));
    assert_eq!(
        summary.get(&label("//c:b")).unwrap().failure,
        Some(FailureReason::DependencyFailed(label("//c:a")))
    );
    assert_eq!(
        summary.get(&label("//c:c")).unwrap().failure,
        Some(FailureReason::DependencyFailed(label("//c:b")))
    );
}

#[tokio::test]
async fn fail_fast_cancels_independent_targets() {
    let ws = Workspace::new();
    let executor = Arc::new(RecordingExecutor::failing(&["//x:bad"]));
    let targets = vec![
        Target::new(label("//x:bad"), Action::shell("false")),
        Target::new(label("//x:other"), Action::shell("true")),
    ];
    let scheduler = Scheduler::new(
        graph(targets),
        ws.store(),
        executor.clone(),
        ws.config().with_jobs(1),
    );

    let summary = scheduler
        .run(&[label("//x:bad"), label("//x:other")])
        .await
        .unwrap();
    assert_eq!(executor.runs(), vec![label("//x:bad")]);
    let other = summary.get(&label("//x:other")).unwrap();
    assert_eq!(other.state, BuildState::Failed);
    assert_eq!(other.failure, Some(FailureReason::Cancelled));
    assert_eq!(summary.cancelled(), 1);
}

#[tokio::test]
async fn keep_going_builds_independent_subgraphs() {
    let ws = Workspace::new();
    let executor = Arc::new(RecordingExecutor::failing(&["//k:bad"]));
    let targets = vec![
        Target::new(label("//k:bad"), Action::shell("false")),
        Target::new(label("//k:after_bad"), Action::shell("true")).with_dep(label("//k:bad")),
        Target::new(label("//k:good"), Action::shell("true")),
        Target::new(label("//k:after_good"), Action::shell("true")).with_dep(label("//k:good")),
    ];
    let scheduler = Scheduler::new(
        graph(targets),
        ws.store(),
        executor.clone(),
        ws.config().with_jobs(1).with_keep_going(true),
    );

    let summary = scheduler
        .run(&[label("//k:after_bad"), label("//k:after_good")])
        .await
        .unwrap();
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.failed(), 2);
    assert_eq!(summary.cancelled(), 0);
    assert_eq!(
        summary.get(&label("//k:after_bad")).unwrap().failure,
        Some(FailureReason::DependencyFailed(label("//k:bad")))
    );
    assert!(!executor.runs().contains(&label("//k:after_bad")));
}

#[tokio::test]
async fn each_target_runs_once_per_invocation() {
    // layered diamonds: every target in a layer depends on every target in
    // the layer below
    let mut targets = Vec::new();
    for layer in 0..4 {
        for i in 0..5 {
            let mut target = Target::new(
                label(&format!("//d:t{layer}_{i}")),
                Action::shell(format!("echo {layer}.{i}")),
            );
            if layer > 0 {
                for j in 0..5 {
                    target = target.with_dep(label(&format!("//d:t{}_{j}", layer - 1)));
                }
            }
            targets.push(target);
        }
    }
    let top: Vec<Label> = (0..5).map(|i| label(&format!("//d:t3_{i}"))).collect();

    let ws = Workspace::new();
    let executor = Arc::new(RecordingExecutor::default().with_delay(Duration::from_millis(5)));
    let scheduler = Scheduler::new(
        graph(targets),
        Arc::new(MemoryCache::new()),
        executor.clone(),
        ws.config().with_jobs(8),
    );

    let summary = scheduler.run(&top).await.unwrap();
    assert_eq!(summary.succeeded(), 20);
    let runs = executor.runs();
    assert_eq!(runs.len(), 20);
    assert_eq!(runs.iter().collect::<HashSet<_>>().len(), 20);

    // layers finish before the next layer starts
    let layer_of = |l: &Label| l.name().as_bytes()[1];
    for window in runs.windows(2) {
        assert!(layer_of(&window[0]) <= layer_of(&window[1]));
    }
}

#[tokio::test]
async fn timeout_fails_the_target() {
    let ws = Workspace::new();
    let slow = Target::new(label("//t:slow"), Action::shell("sleep 10"))
        .with_timeout(Duration::from_millis(200));
    let started = Instant::now();
    let summary = ws
        .host_scheduler(vec![slow])
        .run(&[label("//t:slow")])
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        summary.results[0].failure,
        Some(FailureReason::TimedOut(Duration::from_millis(200)))
    );
}

#[tokio::test]
async fn default_timeout_applies_when_target_has_none() {
    let ws = Workspace::new();
    let slow = Target::new(label("//t:slow"), Action::shell("sleep 10"));
    let scheduler = Scheduler::new(
        graph(vec![slow]),
        ws.store(),
        Arc::new(HostExecutor::new()),
        ws.config().with_default_timeout(Duration::from_millis(100)),
    );
    let summary = scheduler.run(&[label("//t:slow")]).await.unwrap();
    assert!(matches!(
        summary.results[0].failure,
        Some(FailureReason::TimedOut(_))
    ));
}

#[tokio::test]
async fn cancellation_stops_running_actions() {
    let ws = Workspace::new();
    let targets = vec![
        Target::new(label("//s:sleeper"), Action::shell("sleep 30")),
        Target::new(label("//s:after"), Action::shell("true")).with_dep(label("//s:sleeper")),
    ];
    let scheduler = ws.host_scheduler(targets);
    let invocation = scheduler.start(&[label("//s:after")]).unwrap();

    let token = invocation.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let started = Instant::now();
    let summary = invocation.finish().await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(summary.cancelled(), 2);
    assert!(
        summary
            .results
            .iter()
            .all(|r| r.state == BuildState::Failed)
    );
}

#[tokio::test]
async fn results_stream_as_targets_finish() {
    let ws = Workspace::new();
    let targets = vec![
        Target::new(label("//r:a"), Action::shell("true")),
        Target::new(label("//r:b"), Action::shell("true")).with_dep(label("//r:a")),
    ];
    let scheduler = Scheduler::new(
        graph(targets),
        Arc::new(MemoryCache::new()),
        Arc::new(RecordingExecutor::default()),
        ws.config(),
    );
    let mut invocation = scheduler.start(&[label("//r:b")]).unwrap();

    let first = invocation.next().await.unwrap();
    assert_eq!(first.label, label("//r:a"));
    assert_eq!(first.state, BuildState::Succeeded);
    let summary = invocation.finish().await;
    assert_eq!(summary.results.len(), 2);
    assert!(summary.is_success());
}

#[tokio::test]
async fn uncacheable_targets_always_run() {
    let ws = Workspace::new();
    let cache = Arc::new(MemoryCache::new());
    let executor = Arc::new(RecordingExecutor::default());
    let scheduler = Scheduler::new(
        graph(vec![Target::new(label("//u:stamp"), Action::shell("date")).uncacheable()]),
        cache.clone(),
        executor.clone(),
        ws.config(),
    );

    for _ in 0..2 {
        let summary = scheduler.run(&[label("//u:stamp")]).await.unwrap();
        assert_eq!(summary.succeeded(), 1);
    }
    assert_eq!(executor.runs().len(), 2);
    assert!(cache.is_empty());
    assert_eq!(cache.get_count(), 0);
}

#[tokio::test]
async fn remote_hit_across_invocations() {
    let remote: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let chain_for = |ws: &Workspace| {
        Arc::new(
            ChainCache::new()
                .with_tier(ws.store(), CacheMode::ReadWrite)
                .with_tier(Arc::clone(&remote), CacheMode::ReadWrite),
        )
    };

    // two checkouts of the same workspace on different machines
    let first = Workspace::new();
    first.write("src/in.txt", "shared");
    let first_chain = chain_for(&first);
    let summary = Scheduler::new(
        graph(vec![upper_target()]),
        first_chain.clone(),
        Arc::new(HostExecutor::new()),
        first.config(),
    )
    .run(&[label("//app:upper")])
    .await
    .unwrap();
    assert_eq!(summary.succeeded(), 1);
    first_chain.flush().await;

    let second = Workspace::new();
    second.write("src/in.txt", "shared");
    let executor = Arc::new(RecordingExecutor::default());
    let second_chain = chain_for(&second);
    let summary = Scheduler::new(
        graph(vec![upper_target()]),
        second_chain.clone(),
        executor.clone(),
        second.config(),
    )
    .run(&[label("//app:upper")])
    .await
    .unwrap();

    assert_eq!(summary.cache_hits(), 1);
    assert!(executor.runs().is_empty());
    assert_eq!(second.read_output("app/upper.txt"), "SHARED");
    assert_eq!(second_chain.metrics().remote_hits, 1);
    let fingerprint = summary.results[0].fingerprint.unwrap();
    assert!(second.store().contains(&fingerprint));
}

#[tokio::test]
async fn unreadable_source_fails_only_that_target() {
    let ws = Workspace::new();
    let targets = vec![
        Target::new(label("//m:missing"), Action::shell("true")).with_source("src/nope.txt"),
        Target::new(label("//m:fine"), Action::shell("true")),
    ];
    let scheduler = Scheduler::new(
        graph(targets),
        Arc::new(MemoryCache::new()),
        Arc::new(RecordingExecutor::default()),
        ws.config().with_keep_going(true),
    );
    let summary = scheduler
        .run(&[label("//m:missing"), label("//m:fine")])
        .await
        .unwrap();

    let missing = summary.get(&label("//m:missing")).unwrap();
    assert!(matches!(missing.failure, Some(FailureReason::Fingerprint(_))));
    assert!(missing.fingerprint.is_none());
    assert_eq!(summary.get(&label("//m:fine")).unwrap().state, BuildState::Succeeded);
}

#[tokio::test]
async fn unknown_label_is_rejected_before_building() {
    let ws = Workspace::new();
    let executor = Arc::new(RecordingExecutor::default());
    let scheduler = Scheduler::new(
        graph(vec![Target::new(label("//a:b"), Action::shell("true"))]),
        Arc::new(MemoryCache::new()),
        executor.clone(),
        ws.config(),
    );
    let err = scheduler
        .run(&[label("//a:b"), label("//a:nope")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Graph(kiln_graph::Error::UnknownTarget { .. })));
    assert!(executor.runs().is_empty());
}

#[tokio::test]
async fn empty_request_finishes_immediately() {
    let ws = Workspace::new();
    let scheduler = ws.host_scheduler(vec![upper_target()]);
    let summary = scheduler.run(&[]).await.unwrap();
    assert!(summary.results.is_empty());
    assert!(summary.is_success());
}
