use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use callcache_blacklist::{BlacklistCache, BlacklistKey, BlacklistStatus};
use callcache_config::{BlacklistConfig, CopyConfig};
use callcache_copy::{AckSender, CacheHitCopyHandle, CopyAttempt, CopyServices, IoExecutor};
use callcache_core::{
    AdditionalCommands, AdditionalCommandsContext, BoxedCause, CALL_ROOT_KEY, CacheHitId,
    CommandSet, CopyFailure, CopyOutputsCommand, DestinationLayout, IoAck, IoCommand, JobKey,
    JobResponse, OutputValue, StoragePath,
};
use callcache_events::{Event, EventBus};
use callcache_fsops::LinkDuplication;
use callcache_telemetry::Metrics;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Trace {
    Dispatched(IoCommand),
    Acked(IoCommand),
}

#[derive(Clone, Copy)]
enum Reply {
    Succeed,
    Fail,
    Forbid(&'static str),
    Silent,
}

/// Replies from a spawned task, the way a real backend would.
struct ScriptedExecutor {
    script: Box<dyn Fn(&IoCommand) -> Reply + Send + Sync>,
    trace: Arc<Mutex<Vec<Trace>>>,
}

impl ScriptedExecutor {
    fn new(script: impl Fn(&IoCommand) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            trace: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn trace(&self) -> Vec<Trace> {
        self.trace
            .lock()
            .map(|trace| trace.clone())
            .unwrap_or_default()
    }

    fn dispatched(&self) -> Vec<IoCommand> {
        self.trace()
            .into_iter()
            .filter_map(|entry| match entry {
                Trace::Dispatched(command) => Some(command),
                Trace::Acked(_) => None,
            })
            .collect()
    }
}

impl IoExecutor for ScriptedExecutor {
    fn dispatch(&self, command: IoCommand, replies: AckSender) {
        if let Ok(mut trace) = self.trace.lock() {
            trace.push(Trace::Dispatched(command.clone()));
        }
        let ack = match (self.script)(&command) {
            Reply::Succeed => IoAck::Success {
                command: command.clone(),
            },
            Reply::Fail => IoAck::Failure {
                command: command.clone(),
                cause: Box::new(io::Error::other("backend unavailable")),
            },
            Reply::Forbid(path) => IoAck::Forbidden {
                command: command.clone(),
                path: path.to_string(),
                cause: Box::new(io::Error::from(io::ErrorKind::PermissionDenied)),
            },
            Reply::Silent => return,
        };
        let trace = Arc::clone(&self.trace);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            if let Ok(mut trace) = trace.lock() {
                trace.push(Trace::Acked(command));
            }
            replies.send(ack);
        });
    }
}

struct TouchMarker;

impl AdditionalCommands for TouchMarker {
    fn additional_commands(
        &self,
        context: &AdditionalCommandsContext<'_>,
    ) -> Result<Vec<CommandSet>, BoxedCause> {
        let root = &context.plan.detritus[CALL_ROOT_KEY];
        Ok(vec![CommandSet::from([IoCommand::touch(
            root.join(["cache_copy_done"]),
        )])])
    }
}

fn path(raw: &str) -> Result<StoragePath> {
    Ok(StoragePath::parse(raw)?)
}

fn request(root: &str, files: &[&str]) -> CopyOutputsCommand {
    CopyOutputsCommand {
        outputs: files
            .iter()
            .enumerate()
            .map(|(index, file)| (format!("out{index}"), OutputValue::file(*file)))
            .collect(),
        source_detritus: BTreeMap::from([
            (CALL_ROOT_KEY.to_string(), root.to_string()),
            ("stdout".to_string(), format!("{root}/stdout")),
        ]),
        return_code: Some(0),
    }
}

fn attempt(destination: &str) -> Result<CopyAttempt> {
    Ok(CopyAttempt {
        job_key: JobKey::new("wf.task", 1),
        hit: CacheHitId(7),
        copy_attempt: 1,
        destination: DestinationLayout::new(path(destination)?).with_detritus("stdout", "stdout"),
    })
}

fn services(executor: Arc<ScriptedExecutor>, events: &EventBus) -> Result<CopyServices> {
    Ok(CopyServices::new(
        executor,
        &CopyConfig::default(),
        Metrics::new()?,
        events.clone(),
    ))
}

fn blacklist() -> Result<Arc<BlacklistCache>> {
    Ok(Arc::new(BlacklistCache::new(&BlacklistConfig::default(), None)?))
}

fn start(
    destination: &str,
    services: CopyServices,
    request: CopyOutputsCommand,
) -> Result<CacheHitCopyHandle> {
    let handle = callcache_copy::spawn(attempt(destination)?, services);
    handle.copy(request)?;
    Ok(handle)
}

#[tokio::test]
async fn outputs_and_side_files_land_under_the_new_root() -> Result<()> {
    let executor = ScriptedExecutor::new(|_| Reply::Succeed);
    let events = EventBus::with_capacity(16);
    let handle = start(
        "/dst/run2",
        services(executor.clone(), &events)?,
        request("/src/run1", &["/src/run1/out.txt"]),
    )?;

    let JobResponse::Succeeded(response) = handle.response().await? else {
        bail!("expected a successful copy");
    };
    assert_eq!(response.return_code, Some(0));
    assert_eq!(response.copied_outputs["out0"], OutputValue::file("/dst/run2/out.txt"));
    assert_eq!(response.copied_detritus[CALL_ROOT_KEY], path("/dst/run2")?);
    assert_eq!(response.copied_detritus["stdout"], path("/dst/run2/stdout")?);

    let mut dispatched = executor.dispatched();
    dispatched.sort();
    assert_eq!(
        dispatched,
        vec![
            IoCommand::copy(path("/src/run1/out.txt")?, path("/dst/run2/out.txt")?),
            IoCommand::copy(path("/src/run1/stdout")?, path("/dst/run2/stdout")?),
        ]
    );

    let mut stream = events.subscribe(Some(0));
    match stream.next().await.map(|envelope| envelope.event) {
        Some(Event::CacheCopySucceeded { detritus, .. }) => {
            assert_eq!(detritus["stdout"], "/dst/run2/stdout");
        }
        other => bail!("unexpected event {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn nothing_to_copy_succeeds_without_io() -> Result<()> {
    let executor = ScriptedExecutor::new(|_| Reply::Succeed);
    let events = EventBus::new();
    let mut bare = request("/src/run1", &[]);
    bare.source_detritus.remove("stdout");
    let handle = start("/dst/run2", services(executor.clone(), &events)?, bare)?;

    assert!(matches!(handle.response().await?, JobResponse::Succeeded(_)));
    assert!(executor.dispatched().is_empty());
    Ok(())
}

#[tokio::test]
async fn additional_subset_runs_after_every_copy_acknowledged() -> Result<()> {
    let executor = ScriptedExecutor::new(|_| Reply::Succeed);
    let events = EventBus::new();
    let services = services(executor.clone(), &events)?.with_additional_commands(Arc::new(TouchMarker));
    let handle = start(
        "/dst/run2",
        services,
        request("/src/run1", &["/src/run1/a.txt", "/src/run1/b.txt"]),
    )?;

    assert!(matches!(handle.response().await?, JobResponse::Succeeded(_)));
    let trace = executor.trace();
    let marker = IoCommand::touch(path("/dst/run2/cache_copy_done")?);
    let Some(touch_at) = trace
        .iter()
        .position(|entry| *entry == Trace::Dispatched(marker.clone()))
    else {
        bail!("marker was never dispatched: {trace:?}");
    };
    let copies_acked = trace[..touch_at]
        .iter()
        .filter(|entry| matches!(entry, Trace::Acked(IoCommand::Copy { .. })))
        .count();
    assert_eq!(copies_acked, 3);
    Ok(())
}

#[tokio::test]
async fn failure_in_first_subset_skips_the_rest() -> Result<()> {
    let executor = ScriptedExecutor::new(|command| match command {
        IoCommand::Copy { destination, .. } if destination.to_string().ends_with("a.txt") => {
            Reply::Fail
        }
        _ => Reply::Succeed,
    });
    let events = EventBus::with_capacity(16);
    let cache = blacklist()?;
    let services = services(executor.clone(), &events)?
        .with_additional_commands(Arc::new(TouchMarker))
        .with_blacklist(Some(cache.clone()));
    let handle = start(
        "/dst/run2",
        services,
        request("/src/run1", &["/src/run1/a.txt", "/src/run1/b.txt"]),
    )?;

    let JobResponse::CopyFailed(response) = handle.response().await? else {
        bail!("expected a failed copy");
    };
    assert_eq!(response.attempt, 1);
    assert!(matches!(response.error, CopyFailure::Loggable(_)));
    assert_eq!(
        cache.status(BlacklistKey::Hit(CacheHitId(7))),
        BlacklistStatus::KnownBad
    );
    tokio::task::yield_now().await;
    assert!(
        executor
            .dispatched()
            .iter()
            .all(|command| matches!(command, IoCommand::Copy { .. }))
    );
    Ok(())
}

#[tokio::test]
async fn blacklisted_hit_is_skipped_before_any_io() -> Result<()> {
    let executor = ScriptedExecutor::new(|_| Reply::Succeed);
    let events = EventBus::new();
    let cache = blacklist()?;
    cache.blacklist(BlacklistKey::Hit(CacheHitId(7)));
    let services = services(executor.clone(), &events)?.with_blacklist(Some(cache));
    let handle = start(
        "/dst/run2",
        services,
        request("/src/run1", &["/src/run1/out.txt"]),
    )?;

    let JobResponse::CopyFailed(response) = handle.response().await? else {
        bail!("expected a skipped copy");
    };
    assert!(matches!(response.error, CopyFailure::Metricable(_)));
    assert!(executor.dispatched().is_empty());
    assert!(events.last_event_id().is_none());
    Ok(())
}

#[tokio::test]
async fn forbidden_blacklists_hit_and_bucket_before_the_response() -> Result<()> {
    let executor = ScriptedExecutor::new(|_| Reply::Forbid("gs://bucket-a/x"));
    let events = EventBus::with_capacity(16);
    let cache = blacklist()?;
    let services = services(executor, &events)?.with_blacklist(Some(cache.clone()));
    let handle = start(
        "gs://bucket-b/run2",
        services,
        request("gs://bucket-a/run1", &["gs://bucket-a/run1/x"]),
    )?;

    let JobResponse::CopyFailed(response) = handle.response().await? else {
        bail!("expected a failed copy");
    };
    assert!(response.error.to_string().contains("gs://bucket-a/x"));
    assert_eq!(
        cache.status(BlacklistKey::Hit(CacheHitId(7))),
        BlacklistStatus::KnownBad
    );
    assert_eq!(
        cache.status(BlacklistKey::Bucket("gs://bucket-a")),
        BlacklistStatus::KnownBad
    );

    let mut stream = events.subscribe(Some(0));
    let mut kinds = Vec::new();
    while let Some(envelope) = stream.next().await {
        let kind = envelope.event.kind();
        kinds.push(kind);
        if kind == "cache_copy_failed" {
            break;
        }
    }
    assert_eq!(kinds.last(), Some(&"cache_copy_failed"));
    assert_eq!(kinds.iter().filter(|kind| **kind == "blacklisted").count(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn silent_executor_times_out_with_both_paths_named() -> Result<()> {
    let executor = ScriptedExecutor::new(|_| Reply::Silent);
    let events = EventBus::new();
    let cache = blacklist()?;
    let services = services(executor, &events)?.with_blacklist(Some(cache.clone()));
    let mut bare = request("/src/run1", &["/src/run1/out.txt"]);
    bare.source_detritus.remove("stdout");
    let handle = start("/dst/run2", services, bare)?;

    let JobResponse::CopyFailed(response) = handle.response().await? else {
        bail!("expected a timed out copy");
    };
    let message = response.error.to_string();
    assert!(message.contains("/src/run1/out.txt"));
    assert!(message.contains("/dst/run2/out.txt"));
    assert!(message.contains("timed out"));
    assert_eq!(
        cache.status(BlacklistKey::Hit(CacheHitId(7))),
        BlacklistStatus::KnownBad
    );
    Ok(())
}

#[tokio::test]
async fn abort_answers_while_io_is_outstanding() -> Result<()> {
    let executor = ScriptedExecutor::new(|_| Reply::Silent);
    let events = EventBus::new();
    let handle = start(
        "/dst/run2",
        services(executor.clone(), &events)?,
        request("/src/run1", &["/src/run1/out.txt"]),
    )?;
    handle.abort()?;

    let job_key = handle.job_key().clone();
    let response = handle.response().await?;
    assert!(matches!(response, JobResponse::Aborted(_)));
    assert_eq!(response.job_key(), &job_key);
    Ok(())
}

#[tokio::test]
async fn link_duplication_replaces_executor_copies() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let source_root = temp.path().join("src/run1");
    fs::create_dir_all(&source_root)?;
    fs::write(source_root.join("out.txt"), b"cached output")?;
    fs::write(source_root.join("stdout"), b"log")?;

    let root = source_root.to_string_lossy().into_owned();
    let destination = temp.path().join("dst/run2").to_string_lossy().into_owned();
    let executor = ScriptedExecutor::new(|_| Reply::Fail);
    let events = EventBus::new();
    let services = services(executor.clone(), &events)?
        .with_duplication(Arc::new(LinkDuplication::default()));
    let output = format!("{root}/out.txt");
    let handle = start(&destination, services, request(&root, &[output.as_str()]))?;

    assert!(matches!(handle.response().await?, JobResponse::Succeeded(_)));
    assert!(executor.dispatched().is_empty());
    assert_eq!(
        fs::read(temp.path().join("dst/run2/out.txt"))?,
        b"cached output"
    );
    assert_eq!(fs::read(temp.path().join("dst/run2/stdout"))?, b"log");
    Ok(())
}
