//! End-to-end pipeline tests
//!
//! Drive whole runs through the scheduler and the service with a scripted
//! codec. The codec decides what to do from the staged file's content:
//!
//! - `NOAUDIO...`   no audio track
//! - `CODECFAIL...` encoder error
//! - `EMPTY...`     "succeeds" with a zero-byte output
//! - `PANIC...`     panics mid-transform
//! - anything else  writes `AUDIO:` followed by the input bytes

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

use crate::core::classify::MediaKind;
use crate::core::config::PipelineConfig;
use crate::core::media::{AudioTrack, MediaCodec, MediaError, MediaResult, ProbeReport, VideoTrack};
use crate::core::pipeline::{RunOutcome, RunState, Scheduler, TaskKind, TaskState};
use crate::core::service::PipelineService;
use crate::core::temp::TempFileManager;
use crate::core::{AudioFormat, CoreError, FailureKind};

#[derive(Default)]
struct ScriptedCodec {
    gate: Option<Arc<Semaphore>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    extractions: AtomicUsize,
}

impl ScriptedCodec {
    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }
}

#[async_trait]
impl MediaCodec for ScriptedCodec {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn probe(&self, path: &Path) -> MediaResult<ProbeReport> {
        let bytes = tokio::fs::read(path).await?;
        let audio = (!bytes.starts_with(b"NOAUDIO")).then(|| AudioTrack {
            codec: Some("aac".to_string()),
            sample_rate: Some(44100),
            channels: Some(2),
        });
        Ok(ProbeReport {
            container: Some("scripted".to_string()),
            duration_sec: Some(5.0),
            video: Some(VideoTrack {
                codec: Some("h264".to_string()),
                width: Some(640),
                height: Some(360),
                fps: Some(25.0),
            }),
            audio,
        })
    }

    async fn extract_audio(&self, src: &Path, dst: &Path, _: AudioFormat) -> MediaResult<()> {
        let input = tokio::fs::read(src).await?;

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        match &self.gate {
            Some(gate) => {
                let _permit = gate.acquire().await.map_err(|_| MediaError::Timeout)?;
            }
            None => tokio::time::sleep(Duration::from_millis(20)).await,
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.extractions.fetch_add(1, Ordering::SeqCst);

        if input.starts_with(b"NOAUDIO") {
            return Err(MediaError::NoAudioTrack(src.display().to_string()));
        }
        if input.starts_with(b"CODECFAIL") {
            return Err(MediaError::ExecutionFailed("encoder exploded".to_string()));
        }
        if input.starts_with(b"PANIC") {
            panic!("scripted codec panic");
        }
        if input.starts_with(b"EMPTY") {
            tokio::fs::write(dst, b"").await?;
            return Ok(());
        }

        let mut output = b"AUDIO:".to_vec();
        output.extend_from_slice(&input);
        tokio::fs::write(dst, output).await?;
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    codec: Arc<ScriptedCodec>,
    scheduler: Scheduler,
}

impl Harness {
    fn new(format: AudioFormat, concurrency: usize) -> Self {
        Self::with_codec(format, concurrency, usize::MAX, ScriptedCodec::default())
    }

    fn with_codec(
        format: AudioFormat,
        concurrency: usize,
        max_pending: usize,
        codec: ScriptedCodec,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir)
            .with_format(format)
            .with_concurrency(concurrency);
        config.max_pending_runs = max_pending;
        config.prepare().unwrap();

        let codec = Arc::new(codec);
        let temp = Arc::new(TempFileManager::new(&config.temp_root));
        let scheduler = Scheduler::new(&config, codec.clone(), temp);
        Self {
            dir,
            codec,
            scheduler,
        }
    }

    fn source(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join("in").join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn out(&self, name: &str) -> PathBuf {
        self.dir.path().join("out").join(name)
    }

    fn out_entries(&self) -> Vec<String> {
        entries(&self.dir.path().join("out"))
    }

    fn temp_entries(&self) -> Vec<String> {
        entries(&self.dir.path().join("tmp"))
    }
}

fn config_in(dir: &TempDir) -> PipelineConfig {
    PipelineConfig::new(
        dir.path().join("in"),
        dir.path().join("out"),
        dir.path().join("tmp"),
    )
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn task_states(outcome: &RunOutcome) -> Vec<(TaskKind, TaskState)> {
    outcome.tasks.iter().map(|t| (t.kind, t.state)).collect()
}

async fn recv_outcome(rx: &mut mpsc::UnboundedReceiver<RunOutcome>) -> RunOutcome {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for a run outcome")
        .expect("outcome channel closed")
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

// =============================================================================
// Single runs
// =============================================================================

#[tokio::test]
async fn video_is_extracted_into_destination() {
    let h = Harness::new(AudioFormat::M4a, 2);
    let src = h.source("clip.mp4", b"frames");

    let outcome = h.scheduler.run_now(&src, MediaKind::Video).await.unwrap();

    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(outcome.output.as_deref(), Some(h.out("clip.m4a").as_path()));
    assert_eq!(std::fs::read(h.out("clip.m4a")).unwrap(), b"AUDIO:frames");
    assert_eq!(outcome.output_bytes, Some(12));
    assert_eq!(
        task_states(&outcome),
        vec![
            (TaskKind::Stage, TaskState::Succeeded),
            (TaskKind::Transform, TaskState::Succeeded),
            (TaskKind::Finalize, TaskState::Succeeded),
        ]
    );
    assert_eq!(outcome.temp_released, 2);
    assert!(h.temp_entries().is_empty());
    assert_eq!(h.out_entries(), vec!["clip.m4a".to_string()]);
    // The source is never consumed
    assert!(src.exists());
}

#[tokio::test]
async fn silent_video_reports_no_audio_track() {
    let h = Harness::new(AudioFormat::M4a, 2);
    let src = h.source("silent.mkv", b"NOAUDIO frames");

    let outcome = h.scheduler.run_now(&src, MediaKind::Video).await.unwrap();

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failure, Some(FailureKind::NoAudioTrack));
    assert_eq!(outcome.failed_stage, Some(TaskKind::Transform));
    assert_eq!(
        task_states(&outcome),
        vec![
            (TaskKind::Stage, TaskState::Succeeded),
            (TaskKind::Transform, TaskState::Failed),
            (TaskKind::Finalize, TaskState::Pending),
        ]
    );
    assert!(outcome.output.is_none());
    assert!(!h.out("silent.m4a").exists());
    assert!(h.temp_entries().is_empty());
}

#[tokio::test]
async fn failed_run_leaves_previous_output_alone() {
    let h = Harness::new(AudioFormat::M4a, 2);
    std::fs::write(h.out("silent.m4a"), b"from an earlier run").unwrap();
    let src = h.source("silent.mkv", b"NOAUDIO frames");

    let outcome = h.scheduler.run_now(&src, MediaKind::Video).await.unwrap();

    assert_eq!(outcome.failure, Some(FailureKind::NoAudioTrack));
    assert_eq!(
        std::fs::read(h.out("silent.m4a")).unwrap(),
        b"from an earlier run"
    );
    assert_eq!(h.out_entries(), vec!["silent.m4a".to_string()]);
}

#[tokio::test]
async fn audio_is_passed_through_unchanged() {
    let h = Harness::new(AudioFormat::Wav, 2);
    let src = h.source("track.wav", b"RIFF....WAVEfmt ");

    let outcome = h.scheduler.run_now(&src, MediaKind::Audio).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(
        task_states(&outcome),
        vec![
            (TaskKind::Stage, TaskState::Succeeded),
            (TaskKind::Finalize, TaskState::Succeeded),
        ]
    );
    assert_eq!(
        std::fs::read(h.out("track.wav")).unwrap(),
        std::fs::read(&src).unwrap()
    );
    assert_eq!(h.codec.extractions.load(Ordering::SeqCst), 0);
    assert!(h.temp_entries().is_empty());
}

#[tokio::test]
async fn audio_pass_through_takes_target_extension() {
    let h = Harness::new(AudioFormat::M4a, 2);
    let src = h.source("track.wav", b"RIFF....WAVEfmt ");

    let outcome = h.scheduler.run_now(&src, MediaKind::Audio).await.unwrap();

    assert!(outcome.is_success());
    // Bytes are copied as-is; only the name follows the target format
    assert_eq!(std::fs::read(h.out("track.m4a")).unwrap(), b"RIFF....WAVEfmt ");
    assert!(!h.out("track.wav").exists());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn codec_error_is_codec_failure() {
    let h = Harness::new(AudioFormat::Mp3, 2);
    let src = h.source("clip.mp4", b"CODECFAIL");

    let outcome = h.scheduler.run_now(&src, MediaKind::Video).await.unwrap();

    assert_eq!(outcome.failure, Some(FailureKind::CodecFailure));
    assert_eq!(outcome.failed_stage, Some(TaskKind::Transform));
    assert!(outcome.error.as_deref().unwrap().contains("encoder exploded"));
    assert!(!h.out("clip.mp3").exists());
    assert!(h.temp_entries().is_empty());
}

#[tokio::test]
async fn empty_codec_output_is_codec_failure() {
    let h = Harness::new(AudioFormat::M4a, 2);
    let src = h.source("clip.mp4", b"EMPTY");

    let outcome = h.scheduler.run_now(&src, MediaKind::Video).await.unwrap();

    assert_eq!(outcome.failure, Some(FailureKind::CodecFailure));
    assert!(h.out_entries().is_empty());
    assert!(h.temp_entries().is_empty());
}

#[tokio::test]
async fn missing_source_is_stage_failure() {
    let h = Harness::new(AudioFormat::M4a, 2);
    let src = h.dir.path().join("in").join("vanished.mp4");

    let outcome = h.scheduler.run_now(&src, MediaKind::Video).await.unwrap();

    assert_eq!(outcome.failure, Some(FailureKind::StageFailure));
    assert_eq!(outcome.failed_stage, Some(TaskKind::Stage));
    assert_eq!(
        task_states(&outcome),
        vec![
            (TaskKind::Stage, TaskState::Failed),
            (TaskKind::Transform, TaskState::Pending),
            (TaskKind::Finalize, TaskState::Pending),
        ]
    );
    assert_eq!(h.codec.extractions.load(Ordering::SeqCst), 0);
    assert!(h.temp_entries().is_empty());
}

#[tokio::test]
async fn unpublishable_destination_is_finalize_failure() {
    let h = Harness::new(AudioFormat::M4a, 2);
    // A directory squats on the final name
    std::fs::create_dir(h.out("clip.m4a")).unwrap();
    std::fs::write(h.out("clip.m4a").join("keep.txt"), b"keep").unwrap();
    let src = h.source("clip.mp4", b"frames");

    let outcome = h.scheduler.run_now(&src, MediaKind::Video).await.unwrap();

    assert_eq!(outcome.failure, Some(FailureKind::FinalizeFailure));
    assert_eq!(outcome.failed_stage, Some(TaskKind::Finalize));
    assert_eq!(
        std::fs::read(h.out("clip.m4a").join("keep.txt")).unwrap(),
        b"keep"
    );
    // No partial file is left next to it
    assert_eq!(h.out_entries(), vec!["clip.m4a".to_string()]);
    assert!(h.temp_entries().is_empty());
}

#[tokio::test]
async fn panicking_codec_is_contained() {
    let h = Harness::new(AudioFormat::M4a, 1);
    let bad = h.source("bad.mp4", b"PANIC");
    let good = h.source("good.mp4", b"frames");

    let outcome = h.scheduler.run_now(&bad, MediaKind::Video).await.unwrap();
    assert_eq!(outcome.state, RunState::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("aborted"));
    assert!(h.temp_entries().is_empty());

    // The scheduler and its single slot survive
    let outcome = h.scheduler.run_now(&good, MediaKind::Video).await.unwrap();
    assert!(outcome.is_success());

    let stats = h.scheduler.stats().await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.running, 0);
}

#[tokio::test]
async fn unsupported_kind_is_never_planned() {
    let h = Harness::new(AudioFormat::M4a, 1);
    let src = h.source("notes.txt", b"text");

    let err = h
        .scheduler
        .run_now(&src, MediaKind::Unsupported)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidInput(_)));
    assert_eq!(h.scheduler.stats().await.submitted, 0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn concurrent_runs_are_bounded_and_all_reported() {
    let h = Harness::new(AudioFormat::M4a, 3);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = h.scheduler.clone().with_outcomes(tx);

    let mut ids = Vec::new();
    for i in 0..8 {
        let src = h.source(&format!("clip{i}.mp4"), format!("frames {i}").as_bytes());
        ids.push(scheduler.submit(&src, MediaKind::Video).await.unwrap());
    }

    let mut reported = Vec::new();
    for _ in 0..8 {
        let outcome = recv_outcome(&mut rx).await;
        assert!(outcome.is_success(), "run failed: {:?}", outcome.error);
        // Temps are gone by the time the outcome is reported
        for task in &outcome.tasks[..2] {
            assert!(!task.output_path.exists());
        }
        reported.push(outcome.run_id);
    }
    scheduler.wait_idle().await;

    ids.sort();
    reported.sort();
    assert_eq!(ids, reported);

    for i in 0..8 {
        let expected = format!("AUDIO:frames {i}");
        assert_eq!(
            std::fs::read(h.out(&format!("clip{i}.m4a"))).unwrap(),
            expected.as_bytes()
        );
    }

    assert!(h.codec.peak.load(Ordering::SeqCst) <= 3);
    let stats = scheduler.stats().await;
    assert!(stats.peak_concurrent <= 3);
    assert_eq!(stats.succeeded, 8);
    assert_eq!(scheduler.in_flight(), 0);
    assert!(h.temp_entries().is_empty());
}

#[tokio::test]
async fn duplicate_events_run_independently() {
    let h = Harness::new(AudioFormat::M4a, 2);
    let src = h.source("clip.mp4", b"frames");

    let a = h.scheduler.submit(&src, MediaKind::Video).await.unwrap();
    let b = h.scheduler.submit(&src, MediaKind::Video).await.unwrap();
    assert_ne!(a, b);
    h.scheduler.wait_idle().await;

    assert_eq!(h.scheduler.stats().await.succeeded, 2);
    assert_eq!(std::fs::read(h.out("clip.m4a")).unwrap(), b"AUDIO:frames");
    assert_eq!(h.out_entries(), vec!["clip.m4a".to_string()]);
    assert!(h.temp_entries().is_empty());
}

#[tokio::test]
async fn pending_limit_rejects_excess_runs() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::with_codec(
        AudioFormat::M4a,
        1,
        2,
        ScriptedCodec::gated(gate.clone()),
    );

    let first = h.source("first.mp4", b"one");
    h.scheduler.submit(&first, MediaKind::Video).await.unwrap();
    wait_until("the first run to take the slot", || {
        h.codec.active.load(Ordering::SeqCst) == 1
    })
    .await;

    for name in ["second.mp4", "third.mp4"] {
        let src = h.source(name, b"queued");
        h.scheduler.submit(&src, MediaKind::Video).await.unwrap();
    }
    let fourth = h.source("fourth.mp4", b"rejected");
    let err = h
        .scheduler
        .submit(&fourth, MediaKind::Video)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ResourceExhausted(_)));

    gate.add_permits(16);
    h.scheduler.wait_idle().await;

    let stats = h.scheduler.stats().await;
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.succeeded, 3);
    assert_eq!(stats.peak_concurrent, 1);
    assert!(!h.out("fourth.m4a").exists());
    assert!(h.temp_entries().is_empty());
}

// =============================================================================
// Service
// =============================================================================

fn service_config(dir: &TempDir) -> PipelineConfig {
    let mut config = config_in(dir)
        .with_concurrency(2)
        .with_debounce(Duration::from_millis(100));
    config.check_content = true;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn service_turns_dropped_files_into_audio() {
    let dir = TempDir::new().unwrap();
    let config = service_config(&dir);
    let codec = Arc::new(ScriptedCodec::default());

    let mut service = PipelineService::start_with_codec(config, codec).await.unwrap();
    let mut outcomes = service.take_outcome_rx().unwrap();
    assert!(service.take_outcome_rx().is_none());

    // Give the watcher a moment to take its snapshot
    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(dir.path().join("in").join("notes.txt"), b"text").unwrap();
    std::fs::write(dir.path().join("in").join("clip.mp4"), b"frames").unwrap();

    let outcome = recv_outcome(&mut outcomes).await;
    assert!(outcome.is_success(), "run failed: {:?}", outcome.error);
    assert_eq!(outcome.media_kind, MediaKind::Video);
    assert_eq!(
        std::fs::read(dir.path().join("out").join("clip.m4a")).unwrap(),
        b"AUDIO:frames"
    );

    wait_until("the text file to be dropped", || {
        service.coordinator_stats().unsupported == 1
    })
    .await;

    let stats = service.shutdown(true).await;
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.succeeded, 1);
    assert!(entries(&dir.path().join("tmp")).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn service_sweeps_stale_temp_files_at_startup() {
    let dir = TempDir::new().unwrap();
    let tmp = dir.path().join("tmp");
    std::fs::create_dir_all(&tmp).unwrap();
    std::fs::write(tmp.join("leftover.m4a"), b"crashed run").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut config = service_config(&dir);
    config.stale_temp_max_age = Some(Duration::from_millis(10));

    let service = PipelineService::start_with_codec(config, Arc::new(ScriptedCodec::default()))
        .await
        .unwrap();
    assert!(entries(&tmp).is_empty());
    service.shutdown(false).await;
}

#[tokio::test]
async fn service_refuses_destination_inside_watch_root() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig::new(
        dir.path().join("in"),
        dir.path().join("in").join("audio"),
        dir.path().join("tmp"),
    );

    let result = PipelineService::start_with_codec(config, Arc::new(ScriptedCodec::default())).await;
    assert!(matches!(result, Err(CoreError::Config(_))));
    assert!(!dir.path().join("in").exists());
}
