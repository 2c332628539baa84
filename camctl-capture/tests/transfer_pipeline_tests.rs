//! Transfer pipeline integration tests
//!
//! Runs single captures end to end through a real service (coordinator,
//! dispatcher, pipeline) with in-memory cameras and temporary folders.

mod helpers;

use camctl_capture::device::CameraDevice;
use camctl_capture::metadata::{MetadataTagger, SidecarTagger};
use camctl_capture::plugins::PluginConfig;
use camctl_capture::transfer::{PipelineSettings, SkipReason, TransferOutcome, TransferState};
use camctl_capture::{CaptureServiceBuilder, Error, Result};
use camctl_common::{CameraEvent, UiCommand};
use helpers::*;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Successful transfers
// ============================================================================

/// **Given:** A session with the default naming template
/// **When:** A camera reports a capture
/// **Then:**
///   - The file lands under the templated name with the camera's bytes
///   - Exactly one item is cataloged
///   - The device is idle afterwards, and was busy during the download
#[tokio::test]
async fn test_templated_transfer_completes() {
    let dir = TempDir::new().unwrap();
    let service = service(session_in(dir.path()));
    let mut rx = service.bus().subscribe();
    let camera = Arc::new(MockCamera::new("A"));

    let outcome = transfer(&service, camera.capture("IMG_0042.JPG", b"pixels")).await;

    let item = outcome.item().expect("transfer should complete").clone();
    assert_eq!(item.path, dir.path().join("Shoot_0001.JPG"));
    assert_eq!(std::fs::read(&item.path).unwrap(), b"pixels");
    assert_eq!(item.device_id, "A");
    assert_eq!(item.templates["camera"], "Camera A");
    assert_eq!(item.templates["serial"], "SN-A");
    assert_eq!(item.templates["counter"], "1");
    assert!(item.backup_path.is_none());

    assert!(!camera.is_busy());
    assert!(!camera.idle_during_transfer.load(Ordering::SeqCst));

    let items = settle(&service).await;
    assert_eq!(items.len(), 1);
    assert_eq!(service.coordinator().session().await.unwrap().counter, 1);

    let events = drain(&mut rx);
    let types = event_types(&events);
    assert!(types.contains(&"TransferStarted"));
    assert!(types.contains(&"ItemCataloged"));
    assert!(types.contains(&"PreviewReady"));
    assert!(types.contains(&"TransferCompleted"));
    let statuses = status_texts(&events);
    assert!(statuses.iter().any(|s| s.starts_with("Photo transfer begin")));
    assert!(statuses.last().unwrap().starts_with("Photo transfer done"));
}

/// Scenario: original name kept, destination already holds `IMG_0001.jpg`
#[tokio::test]
async fn test_original_name_collision_gets_suffix() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("IMG_0001.jpg"), b"earlier").unwrap();

    let mut session = session_in(dir.path());
    session.use_original_filename = true;
    let service = service(session);
    let camera = Arc::new(MockCamera::new("A"));

    let first = transfer(&service, camera.capture("IMG_0001.jpg", b"first")).await;
    let second = transfer(&service, camera.capture("IMG_0001.jpg", b"second")).await;

    assert_eq!(first.item().unwrap().path, dir.path().join("IMG_0001_1.jpg"));
    assert_eq!(second.item().unwrap().path, dir.path().join("IMG_0001_2.jpg"));
    assert_eq!(std::fs::read(dir.path().join("IMG_0001.jpg")).unwrap(), b"earlier");
    assert_eq!(
        files_in(dir.path()),
        vec!["IMG_0001.jpg", "IMG_0001_1.jpg", "IMG_0001_2.jpg"]
    );
    // Original names do not consume the counter
    assert_eq!(service.coordinator().session().await.unwrap().counter, 0);
}

/// Scenario: lower-case extension on an original-name capture
#[tokio::test]
async fn test_lower_case_extension() {
    let dir = TempDir::new().unwrap();
    let mut session = session_in(dir.path());
    session.use_original_filename = true;
    session.lower_case_extension = true;
    let service = service(session);
    let camera = Arc::new(MockCamera::new("A"));

    let outcome = transfer(&service, camera.capture("PHOTO.JPG", b"x")).await;
    assert_eq!(outcome.item().unwrap().path, dir.path().join("PHOTO.jpg"));
}

#[tokio::test]
async fn test_overwrite_replaces_existing_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("IMG_0001.jpg"), b"earlier").unwrap();

    let mut session = session_in(dir.path());
    session.use_original_filename = true;
    session.allow_overwrite = true;
    let service = service(session);
    let camera = Arc::new(MockCamera::new("A"));

    let outcome = transfer(&service, camera.capture("IMG_0001.jpg", b"newer")).await;
    assert_eq!(outcome.item().unwrap().path, dir.path().join("IMG_0001.jpg"));
    assert_eq!(std::fs::read(dir.path().join("IMG_0001.jpg")).unwrap(), b"newer");
    assert_eq!(files_in(dir.path()), vec!["IMG_0001.jpg"]);
}

/// In-RAM captures have no usable name and always use the template
#[tokio::test]
async fn test_in_ram_capture_uses_template() {
    let dir = TempDir::new().unwrap();
    let mut session = session_in(dir.path());
    session.use_original_filename = true;
    session.no_download = true;
    let service = service(session);
    let camera = Arc::new(MockCamera::new("A").with_in_ram());

    let outcome = transfer(&service, camera.capture("capt0000.jpg", b"x")).await;
    assert_eq!(outcome.item().unwrap().path, dir.path().join("Shoot_0001.jpg"));
}

// ============================================================================
// Backup
// ============================================================================

/// Scenario: backup enabled, successful transfer
#[tokio::test]
async fn test_backup_copy_is_written() {
    let dir = TempDir::new().unwrap();
    let mut session = session_in(&dir.path().join("main"));
    session.backup = true;
    session.backup_folder = Some(dir.path().join("backup"));
    let service = service(session);
    let camera = Arc::new(MockCamera::new("A"));

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"pixels")).await;
    let item = outcome.item().unwrap();
    let backup = item.backup_path.as_ref().expect("backup path recorded");

    assert_ne!(backup, &item.path);
    assert!(item.path.is_file());
    assert_eq!(std::fs::read(backup).unwrap(), b"pixels");
}

/// The staging file is gone once a capture completes, with or without backup
#[tokio::test]
async fn test_staging_file_removed_after_success() {
    let dir = TempDir::new().unwrap();
    let camera = Arc::new(MockCamera::new("A"));

    for backup in [false, true] {
        let mut session = session_in(&dir.path().join(format!("main-{}", backup)));
        session.backup = backup;
        session.backup_folder = Some(dir.path().join("backup"));
        let service = service(session);

        let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"pixels")).await;
        assert!(outcome.is_completed());
    }

    let staged = camera.staged_paths();
    assert_eq!(staged.len(), 2);
    assert!(staged.iter().all(|path| !path.exists()));
}

/// A failing backup is reported but the capture still completes
#[tokio::test]
async fn test_backup_failure_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-folder");
    std::fs::write(&blocker, b"").unwrap();

    let mut session = session_in(&dir.path().join("main"));
    session.backup = true;
    session.backup_folder = Some(blocker);
    let service = service(session);
    let mut rx = service.bus().subscribe();
    let camera = Arc::new(MockCamera::new("A"));

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"pixels")).await;
    let item = outcome.item().expect("primary transfer still completes");
    assert!(item.backup_path.is_none());
    assert!(item.path.is_file());

    settle(&service).await;
    let statuses = status_texts(&drain(&mut rx));
    assert!(statuses.iter().any(|s| s.starts_with("Backup error")));
}

// ============================================================================
// Eligibility
// ============================================================================

#[tokio::test]
async fn test_no_download_skips_card_captures() {
    let dir = TempDir::new().unwrap();
    let mut session = session_in(dir.path());
    session.no_download = true;
    let service = service(session);
    let camera = Arc::new(MockCamera::new("A"));

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"x")).await;

    assert_eq!(outcome, TransferOutcome::Skipped(SkipReason::NoDownload));
    assert_eq!(camera.transfers.load(Ordering::SeqCst), 0);
    assert!(!camera.is_busy());
    assert!(files_in(dir.path()).is_empty());
    assert!(settle(&service).await.is_empty());
}

#[tokio::test]
async fn test_device_no_download_setting_is_honoured() {
    let dir = TempDir::new().unwrap();
    let service = service(session_in(dir.path()));
    let camera = Arc::new(MockCamera::new("A").with_no_download());

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"x")).await;
    assert_eq!(outcome, TransferOutcome::Skipped(SkipReason::NoDownload));
}

#[tokio::test]
async fn test_jpeg_only_skips_raw_files() {
    let dir = TempDir::new().unwrap();
    let mut session = session_in(dir.path());
    session.download_only_jpg = true;
    let service = service(session);
    let camera = Arc::new(MockCamera::new("A"));

    let raw = transfer(&service, camera.capture("DSC_1.NEF", b"raw")).await;
    let jpg = transfer(&service, camera.capture("DSC_1.JPG", b"jpg")).await;

    assert_eq!(raw, TransferOutcome::Skipped(SkipReason::NotJpeg));
    assert!(jpg.is_completed());
    assert_eq!(settle(&service).await.len(), 1);
}

/// **Given:** JPEG-only downloads and a camera capturing to RAM
/// **When:** The camera reports a RAW capture
/// **Then:** The capture is still transferred, since it exists nowhere else
#[tokio::test]
async fn test_jpeg_only_never_drops_in_ram_captures() {
    let dir = TempDir::new().unwrap();
    let mut session = session_in(dir.path());
    session.download_only_jpg = true;
    let service = service(session);
    let camera = Arc::new(MockCamera::new("A").with_in_ram());

    let outcome = transfer(&service, camera.capture("capt0000.nef", b"raw")).await;

    let item = outcome.item().expect("in-RAM capture transferred");
    assert_eq!(item.path, dir.path().join("Shoot_0001.nef"));
    assert_eq!(std::fs::read(&item.path).unwrap(), b"raw");
    assert_eq!(settle(&service).await.len(), 1);
}

// ============================================================================
// Failures
// ============================================================================

/// **Given:** A camera whose download fails
/// **When:** A capture is transferred
/// **Then:**
///   - The pipeline ends in Error from the Stage state
///   - Nothing is written or cataloged
///   - The device is idle and a failure status is published
#[tokio::test]
async fn test_download_failure_aborts_capture() {
    let dir = TempDir::new().unwrap();
    let service = service(session_in(dir.path()));
    let mut rx = service.bus().subscribe();
    let camera = Arc::new(MockCamera::new("A"));
    camera.fail_transfer.store(true, Ordering::SeqCst);

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"x")).await;

    match outcome {
        TransferOutcome::Failed { stage, error } => {
            assert_eq!(stage, TransferState::Stage);
            assert!(error.contains("lost connection"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!camera.is_busy());
    assert!(files_in(dir.path()).is_empty());
    assert!(settle(&service).await.is_empty());

    // The partial download was discarded with its staging file
    let staged = camera.staged_paths();
    assert_eq!(staged.len(), 1);
    assert!(!staged[0].exists());

    let events = drain(&mut rx);
    assert!(event_types(&events).contains(&"TransferFailed"));
    assert!(status_texts(&events).last().unwrap().starts_with("Transfer error"));
}

/// **Given:** The destination folder disappears while the download runs
/// **When:** The staged file is committed
/// **Then:**
///   - The capture fails at Commit
///   - The staging file is removed
#[tokio::test]
async fn test_commit_failure_removes_staging_file() {
    let dir = TempDir::new().unwrap();
    let folder = dir.path().join("main");
    let mut session = session_in(&folder);
    session.use_original_filename = true;
    let service = service(session);
    let camera = Arc::new(MockCamera::new("A"));
    camera.remove_during_transfer(&folder);

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"x")).await;

    assert!(matches!(
        outcome,
        TransferOutcome::Failed { stage: TransferState::Commit, .. }
    ));
    let staged = camera.staged_paths();
    assert_eq!(staged.len(), 1);
    assert!(!staged[0].exists());
    assert!(!camera.is_busy());
}

/// A panicking device driver still leaves the device idle
#[tokio::test]
async fn test_device_panic_clears_busy_flag() {
    let dir = TempDir::new().unwrap();
    let service = service(session_in(dir.path()));
    let camera = Arc::new(MockCamera::new("A"));
    camera.panic_on_transfer.store(true, Ordering::SeqCst);

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"x")).await;

    assert!(matches!(
        outcome,
        TransferOutcome::Failed { stage: TransferState::Stage, .. }
    ));
    assert!(!camera.is_busy());

    // The next capture from the same device goes through
    camera.panic_on_transfer.store(false, Ordering::SeqCst);
    assert!(transfer(&service, camera.capture("IMG_2.jpg", b"y")).await.is_completed());
}

#[tokio::test]
async fn test_unwritable_destination_fails_at_resolve() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"").unwrap();
    let service = service(session_in(&blocker));
    let camera = Arc::new(MockCamera::new("A"));

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"x")).await;
    assert!(matches!(
        outcome,
        TransferOutcome::Failed { stage: TransferState::Resolve, .. }
    ));
    assert_eq!(camera.transfers.load(Ordering::SeqCst), 0);
    assert!(!camera.is_busy());
}

// ============================================================================
// Metadata
// ============================================================================

struct BrokenTagger;

impl MetadataTagger for BrokenTagger {
    fn save_comment(&self, _path: &Path, _comment: &str) -> Result<()> {
        Err(Error::Metadata("tag block is read-only".to_string()))
    }

    fn add_keyword(&self, _path: &Path, _keyword: &str) -> Result<()> {
        Err(Error::Metadata("tag block is read-only".to_string()))
    }
}

#[tokio::test]
async fn test_comment_and_keywords_are_stamped() {
    let dir = TempDir::new().unwrap();
    let mut session = session_in(dir.path());
    session.write_comment = true;
    session.comment = "Client: ACME".to_string();
    session.keyword_tags = vec!["product".into(), "".into(), "white".into()];
    let service = service(session);
    let camera = Arc::new(MockCamera::new("A"));

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"x")).await;
    let sidecar = SidecarTagger::read(&outcome.item().unwrap().path).unwrap();

    assert_eq!(sidecar.comment.as_deref(), Some("Client: ACME"));
    assert_eq!(sidecar.keywords, vec!["product", "white"]);
}

#[tokio::test]
async fn test_metadata_failure_aborts_but_keeps_primary_file() {
    let dir = TempDir::new().unwrap();
    let mut session = session_in(dir.path());
    session.write_comment = true;
    session.comment = "x".to_string();
    let service = CaptureServiceBuilder::new(session)
        .tagger(Arc::new(BrokenTagger))
        .build();
    let camera = Arc::new(MockCamera::new("A"));

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"x")).await;

    assert!(matches!(
        outcome,
        TransferOutcome::Failed { stage: TransferState::Metadata, .. }
    ));
    assert_eq!(files_in(dir.path()), vec!["Shoot_0001.jpg"]);
    assert!(settle(&service).await.is_empty());
    assert!(!camera.is_busy());
}

// ============================================================================
// Plugins
// ============================================================================

/// Scenario: plugins [A fails, B succeeds] run from the pipeline, and their
/// status ends up in the live session
#[tokio::test]
async fn test_plugin_status_recorded_in_session() {
    let dir = TempDir::new().unwrap();
    let mut session = session_in(dir.path());
    session.plugins = vec![
        PluginConfig::new("A", FAILING),
        PluginConfig::new("B", RECORDING),
    ];
    let recorder = Arc::new(RecordingPlugin::default());
    let service = service_with(
        session,
        PipelineSettings::default(),
        test_registry(recorder.clone()),
        false,
    );
    let camera = Arc::new(MockCamera::new("A"));

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"x")).await;
    assert!(outcome.is_completed(), "plugin failure must not fail the transfer");

    let plugins = service.coordinator().session().await.unwrap().plugins;
    assert!(plugins[0].is_error);
    assert!(plugins[0].is_ready);
    assert!(plugins[0].error.as_deref().unwrap().contains("export target unreachable"));
    assert!(!plugins[1].is_error);
    assert!(plugins[1].is_ready);
    assert_eq!(recorder.count(), 1);
}

#[tokio::test]
async fn test_copy_to_folder_plugin_from_session() {
    let dir = TempDir::new().unwrap();
    let mut session = session_in(&dir.path().join("main"));
    session.plugins = vec![PluginConfig::new("Export", "copy_to_folder")
        .with_param("destination", dir.path().join("export").to_string_lossy())];
    let service = service(session);
    let camera = Arc::new(MockCamera::new("A"));

    transfer(&service, camera.capture("IMG_1.jpg", b"pixels")).await;

    assert_eq!(
        std::fs::read(dir.path().join("export").join("Shoot_0001.jpg")).unwrap(),
        b"pixels"
    );
}

// ============================================================================
// Notify
// ============================================================================

#[tokio::test]
async fn test_notify_triggers() {
    let dir = TempDir::new().unwrap();
    let viewer = dir.path().join("viewer");
    std::fs::write(&viewer, b"").unwrap();

    let mut settings = PipelineSettings::default();
    settings.viewer.use_external_viewer = true;
    settings.viewer.external_viewer_path = Some(viewer.clone());
    settings.viewer.external_viewer_args = "--open %1".to_string();
    settings.viewer.full_screen_preview = true;
    settings.viewer.play_sound = true;
    settings.viewer.show_transfer_notification = true;

    let service = CaptureServiceBuilder::new(session_in(&dir.path().join("out")))
        .settings(settings)
        .build();
    let mut rx = service.bus().subscribe();
    let camera = Arc::new(MockCamera::new("A"));

    let outcome = transfer(&service, camera.capture("IMG_1.jpg", b"x")).await;
    let path = outcome.item().unwrap().path.clone();
    settle(&service).await;
    let events = drain(&mut rx);

    let commands: Vec<UiCommand> = events
        .iter()
        .filter_map(|e| match e {
            CameraEvent::UiCommand { command, .. } => Some(command.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        commands,
        vec![
            UiCommand::LaunchExternalViewer {
                program: viewer,
                args: format!("--open {}", path.display()),
            },
            UiCommand::PlayCaptureSound,
        ]
    );

    // External viewer mode replaces the built-in preview and full screen
    let types = event_types(&events);
    assert!(!types.contains(&"PreviewReady"));
    assert!(types.contains(&"PhotoTransferred"));
}

#[tokio::test]
async fn test_jpeg_only_preview_skips_raw() {
    let dir = TempDir::new().unwrap();
    let mut settings = PipelineSettings::default();
    settings.preview.auto_preview_jpg_only = true;
    settings.viewer.full_screen_preview = true;

    let service = CaptureServiceBuilder::new(session_in(dir.path()))
        .settings(settings)
        .build();
    let mut rx = service.bus().subscribe();
    let camera = Arc::new(MockCamera::new("A"));

    transfer(&service, camera.capture("DSC_1.NEF", b"raw")).await;
    settle(&service).await;
    let raw_events = drain(&mut rx);
    assert!(!event_types(&raw_events).contains(&"PreviewReady"));
    assert!(event_types(&raw_events).contains(&"UiCommand"));

    transfer(&service, camera.capture("DSC_1.JPG", b"jpg")).await;
    settle(&service).await;
    assert!(event_types(&drain(&mut rx)).contains(&"PreviewReady"));
}

/// **Given:** Delayed loading with jpg-only preview
/// **When:** A raw file is transferred, then a jpeg right after it
/// **Then:** The jpeg's preview is deferred because the raw transfer started
/// the quiet interval
#[tokio::test]
async fn test_raw_transfer_starts_quiet_interval() {
    let dir = TempDir::new().unwrap();
    let mut settings = PipelineSettings::default();
    settings.preview.auto_preview_jpg_only = true;
    settings.preview.delayed_loading = true;
    settings.preview.quiet_interval_ms = 60_000;

    let service = CaptureServiceBuilder::new(session_in(dir.path()))
        .settings(settings)
        .build();
    let mut rx = service.bus().subscribe();
    let camera = Arc::new(MockCamera::new("A"));

    assert!(transfer(&service, camera.capture("DSC_2.NEF", b"raw")).await.is_completed());
    assert!(transfer(&service, camera.capture("DSC_2.JPG", b"jpg")).await.is_completed());
    settle(&service).await;

    let types = event_types(&drain(&mut rx));
    assert_eq!(types.iter().filter(|t| **t == "TransferCompleted").count(), 2);
    assert!(!types.contains(&"PreviewReady"));
}
