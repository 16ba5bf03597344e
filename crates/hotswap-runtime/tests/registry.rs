//! Registry lifecycle tests

mod common;

use common::Fixture;
use hotswap_runtime::{
    ErrorKind, FailurePolicy, HostContext, ModuleError, ReloadEvent, ReloadOutcome,
};

#[test]
fn test_load_creates_record_and_staged_copy() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry();

    let report = registry
        .load("counter", &source, HostContext::null())
        .unwrap();
    assert_eq!(report.version, 0);
    assert!(report.warnings.is_empty());

    let info = registry.info("counter").unwrap();
    assert_eq!(info.source_path, source);
    assert_eq!(info.version, 0);
    assert_eq!(info.reload_count, 0);
    assert!(info.staged_path.starts_with(fx.staging_dir()));
    assert_eq!(fx.staged_files("counter"), vec![info.staged_path.clone()]);
    assert_eq!(common::calls(), vec!["load_counter"]);
    assert_eq!(fx.stats.live(), 1);
}

#[test]
fn test_duplicate_load_is_rejected() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry();

    registry.load("counter", &source, HostContext::null()).unwrap();
    let staged = registry.info("counter").unwrap().staged_path;

    let err = registry
        .load("counter", &source, HostContext::null())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyLoaded);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.info("counter").unwrap().staged_path, staged);
    assert_eq!(fx.staged_files("counter").len(), 1);
    assert_eq!(common::calls(), vec!["load_counter"]);
}

#[test]
fn test_load_missing_source() {
    let fx = Fixture::new();
    let mut registry = fx.registry();

    let err = registry
        .load(
            "ghost",
            fx.source_dir().join("libghost.so"),
            HostContext::null(),
        )
        .unwrap_err();
    assert!(matches!(err, ModuleError::NotFound { path: Some(_), .. }));
    assert!(registry.is_empty());
    assert_eq!(fx.staging_len(), 0);
}

#[test]
fn test_load_map_failure_leaves_nothing_behind() {
    let fx = Fixture::new();
    let source = fx.write_module("garbage", "not an image");
    let mut registry = fx.registry();

    let err = registry
        .load("garbage", &source, HostContext::null())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadFailure);
    assert!(!registry.is_loaded("garbage"));
    assert_eq!(fx.staging_len(), 0);
    assert!(registry.filename_index().is_empty());
}

#[test]
fn test_load_by_name_uses_platform_file_name() {
    let fx = Fixture::new();
    fx.write_module("audio", "audio");
    let mut registry = fx.registry();

    registry.load_by_name("audio", HostContext::null()).unwrap();
    assert!(registry.is_loaded("audio"));

    let err = registry
        .load_by_name("physics", HostContext::null())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_unload_unknown_module() {
    let fx = Fixture::new();
    let mut registry = fx.registry();

    let err = registry.unload("nothing", HostContext::null()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.module_name(), "nothing");
}

#[test]
fn test_unload_removes_record_and_file() {
    let fx = Fixture::new();
    let source = fx.write_module("audio", "audio");
    let mut registry = fx.registry();

    registry.load("audio", &source, HostContext::null()).unwrap();
    let report = registry.unload("audio", HostContext::null()).unwrap();

    assert_eq!(report.version, 0);
    assert!(!registry.is_loaded("audio"));
    assert_eq!(fx.staging_len(), 0);
    assert_eq!(fx.stats.live(), 0);
    assert_eq!(fx.stats.deleted_while_mapped(), 0);
    assert!(registry.filename_index().is_empty());
    assert_eq!(common::calls(), vec!["load_audio", "unload_audio"]);
}

#[test]
fn test_missing_entry_points_are_warnings() {
    let fx = Fixture::new();
    let source = fx.write_module("physics", "physics-unload-only");
    let mut registry = fx.registry();
    let mut events = registry.subscribe();

    let report = registry
        .load("physics", &source, HostContext::null())
        .unwrap();
    assert!(registry.is_loaded("physics"));
    assert_eq!(report.warnings.len(), 1);
    assert!(matches!(
        &report.warnings[0],
        ModuleError::SymbolMissing { symbol, .. } if symbol == "load_physics"
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        ReloadEvent::SymbolMissing { ref symbol, .. } if symbol == "load_physics"
    ));

    let report = registry.unload("physics", HostContext::null()).unwrap();
    assert!(report.warnings.is_empty());
    assert_eq!(common::calls(), vec!["unload_physics"]);
    assert_eq!(fx.staging_len(), 0);
}

#[test]
fn test_module_without_entry_points_still_cycles() {
    let fx = Fixture::new();
    let source = fx.write_module("inert", "empty");
    let mut registry = fx.registry();

    registry.load("inert", &source, HostContext::null()).unwrap();
    let report = registry.reload("inert", HostContext::null()).unwrap();
    assert_eq!(report.state_bytes, 0);
    assert_eq!(report.warnings.len(), 2);

    registry.unload("inert", HostContext::null()).unwrap();
    assert_eq!(fx.staging_len(), 0);
}

#[test]
fn test_reload_bumps_version_and_keeps_one_staged_file() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry();

    registry.load("counter", &source, HostContext::null()).unwrap();
    let before = registry.info("counter").unwrap();

    let report = registry.reload("counter", HostContext::null()).unwrap();
    assert_eq!(report.outcome, ReloadOutcome::Reloaded { version: 1 });
    assert_eq!(report.previous_version, 0);
    assert_eq!(report.state_bytes, 4);

    let after = registry.info("counter").unwrap();
    assert_eq!(after.version, 1);
    assert_eq!(after.reload_count, 1);
    assert_eq!(after.loaded_at, before.loaded_at);
    assert_ne!(after.staged_path, before.staged_path);
    assert!(!before.staged_path.exists());
    assert_eq!(fx.staged_files("counter"), vec![after.staged_path]);
    assert_eq!(fx.stats.live(), 1);
    assert_eq!(fx.stats.deleted_while_mapped(), 0);
}

#[test]
fn test_state_survives_repeated_reloads() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry();

    registry.load("counter", &source, HostContext::null()).unwrap();
    assert_eq!(common::counter(), 0);

    for k in 1..=5u32 {
        registry.reload("counter", HostContext::null()).unwrap();
        assert_eq!(common::counter(), k);
        assert_eq!(registry.version("counter"), Some(u64::from(k)));
    }
}

#[test]
fn test_same_context_reaches_every_entry_point() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry();

    let mut capabilities = [0u64; 4];
    let ctx = HostContext::from_ptr(capabilities.as_mut_ptr());

    registry.load("counter", &source, ctx).unwrap();
    registry.reload("counter", ctx).unwrap();
    registry.unload("counter", ctx).unwrap();

    let contexts = common::contexts();
    assert_eq!(contexts.len(), 4);
    assert!(contexts.iter().all(|&c| c == ctx.as_ptr() as usize));
}

#[test]
fn test_reload_unknown_module() {
    let fx = Fixture::new();
    let mut registry = fx.registry();

    let err = registry.reload("counter", HostContext::null()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.reload_outcome(), None);
}

#[test]
fn test_failed_reload_unloads_by_default() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry();
    let mut events = registry.subscribe();

    registry.load("counter", &source, HostContext::null()).unwrap();
    std::fs::write(&source, "truncated build output").unwrap();

    let err = registry.reload("counter", HostContext::null()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadFailure);
    assert_eq!(err.reload_outcome(), Some(ReloadOutcome::Unloaded));

    assert!(!registry.is_loaded("counter"));
    assert_eq!(fx.staging_len(), 0);
    assert_eq!(fx.stats.live(), 0);
    assert_eq!(fx.stats.deleted_while_mapped(), 0);
    assert!(registry.filename_index().is_empty());

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let ReloadEvent::ReloadFailed { outcome, .. } = event {
            assert_eq!(outcome, ReloadOutcome::Unloaded);
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    // loading again is allowed once the build is fixed
    std::fs::write(&source, "counter").unwrap();
    registry.load("counter", &source, HostContext::null()).unwrap();
    assert_eq!(registry.version("counter"), Some(0));
}

#[test]
fn test_failed_reload_rolls_back_when_configured() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry_with_policy(FailurePolicy::Rollback);

    registry.load("counter", &source, HostContext::null()).unwrap();
    registry.reload("counter", HostContext::null()).unwrap();
    assert_eq!(common::counter(), 1);
    let before = registry.info("counter").unwrap();

    std::fs::write(&source, "half-written").unwrap();
    let err = registry.reload("counter", HostContext::null()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadFailure);
    assert_eq!(
        err.reload_outcome(),
        Some(ReloadOutcome::RolledBack { version: 1 })
    );

    let after = registry.info("counter").unwrap();
    assert_eq!(after.version, 1);
    assert_eq!(after.staged_path, before.staged_path);
    assert!(after.staged_path.exists());
    assert_eq!(fx.staged_files("counter"), vec![after.staged_path]);
    // the captured state was replayed into the rolled-back copy
    assert_eq!(common::counter(), 2);
    assert_eq!(fx.stats.live(), 1);

    std::fs::write(&source, "counter").unwrap();
    let report = registry.reload("counter", HostContext::null()).unwrap();
    assert_eq!(report.outcome, ReloadOutcome::Reloaded { version: 2 });
    assert_eq!(common::counter(), 3);
}

#[test]
fn test_reload_with_missing_source_reports_io_failure() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry();

    registry.load("counter", &source, HostContext::null()).unwrap();
    std::fs::remove_file(&source).unwrap();

    let err = registry.reload("counter", HostContext::null()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);
    assert_eq!(err.reload_outcome(), Some(ReloadOutcome::Unloaded));
    assert_eq!(fx.staging_len(), 0);
}

#[test]
fn test_modules_are_independent() {
    let fx = Fixture::new();
    let counter = fx.write_module("counter", "counter");
    let audio = fx.write_module("audio", "audio");
    let mut registry = fx.registry();

    registry.load("counter", &counter, HostContext::null()).unwrap();
    registry.load("audio", &audio, HostContext::null()).unwrap();
    let audio_before = registry.info("audio").unwrap();

    registry.reload("counter", HostContext::null()).unwrap();
    assert_eq!(registry.info("audio").unwrap(), audio_before);

    std::fs::write(&counter, "broken").unwrap();
    assert!(registry.reload("counter", HostContext::null()).is_err());
    assert!(!registry.is_loaded("counter"));
    assert_eq!(registry.info("audio").unwrap(), audio_before);
    assert_eq!(fx.staged_files("audio"), vec![audio_before.staged_path]);

    let names: Vec<String> = registry.modules().into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["audio"]);
}

#[test]
fn test_teardown_empties_staging() {
    let fx = Fixture::new();
    let counter = fx.write_module("counter", "counter");
    let audio = fx.write_module("audio", "audio");
    let mut registry = fx.registry();

    registry.load("counter", &counter, HostContext::null()).unwrap();
    registry.load("audio", &audio, HostContext::null()).unwrap();
    registry.reload("counter", HostContext::null()).unwrap();

    let failures = registry.teardown(HostContext::null());
    assert!(failures.is_empty());
    assert!(registry.is_empty());
    assert_eq!(fx.staging_len(), 0);
    assert_eq!(fx.stats.live(), 0);
    assert_eq!(fx.stats.deleted_while_mapped(), 0);

    for name in ["counter", "audio"] {
        let err = registry.unload(name, HostContext::null()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert!(common::calls().contains(&"unload_audio".to_string()));
}

#[test]
fn test_reset_skips_unload_entry_points() {
    let fx = Fixture::new();
    let audio = fx.write_module("audio", "audio");
    let mut registry = fx.registry();

    registry.load("audio", &audio, HostContext::null()).unwrap();
    let failures = registry.reset();

    assert!(failures.is_empty());
    assert!(registry.is_empty());
    assert_eq!(fx.staging_len(), 0);
    assert_eq!(fx.stats.live(), 0);
    assert_eq!(fx.stats.deleted_while_mapped(), 0);
    assert_eq!(common::calls(), vec!["load_audio"]);
}

#[test]
fn test_drop_releases_modules_without_unload() {
    let fx = Fixture::new();
    let audio = fx.write_module("audio", "audio");

    {
        let mut registry = fx.registry();
        registry.load("audio", &audio, HostContext::null()).unwrap();
    }

    assert_eq!(fx.staging_len(), 0);
    assert_eq!(fx.stats.live(), 0);
    assert_eq!(common::calls(), vec!["load_audio"]);
}

#[test]
fn test_stale_and_changed_detection() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry();

    registry.load("counter", &source, HostContext::null()).unwrap();
    assert!(!registry.is_stale("counter").unwrap());
    assert!(!registry.has_changed("counter").unwrap());

    fx.touch("counter");
    assert!(registry.is_stale("counter").unwrap());
    assert!(!registry.has_changed("counter").unwrap());

    std::fs::write(&source, "counter\n").unwrap();
    assert!(registry.has_changed("counter").unwrap());

    registry.reload("counter", HostContext::null()).unwrap();
    assert!(!registry.has_changed("counter").unwrap());

    assert_eq!(
        registry.is_stale("audio").unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn test_lifecycle_events() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry();
    let mut events = registry.subscribe();

    registry.load("counter", &source, HostContext::null()).unwrap();
    registry.reload("counter", HostContext::null()).unwrap();
    registry.unload("counter", HostContext::null()).unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert_eq!(seen.len(), 4);
    assert!(matches!(&seen[0], ReloadEvent::Loaded { version: 0, .. }));
    assert!(matches!(&seen[1], ReloadEvent::ReloadStarted { version: 0, .. }));
    assert!(matches!(
        &seen[2],
        ReloadEvent::ReloadCompleted {
            version: 1,
            state_bytes: 4,
            ..
        }
    ));
    assert!(matches!(&seen[3], ReloadEvent::Unloaded { name } if name == "counter"));
}

#[test]
fn test_path_like_names_are_rejected() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry();

    for name in ["../escaped", "nested/counter", "", "counter-debug"] {
        let err = registry.load(name, &source, HostContext::null()).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidName(_)), "{name:?}: {err}");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    let err = registry
        .load_by_name("../escaped", HostContext::null())
        .unwrap_err();
    assert!(matches!(err, ModuleError::InvalidName(_)));

    assert!(registry.is_empty());
    assert_eq!(fx.staging_len(), 0);
    assert_eq!(fx.stats.mapped(), 0);
    let parent = fx.staging_dir().parent().unwrap();
    let escaped = std::fs::read_dir(parent)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_name().to_string_lossy().starts_with("escaped-v"));
    assert!(!escaped);
}

#[test]
fn test_failed_cleanup_after_load_failure_is_reported() {
    let fx = Fixture::new();
    let source = fx.write_module("audio", "squatter");
    let mut registry = fx.registry();

    let err = registry.load("audio", &source, HostContext::null()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadFailure);
    let cleanup = err.cleanup_error().expect("cleanup failure attached");
    assert_eq!(cleanup.kind(), ErrorKind::IoFailure);
    assert!(registry.is_empty());
}

#[test]
fn test_failed_cleanup_after_reload_failure_is_reported() {
    let fx = Fixture::new();
    let source = fx.write_module("counter", "counter");
    let mut registry = fx.registry();
    let mut events = registry.subscribe();

    registry.load("counter", &source, HostContext::null()).unwrap();
    std::fs::write(&source, "squatter").unwrap();

    let err = registry.reload("counter", HostContext::null()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadFailure);
    assert_eq!(err.reload_outcome(), Some(ReloadOutcome::Unloaded));
    assert_eq!(
        err.cleanup_error().map(ModuleError::kind),
        Some(ErrorKind::IoFailure)
    );
    assert!(!registry.is_loaded("counter"));

    let mut failure = None;
    while let Ok(event) = events.try_recv() {
        if let ReloadEvent::ReloadFailed { error, .. } = event {
            failure = Some(error);
        }
    }
    assert!(failure.is_some_and(|error| error.contains("cleanup failed")));
}
