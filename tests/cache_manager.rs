mod common;

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Fixture, HashEmbedder, PanicEmbedder};
use lesson_harness::search::retrieve;
use lesson_harness_core::{CacheError, SubjectState};

#[tokio::test]
async fn test_first_call_builds_then_reuses() {
    let fx = Fixture::new();
    fx.write("Biology", "cells.txt", "Cells are the unit of life.");
    fx.write("Biology", "genes.md", "# Genes\n\nGenes carry heredity.");
    let embedder = HashEmbedder::new();
    let manager = fx.manager(embedder.clone());

    let first = manager.get_index("Biology").await.unwrap();
    assert_eq!(manager.rebuild_count(), 1);
    assert!(fx.manifest("Biology").exists());

    let second = manager.get_index("Biology").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.rebuild_count(), 1);
    assert_eq!(
        manager.registry().get_state("Biology").unwrap(),
        SubjectState::Ready
    );
}

#[tokio::test]
async fn test_restart_loads_persisted_artifact_without_rebuild() {
    let fx = Fixture::new();
    fx.write("Chemistry", "bonds.txt", "Covalent and ionic bonds.");

    let built = fx
        .manager(HashEmbedder::new())
        .get_index("Chemistry")
        .await
        .unwrap();

    let embedder = HashEmbedder::new();
    let restarted = fx.manager(embedder.clone());
    let loaded = restarted.get_index("Chemistry").await.unwrap();

    assert_eq!(restarted.rebuild_count(), 0);
    assert_eq!(embedder.calls(), 0);
    assert_eq!(loaded.fingerprint(), built.fingerprint());
    assert_eq!(loaded.chunk_count(), built.chunk_count());
}

#[tokio::test]
async fn test_changed_sources_trigger_rebuild() {
    let fx = Fixture::new();
    fx.write("Physics", "motion.txt", "Newton's laws of motion.");
    let manager = fx.manager(HashEmbedder::new());
    let before = manager.get_index("Physics").await.unwrap();

    fx.write("Physics", "waves.txt", "Waves carry energy.");
    let after = manager.get_index("Physics").await.unwrap();
    assert_eq!(manager.rebuild_count(), 2);
    assert_ne!(before.fingerprint(), after.fingerprint());

    fx.remove("Physics", "waves.txt");
    let reverted = manager.get_index("Physics").await.unwrap();
    assert_eq!(manager.rebuild_count(), 3);
    assert_eq!(reverted.fingerprint(), before.fingerprint());
}

#[tokio::test]
async fn test_touching_a_file_does_not_rebuild() {
    let fx = Fixture::new();
    fx.write("Physics", "motion.txt", "Newton's laws of motion.");
    let manager = fx.manager(HashEmbedder::new());
    manager.get_index("Physics").await.unwrap();

    // Same bytes, new mtime.
    std::thread::sleep(Duration::from_millis(20));
    fx.write("Physics", "motion.txt", "Newton's laws of motion.");

    let restarted = fx.manager(HashEmbedder::new());
    restarted.get_index("Physics").await.unwrap();
    assert_eq!(restarted.rebuild_count(), 0);
}

#[tokio::test]
async fn test_corrupt_vectors_file_is_rebuilt() {
    let fx = Fixture::new();
    fx.write("Geography", "rivers.txt", "The Niger and Benue rivers.");
    let built = fx
        .manager(HashEmbedder::new())
        .get_index("Geography")
        .await
        .unwrap();

    let vectors = fx.vectors_file("Geography");
    let mut bytes = fs::read(&vectors).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&vectors, bytes).unwrap();

    let manager = fx.manager(HashEmbedder::new());
    let rebuilt = manager.get_index("Geography").await.unwrap();
    assert_eq!(manager.rebuild_count(), 1);
    assert_eq!(rebuilt.fingerprint(), built.fingerprint());

    // The replacement artifact is intact.
    let again = fx.manager(HashEmbedder::new());
    again.get_index("Geography").await.unwrap();
    assert_eq!(again.rebuild_count(), 0);
}

#[tokio::test]
async fn test_garbage_manifest_is_rebuilt() {
    let fx = Fixture::new();
    fx.write("Geography", "rivers.txt", "The Niger and Benue rivers.");
    fx.manager(HashEmbedder::new())
        .get_index("Geography")
        .await
        .unwrap();

    fs::write(fx.manifest("Geography"), b"{ not json").unwrap();

    let manager = fx.manager(HashEmbedder::new());
    manager.get_index("Geography").await.unwrap();
    assert_eq!(manager.rebuild_count(), 1);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_rebuild() {
    let fx = Fixture::new();
    fx.write("History", "empires.txt", "The Oyo and Benin empires.");
    let embedder = HashEmbedder::slow(Duration::from_millis(300));
    let manager = fx.manager(embedder.clone());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let m = manager.clone();
            tokio::spawn(async move { m.get_index("History").await })
        })
        .collect();

    let mut indices = Vec::new();
    for handle in handles {
        indices.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(manager.rebuild_count(), 1);
    assert_eq!(embedder.calls(), 1);
    for index in &indices[1..] {
        assert!(Arc::ptr_eq(&indices[0], index));
    }
}

#[tokio::test]
async fn test_concurrent_callers_share_one_failure() {
    let fx = Fixture::new();
    fx.write("History", "empires.txt", "The Oyo and Benin empires.");
    let embedder = HashEmbedder::slow(Duration::from_millis(300));
    embedder.set_failing(true);
    let manager = fx.manager(embedder.clone());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let m = manager.clone();
            tokio::spawn(async move { m.get_index("History").await })
        })
        .collect();

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, CacheError::PartialIngestFailure { .. }), "{err}");
    }
    assert_eq!(manager.rebuild_count(), 1);
    assert_eq!(embedder.calls(), 1);

    // A later, separate request tries again.
    embedder.set_failing(false);
    manager.get_index("History").await.unwrap();
    assert_eq!(manager.rebuild_count(), 2);
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_artifact() {
    let fx = Fixture::new();
    fx.write("English", "poems.txt", "Poetry and prose.");
    let manager = fx.manager(HashEmbedder::new());
    let good = manager.get_index("English").await.unwrap();

    fx.write("English", "scan.txt", "BROKEN scan");
    let err = manager.get_index("English").await.unwrap_err();
    match &err {
        CacheError::PartialIngestFailure { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].path, "scan.txt");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        manager.registry().get_state("English").unwrap(),
        SubjectState::Failed(_)
    ));

    let on_disk = manager.persistence().load("English").unwrap();
    assert_eq!(&on_disk.fingerprint, good.fingerprint());

    // Restoring the sources makes the old index valid again.
    fx.remove("English", "scan.txt");
    let back = manager.get_index("English").await.unwrap();
    assert!(Arc::ptr_eq(&good, &back));
    assert_eq!(manager.rebuild_count(), 2);
    assert!(manager.registry().get_state("English").unwrap().is_ready());
}

#[tokio::test]
async fn test_failed_forced_rebuild_keeps_active_index() {
    let fx = Fixture::new();
    fx.write("Economics", "markets.txt", "Supply and demand.");
    let embedder = HashEmbedder::new();
    let manager = fx.manager(embedder.clone());
    let good = manager.get_index("Economics").await.unwrap();

    embedder.set_failing(true);
    assert!(manager.force_rebuild("Economics").await.is_err());
    assert_eq!(
        &manager.persistence().load("Economics").unwrap().fingerprint,
        good.fingerprint()
    );

    let still = manager.get_index("Economics").await.unwrap();
    assert!(Arc::ptr_eq(&good, &still));
    assert_eq!(manager.rebuild_count(), 2);
}

#[tokio::test]
async fn test_force_rebuild_replaces_artifact() {
    let fx = Fixture::new();
    fx.write("Economics", "markets.txt", "Supply and demand.");
    let manager = fx.manager(HashEmbedder::new());
    let first = manager.get_index("Economics").await.unwrap();
    let old_vectors = fx.vectors_file("Economics");

    let forced = manager.force_rebuild("Economics").await.unwrap();
    assert!(!Arc::ptr_eq(&first, &forced));
    assert_eq!(forced.fingerprint(), first.fingerprint());
    assert_eq!(manager.rebuild_count(), 2);

    // Old payload is cleaned up once the new manifest is committed.
    assert!(!old_vectors.exists());
    assert_eq!(common::vectors_files(&fx.cache().join("Economics")).len(), 1);
}

#[tokio::test]
async fn test_mathematics_syllabus_scenario() {
    const SYLLABUS: &str = "Quadratic equations and the quadratic formula.\n\n\
                            Probability of independent events.\n\n\
                            Statistics: mean median and mode.";
    let fx = Fixture::new();
    fx.write("Mathematics", "syllabus.pdf", SYLLABUS);
    let manager = fx.manager(HashEmbedder::new());

    // First request builds from the one file and nothing else.
    let first = manager.get_index("Mathematics").await.unwrap();
    assert_eq!(manager.rebuild_count(), 1);
    let records = &first.cached().chunks;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.source == "syllabus.pdf"));
    let locators: Vec<&str> = records.iter().map(|r| r.locator.as_str()).collect();
    assert_eq!(locators, vec!["section 1", "section 2", "section 3"]);
    assert!(records[0].text.contains("Quadratic"));
    assert!(records[1].text.contains("Probability"));
    assert!(records[2].text.contains("Statistics"));
    let files: Vec<&str> = first.cached().files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(files, vec!["syllabus.pdf"]);

    let hits = retrieve(&manager, "Mathematics", "quadratic equations", 3)
        .await
        .unwrap();
    assert_eq!(hits[0].rank, 1);
    assert_eq!(hits[0].source, "syllabus.pdf");
    assert!(hits[0].text.contains("Quadratic"));

    // A restart reuses the artifact.
    let restarted = fx.manager(HashEmbedder::new());
    let loaded = restarted.get_index("Mathematics").await.unwrap();
    assert_eq!(restarted.rebuild_count(), 0);
    assert_eq!(loaded.cached().chunks, first.cached().chunks);

    // Editing the syllabus in place rebuilds exactly once.
    fx.write(
        "Mathematics",
        "syllabus.pdf",
        &format!("{}\n\nTrigonometry: sine and cosine rules.", SYLLABUS),
    );
    let edited = restarted.get_index("Mathematics").await.unwrap();
    assert_eq!(restarted.rebuild_count(), 1);
    assert_ne!(edited.fingerprint(), first.fingerprint());
    assert_eq!(edited.chunk_count(), 4);
    assert!(edited.cached().chunks[3].text.contains("Trigonometry"));
    restarted.get_index("Mathematics").await.unwrap();
    assert_eq!(restarted.rebuild_count(), 1);

    // Reverting the edit rebuilds again, back to the original content.
    fx.write("Mathematics", "syllabus.pdf", SYLLABUS);
    let reverted = restarted.get_index("Mathematics").await.unwrap();
    assert_eq!(restarted.rebuild_count(), 2);
    assert_eq!(reverted.fingerprint(), first.fingerprint());
    assert_eq!(reverted.cached().chunks, first.cached().chunks);

    let after = fx.manager(HashEmbedder::new());
    after.get_index("Mathematics").await.unwrap();
    assert_eq!(after.rebuild_count(), 0);
}

#[tokio::test]
async fn test_non_finite_embeddings_fail_without_artifact() {
    let fx = Fixture::new();
    fx.write("Biology", "cells.txt", "Cells.");
    fx.write("Biology", "genes.txt", "NAN genes.");
    let embedder = HashEmbedder::new();
    embedder.set_nan_on_marker(true);
    let manager = fx.manager(embedder.clone());

    let err = manager.get_index("Biology").await.unwrap_err();
    match &err {
        CacheError::PartialIngestFailure { failures, .. } => {
            assert!(failures.iter().any(|f| f.path == "genes.txt"));
            assert!(failures[0].reason.contains("non-finite"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!fx.manifest("Biology").exists());

    // Once the backend behaves, the saved artifact survives a restart.
    embedder.set_nan_on_marker(false);
    manager.get_index("Biology").await.unwrap();
    let restarted = fx.manager(HashEmbedder::new());
    restarted.get_index("Biology").await.unwrap();
    assert_eq!(restarted.rebuild_count(), 0);
}

#[tokio::test]
async fn test_panicking_embedder_marks_subject_failed() {
    let fx = Fixture::new();
    fx.write("Biology", "cells.txt", "Cells.");
    let manager = fx.manager(Arc::new(PanicEmbedder));

    let err = manager.get_index("Biology").await.unwrap_err();
    assert!(matches!(err, CacheError::Interrupted { .. }), "{err}");
    assert!(matches!(
        manager.registry().get_state("Biology").unwrap(),
        SubjectState::Failed(_)
    ));
    let status = manager
        .statuses()
        .into_iter()
        .find(|s| s.subject == "Biology")
        .unwrap();
    assert_eq!(status.state, "failed");

    // The gate is released; the next request is served, not deadlocked.
    let again = tokio::time::timeout(Duration::from_secs(5), manager.get_index("Biology")).await;
    assert!(matches!(again, Ok(Err(CacheError::Interrupted { .. }))));
}

#[tokio::test]
async fn test_empty_subject_fails_without_artifact() {
    let fx = Fixture::new();
    fx.subject_dir("Music");
    let manager = fx.manager(HashEmbedder::new());

    let err = manager.get_index("Music").await.unwrap_err();
    assert!(matches!(err, CacheError::EmptySubject { .. }));
    assert_eq!(manager.rebuild_count(), 0);
    assert!(!fx.manifest("Music").exists());
    assert!(matches!(
        manager.registry().get_state("Music").unwrap(),
        SubjectState::Failed(_)
    ));
}

#[tokio::test]
async fn test_unknown_subject() {
    let fx = Fixture::new();
    let manager = fx.manager(HashEmbedder::new());
    let err = manager.get_index("Astrology").await.unwrap_err();
    assert!(matches!(err, CacheError::UnknownSubject { .. }));
}

#[tokio::test]
async fn test_subject_added_after_startup_is_discovered() {
    let fx = Fixture::new();
    let manager = fx.manager(HashEmbedder::new());
    fx.write("Literature", "novels.txt", "Things Fall Apart.");
    manager.get_index("Literature").await.unwrap();
}

#[tokio::test]
async fn test_discover_subjects_picks_up_new_directories() {
    let fx = Fixture::new();
    fx.subject_dir("Music");
    let manager = fx.manager(HashEmbedder::new());

    fx.write("Literature", "novels.txt", "Things Fall Apart.");
    let found = manager.discover_subjects().await.unwrap();
    assert_eq!(found, vec!["Literature".to_string(), "Music".to_string()]);

    let err = manager.get_index("Astrology").await.unwrap_err();
    assert!(matches!(err, CacheError::UnknownSubject { .. }));
    manager.get_index("Literature").await.unwrap();
}

#[tokio::test]
async fn test_subjects_do_not_block_each_other() {
    let fx = Fixture::new();
    fx.write("Agriculture", "soil.txt", "SLOW soil science.");
    fx.write("Civics", "rights.txt", "Human rights.");
    let manager = fx.manager(HashEmbedder::slow_on_marker(Duration::from_secs(2)));

    let slow = {
        let m = manager.clone();
        tokio::spawn(async move { m.get_index("Agriculture").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    manager.get_index("Civics").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!slow.is_finished());

    slow.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_abandoned_caller_does_not_cancel_rebuild() {
    let fx = Fixture::new();
    fx.write("Physics", "optics.txt", "Lenses and mirrors.");
    let embedder = HashEmbedder::slow(Duration::from_millis(300));
    let manager = fx.manager(embedder.clone());

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), manager.get_index("Physics")).await;
    assert!(abandoned.is_err());

    manager.get_index("Physics").await.unwrap();
    assert_eq!(manager.rebuild_count(), 1);
    assert_eq!(embedder.calls(), 1);
}

#[tokio::test]
async fn test_invalidate_forces_next_rebuild() {
    let fx = Fixture::new();
    fx.write("Biology", "cells.txt", "Cells.");
    let manager = fx.manager(HashEmbedder::new());
    manager.get_index("Biology").await.unwrap();

    manager.invalidate("Biology").await.unwrap();
    assert!(!fx.manifest("Biology").exists());
    assert_eq!(
        manager.registry().get_state("Biology").unwrap(),
        SubjectState::Unknown
    );

    manager.get_index("Biology").await.unwrap();
    assert_eq!(manager.rebuild_count(), 2);

    // Invalidating twice is harmless.
    manager.invalidate("Biology").await.unwrap();
    manager.invalidate("Biology").await.unwrap();
}

#[tokio::test]
async fn test_abandoned_invalidate_never_leaves_stale_resident() {
    let fx = Fixture::new();
    fx.write("Biology", "cells.txt", "Cells.");
    let manager = fx.manager(HashEmbedder::new());
    manager.get_index("Biology").await.unwrap();

    // Drop the invalidate at different points; whatever it got done, the
    // next lookup must agree with what is on disk.
    for micros in [0, 10, 100, 1_000, 10_000] {
        let _ = tokio::time::timeout(
            Duration::from_micros(micros),
            manager.invalidate("Biology"),
        )
        .await;
        manager.get_index("Biology").await.unwrap();
        assert!(
            manager.persistence().load("Biology").is_ok(),
            "resident index served without an artifact (dropped after {micros}us)"
        );
    }
}

#[tokio::test]
async fn test_statuses_report_resident_indices() {
    let fx = Fixture::new();
    fx.write("Biology", "cells.txt", "Cells.");
    fx.subject_dir("Music");
    let manager = fx.manager(HashEmbedder::new());
    manager.get_index("Biology").await.unwrap();
    let _ = manager.get_index("Music").await;

    let statuses = manager.statuses();
    let biology = statuses.iter().find(|s| s.subject == "Biology").unwrap();
    assert_eq!(biology.state, "ready");
    assert_eq!(biology.chunks, Some(1));
    assert_eq!(biology.model.as_deref(), Some("hash-bow"));

    let music = statuses.iter().find(|s| s.subject == "Music").unwrap();
    assert_eq!(music.state, "failed");
    assert!(music.reason.is_some());
}
