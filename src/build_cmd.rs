//! `lesson build` and `lesson purge`.
//!
//! `build` warms subject indices through the cache manager: a subject whose
//! artifact is fresh is only loaded, a stale or missing one is rebuilt.
//! With `--force` every selected subject is rebuilt.

use std::time::Instant;

use anyhow::{bail, Result};

use crate::cache::CacheManager;
use crate::config::Config;

pub async fn run_build(
    config: &Config,
    manager: &CacheManager,
    subject: Option<&str>,
    force: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Building indices requires embeddings. Set [embedding] provider in config.");
    }

    let subjects = match subject {
        Some(s) => vec![s.to_string()],
        None => manager.discover_subjects().await?,
    };
    if subjects.is_empty() {
        println!(
            "No subjects found under {}",
            config.curriculum.root.display()
        );
        return Ok(());
    }

    println!("{}", if force { "build (forced)" } else { "build" });
    let mut failed = 0usize;
    for subject in &subjects {
        let started = Instant::now();
        let before = manager.rebuild_count();
        let result = if force {
            manager.force_rebuild(subject).await
        } else {
            manager.get_index(subject).await
        };
        let elapsed = started.elapsed().as_millis();

        match result {
            Ok(index) => {
                let action = if manager.rebuild_count() > before {
                    "rebuilt"
                } else {
                    "loaded"
                };
                println!(
                    "  {:<24} {:<8} {:>6} chunks  {} ({} ms)",
                    subject,
                    action,
                    index.chunk_count(),
                    index.fingerprint().short(),
                    elapsed
                );
            }
            Err(e) => {
                failed += 1;
                println!("  {:<24} failed", subject);
                eprintln!("    {}", e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} subject(s) failed to build", failed, subjects.len());
    }
    Ok(())
}

pub async fn run_purge(manager: &CacheManager, subject: &str) -> Result<()> {
    manager.invalidate(subject).await?;
    println!("purged cached index for {}", subject);
    Ok(())
}
