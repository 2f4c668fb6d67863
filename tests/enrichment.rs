//! Enrichment Integration Tests
//!
//! Deduplication, cross-run reuse, failure degradation and retry behavior
//! of the media enricher, driven through fake adapters.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_test::assert_ok;

use common::{noun, ok_media, open_store, spoken, FakeGenerator};
use vocadeck::adapters::GenerationError;
use vocadeck::core::{Enricher, GenerationParams, NormalizationRule, RetryPolicy, RunJournal};
use vocadeck::domain::{FailureKind, MediaCompleteness, MediaRequest, SkipReason, SlotOutcome};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_payload_generated_once_per_run() {
    let temp = TempDir::new().unwrap();
    let speech = Arc::new(FakeGenerator::speech().with_delay(Duration::from_millis(20)));
    let enricher = Enricher::new(open_store(&temp).await)
        .with_speech(speech.clone())
        .with_concurrency(8);

    let entries = (0..6).map(|i| spoken(&i.to_string(), "Hund")).collect();
    let result = enricher.enrich(entries, None).await;

    assert_eq!(speech.calls(), 1);
    assert_eq!(result.stats.generated, 1);
    assert_eq!(result.stats.cache_hits, 5);

    let paths: HashSet<_> = result
        .entries
        .iter()
        .map(|e| e.media("word_audio").unwrap().path.clone())
        .collect();
    assert_eq!(paths.len(), 1);
}

#[tokio::test]
async fn test_fold_case_merges_payloads() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;

    let speech = Arc::new(FakeGenerator::speech());
    let folding = Enricher::new(store.clone())
        .with_speech(speech.clone())
        .with_normalization(NormalizationRule { fold_case: true });
    folding
        .enrich(vec![spoken("1", "Hallo"), spoken("2", "hallo")], None)
        .await;
    assert_eq!(speech.calls(), 1);

    let other = TempDir::new().unwrap();
    let speech = Arc::new(FakeGenerator::speech());
    let exact = Enricher::new(open_store(&other).await).with_speech(speech.clone());
    exact
        .enrich(vec![spoken("1", "Hallo"), spoken("2", "hallo")], None)
        .await;
    assert_eq!(speech.calls(), 2);
}

#[tokio::test]
async fn test_whitespace_variants_share_artifact() {
    let temp = TempDir::new().unwrap();
    let speech = Arc::new(FakeGenerator::speech());
    let enricher = Enricher::new(open_store(&temp).await).with_speech(speech.clone());

    let result = enricher
        .enrich(vec![spoken("1", "guten  Morgen"), spoken("2", " guten Morgen ")], None)
        .await;

    assert_eq!(speech.calls(), 1);
    assert_eq!(
        result.entries[0].media("word_audio"),
        result.entries[1].media("word_audio")
    );
}

#[tokio::test]
async fn test_second_run_reuses_store() {
    let temp = TempDir::new().unwrap();
    let entries = || vec![noun("1", "Hund", "dog"), noun("2", "Katze", "cat")];

    let speech = Arc::new(FakeGenerator::speech());
    let images = Arc::new(FakeGenerator::images());
    let first = Enricher::new(open_store(&temp).await)
        .with_speech(speech.clone())
        .with_images(images.clone())
        .enrich(entries(), None)
        .await;
    assert_eq!(first.stats.generated, 4);

    // Fresh process: reopen the store from disk
    let speech_again = Arc::new(FakeGenerator::speech());
    let images_again = Arc::new(FakeGenerator::images());
    let second = Enricher::new(open_store(&temp).await)
        .with_speech(speech_again.clone())
        .with_images(images_again.clone())
        .enrich(entries(), None)
        .await;

    assert_eq!(speech_again.calls(), 0);
    assert_eq!(images_again.calls(), 0);
    assert_eq!(second.stats.cache_hits, 4);
    assert_eq!(second.stats.generated, 0);

    for (a, b) in first.entries.iter().zip(&second.entries) {
        assert_eq!(a.slots, b.slots);
    }
}

#[tokio::test]
async fn test_prepopulated_store_needs_no_adapter_calls() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let speech = Arc::new(FakeGenerator::speech());
    let enricher = Enricher::new(store.clone()).with_speech(speech.clone());

    let entry = spoken("1", "Baum");
    let key = enricher.content_key_for(&entry.media[0]).unwrap();
    assert_ok!(store.commit(&key, b"recorded by hand", entry.media[0].kind, "ogg").await);

    let result = enricher.enrich(vec![entry], None).await;

    assert_eq!(speech.calls(), 0);
    assert_eq!(result.stats.cache_hits, 1);
    let reference = result.entries[0].media("word_audio").unwrap();
    assert_eq!(reference.key, key);
    assert_eq!(std::fs::read(&reference.path).unwrap(), b"recorded by hand");
}

#[tokio::test]
async fn test_quota_short_circuits_remaining_requests() {
    let temp = TempDir::new().unwrap();
    let speech = Arc::new(
        FakeGenerator::speech()
            .with_script(|_, _| Err(GenerationError::QuotaExceeded("daily limit".into()))),
    );
    let images = Arc::new(FakeGenerator::images());
    let enricher = Enricher::new(open_store(&temp).await)
        .with_speech(speech.clone())
        .with_images(images.clone())
        .with_concurrency(1);

    let result = enricher
        .enrich(
            vec![
                noun("1", "Hund", "dog"),
                noun("2", "Katze", "cat"),
                noun("3", "Maus", "mouse"),
            ],
            None,
        )
        .await;

    assert_eq!(speech.calls(), 1);
    assert_eq!(images.calls(), 3);
    assert_eq!(result.stats.failed.get(&FailureKind::QuotaExceeded), Some(&3));

    for entry in &result.entries {
        assert_eq!(
            entry.slots["word_audio"],
            SlotOutcome::Failed {
                failure: FailureKind::QuotaExceeded
            }
        );
        assert!(entry.media("image").is_some());
        assert_eq!(entry.completeness(), MediaCompleteness::Partial);
    }
}

#[tokio::test]
async fn test_quota_gate_does_not_outlive_the_run() {
    let temp = TempDir::new().unwrap();
    let speech = Arc::new(FakeGenerator::speech().with_script(|request, call| {
        if call == 1 {
            Err(GenerationError::QuotaExceeded("try tomorrow".into()))
        } else {
            ok_media(request)
        }
    }));
    let enricher = Enricher::new(open_store(&temp).await).with_speech(speech.clone());

    let first = enricher.enrich(vec![spoken("1", "Hund")], None).await;
    assert_eq!(first.stats.failed_total(), 1);

    let second = enricher.enrich(vec![spoken("1", "Hund")], None).await;
    assert_eq!(second.stats.generated, 1);
    assert_eq!(speech.calls(), 2);
}

#[tokio::test]
async fn test_permanent_failure_degrades_only_that_entry() {
    let temp = TempDir::new().unwrap();
    let speech = Arc::new(FakeGenerator::speech().with_script(|request, _| {
        if request.text == "xyzzy" {
            Err(GenerationError::PermanentRequest("unpronounceable".into()))
        } else {
            ok_media(request)
        }
    }));
    let enricher = Enricher::new(open_store(&temp).await)
        .with_speech(speech.clone())
        .with_retry_policy(RetryPolicy::immediate(3));

    let result = enricher
        .enrich(vec![spoken("1", "Hund"), spoken("2", "xyzzy"), spoken("3", "Katze")], None)
        .await;

    // Permanent errors are not retried
    assert_eq!(speech.calls(), 3);
    assert_eq!(result.entries.len(), 3);
    assert_eq!(
        result.entries[1].slots["word_audio"],
        SlotOutcome::Failed {
            failure: FailureKind::PermanentRequest
        }
    );
    assert_eq!(result.entries[1].completeness(), MediaCompleteness::Missing);
    assert_eq!(result.entries[0].completeness(), MediaCompleteness::Complete);
    assert_eq!(result.entries[2].completeness(), MediaCompleteness::Complete);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let temp = TempDir::new().unwrap();
    let speech = Arc::new(FakeGenerator::speech().with_script(|request, call| {
        if call < 3 {
            Err(GenerationError::Transient("503".into()))
        } else {
            ok_media(request)
        }
    }));
    let enricher = Enricher::new(open_store(&temp).await)
        .with_speech(speech.clone())
        .with_retry_policy(RetryPolicy::immediate(3));

    let result = enricher.enrich(vec![spoken("1", "Hund")], None).await;

    assert_eq!(speech.calls(), 3);
    assert_eq!(result.stats.generated, 1);
    assert!(result.entries[0].media("word_audio").is_some());
}

#[tokio::test]
async fn test_retry_budget_exhaustion_is_transient_failure() {
    let temp = TempDir::new().unwrap();
    let speech = Arc::new(
        FakeGenerator::speech().with_script(|_, _| Err(GenerationError::Transient("timeout".into()))),
    );
    let enricher = Enricher::new(open_store(&temp).await)
        .with_speech(speech.clone())
        .with_retry_policy(RetryPolicy::immediate(2));

    let result = enricher.enrich(vec![spoken("1", "Hund")], None).await;

    assert_eq!(speech.calls(), 2);
    assert_eq!(
        result.entries[0].slots["word_audio"],
        SlotOutcome::Failed {
            failure: FailureKind::TransientService
        }
    );
}

#[tokio::test]
async fn test_failed_key_is_not_retried_within_run() {
    let temp = TempDir::new().unwrap();
    let speech = Arc::new(
        FakeGenerator::speech()
            .with_script(|_, _| Err(GenerationError::PermanentRequest("rejected".into()))),
    );
    let enricher = Enricher::new(open_store(&temp).await)
        .with_speech(speech.clone())
        .with_concurrency(1);

    let result = enricher
        .enrich(vec![spoken("1", "Hund"), spoken("2", "Hund")], None)
        .await;

    assert_eq!(speech.calls(), 1);
    assert_eq!(result.stats.failed_total(), 2);
}

#[tokio::test]
async fn test_missing_adapter_skips_slot() {
    let temp = TempDir::new().unwrap();
    let speech = Arc::new(FakeGenerator::speech());
    let enricher = Enricher::new(open_store(&temp).await).with_speech(speech);

    let result = enricher.enrich(vec![noun("1", "Hund", "dog")], None).await;

    assert_eq!(
        result.entries[0].slots["image"],
        SlotOutcome::Skipped {
            reason: SkipReason::NoAdapter
        }
    );
    assert_eq!(result.stats.skipped, 1);
    assert_eq!(result.entries[0].completeness(), MediaCompleteness::Partial);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_output_order_matches_input_under_concurrency() {
    let temp = TempDir::new().unwrap();
    let speech = Arc::new(FakeGenerator::speech().with_script(|request, _| {
        // Earlier entries take longer
        let millis = 40u64.saturating_sub(request.text.len() as u64 * 3);
        std::thread::sleep(Duration::from_millis(millis));
        ok_media(request)
    }));
    let enricher = Enricher::new(open_store(&temp).await)
        .with_speech(speech)
        .with_concurrency(4);

    let words = ["a", "bb", "ccc", "dddd", "eeeee", "ffffff"];
    let entries = words
        .iter()
        .enumerate()
        .map(|(i, w)| spoken(&i.to_string(), w))
        .collect();
    let result = enricher.enrich(entries, None).await;

    let ids: Vec<_> = result.entries.iter().map(|e| e.entry.id.as_str()).collect();
    assert_eq!(ids, vec!["0", "1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn test_journal_records_slot_events() {
    let temp = TempDir::new().unwrap();
    let journal = RunJournal::open(&temp.path().join("runs"), uuid::Uuid::new_v4())
        .await
        .unwrap();
    let enricher = Enricher::new(open_store(&temp).await)
        .with_speech(Arc::new(FakeGenerator::speech()))
        .with_concurrency(1);

    enricher
        .enrich(vec![noun("1", "Hund", "dog"), spoken("2", "Hund")], Some(&journal))
        .await;

    let events = journal.replay().await.unwrap();
    let mut kinds: Vec<String> = events
        .iter()
        .map(|e| serde_json::to_value(&e.event_type).unwrap().as_str().unwrap().to_string())
        .collect();

    // Concurrency 1 resolves slots in declaration order
    assert_eq!(kinds, vec!["slot_generated", "slot_skipped", "slot_cache_hit"]);
}

#[tokio::test]
async fn test_store_write_failure_degrades_only_that_slot() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp).await;
    let speech = Arc::new(FakeGenerator::speech());
    let enricher = Enricher::new(store.clone()).with_speech(speech.clone());

    let blocked = spoken("1", "Hund");
    let blocked_key = enricher.content_key_for(&blocked.media[0]).unwrap();
    let blocked_shard = &blocked_key.as_str()[..2];

    // A regular file where the shard directory should go
    std::fs::write(store.root().join("objects").join(blocked_shard), b"in the way").unwrap();

    let others: Vec<_> = ["Katze", "Maus", "Baum", "Haus", "Apfel", "Tisch"]
        .iter()
        .enumerate()
        .map(|(i, word)| spoken(&(i + 2).to_string(), word))
        .filter(|entry| {
            let key = enricher.content_key_for(&entry.media[0]).unwrap();
            &key.as_str()[..2] != blocked_shard
        })
        .take(2)
        .collect();
    assert_eq!(others.len(), 2);

    let mut entries = vec![blocked];
    entries.extend(others);
    let result = enricher.enrich(entries, None).await;

    assert_eq!(result.entries.len(), 3);
    assert_eq!(
        result.entries[0].slots["word_audio"],
        SlotOutcome::Failed {
            failure: FailureKind::StoreWrite
        }
    );
    assert_eq!(result.stats.failed.get(&FailureKind::StoreWrite), Some(&1));
    assert_eq!(result.stats.generated, 2);
    for entry in &result.entries[1..] {
        assert_eq!(entry.completeness(), MediaCompleteness::Complete);
    }
    assert!(store.lookup(&blocked_key).is_none());
}

#[tokio::test]
async fn test_sequential_slots_share_the_quota_gate() {
    let temp = TempDir::new().unwrap();
    let speech = Arc::new(
        FakeGenerator::speech()
            .with_script(|_, _| Err(GenerationError::QuotaExceeded("daily limit".into()))),
    );
    let enricher = Enricher::new(open_store(&temp).await)
        .with_speech(speech.clone())
        .with_concurrency(1);

    let entry = spoken("1", "Hund").with_media(MediaRequest::audio(
        "example_audio",
        "Der Hund schläft.",
        GenerationParams::new().with("language", "de-DE"),
    ));
    let result = enricher.enrich(vec![entry], None).await;

    // The second slot never reaches the adapter
    assert_eq!(speech.calls(), 1);
    assert_eq!(result.stats.failed.get(&FailureKind::QuotaExceeded), Some(&2));
    for slot in ["word_audio", "example_audio"] {
        assert_eq!(
            result.entries[0].slots[slot],
            SlotOutcome::Failed {
                failure: FailureKind::QuotaExceeded
            }
        );
    }
}
