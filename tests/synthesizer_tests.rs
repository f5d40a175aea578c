use std::sync::Arc;
use std::time::Duration;

use kata::synthesizer::{AnswerSynthesizer, FALLBACK_MODEL_ID};
use kata::types::{ItemProjection, RetrievedItem, UsagePurpose};

mod test_helpers;
use test_helpers::*;

fn item(id: &str, title: &str, body: &str, score: f32) -> RetrievedItem {
    RetrievedItem {
        id: id.into(),
        origin_collection: "techniques".into(),
        payload: ItemProjection {
            title: title.into(),
            body: body.into(),
            ..Default::default()
        },
        relevance_score: score,
    }
}

fn items() -> Vec<RetrievedItem> {
    vec![
        item("t1", "Zenkutsu Dachi", "Front stance with the weight forward.", 0.9),
        item("t2", "Kiba Dachi", "Horse stance, feet wide and parallel.", 0.8),
        item("t3", "Kokutsu Dachi", &"Back stance. ".repeat(100), 0.7),
        item("t4", "Neko Ashi Dachi", "Cat stance.", 0.6),
    ]
}

fn synthesizer(generation: Arc<FakeGeneration>, usage: Arc<RecordingUsage>) -> AnswerSynthesizer {
    AnswerSynthesizer::new(generation, usage, Duration::from_secs(1))
}

#[tokio::test]
async fn test_generated_answer_and_usage() {
    let generation = Arc::new(FakeGeneration::default());
    let usage = Arc::new(RecordingUsage::default());
    let synth = synthesizer(generation.clone(), usage.clone());

    let answer = synth
        .synthesize("Which stances come first?", &items(), "gpt-4o", 0.2, 500)
        .await;

    assert!(!answer.degraded);
    assert_eq!(answer.model_id, "gpt-4o");
    assert_eq!(answer.text, generation.answer);
    assert_eq!(answer.token_usage.input_tokens, 900);
    assert_eq!(answer.token_usage.output_tokens, 60);

    let records = usage.records.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].purpose, UsagePurpose::Answer);
    assert!((records[0].cost_usd - (0.9 * 0.0025 + 0.06 * 0.01)).abs() < 1e-12);

    let requests = generation.requests.lock().unwrap().clone();
    assert_eq!(requests[0].temperature, 0.2);
    assert!(requests[0].messages[1].content.contains("[1] Zenkutsu Dachi"));
    assert!(requests[0].messages[1].content.contains("[4] Neko Ashi Dachi"));
}

#[tokio::test]
async fn test_failing_backend_yields_extractive_answer_from_top_three() {
    let synth = synthesizer(Arc::new(FakeGeneration::failing()), Arc::new(RecordingUsage::default()));

    let answer = synth
        .synthesize("Which stances come first?", &items(), "gpt-4o-mini", 0.3, 800)
        .await;

    assert!(answer.degraded);
    assert_eq!(answer.model_id, FALLBACK_MODEL_ID);
    assert_eq!(answer.token_usage.total(), 0);
    assert!(answer.text.contains("1. Zenkutsu Dachi: Front stance"));
    assert!(answer.text.contains("2. Kiba Dachi"));
    assert!(answer.text.contains("3. Kokutsu Dachi"));
    assert!(!answer.text.contains("Neko Ashi Dachi"));
    // Long bodies are truncated.
    assert!(answer.text.chars().count() < 800);
}

#[tokio::test]
async fn test_fallback_with_no_items_is_still_non_empty() {
    let synth = synthesizer(Arc::new(FakeGeneration::failing()), Arc::new(RecordingUsage::default()));
    let answer = synth.synthesize("anything", &[], "gpt-4o-mini", 0.3, 800).await;

    assert!(answer.degraded);
    assert!(!answer.text.trim().is_empty());
}

#[tokio::test]
async fn test_blank_generation_falls_back() {
    let generation = Arc::new(FakeGeneration {
        answer: "   ".into(),
        ..Default::default()
    });
    let synth = synthesizer(generation, Arc::new(RecordingUsage::default()));
    let answer = synth.synthesize("stances", &items(), "gpt-4o-mini", 0.3, 800).await;
    assert!(answer.degraded);
}

#[tokio::test]
async fn test_usage_sink_failure_does_not_fail_answer() {
    let usage = Arc::new(RecordingUsage {
        broken: true,
        ..Default::default()
    });
    let synth = synthesizer(Arc::new(FakeGeneration::default()), usage);
    let answer = synth.synthesize("stances", &items(), "gpt-4o-mini", 0.3, 800).await;
    assert!(!answer.degraded);
}

#[tokio::test]
async fn test_related_queries() {
    let generation = Arc::new(FakeGeneration::default());
    let usage = Arc::new(RecordingUsage::default());
    let synth = synthesizer(generation.clone(), usage.clone());

    let related = synth.related_queries("karate basics", &items(), "gpt-4o-mini", 2).await;
    assert_eq!(related, vec!["Kihon drills for beginners", "How to tie a karate belt"]);

    let records = usage.records.lock().unwrap().clone();
    assert_eq!(records[0].purpose, UsagePurpose::RelatedQueries);
}

#[tokio::test]
async fn test_related_queries_failure_is_empty() {
    let synth = synthesizer(Arc::new(FakeGeneration::failing()), Arc::new(RecordingUsage::default()));
    let related = synth.related_queries("karate basics", &items(), "gpt-4o-mini", 4).await;
    assert!(related.is_empty());
}

#[tokio::test]
async fn test_related_queries_zero_count_skips_backend() {
    let generation = Arc::new(FakeGeneration::default());
    let synth = synthesizer(generation.clone(), Arc::new(RecordingUsage::default()));
    assert!(synth.related_queries("karate basics", &items(), "gpt-4o-mini", 0).await.is_empty());
    assert_eq!(generation.calls(), 0);
}

#[tokio::test]
async fn test_context_is_trimmed_for_small_models() {
    let generation = Arc::new(FakeGeneration::default());
    let synth = synthesizer(generation.clone(), Arc::new(RecordingUsage::default()));

    // 60 items of ~1.2K chars each far exceed an 8K window minus 4K output.
    let many: Vec<RetrievedItem> = (0..60)
        .map(|i| item(&format!("t{i}"), &format!("Technique {i}"), &"Detail line.\n".repeat(100), 0.5))
        .collect();
    synth.synthesize("stances", &many, "unknown-small-model", 0.3, 4_000).await;

    let requests = generation.requests.lock().unwrap().clone();
    let user = &requests[0].messages[1].content;
    assert!(user.contains("[... context truncated ...]"));
    assert!(user.contains("[1] Technique 0"));
    assert!(user.contains("[60] Technique 59"));
    assert!(user.chars().count() / 4 < 8_192 - 4_000);
}
