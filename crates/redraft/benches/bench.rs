use core::{future::Future, hint::black_box};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use redraft::{
    ChunkPlanner, GenerationError, GenerationRequest, JobConfig, JobService, ServerMessage,
    SkeletonMode, TextGenerator, stitch,
};
use tokio::{runtime::Builder, sync::mpsc};

/// Document sizes in words, spanning the accepted range.
const SIZES: [usize; 4] = [1_000, 5_000, 10_000, 20_000];

/// Answers every request immediately with exactly the requested length.
struct Exact;

impl TextGenerator for Exact {
    fn generate(
        &self,
        request: GenerationRequest,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send {
        async move { Ok(vec!["word"; request.target_words].join(" ")) }
    }
}

/// Prose-like text: sentences of varying length with occasional paragraph
/// breaks and quoted endings.
fn document(words: usize) -> String {
    let mut text = String::with_capacity(words * 7);
    let mut in_sentence = 0;
    let mut sentence_len = 7;
    for i in 0..words {
        if i > 0 {
            text.push_str(if in_sentence == 0 && i % 97 == 0 { "\n\n" } else { " " });
        }
        text.push_str("lorem");
        in_sentence += 1;
        if in_sentence == sentence_len {
            text.push_str(if i % 5 == 0 { ".\"" } else { "." });
            in_sentence = 0;
            sentence_len = 7 + i % 13;
        }
    }
    text
}

fn bench_planner(c: &mut Criterion) {
    let planner = ChunkPlanner::from_config(&JobConfig::default());
    let mut group = c.benchmark_group("planner");

    for words in SIZES {
        let text = document(words);
        group.throughput(Throughput::Elements(words as u64));
        group.bench_with_input(BenchmarkId::new("plan", words), &text, |b, text| {
            b.iter(|| black_box(planner.plan(black_box(text), 1.0)));
        });
    }
    group.finish();
}

fn bench_stitch(c: &mut Criterion) {
    let planner = ChunkPlanner::from_config(&JobConfig::default());
    let mut group = c.benchmark_group("stitch");

    for words in SIZES {
        let Ok(plan) = planner.plan(&document(words), 1.0) else {
            continue;
        };
        let chunks: Vec<_> = plan
            .chunks
            .into_iter()
            .map(|mut chunk| {
                let text = chunk.source_text.clone();
                let words = chunk.source_words;
                let _ = chunk.finish(text, words, redraft::ChunkStatus::OnTarget);
                chunk
            })
            .collect();

        group.throughput(Throughput::Elements(words as u64));
        group.bench_with_input(BenchmarkId::new("stitch", words), &chunks, |b, chunks| {
            b.iter(|| black_box(stitch(black_box(chunks), chunks.len())));
        });
    }
    group.finish();
}

fn bench_job(c: &mut Criterion) {
    let runtime = Builder::new_multi_thread().enable_all().build().unwrap();
    let mut group = c.benchmark_group("job");

    for concurrency in [1, 3] {
        let config = JobConfig {
            skeleton_mode: SkeletonMode::Off,
            concurrency,
            ..JobConfig::default()
        };
        let service = JobService::new(config, Exact).unwrap();
        let text = document(10_000);

        group.throughput(Throughput::Elements(10_000));
        group.bench_function(BenchmarkId::new("10k_words", concurrency), |b| {
            b.to_async(&runtime).iter(|| async {
                let (tx, mut rx) = mpsc::channel(64);
                let handle = service.start_job(text.clone(), None, None, tx).unwrap();
                while let Some(event) = rx.recv().await {
                    if event.is_terminal() {
                        black_box(matches!(event, ServerMessage::JobComplete { .. }));
                        break;
                    }
                }
                black_box(handle.join().await.unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_planner, bench_stitch, bench_job);
criterion_main!(benches);
