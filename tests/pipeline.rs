//! Orchestrator tests with in-memory collaborators.
//!
//! The extractor, generator and pacer are fakes, so these run offline and
//! need neither pdfium nor an API key. Inputs still go through real input
//! resolution, so each test writes a stub file with a `%PDF` header.

use async_trait::async_trait;
use edgequake_refinery::prompts::CHUNK_PREAMBLE;
use edgequake_refinery::{
    ChunkError, ChunkSelection, Generate, GenerateError, Generation, IdNumbering, Pace,
    PacingPolicy, RawDocument, RefineProgressCallback, RefinedRecord, Refinery, RefineryConfig,
    RefineryError, RunState, TextExtractor,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Returns a fixed document regardless of the file it is given.
struct FakeExtractor {
    document: RawDocument,
}

impl FakeExtractor {
    /// `n` paragraphs of 80 chars, each becoming one chunk at size 100.
    fn paragraphs(n: usize) -> Self {
        let text = (1..=n)
            .map(|i| format!("p{i:02} {}", "x".repeat(76)))
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            document: RawDocument {
                text,
                page_count: n,
                pages_with_text: n,
            },
        }
    }

    fn blank_pages(n: usize) -> Self {
        Self {
            document: RawDocument::from_pages(vec![String::new(); n]),
        }
    }
}

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, _path: &Path) -> Result<RawDocument, RefineryError> {
        Ok(self.document.clone())
    }
}

enum Reply {
    /// A valid record titled after the chunk's `pNN` tag.
    Valid,
    Raw(String),
    Fail(&'static str),
}

/// Answers from a script, then with valid records once it runs out.
struct ScriptedGenerator {
    script: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn new(script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn always_valid() -> Arc<Self> {
        Self::new(Vec::new())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn chunk_tag(prompt: &str) -> String {
    let chunk = prompt.rsplit(CHUNK_PREAMBLE).next().unwrap_or_default();
    chunk.chars().take(3).collect()
}

fn valid_record(title: &str) -> String {
    serde_json::json!({
        "category": "Malaria Prevention",
        "title": title,
        "content": "Insecticide-treated nets are recommended.",
        "keywords": ["ITN", "prevention"],
        "source": "WHO Guidelines for Malaria",
    })
    .to_string()
}

#[async_trait]
impl Generate for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<Generation, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Valid);
        let text = match reply {
            Reply::Valid => valid_record(&chunk_tag(prompt)),
            Reply::Raw(raw) => raw,
            Reply::Fail(msg) => return Err(GenerateError::Failed(msg.to_string())),
        };
        Ok(Generation {
            text,
            input_tokens: 100,
            output_tokens: 40,
        })
    }
}

#[derive(Default)]
struct CountingPacer {
    pauses: AtomicUsize,
}

impl CountingPacer {
    fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pace for CountingPacer {
    async fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.pdf"), b"%PDF-1.4\n%stub\n").unwrap();
        Self { dir }
    }

    fn input(&self) -> String {
        self.dir.path().join("doc.pdf").to_string_lossy().into_owned()
    }

    fn output(&self) -> PathBuf {
        self.dir.path().join("processed_data.json")
    }

    fn config(&self) -> edgequake_refinery::RefineryConfigBuilder {
        RefineryConfig::builder()
            .input(self.input())
            .output_path(self.output())
            .chunk_size(100)
            .chunk_overlap(10)
    }
}

fn read_records(path: &Path) -> Vec<RefinedRecord> {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn ids(records: &[RefinedRecord]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mode_refines_first_three_of_ten() {
    let ws = Workspace::new();
    let gen = ScriptedGenerator::always_valid();
    let pacer = Arc::new(CountingPacer::default());
    let config = ws.config().test_mode(true).build().unwrap();

    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::paragraphs(10)),
        gen.clone(),
        pacer.clone(),
    );
    let output = refinery.run().await.unwrap();

    assert_eq!(refinery.state(), RunState::Finalized);
    assert_eq!(gen.calls(), 3);
    assert_eq!(pacer.pauses(), 3);
    assert_eq!(output.stats.total_chunks, 10);
    assert_eq!(output.stats.selected_chunks, 3);
    assert_eq!(output.stats.refined_chunks, 3);
    assert_eq!(output.stats.total_input_tokens, 300);
    assert!(output.failures.is_empty());

    let written = read_records(&ws.output());
    assert_eq!(written, output.records);
    assert_eq!(ids(&written), vec!["chunk_0001", "chunk_0002", "chunk_0003"]);
    let titles: Vec<&str> = written.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["p01", "p02", "p03"]);
}

#[tokio::test]
async fn every_record_has_six_fields_in_order() {
    let ws = Workspace::new();
    let config = ws.config().test_mode(true).build().unwrap();
    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::paragraphs(4)),
        ScriptedGenerator::always_valid(),
        Arc::new(CountingPacer::default()),
    );
    refinery.run().await.unwrap();

    let raw = std::fs::read_to_string(ws.output()).unwrap();
    let values: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
    for value in values {
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 6);
        let id = value["id"].as_str().unwrap();
        assert!(id.starts_with("chunk_") && id.len() == 10, "bad id {id}");
        assert!(id[6..].chars().all(|c| c.is_ascii_digit()));
    }
    // serde_json's map keeps keys sorted unless preserve_order is on, so
    // check the on-disk order directly.
    let cat = raw.find("\"category\"").unwrap();
    let title = raw.find("\"title\"").unwrap();
    let id = raw.find("\"id\"").unwrap();
    assert!(cat < title && title < id);
}

#[tokio::test]
async fn missing_input_is_fatal_and_writes_nothing() {
    let ws = Workspace::new();
    let gen = ScriptedGenerator::always_valid();
    let pacer = Arc::new(CountingPacer::default());
    let config = ws
        .config()
        .input(ws.dir.path().join("absent.pdf").to_string_lossy())
        .build()
        .unwrap();

    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::paragraphs(10)),
        gen.clone(),
        pacer.clone(),
    );
    let err = refinery.run().await.unwrap_err();

    assert!(matches!(err, RefineryError::FileNotFound { .. }), "got {err}");
    assert_eq!(refinery.state(), RunState::Aborted);
    assert_eq!(gen.calls(), 0);
    assert_eq!(pacer.pauses(), 0);
    assert!(!ws.output().exists());
}

#[tokio::test]
async fn empty_document_is_fatal() {
    let ws = Workspace::new();
    let gen = ScriptedGenerator::always_valid();
    let config = ws.config().build().unwrap();

    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::blank_pages(4)),
        gen.clone(),
        Arc::new(CountingPacer::default()),
    );
    let err = refinery.run().await.unwrap_err();

    assert!(matches!(err, RefineryError::EmptyDocument { pages: 4, .. }), "got {err}");
    assert_eq!(gen.calls(), 0);
    assert!(!ws.output().exists());
}

#[tokio::test]
async fn all_generations_failing_writes_nothing() {
    let ws = Workspace::new();
    std::fs::write(ws.output(), "previous run").unwrap();
    let gen = ScriptedGenerator::new(vec![
        Reply::Fail("quota exceeded"),
        Reply::Fail("safety block"),
        Reply::Fail("connection reset"),
    ]);
    let pacer = Arc::new(CountingPacer::default());
    let config = ws.config().test_mode(true).build().unwrap();

    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::paragraphs(10)),
        gen.clone(),
        pacer.clone(),
    );
    let err = refinery.run().await.unwrap_err();

    match err {
        RefineryError::NoRecords {
            attempted,
            first_error,
        } => {
            assert_eq!(attempted, 3);
            assert!(first_error.contains("quota exceeded"), "got {first_error}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(refinery.state(), RunState::Aborted);
    assert_eq!(pacer.pauses(), 3);
    assert_eq!(std::fs::read_to_string(ws.output()).unwrap(), "previous run");
}

#[tokio::test]
async fn bad_responses_are_skipped_and_ids_keep_source_position() {
    let ws = Workspace::new();
    let gen = ScriptedGenerator::new(vec![
        Reply::Valid,
        Reply::Fail("HTTP 500"),
        Reply::Raw("Sure! Here are the fixed chunk details.".into()),
        Reply::Raw(
            r#"{"category":"c","title":"t","content":"x","keywords":[],"source":"s","id":"chunk_9999"}"#
                .into(),
        ),
        Reply::Valid,
    ]);
    let pacer = Arc::new(CountingPacer::default());
    let config = ws.config().build().unwrap();

    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::paragraphs(5)),
        gen.clone(),
        pacer.clone(),
    );
    let output = refinery.run().await.unwrap();

    assert_eq!(gen.calls(), 5);
    assert_eq!(pacer.pauses(), 5);
    assert_eq!(ids(&output.records), vec!["chunk_0001", "chunk_0005"]);
    assert_eq!(output.stats.generation_failures, 1);
    assert_eq!(output.stats.parse_failures, 2);

    let failed: Vec<usize> = output.failures.iter().map(ChunkError::chunk).collect();
    assert_eq!(failed, vec![2, 3, 4]);
    match &output.failures[1] {
        ChunkError::ParseFailed { raw, .. } => assert!(raw.starts_with("Sure!")),
        other => panic!("unexpected failure: {other}"),
    }

    assert_eq!(read_records(&ws.output()).len(), 2);
}

#[tokio::test]
async fn fenced_response_is_accepted() {
    let ws = Workspace::new();
    let fenced = format!("```json\n{}\n```", valid_record("Fenced"));
    let gen = ScriptedGenerator::new(vec![Reply::Raw(fenced)]);
    let config = ws.config().chunks(ChunkSelection::First(1)).build().unwrap();

    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::paragraphs(3)),
        gen,
        Arc::new(CountingPacer::default()),
    );
    let output = refinery.run().await.unwrap();
    assert_eq!(output.records[0].title, "Fenced");
}

#[tokio::test]
async fn id_numbering_follows_policy() {
    for (numbering, expected) in [
        (IdNumbering::Source, ["chunk_0004", "chunk_0005", "chunk_0006"]),
        (IdNumbering::Processed, ["chunk_0001", "chunk_0002", "chunk_0003"]),
    ] {
        let ws = Workspace::new();
        let config = ws
            .config()
            .chunks(ChunkSelection::Range(4, 6))
            .id_numbering(numbering)
            .build()
            .unwrap();
        let mut refinery = Refinery::new(
            config,
            Arc::new(FakeExtractor::paragraphs(10)),
            ScriptedGenerator::always_valid(),
            Arc::new(CountingPacer::default()),
        );
        let output = refinery.run().await.unwrap();
        assert_eq!(ids(&output.records), expected.to_vec(), "{numbering:?}");
        let titles: Vec<&str> = output.records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["p04", "p05", "p06"]);
    }
}

#[tokio::test]
async fn write_failure_aborts_the_run() {
    let ws = Workspace::new();
    let blocker = ws.dir.path().join("blocker");
    std::fs::write(&blocker, "a file, not a directory").unwrap();
    let config = ws
        .config()
        .output_path(blocker.join("out.json"))
        .test_mode(true)
        .build()
        .unwrap();

    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::paragraphs(5)),
        ScriptedGenerator::always_valid(),
        Arc::new(CountingPacer::default()),
    );
    let err = refinery.run().await.unwrap_err();

    assert!(
        matches!(err, RefineryError::OutputWriteFailed { records: 3, .. }),
        "got {err}"
    );
    assert_eq!(refinery.state(), RunState::Aborted);
}

#[tokio::test]
async fn a_finished_run_cannot_be_restarted() {
    let ws = Workspace::new();
    let gen = ScriptedGenerator::always_valid();
    let config = ws.config().test_mode(true).build().unwrap();
    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::paragraphs(5)),
        gen.clone(),
        Arc::new(CountingPacer::default()),
    );

    refinery.run().await.unwrap();
    assert!(matches!(refinery.run().await, Err(RefineryError::Internal(_))));
    assert_eq!(refinery.state(), RunState::Finalized);
    assert_eq!(gen.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn fixed_delay_follows_every_chunk_including_the_last() {
    let ws = Workspace::new();
    let config = ws.config().test_mode(true).build().unwrap();
    let pacer = PacingPolicy::default().build();

    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::paragraphs(10)),
        ScriptedGenerator::new(vec![Reply::Valid, Reply::Fail("quota"), Reply::Valid]),
        pacer,
    );
    let start = tokio::time::Instant::now();
    refinery.run().await.unwrap();

    assert!(start.elapsed() >= std::time::Duration::from_secs(6));
}

#[tokio::test]
async fn progress_callback_sees_every_chunk() {
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl RefineProgressCallback for Recorder {
        fn on_run_start(&self, total_chunks: usize, selected_chunks: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {total_chunks}/{selected_chunks}"));
        }
        fn on_chunk_complete(&self, chunk: usize, _total: usize, title: &str) {
            self.events.lock().unwrap().push(format!("ok {chunk} {title}"));
        }
        fn on_chunk_error(&self, chunk: usize, _total: usize, _error: &str) {
            self.events.lock().unwrap().push(format!("err {chunk}"));
        }
        fn on_run_complete(&self, selected_chunks: usize, records: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done {records}/{selected_chunks}"));
        }
    }

    let ws = Workspace::new();
    let recorder = Arc::new(Recorder::default());
    let config = ws
        .config()
        .test_mode(true)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::paragraphs(10)),
        ScriptedGenerator::new(vec![Reply::Valid, Reply::Raw("null".into()), Reply::Valid]),
        Arc::new(CountingPacer::default()),
    );
    refinery.run().await.unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec!["start 10/3", "ok 1 p01", "err 2", "ok 3 p03", "done 2/3"]
    );
}

#[tokio::test]
async fn undecodable_response_reaches_the_callback_verbatim() {
    #[derive(Default)]
    struct RawSink {
        raw: Mutex<Vec<(usize, String)>>,
        errors: AtomicUsize,
    }

    impl RefineProgressCallback for RawSink {
        fn on_chunk_raw_response(&self, chunk: usize, raw: &str) {
            self.raw.lock().unwrap().push((chunk, raw.to_string()));
        }
        fn on_chunk_error(&self, _chunk: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    let apology = "I'm sorry, I can only summarise the first section.";
    let ws = Workspace::new();
    let sink = Arc::new(RawSink::default());
    let config = ws
        .config()
        .test_mode(true)
        .progress_callback(sink.clone())
        .build()
        .unwrap();

    let mut refinery = Refinery::new(
        config,
        Arc::new(FakeExtractor::paragraphs(10)),
        ScriptedGenerator::new(vec![Reply::Raw(apology.into()), Reply::Fail("quota")]),
        Arc::new(CountingPacer::default()),
    );
    refinery.run().await.unwrap();

    // Generation failures have no payload, so only chunk 1 is reported.
    assert_eq!(*sink.raw.lock().unwrap(), vec![(1, apology.to_string())]);
    assert_eq!(sink.errors.load(Ordering::SeqCst), 2);
}
