//! Orchestrator scenarios against a scripted model server.
//!
//! No Ollama and no pdfium needed: pages are handed in directly through
//! `extract_pages`, or as a small in-memory PNG through `extract`.

use edgequake_extract::{
    extract, extract_pages, Document, ExtractError, ExtractionConfig, ExtractionProgressCallback,
    FieldSchema, GenerateRequest, InstalledModel, ModelMetadata, ModelServer, PageError,
    PageImage, VisionError,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

enum Reply {
    Text(String),
    Fail(VisionError),
    Panic(&'static str),
}

/// Answers `generate` from a queue and records every prompt it was sent.
struct ScriptedServer {
    family: &'static str,
    /// When set, `show` panics with this message.
    show_panic: Option<&'static str>,
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
    generate_calls: AtomicUsize,
}

impl ScriptedServer {
    fn vision(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            family: "mllama",
            show_panic: None,
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            generate_calls: AtomicUsize::new(0),
        })
    }

    fn text_only() -> Arc<Self> {
        Arc::new(Self {
            family: "llama",
            show_panic: None,
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            generate_calls: AtomicUsize::new(0),
        })
    }

    fn broken_metadata(msg: &'static str) -> Arc<Self> {
        Arc::new(Self {
            family: "mllama",
            show_panic: Some(msg),
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            generate_calls: AtomicUsize::new(0),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl ModelServer for ScriptedServer {
    fn generate<'a>(
        &'a self,
        request: &'a GenerateRequest,
    ) -> BoxFuture<'a, Result<String, VisionError>> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Text("{}".into()));
        async move {
            match reply {
                Reply::Text(t) => Ok(t),
                Reply::Fail(e) => Err(e),
                Reply::Panic(msg) => panic!("{}", msg),
            }
        }
        .boxed()
    }

    fn show<'a>(&'a self, model: &'a str) -> BoxFuture<'a, Result<ModelMetadata, VisionError>> {
        if let Some(msg) = self.show_panic {
            panic!("{}", msg);
        }
        let meta = ModelMetadata {
            name: model.to_string(),
            family: Some(self.family.to_string()),
            families: vec![self.family.to_string()],
            ..Default::default()
        };
        async move { Ok(meta) }.boxed()
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<InstalledModel>, VisionError>> {
        async { Ok(Vec::new()) }.boxed()
    }
}

fn config_for(server: Arc<ScriptedServer>) -> ExtractionConfig {
    ExtractionConfig::builder()
        .model("llama3.2-vision")
        .server(server)
        .build()
        .unwrap()
}

fn pages(n: usize) -> Vec<PageImage> {
    (0..n)
        .map(|index| PageImage {
            index,
            data: "aGVsbG8=".into(),
            mime_type: "image/jpeg".into(),
            width: 1344,
            height: 1900,
        })
        .collect()
}

fn invoice_schema() -> FieldSchema {
    FieldSchema::from_json_str(r#"{"invoice_id": "Invoice number", "total": "Total due"}"#)
        .unwrap()
}

/// A well-formed answer for the invoice schema.
fn answer(invoice_id: Option<(&str, u8)>, total: Option<(&str, u8)>, reasoning: &str) -> Reply {
    let field = |f: Option<(&str, u8)>| match f {
        Some((v, c)) => serde_json::json!({"value": v, "confidence": c}),
        None => serde_json::json!({"value": null, "confidence": 0}),
    };
    Reply::Text(
        serde_json::json!({
            "extraction_results": {
                "overall_confidence": 0,
                "reasoning": reasoning,
                "data": {"invoice_id": field(invoice_id), "total": field(total)},
                "additional_request_result": null
            }
        })
        .to_string(),
    )
}

fn timeout() -> Reply {
    Reply::Fail(VisionError::Timeout { secs: 300 })
}

// ── Multi-page merge ─────────────────────────────────────────────────────────

#[tokio::test]
async fn highest_confidence_wins_and_ties_keep_earliest_page() {
    let server = ScriptedServer::vision(vec![
        answer(Some(("INV-0O1", 60)), None, "Blurry header"),
        answer(Some(("INV-001", 90)), Some(("120.00", 70)), "Clear scan"),
        answer(Some(("INV-00I", 90)), Some(("120.00", 85)), "Clear scan"),
    ]);
    let config = config_for(server.clone());

    let output = extract_pages(pages(3), &invoice_schema(), None, &config)
        .await
        .unwrap();

    let record = &output.extraction;
    assert_eq!(record.value("invoice_id"), Some("INV-001"));
    assert_eq!(record.field("invoice_id").unwrap().confidence, 90);
    assert_eq!(record.value("total"), Some("120.00"));
    assert_eq!(record.field("total").unwrap().confidence, 85);
    assert_eq!(record.confidence, 87);
    assert_eq!(record.pages_merged, 3);
    assert_eq!(
        record.reasoning,
        "Merged from 3 pages: Blurry header | Clear scan"
    );
    assert_eq!(output.stats.processed_pages, 3);
    assert_eq!(output.stats.failed_pages, 0);
    assert!(!output.is_degraded());
}

#[tokio::test]
async fn failed_pages_are_reported_and_left_out() {
    let server = ScriptedServer::vision(vec![
        answer(Some(("A-1", 40)), None, "p1"),
        timeout(),
        answer(None, Some(("9.99", 80)), "p3"),
        timeout(),
        answer(Some(("A-1", 75)), None, "p5"),
    ]);
    let config = config_for(server.clone());

    let output = extract_pages(pages(5), &invoice_schema(), None, &config)
        .await
        .unwrap();

    assert_eq!(server.generate_calls.load(Ordering::SeqCst), 5);
    assert_eq!(output.extraction.pages_merged, 3);
    assert_eq!(output.extraction.value("invoice_id"), Some("A-1"));
    assert_eq!(output.extraction.field("invoice_id").unwrap().confidence, 75);
    assert_eq!(output.extraction.value("total"), Some("9.99"));
    assert_eq!(output.stats.processed_pages, 3);
    assert_eq!(output.stats.failed_pages, 2);

    let failed: Vec<usize> = output
        .pages
        .iter()
        .filter(|r| r.error.is_some())
        .map(|r| r.page_index)
        .collect();
    assert_eq!(failed, vec![1, 3]);
    assert!(matches!(
        output.pages[1].error,
        Some(PageError::ModelCall { page: 2, .. })
    ));
}

#[tokio::test]
async fn every_page_failing_is_an_error() {
    let server = ScriptedServer::vision(vec![timeout(), Reply::Text("no json here".into())]);
    let config = config_for(server);

    let err = extract_pages(pages(2), &invoice_schema(), None, &config)
        .await
        .unwrap_err();

    match err {
        ExtractError::NoPagesSucceeded { total, first_error } => {
            assert_eq!(total, 2);
            assert!(first_error.contains("Page 1"), "got: {first_error}");
        }
        other => panic!("expected NoPagesSucceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_values_never_displace_found_ones() {
    let server = ScriptedServer::vision(vec![
        answer(Some(("INV-7", 30)), None, ""),
        Reply::Text(
            r#"{"extraction_results": {"reasoning": "", "data": {"invoice_id": {"value": "not found", "confidence": 95}}}}"#
                .into(),
        ),
    ]);
    let config = config_for(server);

    let output = extract_pages(pages(2), &invoice_schema(), None, &config)
        .await
        .unwrap();

    assert_eq!(output.extraction.value("invoice_id"), Some("INV-7"));
    assert_eq!(output.extraction.field("invoice_id").unwrap().confidence, 30);
    assert_eq!(output.extraction.value("total"), None);
    assert_eq!(output.extraction.field("total").unwrap().confidence, 0);
    assert_eq!(
        output.extraction.reasoning,
        "Merged from 2 pages: Multi-page extraction"
    );
}

#[tokio::test]
async fn single_page_empty_marker_ends_as_null() {
    let server = ScriptedServer::vision(vec![answer(
        Some(("INV-3", 90)),
        Some(("Not Found", 85)),
        "clean scan",
    )]);
    let config = config_for(server);

    let output = extract_pages(pages(1), &invoice_schema(), None, &config)
        .await
        .unwrap();

    let total = output.extraction.field("total").unwrap();
    assert_eq!(total.value, None);
    assert_eq!(total.confidence, 0);
    assert_eq!(output.extraction.confidence, 90);
    assert_eq!(output.extraction.reasoning, "clean scan");
    assert_eq!(output.pages[0].fields_found, 1);
}

// ── Prompts ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn multi_page_prompts_carry_page_note() {
    let server = ScriptedServer::vision(vec![
        answer(None, None, ""),
        answer(None, None, ""),
        answer(None, None, ""),
    ]);
    let config = config_for(server.clone());

    extract_pages(pages(3), &invoice_schema(), None, &config)
        .await
        .unwrap();

    let prompts = server.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].ends_with("Note: This is page 1 of 3 from the document."));
    assert!(prompts[2].ends_with("Note: This is page 3 of 3 from the document."));
    assert!(prompts[1].contains("- `invoice_id`: Invoice number"));
    assert!(prompts[1].contains("Additional request: None"));
}

#[tokio::test]
async fn single_page_prompt_has_no_page_note() {
    let server = ScriptedServer::vision(vec![answer(Some(("X", 88)), None, "ok")]);
    let config = config_for(server.clone());

    let output = extract_pages(pages(1), &invoice_schema(), None, &config)
        .await
        .unwrap();

    assert!(!server.prompts()[0].contains("Note: This is page"));
    assert_eq!(output.extraction.pages_merged, 1);
    assert_eq!(output.extraction.reasoning, "ok");
}

#[tokio::test]
async fn additional_question_is_answered_once() {
    let question_answer = |a: Option<&str>| {
        Reply::Text(
            serde_json::json!({
                "extraction_results": {
                    "reasoning": "",
                    "data": {"invoice_id": {"value": "Q-1", "confidence": 80}},
                    "additional_request_result": a
                }
            })
            .to_string(),
        )
    };
    let server = ScriptedServer::vision(vec![
        question_answer(None),
        question_answer(Some("Yes, signed by the buyer")),
        question_answer(Some("No")),
    ]);
    let config = config_for(server.clone());

    let output = extract_pages(pages(3), &invoice_schema(), Some("Is it signed?"), &config)
        .await
        .unwrap();

    assert!(server.prompts()[0].contains("Additional request: Is it signed?"));
    assert_eq!(
        output.additional_answer.as_deref(),
        Some("Yes, signed by the buyer")
    );
    assert!(!output.extraction.fields.contains_key("additional_request_result"));
}

// ── Single-page failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn single_page_without_json_is_malformed() {
    let server = ScriptedServer::vision(vec![Reply::Text(
        "I cannot read this document, sorry.".into(),
    )]);
    let config = config_for(server);

    let err = extract_pages(pages(1), &invoice_schema(), None, &config)
        .await
        .unwrap_err();

    match err {
        ExtractError::MalformedResponse { excerpt } => {
            assert!(excerpt.contains("cannot read"), "got: {excerpt}");
        }
        other => panic!("expected MalformedResponse, got {other:?}"),
    }
}

#[tokio::test]
async fn single_page_timeout_is_fatal() {
    let server = ScriptedServer::vision(vec![timeout()]);
    let config = config_for(server);

    let err = extract_pages(pages(1), &invoice_schema(), None, &config)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExtractError::Vision(VisionError::Timeout { secs: 300 })
    ));
}

#[tokio::test]
async fn text_only_model_is_refused_before_any_page() {
    let server = ScriptedServer::text_only();
    let config = config_for(server.clone());

    let err = extract_pages(pages(3), &invoice_schema(), None, &config)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExtractError::Vision(VisionError::NotVisionCapable { .. })
    ));
    assert_eq!(server.generate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panic_during_extraction_degrades_instead_of_failing() {
    let server = ScriptedServer::vision(vec![
        answer(Some(("INV-1", 90)), None, ""),
        Reply::Panic("model adapter exploded"),
    ]);
    let config = config_for(server);

    let output = extract_pages(pages(2), &invoice_schema(), None, &config)
        .await
        .unwrap();

    assert!(output.is_degraded());
    assert!(output.error.as_deref().unwrap().contains("exploded"));
    assert_eq!(output.extraction.confidence, 0);
    assert_eq!(output.extraction.fields.len(), 2);
    assert!(output.extraction.fields.values().all(|f| f.value.is_none()));
    assert!(output.extraction.reasoning.starts_with("Error: "));
}

#[tokio::test]
async fn panic_in_capability_check_degrades_instead_of_failing() {
    let server = ScriptedServer::broken_metadata("metadata decoder exploded");
    let config = config_for(server.clone());

    let output = extract_pages(pages(1), &invoice_schema(), None, &config)
        .await
        .unwrap();

    assert!(output.is_degraded());
    assert!(output.error.as_deref().unwrap().contains("metadata decoder"));
    assert_eq!(output.extraction.fields.len(), 2);
    assert!(output.extraction.fields.values().all(|f| f.value.is_none()));
    assert_eq!(server.generate_calls.load(Ordering::SeqCst), 0);
}

// ── Lenient parsing through the whole pipeline ──────────────────────────────

#[tokio::test]
async fn bare_object_in_prose_is_recovered() {
    let server = ScriptedServer::vision(vec![Reply::Text(
        "Here you go:\n```json\n{\"invoice_id\": \"INV-42\", \"total\": null}\n```".into(),
    )]);
    let config = config_for(server);

    let output = extract_pages(pages(1), &invoice_schema(), None, &config)
        .await
        .unwrap();

    let id = output.extraction.field("invoice_id").unwrap();
    assert_eq!(id.value.as_deref(), Some("INV-42"));
    assert_eq!(id.confidence, 50);
    assert_eq!(output.extraction.value("total"), None);
    assert_eq!(output.extraction.reasoning, "Response format was unexpected");
}

#[tokio::test]
async fn png_document_goes_through_loader() {
    let mut png = Vec::new();
    image::DynamicImage::ImageRgb8(image::RgbImage::new(200, 100))
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    let document = Document::from_mime(png, "image/png").unwrap();

    let server = ScriptedServer::vision(vec![answer(Some(("INV-9", 77)), None, "")]);
    let config = config_for(server);

    let output = extract(&document, &invoice_schema(), None, &config)
        .await
        .unwrap();

    assert_eq!(output.extraction.value("invoice_id"), Some("INV-9"));
    assert_eq!(output.stats.total_pages, 1);
    assert_eq!(output.model, "llama3.2-vision");
}

#[tokio::test]
async fn unsupported_media_type_is_rejected() {
    let err = Document::from_mime(b"hello".to_vec(), "text/plain").unwrap_err();
    assert!(matches!(err, ExtractError::UnsupportedMediaType { .. }));
}

// ── Progress callback ────────────────────────────────────────────────────────

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    finished_with: Mutex<Option<(usize, usize)>>,
}

impl ExtractionProgressCallback for Counting {
    fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _fields_found: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        *self.finished_with.lock().unwrap() = Some((total_pages, success_count));
    }
}

#[tokio::test]
async fn progress_callback_sees_every_page() {
    let server = ScriptedServer::vision(vec![
        answer(Some(("A", 90)), None, ""),
        timeout(),
        answer(Some(("A", 90)), None, ""),
    ]);
    let counting = Arc::new(Counting::default());
    let config = ExtractionConfig::builder()
        .server(server)
        .progress_callback(counting.clone())
        .build()
        .unwrap();

    extract_pages(pages(3), &invoice_schema(), None, &config)
        .await
        .unwrap();

    assert_eq!(counting.started.load(Ordering::SeqCst), 3);
    assert_eq!(counting.completed.load(Ordering::SeqCst), 2);
    assert_eq!(counting.errors.load(Ordering::SeqCst), 1);
    assert_eq!(*counting.finished_with.lock().unwrap(), Some((3, 2)));
}
