//! Multi-format documents through the corpus writer.
//!
//! Covers Office extraction end to end, corrupt and oversized binaries
//! failing per document, and re-ingestion replacing rather than duplicating
//! records.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tagrag::corpus::CorpusWriter;
use tagrag::error::ErrorKind;
use tagrag::extract::{DocumentParser, FormatParser};
use tagrag::ingest::OutcomeStatus;
use tagrag_core::chunk::Chunker;
use tagrag_core::embedding::Embedder;
use tagrag_core::models::{Document, Tag};
use tagrag_core::store::memory::InMemoryVectorStore;
use tagrag_core::store::VectorStore;
use tagrag_core::tags::memory::InMemoryTagRegistry;
use tagrag_core::tags::TagRegistry;

struct UnitEmbedder;

#[async_trait]
impl Embedder for UnitEmbedder {
    fn model_name(&self) -> &str {
        "unit"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 1.0]).collect())
    }
}

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn writer(
    max_bytes: usize,
) -> (
    CorpusWriter,
    Arc<InMemoryVectorStore>,
    Arc<InMemoryTagRegistry>,
) {
    let store = Arc::new(InMemoryVectorStore::new());
    let tags = Arc::new(InMemoryTagRegistry::new());
    let writer = CorpusWriter::new(
        Arc::new(FormatParser::new(max_bytes)),
        Chunker::with_char_budget(200),
        Arc::new(UnitEmbedder),
        store.clone(),
        tags.clone(),
    );
    (writer, store, tags)
}

fn failed_kind(status: &OutcomeStatus) -> ErrorKind {
    match status {
        OutcomeStatus::Failed { kind, .. } => *kind,
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn docx_text_is_stored_under_the_tag() {
    let (writer, store, tags) = writer(1024 * 1024);
    let tag = Tag::parse("office").unwrap();

    let outcome = writer
        .ingest(
            Document::new("report.docx", minimal_docx_with_text("office test phrase")),
            &tag,
        )
        .await;
    assert_eq!(outcome.status, OutcomeStatus::Ingested { chunks: 1 });

    let hits = store.search(&[1.0, 1.0], &tag, 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].text.contains("office test phrase"));
    assert_eq!(hits[0].metadata.source_filename, "report.docx");
    assert_eq!(tags.list().await.unwrap(), vec![tag]);
}

#[tokio::test]
async fn corrupt_pdf_fails_alone() {
    let (writer, store, _tags) = writer(1024 * 1024);
    let tag = Tag::parse("mixed").unwrap();

    let bad = writer
        .ingest(Document::new("bad.pdf", b"not a valid pdf".to_vec()), &tag)
        .await;
    let good = writer
        .ingest(Document::new("good.md", "# Good\n\nThis is good.\n"), &tag)
        .await;

    assert_eq!(failed_kind(&bad.status), ErrorKind::Parse);
    assert!(good.is_success());
    let hits = store.search(&[1.0, 1.0], &tag, 10).await.unwrap();
    assert!(hits.iter().all(|h| h.metadata.source_filename == "good.md"));
}

#[tokio::test]
async fn oversized_document_is_rejected_before_parsing() {
    let (writer, store, tags) = writer(1000);
    let tag = Tag::parse("big").unwrap();

    let outcome = writer
        .ingest(Document::new("big.pdf", vec![0u8; 2000]), &tag)
        .await;

    assert_eq!(failed_kind(&outcome.status), ErrorKind::Parse);
    assert!(store.is_empty());
    assert!(tags.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn opaque_binaries_are_unsupported() {
    let parser = FormatParser::new(1024);
    let err = parser
        .parse(vec![0x89, b'P', b'N', b'G'], "logo.png")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unsupported content-type"));
}

#[tokio::test]
async fn reingesting_a_document_replaces_its_records() {
    let (writer, store, _tags) = writer(1024 * 1024);
    let tag = Tag::parse("docs").unwrap();
    let text = "first paragraph\n\nsecond paragraph";

    for _ in 0..2 {
        let outcome = writer.ingest(Document::new("notes.txt", text), &tag).await;
        assert!(outcome.is_success());
    }

    let first = store.len();
    writer.ingest(Document::new("notes.txt", text), &tag).await;
    assert_eq!(store.len(), first);
}

#[tokio::test]
async fn shrinking_document_leaves_no_stale_chunks() {
    let store = Arc::new(InMemoryVectorStore::new());
    let writer = CorpusWriter::new(
        Arc::new(FormatParser::new(1024 * 1024)),
        Chunker::with_char_budget(5),
        Arc::new(UnitEmbedder),
        store.clone(),
        Arc::new(InMemoryTagRegistry::new()),
    );
    let tag = Tag::parse("policy").unwrap();

    let outcome = writer
        .ingest(
            Document::new("policy.txt", "old rule one\n\nold rule two\n\nold rule three"),
            &tag,
        )
        .await;
    match outcome.status {
        OutcomeStatus::Ingested { chunks } => assert!(chunks >= 3, "only {} chunks", chunks),
        other => panic!("unexpected outcome {:?}", other),
    }

    let outcome = writer
        .ingest(Document::new("policy.txt", "new rule"), &tag)
        .await;
    assert!(outcome.is_success());

    let hits = store.search(&[1.0, 1.0], &tag, 10).await.unwrap();
    let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    assert_eq!(texts, vec!["new rule"]);
}

#[tokio::test]
async fn emptied_document_clears_its_records() {
    let (writer, store, _tags) = writer(1024 * 1024);
    let tag = Tag::parse("docs").unwrap();

    writer
        .ingest(Document::new("draft.md", "# Draft\n\nsome words"), &tag)
        .await;
    writer
        .ingest(Document::new("keep.md", "kept words"), &tag)
        .await;
    let outcome = writer.ingest(Document::new("draft.md", "   "), &tag).await;
    assert_eq!(outcome.status, OutcomeStatus::Ingested { chunks: 0 });

    let hits = store.search(&[1.0, 1.0], &tag, 10).await.unwrap();
    assert!(hits.iter().all(|h| h.metadata.source_filename == "keep.md"));
    assert!(!hits.is_empty());
}
