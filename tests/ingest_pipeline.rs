//! Ingestion pipeline against a real SQLite database, JSONL corpus and the
//! sqlite dense backend, all inside a temp directory.

use std::sync::Arc;
use tempfile::TempDir;

use dayscope::config::{parse_config, Config};
use dayscope::corpus::CorpusIndex;
use dayscope::error::IngestError;
use dayscope::ingest::{IngestionPipeline, Submission, UploadedFile};
use dayscope::{db, migrate, records};
use dayscope_core::models::IngestStatus;

struct Env {
    _tmp: TempDir,
    config: Config,
    pool: sqlx::SqlitePool,
    pipeline: Arc<IngestionPipeline>,
}

async fn setup(extra: &str) -> Env {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().display().to_string();
    let toml = format!(
        r#"
[db]
path = "{root}/data/dayscope.sqlite"

[storage]
upload_dir = "{root}/data/uploads"
corpus_path = "{root}/data/corpus.jsonl"

[chunking]
chunk_size = 200
chunk_overlap = 40

[embedding]
provider = "hashing"
dims = 64
{extra}
"#
    );
    let config = parse_config(&toml).unwrap();
    let pool = db::connect(&config).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    let corpus = CorpusIndex::open(&config, &pool).await.unwrap();
    let pipeline = Arc::new(IngestionPipeline::new(&config, pool.clone(), corpus));
    Env {
        _tmp: tmp,
        config,
        pool,
        pipeline,
    }
}

fn report_text(day: &str, unit: u32) -> String {
    format!(
        "Laporan Harian Operasi {day}\nUnit {unit}\n\n\
         NPHR tercatat 2450 kcal/kWh dengan beban rata-rata 300 MW.\n\n\
         Coal feeder B sempat trip pukul 03.15 dan normal kembali pukul 03.40.\n\n\
         Vibrasi turbin dalam batas normal, tidak ada temuan pada inspeksi rutin."
    )
}

fn docx_with_text(text: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            text
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// Single-page PDF whose content stream shows `phrase` in Helvetica.
fn pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

#[tokio::test]
async fn test_mixed_batch_reports_each_file() {
    let env = setup("").await;
    let files = vec![
        UploadedFile::new("laporan_2025-03-01.txt", report_text("1 Maret 2025", 3)),
        UploadedFile::new(
            "produksi_2025-03-02.csv",
            "unit,nphr,beban\nUnit 3,2450,300\nUnit 4,2410,310\n",
        ),
        UploadedFile::new("installer.exe", vec![0x4d, 0x5a, 0x90, 0x00]),
    ];

    let report = env.pipeline.ingest(files).await.unwrap();
    assert_eq!(report.files.len(), 3);
    assert_eq!(report.ready(), 2);
    assert_eq!(report.failed(), 1);

    let ready_sum: usize = report
        .files
        .iter()
        .filter(|f| f.status == IngestStatus::Ready)
        .map(|f| f.chunk_count)
        .sum();
    assert!(ready_sum > 0);
    assert_eq!(report.total_chunks, ready_sum);

    let failed = report
        .files
        .iter()
        .find(|f| f.status == IngestStatus::Error)
        .unwrap();
    assert_eq!(failed.filename, "installer.exe");

    let stored = records::get_record(&env.pool, &failed.record_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, IngestStatus::Error);
    assert!(stored.error_message.unwrap().contains("unsupported"));
}

#[tokio::test]
async fn test_corrupt_file_leaves_siblings_ready() {
    let env = setup("").await;
    let files = vec![
        UploadedFile::new("a_2025-03-01.txt", report_text("1 Maret 2025", 3)),
        UploadedFile::new("broken.docx", b"PK\x03\x04 definitely not a zip".to_vec()),
        UploadedFile::new("b_2025-03-02.txt", report_text("2 Maret 2025", 4)),
    ];

    let report = env.pipeline.ingest(files).await.unwrap();
    assert_eq!(report.ready(), 2);

    for outcome in &report.files {
        let record = records::get_record(&env.pool, &outcome.record_id)
            .await
            .unwrap()
            .unwrap();
        if outcome.filename == "broken.docx" {
            assert_eq!(record.status, IngestStatus::Error);
            assert!(!record.error_message.unwrap_or_default().is_empty());
            assert_eq!(record.chunk_count, 0);
        } else {
            assert_eq!(record.status, IngestStatus::Ready);
            let rows = records::list_record_chunks(&env.pool, &record.id)
                .await
                .unwrap();
            assert_eq!(record.chunk_count as usize, rows.len());
            assert_eq!(record.chunk_count as usize, outcome.chunk_count);
            let indexes: Vec<i64> = rows.iter().map(|r| r.chunk_index).collect();
            assert_eq!(indexes, (0..rows.len() as i64).collect::<Vec<_>>());
        }
    }

    let corpus = env.pipeline.corpus();
    assert_eq!(corpus.len().await.unwrap(), report.total_chunks);
    assert_eq!(
        corpus.available_dates().await.unwrap(),
        vec!["2025-03-01", "2025-03-02"]
    );
}

#[tokio::test]
async fn test_retry_only_from_error() {
    let env = setup("").await;
    let submitted = env
        .pipeline
        .submit(vec![UploadedFile::new("ops_2025-03-05.docx", b"garbage".to_vec())])
        .await
        .unwrap();
    let Submission::Stored(file) = &submitted[0] else {
        panic!("upload was rejected: {:?}", submitted[0]);
    };
    assert!(env.pipeline.process(file).await.is_err());

    // Processing an already-processed record is refused.
    assert!(matches!(
        env.pipeline.process(file).await,
        Err(IngestError::InvalidTransition { .. })
    ));

    std::fs::write(&file.stored_path, docx_with_text("Unit 7 NPHR normal")).unwrap();
    let count = env.pipeline.retry(&file.record_id).await.unwrap();
    assert!(count >= 1);

    let record = records::get_record(&env.pool, &file.record_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, IngestStatus::Ready);
    assert!(record.error_message.is_none());
    assert_eq!(record.embedding_model.as_deref(), Some("hashing"));

    assert!(matches!(
        env.pipeline.retry(&file.record_id).await,
        Err(IngestError::InvalidTransition { .. })
    ));
    assert!(matches!(
        env.pipeline.retry("no-such-record").await,
        Err(IngestError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_duplicate_names_in_batch_keep_first() {
    let env = setup("").await;
    let report = env
        .pipeline
        .ingest(vec![
            UploadedFile::new(
                "unit3/laporan_2025-03-01.txt",
                "Unit 3 mengalami gangguan boiler tube leak.",
            ),
            UploadedFile::new(
                "unit4/laporan_2025-03-01.txt",
                "Unit 4 mencatat vibrasi turbin tinggi.",
            ),
        ])
        .await
        .unwrap();

    assert_eq!(report.ready(), 1);
    assert_eq!(report.failed(), 1);
    let rejected = &report.files[1];
    assert!(rejected.error.as_deref().unwrap().contains("duplicate"));

    let corpus = env.pipeline.corpus();
    assert_eq!(corpus.len().await.unwrap(), report.total_chunks);
    assert!(!corpus.lexical_search("boiler", 5, None).await.unwrap().is_empty());
    assert!(corpus.lexical_search("vibrasi", 5, None).await.unwrap().is_empty());

    // The duplicate kept its bytes, so a retry indexes it in place of the first.
    let record = records::get_record(&env.pool, &rejected.record_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, IngestStatus::Error);
    assert_eq!(record.filename, "laporan_2025-03-01.txt");
    env.pipeline.retry(&rejected.record_id).await.unwrap();
    assert!(!corpus.lexical_search("vibrasi", 5, None).await.unwrap().is_empty());
    assert!(corpus.lexical_search("boiler", 5, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bad_file_name_does_not_abort_batch() {
    let env = setup("").await;
    let report = env
        .pipeline
        .ingest(vec![
            UploadedFile::new("daily_2025-03-01.txt", report_text("2025-03-01", 1)),
            UploadedFile::new("dir/", "x"),
        ])
        .await
        .unwrap();

    assert_eq!(report.ready(), 1);
    assert_eq!(report.failed(), 1);
    assert!(records::list_records(&env.pool, Some(IngestStatus::Uploaded))
        .await
        .unwrap()
        .is_empty());

    let rejected = &report.files[1];
    let record = records::get_record(&env.pool, &rejected.record_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, IngestStatus::Error);
    assert!(record.error_message.unwrap().contains("invalid file name"));
}

#[tokio::test]
async fn test_reingest_replaces_previous_chunks() {
    let env = setup("").await;
    env.pipeline
        .ingest(vec![UploadedFile::new(
            "daily_2025-03-01.txt",
            "Unit 2 mengalami gangguan boiler tube leak.",
        )])
        .await
        .unwrap();
    let second = env
        .pipeline
        .ingest(vec![UploadedFile::new(
            "daily_2025-03-01.txt",
            "Unit 2 beroperasi normal sepanjang hari.",
        )])
        .await
        .unwrap();

    let corpus = env.pipeline.corpus();
    assert_eq!(corpus.len().await.unwrap(), second.total_chunks);
    assert!(corpus
        .lexical_search("boiler tube leak", 5, None)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        corpus
            .dense_search("normal", 10, Some("2025-03-01"))
            .await
            .unwrap()
            .len(),
        second.total_chunks
    );
}

#[tokio::test]
async fn test_metadata_from_file_name_and_header() {
    let env = setup("").await;
    env.pipeline
        .ingest(vec![
            UploadedFile::new("Laporan 4 Maret 2025 Unit 5.txt", "Beban penuh tanpa gangguan."),
            UploadedFile::new("notes.txt", report_text("6 Maret 2025", 8)),
        ])
        .await
        .unwrap();

    let index = env.pipeline.corpus().snapshot().await.unwrap();
    let by_file = |name: &str| {
        index
            .chunks()
            .iter()
            .find(|c| c.metadata.source_file == name)
            .cloned()
            .unwrap()
    };

    let named = by_file("Laporan 4 Maret 2025 Unit 5.txt");
    assert_eq!(named.metadata.date.as_deref(), Some("2025-03-04"));
    assert_eq!(named.metadata.unit.as_deref(), Some("Unit 5"));

    let header = by_file("notes.txt");
    assert_eq!(header.metadata.date.as_deref(), Some("2025-03-06"));
    assert_eq!(header.metadata.unit.as_deref(), Some("Unit 8"));
}

#[tokio::test]
async fn test_blank_file_is_ready_with_no_chunks() {
    let env = setup("").await;
    let report = env
        .pipeline
        .ingest(vec![UploadedFile::new("empty_2025-03-01.txt", "   \n\n ")])
        .await
        .unwrap();
    assert_eq!(report.ready(), 1);
    assert_eq!(report.total_chunks, 0);
}

#[tokio::test]
async fn test_oversized_file_errors() {
    let env = setup("[ingest]\nmax_file_bytes = 16\n").await;
    let report = env
        .pipeline
        .ingest(vec![UploadedFile::new(
            "big_2025-03-01.txt",
            "x".repeat(64),
        )])
        .await
        .unwrap();
    assert_eq!(report.failed(), 1);
    assert!(report.files[0].error.as_deref().unwrap().contains("size limit"));
    assert_eq!(env.config.ingest.max_file_bytes, 16);
}

#[tokio::test]
async fn test_pdf_ingest() {
    let env = setup("").await;
    let report = env
        .pipeline
        .ingest(vec![UploadedFile::new(
            "shift_2025-03-07.pdf",
            pdf_with_phrase("NPHR unit 3 stabil"),
        )])
        .await
        .unwrap();
    assert_eq!(report.ready(), 1, "{:?}", report.files[0].error);

    let record = records::get_record(&env.pool, &report.files[0].record_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.page_count, 1);
    assert_eq!(record.file_type, "pdf");

    let hits = env
        .pipeline
        .corpus()
        .lexical_search("stabil", 5, Some("2025-03-07"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}
