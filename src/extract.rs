//! File loaders: stored upload → page-level text blocks.
//!
//! [`load`] dispatches on the file extension and returns a
//! [`LoadedDocument`]. Loaders are synchronous and CPU-bound; the ingestion
//! pipeline runs them on the blocking thread pool.
//!
//! | Extension | Pages |
//! |-----------|-------|
//! | `.pdf` | one per PDF page (lopdf), whole-text fallback via pdf-extract |
//! | `.docx` | one, paragraphs separated by newlines |
//! | `.xlsx` | one per worksheet, rows separated by newlines |
//! | `.csv` | one per data row, `header: value` lines |
//! | `.json` | one, pretty-printed |
//! | `.txt` | one |

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use dayscope_core::models::LoadedPage;

use crate::error::LoadError;

pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["pdf", "docx", "txt", "csv", "json", "xlsx"];

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Output of a loader.
#[derive(Debug, Clone, Default)]
pub struct LoadedDocument {
    pub pages: Vec<LoadedPage>,
    /// Physical page count where the format has one, otherwise 1.
    pub page_count: usize,
}

/// Lower-cased extension without the dot, or empty.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub fn is_supported(extension: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension)
}

/// Loads `path` using the loader for `extension`.
pub fn load(path: &Path, extension: &str) -> Result<LoadedDocument, LoadError> {
    let extension = extension.trim_start_matches('.').to_lowercase();
    if !is_supported(&extension) {
        return Err(LoadError::UnsupportedExtension(extension));
    }

    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;

    match extension.as_str() {
        "pdf" => load_pdf(&bytes),
        "docx" => single_page(extract_docx(&bytes)?),
        "xlsx" => load_xlsx(&bytes),
        "csv" => load_csv(&bytes),
        "json" => load_json(&bytes),
        _ => single_page(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn single_page(text: String) -> Result<LoadedDocument, LoadError> {
    Ok(LoadedDocument {
        pages: vec![LoadedPage::new(text, None)],
        page_count: 1,
    })
}

fn load_pdf(bytes: &[u8]) -> Result<LoadedDocument, LoadError> {
    let mut pages = Vec::new();
    let mut page_count = 0;

    if let Ok(doc) = lopdf::Document::load_mem(bytes) {
        let numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        page_count = numbers.len();
        for number in numbers {
            let text = doc.extract_text(&[number]).unwrap_or_default();
            if !text.trim().is_empty() {
                pages.push(LoadedPage::new(text, Some(number)));
            }
        }
    }

    if pages.is_empty() {
        let text =
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| LoadError::Pdf(e.to_string()))?;
        pages.push(LoadedPage::new(text, Some(1)));
    }

    Ok(LoadedDocument {
        page_count: page_count.max(1),
        pages,
    })
}

fn load_csv(bytes: &[u8]) -> Result<LoadedDocument, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut pages = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let text = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| format!("{}: {}", h.trim(), v.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        let mut metadata = BTreeMap::new();
        metadata.insert("row".to_string(), serde_json::json!(row));
        pages.push(LoadedPage {
            text,
            page: None,
            metadata,
        });
    }

    Ok(LoadedDocument {
        pages,
        page_count: 1,
    })
}

fn load_json(bytes: &[u8]) -> Result<LoadedDocument, LoadError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    single_page(serde_json::to_string_pretty(&value)?)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Option<Vec<u8>>, String> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= max_bytes {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        ));
    }
    Ok(Some(out))
}

fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| LoadError::Docx(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)
        .map_err(LoadError::Docx)?
        .ok_or_else(|| LoadError::Docx("word/document.xml not found".to_string()))?;
    docx_paragraphs(&xml).map_err(LoadError::Docx)
}

/// Text of `<w:t>` runs, one line per `<w:p>` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, String> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn load_xlsx(bytes: &[u8]) -> Result<LoadedDocument, LoadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| LoadError::Xlsx(e.to_string()))?;
    let shared_strings = read_shared_strings(&mut archive).map_err(LoadError::Xlsx)?;

    let mut sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    sheet_names.sort_by_key(|name| sheet_number(name));

    let mut pages = Vec::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let Some(xml) =
            read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES).map_err(LoadError::Xlsx)?
        else {
            continue;
        };
        let text = sheet_rows(&xml, &shared_strings).map_err(LoadError::Xlsx)?;
        let number = sheet_number(&name);

        let mut metadata = BTreeMap::new();
        metadata.insert("sheet".to_string(), serde_json::json!(format!("sheet{}", number)));
        pages.push(LoadedPage {
            text,
            page: Some(number),
            metadata,
        });
    }

    let page_count = pages.len().max(1);
    Ok(LoadedDocument { pages, page_count })
}

fn sheet_number(name: &str) -> u32 {
    name.trim_start_matches("xl/worksheets/sheet")
        .trim_end_matches(".xml")
        .parse::<u32>()
        .unwrap_or(u32::MAX)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, String> {
    use quick_xml::events::Event;

    let Some(xml) = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?
    else {
        return Ok(Vec::new());
    };
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values, space-separated within a row, one row per line. Shared
/// strings are resolved; numbers and inline strings are kept as written.
fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<String, String> {
    use quick_xml::events::Event;

    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() {
                    let value = if shared {
                        s.parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                    } else {
                        Some(s.to_string())
                    };
                    if let Some(value) = value {
                        row.push(value);
                        cell_count += 1;
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared = false,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join(" "));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join(" "));
    }
    Ok(rows.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_unsupported_extension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(tmp.path(), "a.exe", b"MZ");
        let err = load(&path, "exe").unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedExtension(ref e) if e == "exe"));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("Laporan 1 Maret 2025.PDF"), "pdf");
        assert_eq!(extension_of("README"), "");
    }

    #[test]
    fn test_txt_single_page() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(tmp.path(), "a.txt", "NPHR 2450".as_bytes());
        let doc = load(&path, "txt").unwrap();
        assert_eq!(doc.page_count, 1);
        assert_eq!(doc.pages[0].text, "NPHR 2450");
        assert_eq!(doc.pages[0].page, None);
    }

    #[test]
    fn test_csv_rows_become_pages() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "a.csv",
            b"unit,nphr\nUnit 7,2450\nUnit 8,2390\n",
        );
        let doc = load(&path, "csv").unwrap();
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[0].text, "unit: Unit 7\nnphr: 2450");
        assert_eq!(doc.pages[1].metadata["row"], 1);
    }

    #[test]
    fn test_json_pretty_printed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(tmp.path(), "a.json", br#"{"unit":"Unit 7","load":300}"#);
        let doc = load(&path, "json").unwrap();
        assert!(doc.pages[0].text.contains("\"unit\": \"Unit 7\""));

        let bad = write(tmp.path(), "b.json", b"{not json");
        assert!(matches!(load(&bad, "json"), Err(LoadError::Json(_))));
    }

    #[test]
    fn test_invalid_pdf_returns_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(tmp.path(), "a.pdf", b"not a pdf");
        assert!(matches!(load(&path, "pdf"), Err(LoadError::Pdf(_))));
    }

    #[test]
    fn test_invalid_zip_returns_error_for_docx() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(tmp.path(), "a.docx", b"not a zip");
        assert!(matches!(load(&path, "docx"), Err(LoadError::Docx(_))));
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>Unit 7</w:t></w:r><w:r><w:t xml:space="preserve"> trip</w:t></w:r></w:p><w:p><w:r><w:t>Load 300 MW</w:t></w:r></w:p></w:body></w:document>"#;
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(tmp.path(), "a.docx", &zip_with(&[("word/document.xml", xml)]));
        let doc = load(&path, "docx").unwrap();
        assert_eq!(doc.pages[0].text, "Unit 7 trip\nLoad 300 MW\n");
    }

    #[test]
    fn test_xlsx_sheets_become_pages() {
        let shared = r#"<sst><si><t>Unit</t></si><si><t>NPHR</t></si><si><t>Unit 7</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData><row r="1"><c t="s"><v>0</v></c><c t="s"><v>1</v></c></row><row r="2"><c t="s"><v>2</v></c><c><v>2450</v></c></row></sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write(tmp.path(), "a.xlsx", &bytes);
        let doc = load(&path, "xlsx").unwrap();
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].text, "Unit NPHR\nUnit 7 2450");
        assert_eq!(doc.pages[0].page, Some(1));
        assert_eq!(doc.pages[0].metadata["sheet"], "sheet1");
    }
}
