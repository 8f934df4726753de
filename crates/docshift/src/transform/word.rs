use std::io::{Read, Seek, Write};

use lopdf::{dictionary, Document, Object, Stream};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use zip::write::SimpleFileOptions;

use crate::error::TransformError;
use crate::store::OutputDir;
use crate::transform::pdf::save_pdf;
use crate::transform::{
    require_word, with_extension, Transform, TransformInput, TransformKind, TransformOutput,
};

const WORDML_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

// US Letter in points.
const PAGE_WIDTH: i64 = 612;
const PAGE_HEIGHT: i64 = 792;
const LINES_PER_PAGE: usize = 50;
const CHARS_PER_LINE: usize = 90;

/// Lays out the text of a DOCX document onto Letter pages.
#[derive(Debug, Default)]
pub struct WordToPdf;

impl Transform for WordToPdf {
    fn kind(&self) -> TransformKind {
        TransformKind::WordToPdf
    }

    fn apply(&self, input: &TransformInput, out: &OutputDir) -> Result<TransformOutput, TransformError> {
        let _span = tracing::info_span!("transform.word_to_pdf", file = %input.original_name).entered();

        require_word(input)?;
        if input.extension().as_deref() == Some("doc") {
            return Err(TransformError::UnsupportedInput(format!(
                "'{}' is a legacy .doc file; only .docx can be converted",
                input.original_name
            )));
        }

        let file = std::fs::File::open(&input.path).map_err(|e| TransformError::ReadInput {
            path: input.path.clone(),
            source: e,
        })?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| TransformError::Docx(format!("Failed to open DOCX: {}", e)))?;

        let text = extract_docx_text(&mut archive)?;
        let mut doc = layout_text_pdf(&text);

        let file_name = with_extension(&input.original_name, "pdf");
        save_pdf(&mut doc, out, file_name)
    }
}

pub(crate) fn extract_docx_text<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<String, TransformError> {
    let mut document_xml = archive
        .by_name("word/document.xml")
        .map_err(|e| TransformError::Docx(format!("Failed to find document.xml: {}", e)))?;

    let mut xml_content = String::new();
    document_xml
        .read_to_string(&mut xml_content)
        .map_err(|e| TransformError::Docx(format!("Failed to read document.xml: {}", e)))?;

    parse_document_xml(&xml_content)
}

/// Collects `w:t` runs, one line per `w:p` paragraph. Tabs and explicit
/// breaks become whitespace. Text is not trimmed: entity references split a
/// run into several events and the spaces around them matter.
fn parse_document_xml(xml: &str) -> Result<String, TransformError> {
    let mut reader = Reader::from_str(xml);

    let mut text = String::new();
    let mut in_text_element = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_element = true;
                }
            }
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" | b"cr" => text.push('\n'),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_element {
                    if let Ok(decoded) = e.decode() {
                        text.push_str(&decoded);
                    }
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text_element {
                    if let Ok(Some(ch)) = e.resolve_char_ref() {
                        text.push(ch);
                    } else if let Ok(name) = e.decode() {
                        if let Some(resolved) = quick_xml::escape::resolve_predefined_entity(&name) {
                            text.push_str(resolved);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(TransformError::Docx(format!("XML parsing error: {}", e)));
            }
            _ => {}
        }
    }

    Ok(text)
}

fn layout_text_pdf(text: &str) -> Document {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let lines = wrap_lines(text);
    let mut chunks: Vec<&[String]> = lines.chunks(LINES_PER_PAGE).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }

    let mut page_ids: Vec<Object> = Vec::with_capacity(chunks.len());
    for page_lines in chunks {
        let content = format_text_for_pdf(page_lines);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id.into());
    }

    let count = page_ids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc
}

/// Splits paragraphs into lines short enough for the page width.
fn wrap_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let expanded = paragraph.replace('\t', "    ");
        let mut current = String::new();
        for word in expanded.split(' ').flat_map(split_long_word) {
            if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > CHARS_PER_LINE {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        lines.push(current);
    }

    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines
}

/// Words wider than a line (long URLs, identifiers) are cut into line-sized
/// pieces.
fn split_long_word(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    if chars.len() <= CHARS_PER_LINE {
        return vec![word.to_string()];
    }
    chars
        .chunks(CHARS_PER_LINE)
        .map(|piece| piece.iter().collect())
        .collect()
}

fn format_text_for_pdf(lines: &[String]) -> String {
    let mut content = String::new();
    content.push_str("BT\n");
    content.push_str("/F1 11 Tf\n");
    content.push_str("50 742 Td\n");
    content.push_str("14 TL\n");

    for line in lines {
        content.push_str(&format!("({}) Tj T*\n", escape_pdf_string(line)));
    }

    content.push_str("ET\n");
    content
}

/// Escapes a line for a literal string shown with the WinAnsi-encoded font.
/// Characters beyond printable ASCII are written as octal byte escapes;
/// anything WinAnsi cannot represent becomes `?`.
fn escape_pdf_string(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '(' => "\\(".to_string(),
            ')' => "\\)".to_string(),
            '\\' => "\\\\".to_string(),
            c if c.is_ascii_control() => " ".to_string(),
            c if c.is_ascii() => c.to_string(),
            c => match win_ansi_byte(c) {
                Some(byte) => format!("\\{:03o}", byte),
                None => "?".to_string(),
            },
        })
        .collect()
}

/// Maps a non-ASCII character to its WinAnsiEncoding code.
fn win_ansi_byte(c: char) -> Option<u8> {
    let byte = match c {
        '\u{a0}'..='\u{ff}' => c as u32 as u8,
        '\u{20ac}' => 0x80,
        '\u{201a}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201e}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02c6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8a,
        '\u{2039}' => 0x8b,
        '\u{0152}' => 0x8c,
        '\u{017d}' => 0x8e,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201c}' => 0x93,
        '\u{201d}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02dc}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9a,
        '\u{203a}' => 0x9b,
        '\u{0153}' => 0x9c,
        '\u{017e}' => 0x9e,
        '\u{0178}' => 0x9f,
        _ => return None,
    };
    Some(byte)
}

/// Writes a minimal DOCX package with one paragraph per text line and a page
/// break between `pages`.
pub(crate) fn write_docx<W: Write + Seek>(sink: W, pages: &[String]) -> Result<(), TransformError> {
    let docx_err = |e: &dyn std::fmt::Display| TransformError::Docx(e.to_string());

    let mut zip = zip::ZipWriter::new(sink);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", options).map_err(|e| docx_err(&e))?;
    zip.write_all(CONTENT_TYPES_XML.as_bytes()).map_err(|e| docx_err(&e))?;

    zip.start_file("_rels/.rels", options).map_err(|e| docx_err(&e))?;
    zip.write_all(ROOT_RELS_XML.as_bytes()).map_err(|e| docx_err(&e))?;

    zip.start_file("word/document.xml", options).map_err(|e| docx_err(&e))?;
    write_document_xml(&mut zip, pages).map_err(|e| docx_err(&e))?;

    let mut sink = zip.finish().map_err(|e| docx_err(&e))?;
    sink.flush().map_err(|e| docx_err(&e))?;
    Ok(())
}

fn write_document_xml<W: Write>(
    sink: W,
    pages: &[String],
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut writer = Writer::new(sink);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    writer.write_event(Event::Start(
        BytesStart::new("w:document").with_attributes([("xmlns:w", WORDML_NS)]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("w:body")))?;

    for (index, page) in pages.iter().enumerate() {
        if index > 0 {
            writer.write_event(Event::Start(BytesStart::new("w:p")))?;
            writer.write_event(Event::Start(BytesStart::new("w:r")))?;
            writer.write_event(Event::Empty(
                BytesStart::new("w:br").with_attributes([("w:type", "page")]),
            ))?;
            writer.write_event(Event::End(BytesEnd::new("w:r")))?;
            writer.write_event(Event::End(BytesEnd::new("w:p")))?;
        }

        for line in page.lines() {
            writer.write_event(Event::Start(BytesStart::new("w:p")))?;
            writer.write_event(Event::Start(BytesStart::new("w:r")))?;
            writer.write_event(Event::Start(
                BytesStart::new("w:t").with_attributes([("xml:space", "preserve")]),
            ))?;
            writer.write_event(Event::Text(BytesText::new(line)))?;
            writer.write_event(Event::End(BytesEnd::new("w:t")))?;
            writer.write_event(Event::End(BytesEnd::new("w:r")))?;
            writer.write_event(Event::End(BytesEnd::new("w:p")))?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new("w:body")))?;
    writer.write_event(Event::End(BytesEnd::new("w:document")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{DOCX_MIME, PDF_MIME};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn docx_bytes(pages: &[&str]) -> Vec<u8> {
        let pages: Vec<String> = pages.iter().map(|p| p.to_string()).collect();
        let mut cursor = Cursor::new(Vec::new());
        write_docx(&mut cursor, &pages).unwrap();
        cursor.into_inner()
    }

    fn input_for(temp: &TempDir, name: &str, content: &[u8]) -> TransformInput {
        let path = temp.path().join("upload.bin");
        std::fs::write(&path, content).unwrap();
        TransformInput {
            path,
            mime_type: DOCX_MIME.to_string(),
            original_name: name.to_string(),
        }
    }

    #[test]
    fn test_parse_simple_xml() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
        <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
            <w:body>
                <w:p>
                    <w:r>
                        <w:t>Hello World</w:t>
                    </w:r>
                </w:p>
                <w:p><w:r><w:t>Second</w:t><w:tab/><w:t>line &amp; more</w:t></w:r></w:p>
            </w:body>
        </w:document>"#;

        let text = parse_document_xml(xml).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["Hello World", "Second\tline & more"]);
    }

    #[test]
    fn test_docx_round_trip_text() {
        let bytes = docx_bytes(&["First page\nwith two lines", "Second (page)"]);
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let text = extract_docx_text(&mut archive).unwrap();

        assert!(text.contains("First page"));
        assert!(text.contains("with two lines"));
        assert!(text.contains("Second (page)"));
        assert!(archive.by_name("[Content_Types].xml").is_ok());
    }

    #[test]
    fn test_word_to_pdf_converts_docx() {
        let temp = TempDir::new().unwrap();
        let out_dir = temp.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        let input = input_for(&temp, "letter.docx", &docx_bytes(&["Dear reader (hello)"]));

        let output = WordToPdf.apply(&input, &OutputDir::new(&out_dir)).unwrap();

        assert_eq!(output.file_name, "letter.pdf");
        assert_eq!(output.mime_type, PDF_MIME);
        let doc = Document::load(&output.path).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_word_to_pdf_paginates_long_documents() {
        let text: Vec<String> = (0..120).map(|i| format!("Line {}", i)).collect();
        let doc = layout_text_pdf(&text.join("\n"));
        assert_eq!(doc.get_pages().len(), 3);

        let empty = layout_text_pdf("");
        assert_eq!(empty.get_pages().len(), 1);
    }

    #[test]
    fn test_word_to_pdf_rejects_legacy_doc() {
        let temp = TempDir::new().unwrap();
        let out = OutputDir::new(temp.path());
        let mut input = input_for(&temp, "old.doc", b"\xD0\xCF\x11\xE0");
        input.mime_type = "application/msword".to_string();

        match WordToPdf.apply(&input, &out) {
            Err(TransformError::UnsupportedInput(message)) => assert!(message.contains("old.doc")),
            other => panic!("Expected UnsupportedInput error, got {:?}", other),
        }
    }

    #[test]
    fn test_word_to_pdf_missing_document_xml() {
        let temp = TempDir::new().unwrap();
        let out_dir = temp.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            zip.start_file("readme.txt", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"not a document").unwrap();
            zip.finish().unwrap();
        }
        let input = input_for(&temp, "fake.docx", &cursor.into_inner());

        match WordToPdf.apply(&input, &OutputDir::new(&out_dir)) {
            Err(TransformError::Docx(message)) => assert!(message.contains("document.xml")),
            other => panic!("Expected Docx error, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_wrap_long_paragraph() {
        let paragraph = "word ".repeat(60);
        let lines = wrap_lines(&paragraph);
        assert!(lines.len() >= 3);
        assert!(lines.iter().all(|l| l.chars().count() <= CHARS_PER_LINE));
    }

    #[test]
    fn test_wrap_splits_words_wider_than_a_line() {
        let lines = wrap_lines(&format!("see {}", "x".repeat(300)));
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "see");
        assert!(lines.iter().all(|l| l.chars().count() <= CHARS_PER_LINE));
        assert_eq!(lines[1..].concat(), "x".repeat(300));
    }

    #[test]
    fn test_escape_pdf_string() {
        assert_eq!(escape_pdf_string("a(b)c\\"), "a\\(b\\)c\\\\");
        assert_eq!(escape_pdf_string("caf\u{e9} \u{20ac}"), "caf\\351 \\200");
        assert_eq!(escape_pdf_string("\u{2603}"), "?");
    }

    #[test]
    fn test_word_to_pdf_keeps_latin_text() {
        let temp = TempDir::new().unwrap();
        let out_dir = temp.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        let input = input_for(&temp, "accents.docx", &docx_bytes(&["Größe café naïve"]));

        let output = WordToPdf.apply(&input, &OutputDir::new(&out_dir)).unwrap();

        let doc = Document::load(&output.path).unwrap();
        let text = doc.extract_text(&[1]).unwrap();
        assert!(text.contains("Größe café naïve"), "extracted {:?}", text);
    }
}
