//! GROBID PDF parser client.
//!
//! GROBID is an internal service that accepts PDF bytes and answers TEI XML:
//! `<teiHeader>` carries bibliographic metadata, `<back>/<listBibl>` the
//! parsed bibliography. This module posts the PDF and walks the TEI with a
//! streaming reader; no document tree is materialized.

use std::sync::Arc;

use citegraph_common::entities::{
    AuthorRecord, LiteratureMetadata, ParsedReference, RawReference,
};
use citegraph_common::http::{DestClass, RequestBroker};
use citegraph_common::{ident, Settings};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::{debug, instrument};

use crate::{SourceError, SourceResult};

const PROVIDER: &str = "grobid";
const MULTIPART_BOUNDARY: &str = "citegraph-grobid-boundary";

/// Parsed TEI document: header metadata, bibliography, and body text.
#[derive(Debug, Clone, Default)]
pub struct TeiDocument {
    pub metadata: Option<LiteratureMetadata>,
    pub references: Vec<RawReference>,
    pub body_text: Option<String>,
}

pub struct GrobidClient {
    broker: Arc<RequestBroker>,
    base_url: String,
}

impl GrobidClient {
    pub fn new(broker: Arc<RequestBroker>, settings: &Settings) -> Self {
        Self {
            broker,
            base_url: settings.grobid_base_url.clone(),
        }
    }

    /// Parse only the header (fast path used for fingerprint dedup).
    #[instrument(skip(self, pdf))]
    pub async fn parse_header(&self, pdf: &[u8]) -> SourceResult<Option<LiteratureMetadata>> {
        let tei = self
            .process(pdf, "/api/processHeaderDocument")
            .await?;
        let doc = parse_tei(&tei)?;
        Ok(doc.metadata)
    }

    /// Full parse: header, bibliography, and body text.
    #[instrument(skip(self, pdf))]
    pub async fn parse_fulltext(&self, pdf: &[u8]) -> SourceResult<TeiDocument> {
        let tei = self
            .process(pdf, "/api/processFulltextDocument")
            .await?;
        parse_tei(&tei)
    }

    async fn process(&self, pdf: &[u8], endpoint: &str) -> SourceResult<String> {
        let url = format!("{}{}", self.base_url, endpoint);
        let body = multipart_body(pdf);
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(&format!(
                "multipart/form-data; boundary={MULTIPART_BOUNDARY}"
            ))
            .map_err(|e| SourceError::parse(PROVIDER, e.to_string()))?,
        );
        let resp = self
            .broker
            .post_bytes(DestClass::Internal, &url, headers, body)
            .await
            .map_err(|e| SourceError::from_request(PROVIDER, e))?;
        let tei = resp
            .text()
            .await
            .map_err(|e| SourceError::parse(PROVIDER, e.to_string()))?;
        debug!(bytes = tei.len(), endpoint, "GROBID TEI response");
        Ok(tei)
    }
}

/// GROBID expects a multipart form with an `input` file part.
fn multipart_body(pdf: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(pdf.len() + 256);
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"input\"; filename=\"input.pdf\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/pdf\r\n\r\n");
    body.extend_from_slice(pdf);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

// ── TEI parsing ────────────────────────────────────────────────────────────

#[derive(Default)]
struct BiblEntry {
    title: String,
    monogr_title: String,
    authors: Vec<String>,
    year: Option<i32>,
    doi: Option<String>,
    arxiv_id: Option<String>,
    raw_parts: Vec<String>,
}

impl BiblEntry {
    fn into_reference(self) -> Option<RawReference> {
        let title = if !self.title.trim().is_empty() {
            Some(self.title.trim().to_string())
        } else if !self.monogr_title.trim().is_empty() {
            Some(self.monogr_title.trim().to_string())
        } else {
            None
        };
        let raw_text = self.raw_parts.join(" ").trim().to_string();
        if title.is_none() && raw_text.is_empty() {
            return None;
        }
        Some(RawReference {
            raw_text: if raw_text.is_empty() {
                title.clone().unwrap_or_default()
            } else {
                raw_text
            },
            parsed: Some(ParsedReference {
                title,
                authors: self.authors,
                year: self.year,
                doi: self.doi,
                arxiv_id: self.arxiv_id,
            }),
            source: PROVIDER.to_string(),
        })
    }
}

/// Walk a TEI document once, collecting header metadata, the `listBibl`
/// bibliography, and body paragraph text.
pub fn parse_tei(xml: &str) -> SourceResult<TeiDocument> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    // Element path from the root, local names only.
    let mut stack: Vec<String> = Vec::new();

    let mut header_title = String::new();
    let mut header_authors: Vec<(String, String)> = Vec::new(); // (forename, surname)
    let mut header_year: Option<i32> = None;
    let mut header_abstract = String::new();

    let mut forename = String::new();
    let mut surname = String::new();

    let mut bibl: Option<BiblEntry> = None;
    let mut references: Vec<RawReference> = Vec::new();
    let mut idno_type = String::new();

    let mut body_text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                // Dates carry their value in the `when` attribute.
                if name == "date" {
                    let when = attr_value(&e, "when");
                    if let Some(year) = when.and_then(|w| w.get(..4).and_then(|y| y.parse().ok()))
                    {
                        if in_list_bibl(&stack) {
                            if let Some(ref mut b) = bibl {
                                b.year.get_or_insert(year);
                            }
                        } else if in_header(&stack) {
                            header_year.get_or_insert(year);
                        }
                    }
                } else if name == "idno" {
                    idno_type = attr_value(&e, "type").unwrap_or_default();
                } else if name == "biblStruct" && in_list_bibl(&stack) {
                    bibl = Some(BiblEntry::default());
                } else if name == "persName" {
                    forename.clear();
                    surname.clear();
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.name().as_ref());
                if name == "date" {
                    let when = attr_value(&e, "when");
                    if let Some(year) = when.and_then(|w| w.get(..4).and_then(|y| y.parse().ok()))
                    {
                        if in_list_bibl(&stack) {
                            if let Some(ref mut b) = bibl {
                                b.year.get_or_insert(year);
                            }
                        } else if in_header(&stack) {
                            header_year.get_or_insert(year);
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if text.trim().is_empty() {
                    continue;
                }
                let here = stack.last().map(String::as_str).unwrap_or("");

                if in_list_bibl(&stack) {
                    if let Some(ref mut b) = bibl {
                        b.raw_parts.push(text.trim().to_string());
                        match here {
                            "title" if stack.contains(&"analytic".to_string()) => {
                                b.title.push_str(&text)
                            }
                            "title" if stack.contains(&"monogr".to_string()) => {
                                b.monogr_title.push_str(&text)
                            }
                            "forename" => forename.push_str(&text),
                            "surname" => surname.push_str(&text),
                            "idno" => match idno_type.as_str() {
                                "DOI" => b.doi = Some(ident::normalize_doi(text.trim())),
                                "arXiv" => {
                                    b.arxiv_id = Some(ident::normalize_arxiv_id(
                                        text.trim().trim_start_matches("arXiv:"),
                                    ))
                                }
                                _ => {}
                            },
                            _ => {}
                        }
                    }
                } else if in_header(&stack) {
                    match here {
                        "title" if stack.contains(&"titleStmt".to_string()) => {
                            header_title.push_str(&text)
                        }
                        "forename" => forename.push_str(&text),
                        "surname" => surname.push_str(&text),
                        "p" | "s" if stack.contains(&"abstract".to_string()) => {
                            if !header_abstract.is_empty() {
                                header_abstract.push(' ');
                            }
                            header_abstract.push_str(text.trim());
                        }
                        _ => {}
                    }
                } else if here == "p" && stack.contains(&"body".to_string()) {
                    if !body_text.is_empty() {
                        body_text.push('\n');
                    }
                    body_text.push_str(text.trim());
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.name().as_ref());
                if name == "persName" {
                    let full = format!("{} {}", forename.trim(), surname.trim())
                        .trim()
                        .to_string();
                    if !full.is_empty() {
                        if in_list_bibl(&stack) {
                            if let Some(ref mut b) = bibl {
                                b.authors.push(full);
                            }
                        } else if in_header(&stack) {
                            header_authors.push((forename.trim().into(), surname.trim().into()));
                        }
                    }
                } else if name == "biblStruct" && in_list_bibl(&stack) {
                    if let Some(entry) = bibl.take() {
                        if let Some(reference) = entry.into_reference() {
                            references.push(reference);
                        }
                    }
                } else if name == "idno" {
                    idno_type.clear();
                }
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::parse(PROVIDER, format!("TEI parse: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    let metadata = if header_title.trim().is_empty() {
        None
    } else {
        Some(LiteratureMetadata {
            title: header_title.trim().to_string(),
            authors: header_authors
                .iter()
                .enumerate()
                .map(|(i, (first, last))| AuthorRecord {
                    name: format!("{first} {last}").trim().to_string(),
                    sequence: Some(i as u32 + 1),
                    affiliation: None,
                })
                .collect(),
            year: header_year,
            journal: None,
            abstract_text: if header_abstract.is_empty() {
                None
            } else {
                Some(header_abstract)
            },
            keywords: Vec::new(),
            source_priority: vec![PROVIDER.to_string()],
        })
    };

    Ok(TeiDocument {
        metadata,
        references,
        body_text: if body_text.is_empty() {
            None
        } else {
            Some(body_text)
        },
    })
}

fn local_name(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    s.rsplit(':').next().unwrap_or(&s).to_string()
}

fn attr_value(e: &quick_xml::events::BytesStart, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if String::from_utf8_lossy(a.key.as_ref()) == key {
            Some(String::from_utf8_lossy(&a.value).to_string())
        } else {
            None
        }
    })
}

fn in_header(stack: &[String]) -> bool {
    stack.iter().any(|s| s == "teiHeader")
}

fn in_list_bibl(stack: &[String]) -> bool {
    stack.iter().any(|s| s == "listBibl")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TEI: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0">
  <teiHeader>
    <fileDesc>
      <titleStmt><title level="a" type="main">Attention Is All You Need</title></titleStmt>
      <publicationStmt><date when="2017-06-12"/></publicationStmt>
      <sourceDesc><biblStruct><analytic>
        <author><persName><forename type="first">Ashish</forename><surname>Vaswani</surname></persName></author>
        <author><persName><forename type="first">Noam</forename><surname>Shazeer</surname></persName></author>
      </analytic></biblStruct></sourceDesc>
    </fileDesc>
    <profileDesc><abstract><p>The dominant sequence transduction models.</p></abstract></profileDesc>
  </teiHeader>
  <text>
    <body><div><p>We propose the Transformer.</p></div></body>
    <back>
      <listBibl>
        <biblStruct>
          <analytic>
            <title level="a" type="main">Neural Machine Translation by Jointly Learning to Align and Translate</title>
            <author><persName><forename type="first">Dzmitry</forename><surname>Bahdanau</surname></persName></author>
            <idno type="arXiv">arXiv:1409.0473</idno>
          </analytic>
          <monogr><title level="j">ICLR</title><imprint><date when="2015"/></imprint></monogr>
        </biblStruct>
        <biblStruct>
          <analytic>
            <title level="a" type="main">Deep Residual Learning for Image Recognition</title>
            <author><persName><forename type="first">Kaiming</forename><surname>He</surname></persName></author>
            <idno type="DOI">10.1109/CVPR.2016.90</idno>
          </analytic>
          <monogr><title level="m">CVPR</title><imprint><date when="2016-06"/></imprint></monogr>
        </biblStruct>
      </listBibl>
    </back>
  </text>
</TEI>"#;

    #[test]
    fn header_metadata_is_extracted() {
        let doc = parse_tei(SAMPLE_TEI).unwrap();
        let meta = doc.metadata.unwrap();
        assert_eq!(meta.title, "Attention Is All You Need");
        assert_eq!(meta.year, Some(2017));
        assert_eq!(meta.authors.len(), 2);
        assert_eq!(meta.authors[0].name, "Ashish Vaswani");
        assert_eq!(
            meta.abstract_text.as_deref(),
            Some("The dominant sequence transduction models.")
        );
    }

    #[test]
    fn bibliography_entries_are_parsed() {
        let doc = parse_tei(SAMPLE_TEI).unwrap();
        assert_eq!(doc.references.len(), 2);

        let first = doc.references[0].parsed.as_ref().unwrap();
        assert_eq!(
            first.title.as_deref(),
            Some("Neural Machine Translation by Jointly Learning to Align and Translate")
        );
        assert_eq!(first.arxiv_id.as_deref(), Some("1409.0473"));
        assert_eq!(first.year, Some(2015));
        assert_eq!(first.authors, vec!["Dzmitry Bahdanau".to_string()]);

        let second = doc.references[1].parsed.as_ref().unwrap();
        assert_eq!(second.doi.as_deref(), Some("10.1109/cvpr.2016.90"));
        assert_eq!(second.year, Some(2016));
    }

    #[test]
    fn body_text_is_collected() {
        let doc = parse_tei(SAMPLE_TEI).unwrap();
        assert_eq!(doc.body_text.as_deref(), Some("We propose the Transformer."));
    }

    #[test]
    fn multipart_body_wraps_pdf_bytes() {
        let body = multipart_body(b"%PDF-1.4 fake");
        let s = String::from_utf8_lossy(&body);
        assert!(s.contains("name=\"input\""));
        assert!(s.contains("%PDF-1.4 fake"));
        assert!(s.trim_end().ends_with("--"));
    }
}
