//! arXiv export API client (Atom feed).

use std::sync::Arc;

use citegraph_common::entities::{AuthorRecord, IdentifierSet, LiteratureMetadata};
use citegraph_common::http::{DestClass, RequestBroker};
use citegraph_common::{ident, Settings};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::instrument;

use crate::{SourceError, SourceRecord, SourceResult};

const PROVIDER: &str = "arxiv";

pub struct ArxivClient {
    broker: Arc<RequestBroker>,
    base_url: String,
}

impl ArxivClient {
    pub fn new(broker: Arc<RequestBroker>, settings: &Settings) -> Self {
        Self {
            broker,
            base_url: settings.arxiv_api_base_url.clone(),
        }
    }

    /// Look up one paper by arXiv id (either format, version ignored).
    #[instrument(skip(self))]
    pub async fn by_id(&self, arxiv_id: &str) -> SourceResult<Option<SourceRecord>> {
        let id = ident::normalize_arxiv_id(arxiv_id);
        let url = format!("{}/api/query?id_list={}&max_results=1", self.base_url, id);
        let resp = self
            .broker
            .get(DestClass::External, &url)
            .await
            .map_err(|e| SourceError::from_request(PROVIDER, e))?;
        let xml = resp
            .text()
            .await
            .map_err(|e| SourceError::parse(PROVIDER, e.to_string()))?;
        let mut entries = parse_atom_feed(&xml)?;
        Ok(entries.pop())
    }
}

/// Parse an Atom feed into source records. Entries without a title are
/// dropped (the API answers an empty entry for unknown ids).
fn parse_atom_feed(xml: &str) -> SourceResult<Vec<SourceRecord>> {
    let mut reader = Reader::from_str(xml);
    let mut records = Vec::new();

    let mut in_entry = false;
    let mut in_author = false;
    let mut current_tag = String::new();
    let mut title = String::new();
    let mut summary = String::new();
    let mut id_url = String::new();
    let mut published = String::new();
    let mut doi = String::new();
    let mut journal_ref = String::new();
    let mut author_name = String::new();
    let mut authors: Vec<String> = Vec::new();
    let mut link_pdf = String::new();
    let mut buf = Vec::new();

    let read_link = |e: &quick_xml::events::BytesStart, link_pdf: &mut String| {
        let mut href = String::new();
        let mut title_attr = String::new();
        for attr in e.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let val = String::from_utf8_lossy(&attr.value).to_string();
            if key == "href" {
                href = val;
            } else if key == "title" {
                title_attr = val;
            }
        }
        if title_attr == "pdf" {
            *link_pdf = href;
        }
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = local_name(e.name().as_ref());
                if tag == "entry" {
                    in_entry = true;
                    title.clear();
                    summary.clear();
                    id_url.clear();
                    published.clear();
                    doi.clear();
                    journal_ref.clear();
                    authors.clear();
                    link_pdf.clear();
                } else if in_entry {
                    current_tag = tag.clone();
                    if tag == "author" {
                        in_author = true;
                        author_name.clear();
                    } else if tag == "link" {
                        read_link(&e, &mut link_pdf);
                    }
                }
            }
            Ok(Event::Empty(e)) if in_entry => {
                if local_name(e.name().as_ref()) == "link" {
                    read_link(&e, &mut link_pdf);
                }
            }
            Ok(Event::Text(e)) if in_entry => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_tag.as_str() {
                    "title" => title.push_str(&text),
                    "summary" => summary.push_str(&text),
                    "id" if id_url.is_empty() => id_url = text,
                    "published" => published.push_str(&text),
                    "doi" => doi.push_str(&text),
                    "journal_ref" => journal_ref.push_str(&text),
                    "name" if in_author => author_name.push_str(&text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let tag = local_name(e.name().as_ref());
                if tag == "author" && in_author {
                    in_author = false;
                    if !author_name.trim().is_empty() {
                        authors.push(author_name.trim().to_string());
                    }
                } else if tag == "entry" && in_entry {
                    in_entry = false;
                    if let Some(record) = build_record(
                        &title,
                        &summary,
                        &id_url,
                        &published,
                        &doi,
                        &journal_ref,
                        &authors,
                        &link_pdf,
                    ) {
                        records.push(record);
                    }
                }
                if tag == current_tag {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::parse(PROVIDER, format!("Atom parse: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(records)
}

fn local_name(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    s.rsplit(':').next().unwrap_or(&s).to_string()
}

#[allow(clippy::too_many_arguments)]
fn build_record(
    title: &str,
    summary: &str,
    id_url: &str,
    published: &str,
    doi: &str,
    journal_ref: &str,
    authors: &[String],
    link_pdf: &str,
) -> Option<SourceRecord> {
    let title = title.trim().replace('\n', " ");
    if title.is_empty() {
        return None;
    }
    let arxiv_id = ident::extract_arxiv_id(id_url)
        .or_else(|| id_url.rsplit('/').next().map(ident::normalize_arxiv_id))?;

    let year = published
        .get(..4)
        .and_then(|y| y.parse::<i32>().ok())
        .or_else(|| ident::arxiv_year(&arxiv_id));

    Some(SourceRecord {
        metadata: LiteratureMetadata {
            title,
            authors: authors
                .iter()
                .enumerate()
                .map(|(i, name)| AuthorRecord {
                    name: name.clone(),
                    sequence: Some(i as u32 + 1),
                    affiliation: None,
                })
                .collect(),
            year,
            journal: if journal_ref.trim().is_empty() {
                None
            } else {
                Some(journal_ref.trim().to_string())
            },
            abstract_text: if summary.trim().is_empty() {
                None
            } else {
                Some(summary.trim().replace('\n', " "))
            },
            keywords: Vec::new(),
            source_priority: vec![PROVIDER.to_string()],
        },
        identifiers: IdentifierSet {
            doi: if doi.trim().is_empty() {
                None
            } else {
                Some(ident::normalize_doi(doi.trim()))
            },
            arxiv_id: Some(arxiv_id.clone()),
            ..Default::default()
        },
        pdf_url: if link_pdf.is_empty() {
            Some(ident::arxiv_pdf_url(&arxiv_id))
        } else {
            Some(link_pdf.to_string())
        },
        source_page_url: Some(ident::arxiv_abs_url(&arxiv_id)),
    })
}
