//! Atom feed parsing for arXiv search results.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;

use paperpipe_shared::{ArticleMetadata, PaperpipeError, Result};

/// Entry child element whose text is being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    Updated,
    AuthorName,
}

#[derive(Default)]
struct EntryDraft {
    id: String,
    title: String,
    summary: String,
    published: String,
    updated: String,
    authors: Vec<String>,
}

impl EntryDraft {
    fn push_text(&mut self, field: Field, text: &str) {
        let target = match field {
            Field::Id => &mut self.id,
            Field::Title => &mut self.title,
            Field::Summary => &mut self.summary,
            Field::Published => &mut self.published,
            Field::Updated => &mut self.updated,
            Field::AuthorName => match self.authors.last_mut() {
                Some(name) => name,
                None => return,
            },
        };
        target.push_str(text);
    }

    fn finish(self) -> Option<ArticleMetadata> {
        let id = self.id.trim().to_string();
        if id.is_empty() {
            return None;
        }
        Some(ArticleMetadata {
            pdf_locator: id.replace("abs", "pdf"),
            html_locator: id.replace("abs", "html"),
            title: collapse(&self.title),
            abstract_text: collapse(&self.summary),
            keywords: Vec::new(),
            published_at: parse_time(&self.published),
            updated_at: parse_time(&self.updated),
            authors: self
                .authors
                .iter()
                .map(|a| collapse(a))
                .filter(|a| !a.is_empty())
                .collect(),
            id,
        })
    }
}

/// Parse an Atom feed into articles, in feed order. Entries without an `<id>`
/// are skipped; a malformed document is a parse error.
pub fn parse_feed(xml: &str) -> Result<Vec<ArticleMetadata>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut articles = Vec::new();
    let mut entry: Option<EntryDraft> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"entry" => entry = Some(EntryDraft::default()),
                b"author" if entry.is_some() => in_author = true,
                name => {
                    if let Some(draft) = entry.as_mut() {
                        field = match (name, in_author) {
                            (b"name", true) => {
                                draft.authors.push(String::new());
                                Some(Field::AuthorName)
                            }
                            (b"id", false) => Some(Field::Id),
                            (b"title", false) => Some(Field::Title),
                            (b"summary", false) => Some(Field::Summary),
                            (b"published", false) => Some(Field::Published),
                            (b"updated", false) => Some(Field::Updated),
                            _ => None,
                        };
                    }
                }
            },
            Ok(Event::Text(ref e)) => {
                if let (Some(draft), Some(f)) = (entry.as_mut(), field) {
                    let text = e
                        .unescape()
                        .map_err(|err| PaperpipeError::parse(format!("atom text: {err}")))?;
                    draft.push_text(f, &text);
                    draft.push_text(f, " ");
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(article) = entry.take().and_then(EntryDraft::finish) {
                        articles.push(article);
                    }
                    field = None;
                }
                b"author" => in_author = false,
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PaperpipeError::parse(format!(
                    "atom feed at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(articles)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: all:attention</title>
  <id>http://arxiv.org/api/abcdef</id>
  <updated>2024-05-01T00:00:00-04:00</updated>
  <entry>
    <id>http://arxiv.org/abs/2405.00002v2</id>
    <updated>2024-05-03T12:00:00Z</updated>
    <published>2024-05-01T09:30:00Z</published>
    <title>Sparse Attention
      at Scale</title>
    <summary>  We propose a sparse
  attention mechanism.
</summary>
    <author><name>Grace Hopper</name></author>
    <author>
      <name>Alan Turing</name>
      <arxiv:affiliation>Manchester</arxiv:affiliation>
    </author>
    <link href="http://arxiv.org/abs/2405.00002v2" rel="alternate" type="text/html"/>
    <arxiv:primary_category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2405.00001v1</id>
    <updated>not-a-date</updated>
    <published>2024-04-30T00:00:00Z</published>
    <title>Second</title>
    <summary>Short.</summary>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries_in_order() {
        let articles = parse_feed(FEED).unwrap();
        assert_eq!(articles.len(), 2);

        let first = &articles[0];
        assert_eq!(first.id, "http://arxiv.org/abs/2405.00002v2");
        assert_eq!(first.pdf_locator, "http://arxiv.org/pdf/2405.00002v2");
        assert_eq!(first.html_locator, "http://arxiv.org/html/2405.00002v2");
        assert_eq!(first.title, "Sparse Attention at Scale");
        assert_eq!(first.abstract_text, "We propose a sparse attention mechanism.");
        assert_eq!(first.authors, vec!["Grace Hopper", "Alan Turing"]);
        assert_eq!(
            first.published_at.map(|t| t.to_rfc3339()),
            Some("2024-05-01T09:30:00+00:00".to_string())
        );

        assert_eq!(articles[1].title, "Second");
        assert!(articles[1].updated_at.is_none());
        assert!(articles[1].authors.is_empty());
    }

    #[test]
    fn feed_level_fields_are_ignored() {
        let articles = parse_feed(FEED).unwrap();
        assert!(articles.iter().all(|a| !a.title.contains("ArXiv Query")));
    }

    #[test]
    fn empty_feed() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>none</title></feed>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn broken_xml_is_parse_error() {
        let xml = "<feed><entry><id>x</id></entr></feed>";
        assert!(parse_feed(xml).is_err());
    }
}
