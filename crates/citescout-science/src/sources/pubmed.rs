//! PubMed E-utilities client.
//!
//! Endpoints used:
//!   esearch: `{base}/esearch.fcgi` (JSON id list)
//!   efetch:  `{base}/efetch.fcgi`  (PubmedArticleSet XML)
//!
//! Pacing is the caller's job; every method issues exactly one request.

use std::time::Duration;

use async_trait::async_trait;
use citescout_core::config::PubmedConfig;
use citescout_core::{PubmedRecord, SearchTerm, TermKind};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{RecordService, SearchService};
use crate::error::{Result, ScienceError};
use crate::http::build_client;

pub struct PubMedClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    tool: String,
    email: Option<String>,
    retmax: usize,
}

impl PubMedClient {
    pub fn new(cfg: &PubmedConfig, api_key: Option<String>) -> Result<Self> {
        let client = build_client(
            &format!("{}/{}", cfg.tool, env!("CARGO_PKG_VERSION")),
            Duration::from_secs(cfg.request_timeout_secs.max(1)),
        )?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            tool: cfg.tool.clone(),
            email: cfg.email.clone(),
            retmax: cfg.search_retmax.max(1),
        })
    }

    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let cfg = PubmedConfig {
            base_url: base_url.to_string(),
            ..PubmedConfig::default()
        };
        Self::new(&cfg, api_key)
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pubmed".to_string()), ("tool", self.tool.clone())];
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    async fn get_text(&self, endpoint: &str, params: &[(&'static str, String)]) -> Result<String> {
        let url = format!("{}/{endpoint}", self.base_url);
        let resp = self.client.get(&url).query(params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScienceError::ApiError(
                url,
                format!("HTTP {}: {body}", status.as_u16()),
            ));
        }
        Ok(resp.text().await?)
    }

    /// Record ids matching `term`.
    #[instrument(skip(self, term), fields(term = %term))]
    pub async fn esearch(&self, term: &SearchTerm) -> Result<Vec<String>> {
        let mut params = self.base_params();
        // Author keys use `+` as a word separator; `+` inside a DOI is literal.
        let query = match term.kind() {
            TermKind::Author => term.as_str().replace('+', " "),
            _ => term.as_str().to_string(),
        };
        params.push(("term", query));
        params.push(("retmax", self.retmax.to_string()));
        params.push(("retmode", "json".to_string()));

        let body = self.get_text("esearch.fcgi", &params).await?;
        let ids = parse_esearch_json(&body)?;
        debug!(hits = ids.len(), "esearch returned ids");
        Ok(ids)
    }

    /// Full record for one id.
    #[instrument(skip(self))]
    pub async fn efetch(&self, pmid: &str) -> Result<Option<PubmedRecord>> {
        let mut params = self.base_params();
        params.push(("id", pmid.to_string()));
        params.push(("retmode", "xml".to_string()));

        let xml = self.get_text("efetch.fcgi", &params).await?;
        let records = parse_pubmed_xml(&xml)?;
        Ok(records.into_iter().find(|r| r.pmid == pmid))
    }
}

#[async_trait]
impl SearchService for PubMedClient {
    async fn search(&self, term: &SearchTerm) -> Result<Vec<String>> {
        self.esearch(term).await
    }
}

#[async_trait]
impl RecordService for PubMedClient {
    async fn fetch(&self, pmid: &str) -> Result<Option<PubmedRecord>> {
        self.efetch(pmid).await
    }
}

fn parse_esearch_json(body: &str) -> Result<Vec<String>> {
    let val: Value = serde_json::from_str(body)
        .map_err(|e| ScienceError::Parse(format!("esearch response: {e}")))?;
    let result = &val["esearchresult"];
    if let Some(err) = result["ERROR"].as_str().or_else(|| val["error"].as_str()) {
        return Err(ScienceError::ApiError("esearch".to_string(), err.to_string()));
    }
    Ok(result["idlist"]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default())
}

// ─── efetch XML ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct ArticleDraft {
    pmid: Option<String>,
    title: String,
    journal: String,
    volume: String,
    pages: String,
    year: Option<i32>,
    doi: Option<String>,
}

impl ArticleDraft {
    fn finish(self) -> Option<PubmedRecord> {
        let pmid = self.pmid?;
        Some(PubmedRecord {
            pmid,
            title: collapse_whitespace(&self.title),
            journal: non_empty(&self.journal),
            volume: non_empty(&self.volume),
            pages: non_empty(&self.pages),
            year: self.year,
            doi: self.doi,
        })
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(s: &str) -> Option<String> {
    let s = collapse_whitespace(s);
    (!s.is_empty()).then_some(s)
}

fn leading_year(s: &str) -> Option<i32> {
    let digits: String = s.trim().chars().take(4).collect();
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

fn is_doi_marker(e: &BytesStart<'_>, attr: &[u8]) -> bool {
    matches!(
        e.try_get_attribute(attr),
        Ok(Some(a)) if a.value.as_ref() == b"doi"
    )
}

/// Parses an efetch `PubmedArticleSet` into records. Articles without a
/// PMID are skipped.
pub fn parse_pubmed_xml(xml: &str) -> Result<Vec<PubmedRecord>> {
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<ArticleDraft> = None;
    let mut doi_element = false;
    let mut doi_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"PubmedArticle" => current = Some(ArticleDraft::default()),
                    b"ELocationID" => doi_element = is_doi_marker(&e, b"EIdType"),
                    b"ArticleId" => {
                        // Cited works carry their own ArticleIds under ReferenceList.
                        doi_element = is_doi_marker(&e, b"IdType")
                            && !path.iter().any(|p| p.as_slice() == b"ReferenceList");
                    }
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Text(t)) => {
                let Some(draft) = current.as_mut() else {
                    continue;
                };
                let text = t
                    .unescape()
                    .map_err(|e| ScienceError::Parse(format!("efetch XML: {e}")))?;
                let last = path.last().map(Vec::as_slice);
                let parent = path.len().checked_sub(2).map(|i| path[i].as_slice());

                if path.iter().any(|p| p.as_slice() == b"ArticleTitle") {
                    draft.title.push_str(&text);
                    continue;
                }
                match (parent, last) {
                    (Some(b"MedlineCitation"), Some(b"PMID")) if draft.pmid.is_none() => {
                        draft.pmid = Some(text.trim().to_string());
                    }
                    (Some(b"Journal"), Some(b"Title")) => draft.journal.push_str(&text),
                    (Some(b"JournalIssue"), Some(b"Volume")) => draft.volume.push_str(&text),
                    (Some(b"Pagination"), Some(b"MedlinePgn")) => draft.pages.push_str(&text),
                    (Some(b"PubDate"), Some(b"Year")) | (Some(b"PubDate"), Some(b"MedlineDate")) => {
                        if draft.year.is_none() {
                            draft.year = leading_year(&text);
                        }
                    }
                    (_, Some(b"ELocationID")) | (_, Some(b"ArticleId")) if doi_element => {
                        doi_text.push_str(&text);
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                match e.name().as_ref() {
                    b"ELocationID" | b"ArticleId" => {
                        if let Some(draft) = current.as_mut() {
                            let doi = doi_text.trim();
                            if doi_element && draft.doi.is_none() && !doi.is_empty() {
                                draft.doi = Some(doi.to_string());
                            }
                        }
                        doi_element = false;
                        doi_text.clear();
                    }
                    b"PubmedArticle" => {
                        if let Some(record) = current.take().and_then(ArticleDraft::finish) {
                            records.push(record);
                        }
                    }
                    _ => {}
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ScienceError::Parse(format!("efetch XML: {e}"))),
            _ => {}
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const ARTICLE_XML: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE">
      <PMID Version="1">111</PMID>
      <Article>
        <Journal>
          <JournalIssue>
            <Volume>42</Volume>
            <PubDate><Year>2004</Year><Month>Mar</Month></PubDate>
          </JournalIssue>
          <Title>Journal of Molecular Biology</Title>
        </Journal>
        <ArticleTitle>Crystal structure of <i>E. coli</i> DNA ligase.</ArticleTitle>
        <Pagination><MedlinePgn>100-9</MedlinePgn></Pagination>
        <ELocationID EIdType="pii">S0022</ELocationID>
        <ELocationID EIdType="doi">10.1016/j.jmb.2004.01.001</ELocationID>
      </Article>
      <CommentsCorrectionsList>
        <CommentsCorrections><PMID>999</PMID></CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>222</PMID>
      <Article>
        <Journal>
          <JournalIssue><PubDate><MedlineDate>1998 Nov-Dec</MedlineDate></PubDate></JournalIssue>
          <Title>Proteins</Title>
        </Journal>
        <ArticleTitle>Second &amp; last</ArticleTitle>
      </Article>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">222</ArticleId>
        <ArticleId IdType="doi">10.1002/prot.1</ArticleId>
      </ArticleIdList>
      <ReferenceList>
        <Reference>
          <ArticleIdList><ArticleId IdType="doi">10.9/cited</ArticleId></ArticleIdList>
        </Reference>
      </ReferenceList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn parse_full_article() {
        let records = parse_pubmed_xml(ARTICLE_XML).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.pmid, "111");
        assert_eq!(first.title, "Crystal structure of E. coli DNA ligase.");
        assert_eq!(first.journal.as_deref(), Some("Journal of Molecular Biology"));
        assert_eq!(first.volume.as_deref(), Some("42"));
        assert_eq!(first.pages.as_deref(), Some("100-9"));
        assert_eq!(first.year, Some(2004));
        assert_eq!(first.doi.as_deref(), Some("10.1016/j.jmb.2004.01.001"));
    }

    #[test]
    fn parse_medline_date_and_article_id_doi() {
        let records = parse_pubmed_xml(ARTICLE_XML).unwrap();
        let second = &records[1];
        assert_eq!(second.pmid, "222");
        assert_eq!(second.title, "Second & last");
        assert_eq!(second.year, Some(1998));
        assert_eq!(second.volume, None);
        assert_eq!(second.doi.as_deref(), Some("10.1002/prot.1"));
    }

    #[test]
    fn cited_work_doi_is_not_taken() {
        let xml = r#"<PubmedArticleSet><PubmedArticle>
            <MedlineCitation><PMID>333</PMID><Article><ArticleTitle>T</ArticleTitle></Article></MedlineCitation>
            <PubmedData><ReferenceList><Reference><ArticleIdList>
                <ArticleId IdType="doi">10.9/cited</ArticleId>
            </ArticleIdList></Reference></ReferenceList></PubmedData>
        </PubmedArticle></PubmedArticleSet>"#;
        let records = parse_pubmed_xml(xml).unwrap();
        assert_eq!(records[0].pmid, "333");
        assert_eq!(records[0].doi, None);
    }

    #[test]
    fn parse_empty_set() {
        let records = parse_pubmed_xml("<PubmedArticleSet></PubmedArticleSet>").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn esearch_json_error_is_reported() {
        let body = r#"{"esearchresult": {"ERROR": "Invalid query"}}"#;
        assert!(matches!(parse_esearch_json(body), Err(ScienceError::ApiError(_, _))));
    }

    #[tokio::test]
    async fn test_esearch_returns_ids() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("db".into(), "pubmed".into()),
                Matcher::UrlEncoded("term".into(), "Smith J[au]".into()),
                Matcher::UrlEncoded("retmode".into(), "json".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"esearchresult": {"count": "2", "idlist": ["222", "333"]}}"#)
            .create_async()
            .await;

        let client = PubMedClient::with_base_url(&server.url(), None).unwrap();
        let ids = client.search(&SearchTerm::from("Smith+J[au]")).await.unwrap();
        assert_eq!(ids, vec!["222", "333"]);
    }

    #[tokio::test]
    async fn test_esearch_sends_doi_term_verbatim() {
        let mut server = Server::new_async().await;
        let verbatim = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::UrlEncoded("term".into(), "10.1000/a+b[aid]".into()))
            .with_status(200)
            .with_body(r#"{"esearchresult": {"idlist": ["1"]}}"#)
            .create_async()
            .await;
        let spaced = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::UrlEncoded("term".into(), "10.1000/a b[aid]".into()))
            .with_status(200)
            .with_body(r#"{"esearchresult": {"idlist": ["2"]}}"#)
            .expect(0)
            .create_async()
            .await;

        let client = PubMedClient::with_base_url(&server.url(), None).unwrap();
        let ids = client.search(&SearchTerm::article_id("10.1000/a+b")).await.unwrap();

        assert_eq!(ids, vec!["1"]);
        verbatim.assert_async().await;
        spaced.assert_async().await;
    }

    #[tokio::test]
    async fn test_esearch_http_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body("too many requests")
            .create_async()
            .await;

        let client = PubMedClient::with_base_url(&server.url(), None).unwrap();
        let err = client.search(&SearchTerm::from("x[au]")).await.unwrap_err();
        assert!(matches!(err, ScienceError::ApiError(_, _)));
    }

    #[tokio::test]
    async fn test_efetch_single_record() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("id".into(), "111".into()),
                Matcher::UrlEncoded("api_key".into(), "secret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "text/xml")
            .with_body(ARTICLE_XML)
            .create_async()
            .await;

        let client = PubMedClient::with_base_url(&server.url(), Some("secret".into())).unwrap();
        let record = client.fetch("111").await.unwrap().unwrap();
        assert_eq!(record.pmid, "111");
        assert_eq!(record.year, Some(2004));
    }

    #[tokio::test]
    async fn test_efetch_unknown_id_is_none() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<PubmedArticleSet></PubmedArticleSet>")
            .create_async()
            .await;

        let client = PubMedClient::with_base_url(&server.url(), None).unwrap();
        assert_eq!(client.fetch("404").await.unwrap(), None);
    }
}
