//! Pronunciation lookup against the Cambridge English dictionary.
//!
//! Not part of the engine pipeline: a single GET, no retry, no cancellation. Any
//! failure simply yields `None`.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::http::{DynHttpTransport, HttpRequest};

const DEFAULT_BASE_URL: &str = "https://dictionary.cambridge.org/dictionary/english/";

static HEADWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<span class="hw dhw">([^<]+)</span>"#).expect("headword pattern")
});
static PRONUNCIATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<span class="pron dpron[^"]*">/(.+?)/</span>"#)
        .expect("pronunciation pattern")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));

/// IPA transcriptions for one headword.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub uk: String,
    pub us: String,
    /// Headword as printed by the dictionary, which may differ from the query.
    pub dic: String,
}

/// Cambridge dictionary client.
pub struct CambridgeDictionary {
    transport: DynHttpTransport,
    base_url: String,
}

impl CambridgeDictionary {
    pub fn new(transport: DynHttpTransport) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// 自定义词典地址 便于测试
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Looks up `word`, returning `None` for an empty word, a failed request, or a page
    /// without a UK pronunciation.
    pub async fn lookup(&self, word: &str) -> Option<DictionaryEntry> {
        let word = word.trim();
        if word.is_empty() {
            return None;
        }
        match self.fetch(word).await {
            Ok(page) => parse_entry(&page).filter(|entry| !entry.uk.is_empty()),
            Err(err) => {
                debug!(word, error = %err, "dictionary lookup failed");
                None
            }
        }
    }

    async fn fetch(&self, word: &str) -> Result<String, EngineError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| EngineError::configuration("dictionary_url", err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| EngineError::configuration("dictionary_url", "cannot be a base"))?
            .pop_if_empty()
            .push(word);

        let response = self.transport.send(HttpRequest::get(url.as_str())).await?;
        if !response.is_success() {
            return Err(EngineError::transport(format!(
                "dictionary returned status {}",
                response.status
            )));
        }
        response.into_string()
    }
}

/// Extracts the last headword and the first two pronunciations (US, then UK).
pub(crate) fn parse_entry(page: &str) -> Option<DictionaryEntry> {
    let dic = HEADWORD
        .captures_iter(page)
        .last()
        .map(|caps| caps[1].to_string())
        .unwrap_or_default();

    let mut prons = PRONUNCIATION
        .captures_iter(page)
        .map(|caps| TAG.replace_all(&caps[1], "").into_owned());
    let us = prons.next()?;
    let uk = prons.next().unwrap_or_default();

    Some(DictionaryEntry { uk, us, dic })
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::http::reqwest::default_dyn_transport;

    const PAGE: &str = r#"
        <div class="pos-header dpos-h">
          <span class="hw dhw">tomato</span>
          <span class="us dpron-i"><span class="pron dpron">/<span class="ipa dipa">təˈmeɪ.t̬oʊ</span>/</span></span>
          <span class="uk dpron-i"><span class="pron dpron">/<span class="ipa dipa">təˈmɑː.təʊ</span>/</span></span>
        </div>
    "#;

    #[test]
    fn parses_us_then_uk_and_strips_tags() {
        let entry = parse_entry(PAGE).expect("entry");
        assert_eq!(entry.us, "təˈmeɪ.t̬oʊ");
        assert_eq!(entry.uk, "təˈmɑː.təʊ");
        assert_eq!(entry.dic, "tomato");
    }

    #[test]
    fn page_without_pronunciation_has_no_entry() {
        assert_eq!(parse_entry(r#"<span class="hw dhw">xyz</span>"#), None);
    }

    #[tokio::test]
    async fn empty_word_short_circuits() {
        let dictionary = CambridgeDictionary::new(default_dyn_transport().unwrap())
            .with_base_url("http://127.0.0.1:9/");
        assert_eq!(dictionary.lookup("  ").await, None);
    }

    #[tokio::test]
    async fn lookup_fetches_word_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dictionary/english/tomato"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let dictionary = CambridgeDictionary::new(default_dyn_transport().unwrap())
            .with_base_url(format!("{}/dictionary/english/", server.uri()));
        let entry = dictionary.lookup("tomato").await.expect("entry");
        assert_eq!(entry.dic, "tomato");
        assert_eq!(entry.uk, "təˈmɑː.təʊ");
    }

    #[tokio::test]
    async fn missing_uk_pronunciation_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<span class="pron dpron">/<span class="ipa">ʌs</span>/</span>"#,
            ))
            .mount(&server)
            .await;

        let dictionary = CambridgeDictionary::new(default_dyn_transport().unwrap())
            .with_base_url(format!("{}/", server.uri()));
        assert_eq!(dictionary.lookup("us").await, None);
    }
}
