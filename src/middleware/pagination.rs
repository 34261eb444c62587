//! Page requests parsed from `?page=&per_page=` and the response headers
//! (`X-Total-Count`, `Link`) written from a service's pagination result.

use axum::http::{header::HeaderName, HeaderMap, HeaderValue, Uri};
use serde::Serialize;
use url::form_urlencoded;

use crate::config::PaginationConfig;
use crate::error::ApiError;

pub const TOTAL_COUNT_HEADER: HeaderName = HeaderName::from_static("x-total-count");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PaginationRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    /// Build a page request from a raw query string.
    ///
    /// `page` and `per_page` must be positive integers; `per_page` above the
    /// configured maximum is clamped, and never drops below 1.
    pub fn from_query(query: Option<&str>, config: &PaginationConfig) -> Result<Self, ApiError> {
        let mut page = 1;
        let mut per_page = config.default_per_page;

        for (key, value) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
            match key.as_ref() {
                "page" => page = parse_positive("page", &value)?,
                "per_page" => per_page = parse_positive("per_page", &value)?,
                _ => {}
            }
        }

        Ok(Self {
            page,
            per_page: per_page.min(config.max_per_page).max(1),
        })
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.per_page as usize
    }
}

fn parse_positive(name: &str, value: &str) -> Result<u32, ApiError> {
    match value.parse::<u32>() {
        Ok(v) if v >= 1 => Ok(v),
        _ => Err(ApiError::InvalidPagination(format!(
            "Invalid pagination request: {}={}",
            name, value
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationResult {
    pub page: u32,
    pub per_page: u32,
    pub query_count: u64,
    pub page_found: bool,
}

impl PaginationResult {
    pub fn new(request: &PaginationRequest, query_count: u64) -> Self {
        let page_found = (request.offset() as u64) < query_count || (request.page == 1);
        Self {
            page: request.page,
            per_page: request.per_page,
            query_count,
            page_found,
        }
    }

    pub fn last_page(&self) -> u64 {
        if self.query_count == 0 {
            return 1;
        }
        self.query_count.div_ceil(u64::from(self.per_page.max(1)))
    }

    /// RFC 5988 `Link` value for this page, or `None` when everything fits in one page
    pub fn link_header(&self, path: &str, query: Option<&str>) -> Option<String> {
        let last = self.last_page();
        if last <= 1 {
            return None;
        }

        let page = self.page as u64;
        let mut links = Vec::new();
        if page < last {
            links.push((page + 1, "next"));
            links.push((last, "last"));
        }
        if page > 1 {
            links.push((1, "first"));
            links.push((page - 1, "prev"));
        }

        let rendered: Vec<String> = links
            .into_iter()
            .map(|(target, rel)| {
                format!(
                    "<{}?{}>; rel=\"{}\"",
                    path,
                    page_query(query, target, self.per_page),
                    rel
                )
            })
            .collect();
        Some(rendered.join(", "))
    }

    /// Writes `X-Total-Count` and `Link` for this result
    pub fn write_headers(&self, uri: &Uri, headers: &mut HeaderMap) -> Result<(), ApiError> {
        headers.insert(TOTAL_COUNT_HEADER, HeaderValue::from(self.query_count));

        if let Some(link) = self.link_header(uri.path(), uri.query()) {
            let value = HeaderValue::from_str(&link).map_err(|e| {
                tracing::error!("Unable to encode Link header: {}", e);
                ApiError::internal_server_error("Unable to write pagination headers")
            })?;
            headers.insert(axum::http::header::LINK, value);
        }
        Ok(())
    }
}

/// Original query with `page`/`per_page` replaced, keys sorted
fn page_query(query: Option<&str>, page: u64, per_page: u32) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .filter(|(k, _)| k != "page" && k != "per_page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.push(("page".to_string(), page.to_string()));
    pairs.push(("per_page".to_string(), per_page.to_string()));
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Slice an in-memory result set according to a page request
pub fn paginate<T>(items: Vec<T>, request: &PaginationRequest) -> (Vec<T>, PaginationResult) {
    let result = PaginationResult::new(request, items.len() as u64);
    let page = items
        .into_iter()
        .skip(request.offset())
        .take(request.per_page as usize)
        .collect();
    (page, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PaginationConfig {
        PaginationConfig {
            default_per_page: 20,
            max_per_page: 100,
        }
    }

    #[test]
    fn defaults_when_absent() {
        let p = PaginationRequest::from_query(None, &config()).unwrap();
        assert_eq!(p, PaginationRequest::new(1, 20));
    }

    #[test]
    fn parses_and_clamps() {
        let p = PaginationRequest::from_query(Some("page=2&per_page=500&q=robot"), &config()).unwrap();
        assert_eq!(p, PaginationRequest::new(2, 100));
    }

    #[test]
    fn zero_sized_config_still_pages() {
        let config = PaginationConfig {
            default_per_page: 0,
            max_per_page: 0,
        };
        let p = PaginationRequest::from_query(None, &config).unwrap();
        assert_eq!(p.per_page, 1);
        let (items, page) = paginate(vec![1, 2, 3], &p);
        assert_eq!(items, vec![1]);
        assert_eq!(page.last_page(), 3);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!(matches!(
            PaginationRequest::from_query(Some("page=0"), &config()),
            Err(ApiError::InvalidPagination(_))
        ));
        assert!(matches!(
            PaginationRequest::from_query(Some("per_page=abc"), &config()),
            Err(ApiError::InvalidPagination(_))
        ));
    }

    #[test]
    fn link_header_for_first_page() {
        let result = PaginationResult::new(&PaginationRequest::new(1, 1), 3);
        assert_eq!(
            result.link_header("/models", Some("order=asc&per_page=1&page=1")).unwrap(),
            "</models?order=asc&page=2&per_page=1>; rel=\"next\", </models?order=asc&page=3&per_page=1>; rel=\"last\""
        );
    }

    #[test]
    fn link_header_for_middle_and_last_page() {
        let middle = PaginationResult::new(&PaginationRequest::new(2, 1), 3);
        assert_eq!(
            middle.link_header("/worlds", Some("order=asc&per_page=1&page=2")).unwrap(),
            "</worlds?order=asc&page=3&per_page=1>; rel=\"next\", \
             </worlds?order=asc&page=3&per_page=1>; rel=\"last\", \
             </worlds?order=asc&page=1&per_page=1>; rel=\"first\", \
             </worlds?order=asc&page=1&per_page=1>; rel=\"prev\""
        );

        let last = PaginationResult::new(&PaginationRequest::new(3, 1), 3);
        assert_eq!(
            last.link_header("/worlds", Some("order=desc&per_page=1&page=3")).unwrap(),
            "</worlds?order=desc&page=1&per_page=1>; rel=\"first\", </worlds?order=desc&page=2&per_page=1>; rel=\"prev\""
        );
    }

    #[test]
    fn single_page_has_no_link() {
        let result = PaginationResult::new(&PaginationRequest::new(1, 20), 3);
        assert!(result.link_header("/models", None).is_none());
    }

    #[test]
    fn page_past_the_end_is_not_found() {
        let (items, result) = paginate(vec![1, 2, 3], &PaginationRequest::new(7, 1));
        assert!(items.is_empty());
        assert!(!result.page_found);

        let (items, result) = paginate(Vec::<u8>::new(), &PaginationRequest::new(1, 20));
        assert!(items.is_empty());
        assert!(result.page_found);
    }
}
