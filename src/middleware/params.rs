//! Path and query parameter extraction shared by the handler wrappers.

use std::collections::HashMap;

use thiserror::Error;
use url::form_urlencoded;

use crate::database::DatabaseError;
use crate::error::ApiError;
use crate::services::users::UserStore;
use crate::types::SortOrder;

/// Matched route parameters, keyed by the `:name` in the route pattern
pub type PathParams = HashMap<String, String>;

/// Owner parameter key used by every `/:username/...` route
pub const OWNER_PARAM: &str = "username";

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("{0} not in request")]
    NotInRequest(String),

    #[error("Owner [{0}] not found")]
    UnknownOwner(String),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<ParamError> for ApiError {
    fn from(err: ParamError) -> Self {
        match err {
            ParamError::NotInRequest(key) => ApiError::bad_request(format!("{} not in request", key)),
            ParamError::UnknownOwner(name) => ApiError::not_found_with("Owner not found", name),
            ParamError::Store(e) => e.into(),
        }
    }
}

/// Resolve the owner named by `key` to its canonical spelling. Deleted
/// owners still resolve so their resources stay reachable.
pub async fn read_owner(params: &PathParams, key: &str, users: &dyn UserStore) -> Result<String, ParamError> {
    let name = params
        .get(key)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ParamError::NotInRequest(key.to_string()))?;

    users
        .owner_by_name(name, true)
        .await?
        .ok_or_else(|| ParamError::UnknownOwner(name.clone()))
}

/// A mandatory resource name
pub fn read_name(params: &PathParams, key: &str) -> Result<String, ApiError> {
    params
        .get(key)
        .filter(|n| !n.is_empty())
        .cloned()
        .ok_or_else(|| ApiError::NameWrongFormat(format!("Missing or invalid {} name", key)))
}

/// A mandatory numeric identifier
pub fn read_id(params: &PathParams, key: &str) -> Result<i64, ApiError> {
    params
        .get(key)
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| ApiError::IdNotInRequest(format!("Missing or invalid {}", key)))
}

/// Owner, order and free-text search of a list request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    pub owner: Option<String>,
    pub order: Option<SortOrder>,
    pub search: String,
}

impl ListParams {
    /// An absent owner lists across all owners; an unknown one is an error
    pub async fn read(params: &PathParams, query: Option<&str>, users: &dyn UserStore) -> Result<Self, ApiError> {
        let owner = match read_owner(params, OWNER_PARAM, users).await {
            Ok(owner) => Some(owner),
            Err(ParamError::NotInRequest(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let order = query_value(query, "order")
            .filter(|o| !o.is_empty())
            .map(|o| {
                o.parse::<SortOrder>()
                    .map_err(|e| ApiError::invalid_form("Invalid order", vec![e]))
            })
            .transpose()?;

        Ok(Self {
            owner,
            order,
            search: query_value(query, "q").unwrap_or_default(),
        })
    }
}

/// First value of `key` in a raw query string
pub fn query_value(query: Option<&str>, key: &str) -> Option<String> {
    form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Every value of a repeated query key
pub fn query_values(query: Option<&str>, key: &str) -> Vec<String> {
    form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .collect()
}

/// `?key=true` or `?key=1`
pub fn query_bool(query: Option<&str>, key: &str) -> bool {
    matches!(query_value(query, key).as_deref(), Some("true") | Some("1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::services::MemoryBackend;

    fn params(pairs: &[(&str, &str)]) -> PathParams {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn list_params_without_owner() {
        let config = AppConfig::development();
        let backend = MemoryBackend::new(&config.storage, &config.competition);

        let list = ListParams::read(&PathParams::new(), Some("q=robot&order=asc&page=2"), &backend)
            .await
            .unwrap();
        assert_eq!(list.owner, None);
        assert_eq!(list.order, Some(SortOrder::Asc));
        assert_eq!(list.search, "robot");

        let err = ListParams::read(&PathParams::new(), Some("order=sideways"), &backend)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORM_INVALID_VALUE");
    }

    #[tokio::test]
    async fn owner_resolution() {
        let config = AppConfig::development();
        let backend = MemoryBackend::new(&config.storage, &config.competition);
        backend.add_user("Alice", "auth0|alice").await;

        let owner = read_owner(&params(&[("username", "alice")]), OWNER_PARAM, &backend)
            .await
            .unwrap();
        assert_eq!(owner, "Alice");

        let err = read_owner(&params(&[("username", "bob")]), OWNER_PARAM, &backend)
            .await
            .unwrap_err();
        assert!(matches!(err, ParamError::UnknownOwner(_)));

        let err = ListParams::read(&params(&[("username", "bob")]), None, &backend)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn names_and_ids() {
        let p = params(&[("model", "rover"), ("id", "12"), ("bad", "x")]);
        assert_eq!(read_name(&p, "model").unwrap(), "rover");
        assert_eq!(read_name(&p, "world").unwrap_err().error_code(), "NAME_WRONG_FORMAT");
        assert_eq!(read_id(&p, "id").unwrap(), 12);
        assert_eq!(read_id(&p, "bad").unwrap_err().error_code(), "ID_NOT_IN_REQUEST");
    }

    #[test]
    fn query_helpers() {
        let q = Some("category=a&category=b&link=true&extend=0");
        assert_eq!(query_values(q, "category"), vec!["a", "b"]);
        assert!(query_bool(q, "link"));
        assert!(!query_bool(q, "extend"));
        assert_eq!(query_value(q, "missing"), None);
    }
}
