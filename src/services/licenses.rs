use async_trait::async_trait;
use serde::Serialize;

use super::ServiceResult;
use crate::database::Transaction;
use crate::middleware::pagination::{PaginationRequest, PaginationResult};

/// A license assets can be published under; `CreateAsset::license` holds its id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct License {
    pub id: i64,
    pub name: String,
    #[serde(rename = "url")]
    pub content_url: String,
    pub image_url: String,
}

/// The catalog a fresh store is seeded with
pub fn default_licenses() -> Vec<License> {
    [
        (
            "Creative Commons - Public Domain",
            "https://creativecommons.org/publicdomain/zero/1.0/",
            "https://i.creativecommons.org/p/zero/1.0/88x31.png",
        ),
        (
            "Creative Commons - Attribution",
            "http://creativecommons.org/licenses/by/4.0/",
            "https://i.creativecommons.org/l/by/4.0/88x31.png",
        ),
        (
            "Creative Commons - Attribution - Share Alike",
            "http://creativecommons.org/licenses/by-sa/4.0/",
            "https://i.creativecommons.org/l/by-sa/4.0/88x31.png",
        ),
        (
            "Creative Commons - Attribution - No Derivatives",
            "http://creativecommons.org/licenses/by-nd/4.0/",
            "https://i.creativecommons.org/l/by-nd/4.0/88x31.png",
        ),
        (
            "Creative Commons - Attribution - Non Commercial",
            "http://creativecommons.org/licenses/by-nc/4.0/",
            "https://i.creativecommons.org/l/by-nc/4.0/88x31.png",
        ),
        (
            "Creative Commons - Attribution - Non Commercial - Share Alike",
            "http://creativecommons.org/licenses/by-nc-sa/4.0/",
            "https://i.creativecommons.org/l/by-nc-sa/4.0/88x31.png",
        ),
        (
            "Creative Commons - Attribution - Non Commercial - No Derivatives",
            "http://creativecommons.org/licenses/by-nc-nd/4.0/",
            "https://i.creativecommons.org/l/by-nc-nd/4.0/88x31.png",
        ),
    ]
    .into_iter()
    .zip(1..)
    .map(|((name, content_url, image_url), id)| License {
        id,
        name: name.to_string(),
        content_url: content_url.to_string(),
        image_url: image_url.to_string(),
    })
    .collect()
}

#[async_trait]
pub trait LicenseService: Send + Sync {
    async fn list(
        &self,
        tx: &mut dyn Transaction,
        page: &PaginationRequest,
    ) -> ServiceResult<(Vec<License>, PaginationResult)>;

    async fn get(&self, tx: &mut dyn Transaction, id: i64) -> ServiceResult<Option<License>>;
}
