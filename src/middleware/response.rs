//! Response shapes shared by the resource handlers that do not return plain JSON.

use std::path::Path;

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;

/// Version of the resource a file or index response was served from
pub const VERSION_HEADER: HeaderName = HeaderName::from_static("x-ign-resource-version");

/// Attach the resource version header to any response
pub fn with_version(response: impl IntoResponse, version: i64) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(VERSION_HEADER, HeaderValue::from(version));
    response
}

/// Filename safe for a quoted `Content-Disposition` parameter: printable
/// ASCII only, quotes and backslashes replaced
fn disposition_filename(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    match safe.trim() {
        "" => "download".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// File download served as an attachment
pub fn attachment(contents: Vec<u8>, filename: &str, version: i64) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", disposition_filename(filename));
    let mut response = (StatusCode::OK, Body::from(contents)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    match HeaderValue::from_str(&disposition) {
        Ok(value) => {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        Err(e) => tracing::error!("Invalid Content-Disposition '{}': {}", disposition, e),
    }
    with_version(response, version)
}

pub fn text(body: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body.into(),
    )
        .into_response()
}

/// 307 to a download location
pub fn redirect(url: &str) -> Result<Response, ApiError> {
    let location = HeaderValue::from_str(url).map_err(|e| {
        tracing::error!("Invalid redirect location '{}': {}", url, e);
        ApiError::internal_server_error("Unable to build download link")
    })?;
    Ok((StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, location)]).into_response())
}

/// Stream a locally stored zip archive
pub async fn zip_file(path: &Path, uuid: &str, version: i64) -> Result<Response, ApiError> {
    let contents = tokio::fs::read(path).await.map_err(|e| {
        tracing::error!("Unable to read zip {}: {}", path.display(), e);
        ApiError::internal_server_error("Unable to read archive")
    })?;

    let mut response = attachment(contents, &format!("model-{}v{}.zip", uuid, version), version);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_headers() {
        let response = attachment(b"<sdf/>".to_vec(), "model.sdf", 3);
        let headers = response.headers();
        assert_eq!(headers["content-disposition"], "attachment; filename=\"model.sdf\"");
        assert_eq!(headers["x-ign-resource-version"], "3");
    }

    #[test]
    fn attachment_filename_is_sanitized() {
        let response = attachment(b"log".to_vec(), "résumé\n\"run\".log", 1);
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"r_sum___run_.log\""
        );

        let response = attachment(Vec::new(), "  ", 1);
        assert_eq!(response.headers()["content-disposition"], "attachment; filename=\"download\"");
    }

    #[test]
    fn redirect_is_temporary() {
        let response = redirect("https://cdn.example.com/a.zip").unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()["location"], "https://cdn.example.com/a.zip");
    }

    #[tokio::test]
    async fn local_zip_is_named_after_uuid_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.zip");
        std::fs::write(&path, b"PK").unwrap();

        let response = zip_file(&path, "abc", 2).await.unwrap();
        assert_eq!(response.headers()["content-type"], "application/zip");
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"model-abcv2.zip\""
        );
    }
}
