//! Typed wrappers for the backend endpoints.

use shared::{
    error::ApiError,
    protocol::{
        AuthStatusResponse, CustomizeCvRequest, CustomizeCvResponse, JobSearchRequest,
        JobSearchResponse, ListCvsResponse, RawJobSearchResponse, SubmitApplicationRequest,
        SubmitApplicationResponse, UploadCvResponse,
    },
};
use tracing::{info, warn};

use crate::{
    http::{HttpClient, MultipartForm},
    session::SessionStore,
};

pub const UPLOAD_CV_PATH: &str = "/api/cv/upload";
pub const CUSTOMIZE_CV_PATH: &str = "/api/cv/customize";
pub const LIST_CVS_PATH: &str = "/api/cv";
pub const SEARCH_JOBS_PATH: &str = "/api/jobs/search";
pub const SUBMIT_APPLICATION_PATH: &str = "/api/application";
pub const AUTH_STATUS_PATH: &str = "/api/auth/status";

pub async fn upload_cv(
    http: &HttpClient,
    file_name: &str,
    content_type: Option<&str>,
    data: Vec<u8>,
) -> Result<UploadCvResponse, ApiError> {
    let form = MultipartForm::new().file("file", file_name, content_type.map(str::to_string), data);
    http.post_multipart(UPLOAD_CV_PATH, form).await
}

pub async fn customize_cv(
    http: &HttpClient,
    request: &CustomizeCvRequest,
) -> Result<CustomizeCvResponse, ApiError> {
    http.post_json(CUSTOMIZE_CV_PATH, request).await
}

pub async fn list_cvs(http: &HttpClient) -> Result<ListCvsResponse, ApiError> {
    http.get_json(LIST_CVS_PATH).await
}

/// Jobs come back normalized through `JobItem::from_raw`.
pub async fn search_jobs(
    http: &HttpClient,
    request: &JobSearchRequest,
) -> Result<JobSearchResponse, ApiError> {
    let raw: RawJobSearchResponse = http.post_json(SEARCH_JOBS_PATH, request).await?;
    Ok(raw.into())
}

pub async fn submit_application(
    http: &HttpClient,
    request: &SubmitApplicationRequest,
) -> Result<SubmitApplicationResponse, ApiError> {
    http.post_json(SUBMIT_APPLICATION_PATH, request).await
}

pub async fn auth_status(http: &HttpClient) -> Result<AuthStatusResponse, ApiError> {
    http.get_json(AUTH_STATUS_PATH).await
}

/// Syncs `store` with the backend session. Returns whether a user is signed in.
///
/// Auth failures clear the store and yield `Ok(false)`; any other failure
/// clears it too and is returned.
pub async fn refresh_session(http: &HttpClient, store: &SessionStore) -> Result<bool, ApiError> {
    match auth_status(http).await {
        Ok(AuthStatusResponse {
            user: Some(user),
            expires_at,
        }) => {
            store.set_authenticated(user, expires_at);
            Ok(true)
        }
        Ok(_) => {
            store.clear();
            Ok(false)
        }
        Err(err) if err.is_auth_error() => {
            info!(code = err.code(), "session: not signed in");
            store.clear();
            Ok(false)
        }
        Err(err) => {
            warn!(error = %err, "session: status check failed");
            store.clear();
            Err(err)
        }
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
