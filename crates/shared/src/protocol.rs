use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{CustomizedCv, CvId, JobItem, ParsedCv, User},
    error::ApiError,
};

pub const WILDCARD_TAG: &str = "*";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadCvResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv: Option<ParsedCv>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CvId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizeCvRequest {
    pub cv: ParsedCv,
    pub job_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizeCvResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, rename = "customizedCV", skip_serializing_if = "Option::is_none")]
    pub customized_cv: Option<CustomizedCv>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_letter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_skills: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCvsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSearchRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// Search results as they arrive on the wire; jobs are still raw.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJobSearchResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub jobs: Vec<Value>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSearchResponse {
    pub success: bool,
    pub jobs: Vec<JobItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<RawJobSearchResponse> for JobSearchResponse {
    fn from(raw: RawJobSearchResponse) -> Self {
        Self {
            success: raw.success,
            jobs: raw
                .jobs
                .iter()
                .map(|job| JobItem::from_raw(job, None))
                .collect(),
            total: raw.total,
            error: raw.error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitApplicationRequest {
    pub job_id: String,
    pub cv_id: CvId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_cv_id: Option<CvId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_letter: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitApplicationResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatusResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Seconds until the session cookie expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// `{success, data?, error?}` view of a call, for callers that only render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiOutcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> From<Result<T, ApiError>> for ApiOutcome<T> {
    fn from(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(err) => Self {
                success: false,
                data: None,
                error: Some(err.message().to_string()),
            },
        }
    }
}

/// A socket frame: a `type` tag plus arbitrary sibling fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl WsMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn register(client_id: &str) -> Self {
        Self::new("register").with_field("clientId", Value::String(client_id.to_string()))
    }

    pub fn subscribe(filters: Value) -> Self {
        Self::new("subscribe").with_field("filters", filters)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn data(&self) -> Option<&Value> {
        self.fields.get("data")
    }

    /// Decodes the `data` payload, treating a missing payload as `{}`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self.data() {
            Some(data) if !data.is_null() => serde_json::from_value(data.clone()),
            _ => serde_json::from_value(Value::Object(Map::new())),
        }
    }

    pub fn to_event(&self) -> Result<ServerEvent, serde_json::Error> {
        let mut object = self.fields.clone();
        object.insert("type".to_string(), Value::String(self.kind.clone()));
        serde_json::from_value(Value::Object(object))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvCompleteData {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub failed: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSubmittedData {
    #[serde(default)]
    pub job_id: Option<Value>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationResponseData {
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub response_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitData {
    #[serde(default)]
    pub tokens: Option<f64>,
    #[serde(default)]
    pub capacity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQueuedData {
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
}

/// Typed view of the inbound tags the client understands.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        #[serde(default, rename = "clientId")]
        client_id: Option<String>,
    },
    Subscribed {
        #[serde(default)]
        filters: Option<Value>,
    },
    NewJobs {
        #[serde(default)]
        jobs: Vec<Value>,
    },
    Echo {
        #[serde(default)]
        data: Option<Value>,
    },
    CvComplete {
        #[serde(default)]
        data: CvCompleteData,
    },
    CvError {
        #[serde(default)]
        data: ErrorData,
    },
    CustomizationProgress {
        #[serde(default)]
        data: ProgressData,
    },
    CustomizationError {
        #[serde(default)]
        data: ErrorData,
    },
    ApplicationSubmitted {
        #[serde(default)]
        data: ApplicationSubmittedData,
    },
    ApplicationProgress {
        #[serde(default)]
        data: ProgressData,
    },
    ApplicationResponse {
        #[serde(default)]
        data: ApplicationResponseData,
    },
    RateLimitUpdate {
        #[serde(default)]
        data: RateLimitData,
    },
    RateLimitReached,
    Error {
        #[serde(default)]
        data: ErrorData,
    },
    JobQueued {
        #[serde(default)]
        data: JobQueuedData,
    },
    #[serde(other)]
    Unrecognized,
}
