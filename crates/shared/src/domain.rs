use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ClientId);
id_newtype!(CvId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub hh_connected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedCv {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub education: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects: Option<String>,
    #[serde(default)]
    pub full_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomizedCv {
    #[serde(flatten)]
    pub cv: ParsedCv,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobItem {
    pub id: String,
    #[serde(
        rename = "hh_vacancy_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub vacancy_id: Option<String>,
    pub title: String,
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(rename = "has_test", default)]
    pub has_test: bool,
    #[serde(default)]
    pub full_description_loaded: bool,
}

impl JobItem {
    /// Builds a job from the loosely shaped payloads the backend and the
    /// vacancy source emit. Each field takes the first non-blank alias,
    /// then falls back to `fallback`.
    pub fn from_raw(raw: &Value, fallback: Option<&JobItem>) -> Self {
        let fb = fallback.cloned().unwrap_or_default();

        let preview = pick(&[
            field(raw, &["descriptionPreview"]),
            field(raw, &["description_preview"]),
            field(raw, &["snippet", "requirement"]),
            field(raw, &["snippet", "responsibility"]),
            fb.description_preview.clone(),
            non_blank(&fb.description),
        ]);

        let full_from_raw = pick(&[
            field(raw, &["fullDescription"]),
            field(raw, &["full_description"]),
            field(raw, &["description_full"]),
        ]);
        let incoming_full_flag = flag(raw, "fullDescriptionLoaded")
            || flag(raw, "full_description_loaded")
            || full_from_raw.is_some();

        let description_candidate = pick(&[
            field(raw, &["description"]),
            non_blank(&fb.description),
            preview.clone(),
        ]);

        let full_description = pick(&[
            full_from_raw,
            if incoming_full_flag {
                field(raw, &["description"])
            } else {
                None
            },
            fb.full_description.clone(),
        ]);

        let description = full_description
            .clone()
            .or_else(|| description_candidate.clone())
            .unwrap_or_default();

        let skills = raw
            .get("skills")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(as_trimmed_string).collect())
            .unwrap_or_else(|| fb.skills.clone());

        let has_test = raw
            .get("has_test")
            .or_else(|| raw.get("test_required"))
            .and_then(Value::as_bool)
            .unwrap_or(fb.has_test);

        let loaded_flag = raw
            .get("fullDescriptionLoaded")
            .or_else(|| raw.get("full_description_loaded"))
            .and_then(Value::as_bool)
            .unwrap_or(incoming_full_flag || fb.full_description_loaded);

        Self {
            id: pick(&[field(raw, &["id"]), non_blank(&fb.id)]).unwrap_or_default(),
            vacancy_id: pick(&[
                field(raw, &["hh_vacancy_id"]),
                field(raw, &["hhVacancyId"]),
                fb.vacancy_id.clone(),
            ]),
            title: pick(&[
                field(raw, &["title"]),
                field(raw, &["name"]),
                non_blank(&fb.title),
            ])
            .unwrap_or_default(),
            company: pick(&[
                field(raw, &["company"]),
                field(raw, &["company_name"]),
                field(raw, &["employer", "name"]),
                non_blank(&fb.company),
            ])
            .unwrap_or_default(),
            salary: pick(&[field(raw, &["salary"]), fb.salary.clone()]),
            area: pick(&[
                field(raw, &["area"]),
                field(raw, &["area_name"]),
                field(raw, &["area", "name"]),
                fb.area.clone(),
            ]),
            description_preview: preview
                .or(description_candidate)
                .or_else(|| non_blank(&description)),
            full_description_loaded: loaded_flag || full_description.is_some(),
            full_description,
            description,
            url: pick(&[
                field(raw, &["url"]),
                field(raw, &["alternate_url"]),
                fb.url.clone(),
            ]),
            skills,
            has_test,
        }
    }
}

fn field(raw: &Value, path: &[&str]) -> Option<String> {
    let mut current = raw;
    for key in path {
        current = current.get(key)?;
    }
    as_trimmed_string(current)
}

fn as_trimmed_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_blank(value: &str) -> Option<String> {
    (!value.trim().is_empty()).then(|| value.to_string())
}

fn pick(candidates: &[Option<String>]) -> Option<String> {
    candidates.iter().flatten().next().cloned()
}

fn flag(raw: &Value, key: &str) -> bool {
    raw.get(key).and_then(Value::as_bool).unwrap_or(false)
}
