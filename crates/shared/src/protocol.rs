use serde::{Deserialize, Deserializer, Serialize};

/// One page of a listing, in the shape the list clients consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub current_page: u64,
    pub next_page_url: Option<String>,
    #[serde(default)]
    pub prev_page_url: Option<String>,
    #[serde(default)]
    pub per_page: u64,
    #[serde(default)]
    pub last_page: u64,
    #[serde(default)]
    pub from: Option<u64>,
    #[serde(default)]
    pub to: Option<u64>,
    #[serde(default)]
    pub path: String,
}

/// Body of `POST /users` and `PUT /users/:id`.
///
/// Every field is optional on the wire so that missing values surface as
/// field errors instead of a deserialization rejection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<serde_json::Value>,
}

impl UserPayload {
    pub fn new(name: impl Into<String>, email: impl Into<String>, is_active: bool) -> Self {
        Self {
            name: Some(serde_json::Value::String(name.into())),
            email: Some(serde_json::Value::String(email.into())),
            is_active: Some(serde_json::Value::Bool(is_active)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserListQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<String>,
    /// Anything that is not a number reads as no page at all.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_page"
    )]
    pub page: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPage {
    Number(u64),
    Text(String),
}

fn lenient_page<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawPage>::deserialize(deserializer)? {
        Some(RawPage::Number(page)) => Some(page),
        Some(RawPage::Text(text)) => text.trim().parse().ok(),
        None => None,
    })
}

/// A page rendered as data: the component to mount and its props.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageView {
    pub component: String,
    pub props: serde_json::Value,
    pub url: String,
}

impl PageView {
    pub fn new(component: impl Into<String>, props: serde_json::Value, url: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            props,
            url: url.into(),
        }
    }
}
