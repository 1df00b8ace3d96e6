use serde::{Deserialize, Deserializer, Serialize};

/// Snapshot of the authenticated user, as returned by `GET /user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UserProfile {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: String,
}

impl UserProfile {
    /// Whether this profile belongs to the token subject `sub`.
    pub fn matches_subject(&self, sub: Option<&str>) -> bool {
        sub == Some(self.id.as_str())
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.username
        } else {
            &self.name
        }
    }
}

// The authority sends numeric ids; tokens carry them as `sub`.
fn id_from_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(i64),
        Text(String),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Number(n) => n.to_string(),
        Id::Text(s) => s,
    })
}
