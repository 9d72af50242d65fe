use serde::{Deserialize, Serialize};

/// A shared code snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: i64,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Snippet {
    /// First `max_lines` lines of the body, for card-style previews.
    pub fn preview(&self, max_lines: usize) -> String {
        let mut lines = self.body.lines();
        let head: Vec<&str> = lines.by_ref().take(max_lines).collect();
        let mut preview = head.join("\n");
        if lines.next().is_some() {
            preview.push_str("\n...");
        }
        preview
    }
}
