use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForumSort {
    Newest,
    Top,
    Active,
}

impl ForumSort {
    /// Stable lowercase name, used in query strings and cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ForumSort::Newest => "newest",
            ForumSort::Top => "top",
            ForumSort::Active => "active",
        }
    }
}

impl std::fmt::Display for ForumSort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumCategory {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "postCount", default)]
    pub post_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumPost {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub author: String,
    #[serde(rename = "categoryId")]
    pub category_id: i64,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
    #[serde(rename = "replyCount", default)]
    pub reply_count: i64,
    #[serde(default)]
    pub score: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForumCategoriesResponse {
    #[serde(default)]
    pub categories: Vec<ForumCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForumPostsResponse {
    #[serde(default)]
    pub posts: Vec<ForumPost>,
}
