use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{require_text, FieldValue, Model, ModelError, User, Write};

static NON_SLUG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-z0-9]+").unwrap_or_else(|e| panic!("slug regex must be valid: {e}"))
});

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub slug: String,
    pub title: String,
    pub content: String,
    #[serde(rename = "userID")]
    pub user_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostInput {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "userID", alias = "userId")]
    pub user_id: Option<i64>,
    /// `true` stamps `deleted_at`, taking the post off the public pages;
    /// `false` clears it.
    pub hidden: Option<bool>,
}

/// Lowercase ASCII words joined by `-`.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    NON_SLUG_RE
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

fn normalize_slug(raw: &str) -> Result<String, ModelError> {
    let slug = slugify(raw);
    if slug.is_empty() {
        return Err(ModelError::InvalidField {
            field: "slug",
            reason: String::from("must contain at least one letter or digit"),
        });
    }
    Ok(slug)
}

impl Model for Post {
    type Input = PostInput;

    const NAME: &'static str = "Post";
    const ROUTE: &'static str = "post";
    const TABLE: &'static str = "posts";
    const COLUMNS: &'static [&'static str] = &[
        "created_at",
        "updated_at",
        "deleted_at",
        "slug",
        "title",
        "content",
        "user_id",
    ];
    const PUBLIC_READ: bool = true;

    fn id(&self) -> i64 {
        self.id
    }

    fn values(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::Timestamp(self.created_at),
            FieldValue::Timestamp(self.updated_at),
            FieldValue::OptionalTimestamp(self.deleted_at),
            FieldValue::Text(self.slug.clone()),
            FieldValue::Text(self.title.clone()),
            FieldValue::Text(self.content.clone()),
            FieldValue::Integer(self.user_id),
        ]
    }

    fn from_input(input: PostInput) -> Result<Self, ModelError> {
        let title = require_text("title", input.title)?;
        let slug = match input.slug.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => normalize_slug(raw)?,
            _ => normalize_slug(&title)?,
        };
        let now = Utc::now();

        Ok(Self {
            id: 0,
            created_at: now,
            updated_at: now,
            deleted_at: input.hidden.filter(|hidden| *hidden).map(|_| now),
            slug,
            title,
            content: input.content.unwrap_or_default(),
            user_id: input.user_id.unwrap_or(0),
        })
    }

    fn apply(&mut self, input: PostInput) -> Result<(), ModelError> {
        if let Some(title) = input.title {
            self.title = require_text("title", Some(title))?;
        }
        if let Some(slug) = input.slug {
            self.slug = normalize_slug(&slug)?;
        }
        if let Some(content) = input.content {
            self.content = content;
        }
        if let Some(user_id) = input.user_id {
            self.user_id = user_id;
        }
        match input.hidden {
            Some(true) if self.deleted_at.is_none() => self.deleted_at = Some(Utc::now()),
            Some(false) => self.deleted_at = None,
            _ => {}
        }
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn set_owner(&mut self, user_id: i64) {
        if self.user_id == 0 {
            self.user_id = user_id;
        }
    }

    /// Authors manage their own posts; administrators manage all of them.
    fn authorize(actor: &User, write: Write<'_, Self, PostInput>) -> Result<(), ModelError> {
        if actor.is_admin() {
            return Ok(());
        }
        let (author, input) = match write {
            Write::Create(input) => (actor.id, Some(input)),
            Write::Update(post, input) => (post.user_id, Some(input)),
            Write::Delete(post) => (post.user_id, None),
        };
        if author != actor.id {
            return Err(ModelError::Forbidden("posts can only be changed by their author"));
        }
        if input
            .and_then(|input| input.user_id)
            .is_some_and(|owner| owner != actor.id)
        {
            return Err(ModelError::Forbidden("only administrators can reassign posts"));
        }
        Ok(())
    }
}
