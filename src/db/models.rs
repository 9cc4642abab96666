use rusqlite::Row;
use serde::Serialize;

use crate::visibility::Visibility;

/// A gallery folder or a submission group. The two share one shape: a named
/// container with a slug, an on-disk directory and a sharing state.
#[derive(Debug, Clone)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub path: String,
    pub visibility: Visibility,
    pub shared_token: Option<String>,
    pub shared_views: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Collection {
    pub const COLUMNS: &'static str =
        "id, name, slug, path, visibility, shared_token, shared_views, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            path: row.get(3)?,
            visibility: row.get(4)?,
            shared_token: row.get(5)?,
            shared_views: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn token(&self) -> Option<&str> {
        self.shared_token.as_deref().filter(|t| !t.is_empty())
    }

    /// API/template view of a folder. The share URL points at the
    /// token-gated gallery route and exists only once a token does.
    pub fn folder_view(&self, base_url: &str) -> CollectionView {
        let share_url = self
            .token()
            .filter(|_| !base_url.is_empty())
            .map(|t| format!("{}/shared/{}", base_url.trim_end_matches('/'), t));
        self.view(share_url)
    }

    /// API/template view of a submission group. Public groups advertise the
    /// slug route; shared groups advertise the token route.
    pub fn group_view(&self, base_url: &str) -> CollectionView {
        let base = base_url.trim_end_matches('/');
        let share_url = if base_url.is_empty() {
            None
        } else {
            match self.visibility {
                Visibility::Public => Some(format!("{}/submitted/{}", base, self.slug)),
                Visibility::Shared => self
                    .token()
                    .map(|t| format!("{}/submitted/shared/{}", base, t)),
                Visibility::Private => None,
            }
        };
        self.view(share_url)
    }

    fn view(&self, share_url: Option<String>) -> CollectionView {
        CollectionView {
            id: self.id,
            name: self.name.clone(),
            slug: self.slug.clone(),
            visibility: self.visibility,
            shared_token: self.token().map(str::to_string),
            shared_views: self.shared_views,
            share_url,
        }
    }
}

/// Wire shape for folders and groups. Optional fields are omitted rather
/// than serialized as null so clients can test for presence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionView {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_token: Option<String>,
    pub shared_views: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,
}

/// One uploaded file inside a submission group. Immutable once written.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: i64,
    pub group_id: i64,
    pub uploader_name: String,
    pub contributor_token: String,
    pub filename: String,
    pub original_name: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub created_at: String,
}

impl Submission {
    pub const COLUMNS: &'static str = "id, group_id, uploader_name, contributor_token, filename, \
                                       original_name, mime_type, size_bytes, created_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            group_id: row.get(1)?,
            uploader_name: row.get(2)?,
            contributor_token: row.get(3)?,
            filename: row.get(4)?,
            original_name: row.get(5)?,
            mime_type: row.get(6)?,
            size_bytes: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(visibility: Visibility, token: Option<&str>) -> Collection {
        Collection {
            id: 7,
            name: "Trip".into(),
            slug: "trip".into(),
            path: "trip".into(),
            visibility,
            shared_token: token.map(str::to_string),
            shared_views: 2,
            created_at: "2026-01-01 10:00:00".into(),
            updated_at: "2026-01-01 10:00:00".into(),
        }
    }

    #[test]
    fn folder_view_omits_share_url_without_token() {
        let view = collection(Visibility::Shared, None).folder_view("http://host");
        assert!(view.share_url.is_none());
        assert!(view.shared_token.is_none());
    }

    #[test]
    fn folder_view_builds_share_url_from_token() {
        let view = collection(Visibility::Shared, Some("abc123")).folder_view("http://host/");
        assert_eq!(view.share_url.as_deref(), Some("http://host/shared/abc123"));
        assert_eq!(view.shared_token.as_deref(), Some("abc123"));
    }

    #[test]
    fn group_view_uses_slug_route_when_public() {
        let view = collection(Visibility::Public, None).group_view("http://host");
        assert_eq!(view.share_url.as_deref(), Some("http://host/submitted/trip"));
    }

    #[test]
    fn group_view_uses_token_route_when_shared() {
        let view = collection(Visibility::Shared, Some("tok")).group_view("http://host");
        assert_eq!(
            view.share_url.as_deref(),
            Some("http://host/submitted/shared/tok")
        );
        assert!(collection(Visibility::Private, Some("tok"))
            .group_view("http://host")
            .share_url
            .is_none());
    }

    #[test]
    fn serialized_view_is_camel_case_and_sparse() {
        let view = collection(Visibility::Private, None).folder_view("http://host");
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["visibility"], "private");
        assert_eq!(json["sharedViews"], 2);
        assert!(json.get("sharedToken").is_none());
        assert!(json.get("shareUrl").is_none());
    }
}
