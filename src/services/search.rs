use crate::api::DocumentStore;
use crate::api::models::{FIELD_EMAIL, FIELD_USERNAME, USERS, UserProfile};
use crate::api::query::{Direction, Query};
use crate::error::Result;
use std::collections::HashSet;

/// Highest code point of the private use area; appended to a prefix it bounds
/// a "starts with" range.
pub const PREFIX_SENTINEL: char = '\u{f8ff}';
pub const RESULTS_PER_FIELD: usize = 50;

pub fn prefix_query(field: &str, prefix: &str) -> Query {
    Query::collection(USERS)
        .where_gte(field, prefix)
        .where_lt(field, format!("{prefix}{PREFIX_SENTINEL}"))
        .order_by(field, Direction::Ascending)
        .limit(RESULTS_PER_FIELD)
}

/// Users whose username or email starts with `input`. Username hits come
/// first; a user matching both appears once.
pub async fn search_users(store: &dyn DocumentStore, input: &str) -> Result<Vec<UserProfile>> {
    let prefix = input.trim();
    if prefix.is_empty() {
        return Ok(Vec::new());
    }
    let by_username = prefix_query(FIELD_USERNAME, prefix);
    let by_email = prefix_query(FIELD_EMAIL, prefix);
    let (usernames, emails) = tokio::try_join!(
        store.run_query(&by_username),
        store.run_query(&by_email)
    )?;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for doc in usernames.iter().chain(emails.iter()) {
        if !seen.insert(doc.id.clone()) {
            continue;
        }
        match UserProfile::from_document(doc) {
            Ok(profile) => out.push(profile),
            Err(e) => log::warn!("skipping user: {e}"),
        }
    }
    log::debug!("search {prefix:?} matched {} users", out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::MemoryBackend;

    async fn user(store: &MemoryBackend, id: &str, username: &str, email: &str) {
        let profile = UserProfile {
            id: id.into(),
            email: email.into(),
            username: username.into(),
        };
        store.set(USERS, id, profile.to_fields()).await.unwrap();
    }

    #[tokio::test]
    async fn prefix_search_unions_username_and_email_matches() {
        let store = MemoryBackend::new();
        user(&store, "1", "alice", "alice@x.io").await;
        user(&store, "2", "bob", "al.b@x.io").await;
        user(&store, "3", "alan", "zed@x.io").await;
        user(&store, "4", "Al", "AL@x.io").await;
        user(&store, "5", "carl", "carl@al.io").await;

        let found = search_users(&store, "al").await.unwrap();
        let ids: Vec<&str> = found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
    }

    #[tokio::test]
    async fn limit_keeps_the_lowest_matching_values() {
        let store = MemoryBackend::new();
        for i in 0..55 {
            // Ids run opposite to usernames.
            let id = format!("{:02}", 60 - i);
            user(&store, &id, &format!("al{i:02}"), &format!("u{i}@x.io")).await;
        }
        let found = search_users(&store, "al").await.unwrap();
        assert_eq!(found.len(), RESULTS_PER_FIELD);
        assert_eq!(found[0].username, "al00");
        assert_eq!(found[49].username, "al49");
    }

    #[tokio::test]
    async fn blank_search_returns_nothing() {
        let store = MemoryBackend::new();
        user(&store, "1", "alice", "alice@x.io").await;
        assert!(search_users(&store, "   ").await.unwrap().is_empty());
    }

    #[test]
    fn prefix_range_uses_sentinel_upper_bound() {
        let q = prefix_query(FIELD_USERNAME, "al");
        assert_eq!(q.filters.len(), 2);
        assert_eq!(q.limit, Some(RESULTS_PER_FIELD));
        assert_eq!(q.order_by, vec![(FIELD_USERNAME.to_string(), Direction::Ascending)]);
        assert_eq!(
            q.filters[1],
            crate::api::query::Filter::LessThan(FIELD_USERNAME.into(), "al\u{f8ff}".into())
        );
    }
}
