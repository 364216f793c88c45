//! Link-based de-duplication of freshly parsed items.

use uuid::Uuid;

use crate::storage::Feed;

/// What happened to a provisional item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Kept as a new item (no link, or no other item with its link)
    Inserted,
    /// Folded into the existing item `into`; the provisional item is gone
    Merged { into: Uuid },
}

/// Reconcile a just-parsed provisional item against the rest of its feed.
///
/// An item with an empty link has no identity key and is always kept. Otherwise
/// the first other item in the feed with the same link absorbs the provisional
/// item's content and the provisional item is removed from the feed, so the
/// surviving item keeps the id it was first stored under.
///
/// Merge rules:
/// - `title` and `summary` are copied only when the new value is non-empty, so
///   a sparse re-fetch never blanks out stored content
/// - `published_at` is copied only when the new fetch resolved a date
///
/// Returns `None` if `provisional_id` is not an item of `feed`.
pub fn reconcile(feed: &mut Feed, provisional_id: Uuid) -> Option<Reconciled> {
    let link = feed.item(provisional_id)?.link.as_str();
    if link.is_empty() {
        return Some(Reconciled::Inserted);
    }

    let Some(existing_id) = feed
        .find_item_by_link(link, provisional_id)
        .map(|item| item.id)
    else {
        return Some(Reconciled::Inserted);
    };

    let provisional = feed.remove_item(provisional_id)?;
    let existing = feed.item_mut(existing_id)?;

    if !provisional.title.is_empty() {
        existing.title = provisional.title;
    }
    if !provisional.summary.is_empty() {
        existing.summary = provisional.summary;
    }
    if provisional.published_at.is_some() {
        existing.published_at = provisional.published_at;
    }

    tracing::debug!(
        link = %existing.link,
        item = %existing_id,
        "Merged re-fetched item into existing entry"
    );

    Some(Reconciled::Merged { into: existing_id })
}
