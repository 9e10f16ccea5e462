use std::collections::HashSet;

use roster_storage::{
    keys, CompanyId, EdgeStore, GroupId, GroupStatus, IndexQuery, Item, StoreError,
};

/// First free display name among `Name`, `Name (1)`, `Name (2)`, ... given
/// the search keys already taken.
pub fn pick_name(base: &str, taken: &HashSet<String>) -> String {
    let base = base.trim();
    if !taken.contains(&keys::search_key(base)) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base} ({n})"))
        .find(|candidate| !taken.contains(&keys::search_key(candidate)))
        .unwrap_or_else(|| base.to_string())
}

/// Pick a display name unique within the company, ignoring retired groups
/// and `exclude` (a group being renamed keeps its own name available).
///
/// Two concurrent callers can still pick the same name.
pub async fn unique_name(
    store: &dyn EdgeStore,
    company_id: CompanyId,
    desired: &str,
    exclude: Option<GroupId>,
) -> Result<String, StoreError> {
    let taken: HashSet<String> = store
        .query_index(&IndexQuery::CompanyGroups {
            company_id,
            search_prefix: Some(keys::search_key(desired)),
        })
        .await?
        .into_iter()
        .filter_map(Item::into_group)
        .filter(|g| g.status != GroupStatus::Deleted && Some(g.id) != exclude)
        .map(|g| g.search_key)
        .collect();
    Ok(pick_name(desired, &taken))
}
