use anyhow::Result;
use rapport_schemas::{ContactId, ContactKey, OwnerId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::store::Persistence;

/// Names partitioned into existing contacts and unarchived people
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub matched: BTreeMap<String, ContactId>,
    pub unmatched: BTreeSet<String>,
}

impl Resolution {
    pub fn contact_for(&self, name: &str) -> Option<&ContactId> {
        self.matched.get(name)
    }
}

/// Exact-name contact matching. A name matches only the contact whose
/// [`ContactKey`] is `(owner, name)` byte for byte; there is no fuzzy or
/// case-folded matching.
pub struct ContactResolver {
    store: Arc<dyn Persistence>,
}

impl ContactResolver {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, owner_id: &OwnerId, names: &[String]) -> Result<Resolution> {
        if names.is_empty() {
            return Ok(Resolution::default());
        }

        let wanted: BTreeSet<String> = names.iter().cloned().collect();
        let lookup: Vec<String> = wanted.iter().cloned().collect();
        let contacts = self.store.find_contacts_by_names(owner_id, &lookup).await?;

        let by_key: BTreeMap<ContactKey, ContactId> =
            contacts.into_iter().map(|c| (c.key(), c.id)).collect();

        let mut resolution = Resolution::default();
        for name in wanted {
            match by_key.get(&ContactKey::new(owner_id, &name)) {
                Some(id) => {
                    resolution.matched.insert(name, id.clone());
                }
                None => {
                    resolution.unmatched.insert(name);
                }
            }
        }

        debug!(
            "Resolved {} names: {} matched, {} unarchived",
            names.len(),
            resolution.matched.len(),
            resolution.unmatched.len()
        );
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::NewContact;
    use crate::store::testing::{temp_store, FlakyStore};

    fn owner() -> OwnerId {
        OwnerId("owner-1".into())
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn add_contact(store: &FlakyStore, owner_id: &OwnerId, name: &str) -> ContactId {
        let db = store.inner.database();
        let db = db.lock().await;
        db.create_contact(owner_id, &NewContact { name: name.into(), ..Default::default() })
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_partitions_names() {
        let (_dir, inner) = temp_store();
        let store = Arc::new(FlakyStore::new(inner));
        let ana = add_contact(&store, &owner(), "Ana").await;

        let resolver = ContactResolver::new(store.clone());
        let resolution = resolver
            .resolve(&owner(), &names(&["Ana", "Bo", "Ana"]))
            .await
            .unwrap();

        assert_eq!(resolution.contact_for("Ana"), Some(&ana));
        assert_eq!(resolution.matched.len(), 1);
        assert_eq!(resolution.unmatched, ["Bo".to_string()].into_iter().collect());
    }

    #[tokio::test]
    async fn test_matching_is_exact_and_owner_scoped() {
        let (_dir, inner) = temp_store();
        let store = Arc::new(FlakyStore::new(inner));
        add_contact(&store, &owner(), "Ana").await;
        add_contact(&store, &OwnerId("owner-2".into()), "Bo").await;

        let resolver = ContactResolver::new(store.clone());
        let resolution = resolver
            .resolve(&owner(), &names(&["ana", "Ana ", "Bo"]))
            .await
            .unwrap();

        assert!(resolution.matched.is_empty());
        assert_eq!(resolution.unmatched.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_names_do_no_io() {
        let (_dir, inner) = temp_store();
        let store = Arc::new(FlakyStore::new(inner));

        let resolver = ContactResolver::new(store.clone());
        let resolution = resolver.resolve(&owner(), &[]).await.unwrap();

        assert_eq!(resolution, Resolution::default());
        assert_eq!(store.lookups(), 0);
    }
}
