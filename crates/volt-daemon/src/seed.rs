//! Stock fixtures for development deployments.

use volt_storage::{BazaarStore, MissionStore, QueryWindow, StorageError, VoltStore};
use volt_types::{BazaarItemRecord, MissionRecord};

const MISSIONS: &[(&str, &str, u64)] = &[
    ("Make Bed", "bed", 10),
    ("Dishes", "kitchen", 20),
    ("Vacuum", "cleaning_services", 30),
    ("Laundry", "local_laundry_service", 25),
    ("Feed Pet", "pets", 15),
    ("Take Trash", "delete", 15),
];

// (name, cost, stock, max_stock); Extra Screen Time is effectively
// bottomless by configuration, not by opt-out.
const BAZAAR_ITEMS: &[(&str, u64, u64, u64)] = &[
    ("Extra Screen Time", 50, 99, 99),
    ("Ice Cream Trip", 100, 5, 5),
    ("Movie Night Pick", 75, 10, 10),
    ("Late Bedtime", 40, 7, 7),
    ("Skip a Chore", 30, 3, 3),
    ("Pizza Party", 200, 2, 2),
];

/// Insert the stock missions and bazaar items. Skips seeding entirely when
/// the collections already hold records, so restarts do not duplicate.
pub async fn seed_fixtures(store: &dyn VoltStore) -> Result<(), StorageError> {
    if !store.list_missions(QueryWindow::default()).await?.is_empty()
        || !store.list_items(QueryWindow::default()).await?.is_empty()
    {
        tracing::info!("fixtures already present, skipping seed");
        return Ok(());
    }

    for (title, icon, base_points) in MISSIONS {
        store
            .insert_mission(MissionRecord::new(*title, *icon, *base_points))
            .await?;
    }
    for (name, cost, stock, max_stock) in BAZAAR_ITEMS {
        store
            .insert_item(BazaarItemRecord::new(*name, *cost, *stock, *max_stock))
            .await?;
    }

    tracing::info!(
        missions = MISSIONS.len(),
        items = BAZAAR_ITEMS.len(),
        "seeded stock fixtures"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use volt_storage::memory::InMemoryVoltStore;

    #[tokio::test]
    async fn seeding_twice_does_not_duplicate() {
        let store = InMemoryVoltStore::new();
        seed_fixtures(&store).await.unwrap();
        seed_fixtures(&store).await.unwrap();

        let missions = store.list_missions(QueryWindow::default()).await.unwrap();
        assert_eq!(missions.len(), 6);
        let items = store.list_items(QueryWindow::default()).await.unwrap();
        assert_eq!(items.len(), 6);
    }
}
