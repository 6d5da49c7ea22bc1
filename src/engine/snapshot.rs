use tracing::info;

use crate::model::Event;

use super::{Engine, EngineError};

impl Engine {
    /// Rewrite the journal as the minimal event list that rebuilds the
    /// current state: registrations, current capacity, holds, and every
    /// record in its present form.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        // Exclusive gate: no mutation is between journaling and applying.
        let _gate = self.compaction_gate.write().await;

        let mut events: Vec<Event> = self
            .users
            .iter()
            .map(|e| {
                let u = e.value();
                Event::UserRegistered {
                    id: u.id,
                    name: u.name.clone(),
                    email: u.email.clone(),
                }
            })
            .collect();

        for rs in self.asset_handles() {
            let guard = rs.read().await;
            events.push(Event::AssetRegistered {
                id: guard.id,
                tag: guard.tag.clone(),
                category: guard.category,
                capacity: guard.capacity,
            });
            if guard.hold.is_some() {
                events.push(Event::HoldChanged { id: guard.id, hold: guard.hold });
            }
            events.extend(
                guard
                    .records()
                    .iter()
                    .map(|r| Event::RecordRestored { record: r.clone() }),
            );
        }

        let count = events.len();
        self.store
            .compact(events)
            .await
            .map_err(|e| EngineError::PersistenceUnavailable(e.to_string()))?;
        info!("journal compacted to {count} events");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.store.appends_since_compact().await
    }
}
