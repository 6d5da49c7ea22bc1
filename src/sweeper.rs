use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::{Ms, now_ms};
use crate::observability;

/// Background task that reminds holders of overdue return requests.
pub async fn run_overdue_sweeper(engine: Arc<Engine>, overdue_after: Ms, every: Duration) {
    let mut interval = tokio::time::interval(every);
    let mut reminded = HashSet::new();
    loop {
        interval.tick().await;
        let sent = sweep_overdue(&engine, now_ms(), overdue_after, &mut reminded).await;
        if sent > 0 {
            info!("sent {sent} overdue return reminder(s)");
        }
    }
}

/// One pass: remind each overdue record's holder once. `reminded` carries
/// the record ids already reminded across passes; ids that stop being
/// overdue (returned) are forgotten. Returns the number of reminders sent.
pub async fn sweep_overdue(
    engine: &Engine,
    now: Ms,
    overdue_after: Ms,
    reminded: &mut HashSet<Ulid>,
) -> usize {
    let overdue = engine.overdue_returns(now, overdue_after).await;
    metrics::gauge!(observability::OVERDUE_RETURNS).set(overdue.len() as f64);

    let still_overdue: HashSet<Ulid> = overdue.iter().map(|r| r.id).collect();
    reminded.retain(|id| still_overdue.contains(id));

    let mut sent = 0;
    for record in &overdue {
        if !reminded.insert(record.id) {
            continue;
        }
        match engine.remind_overdue(record).await {
            Ok(()) => sent += 1,
            Err(e) => debug!("overdue reminder for {} skipped: {e}", record.id),
        }
    }
    sent
}

/// Background task that compacts the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if engine.journal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_journal().await {
            error!("journal compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;
    use crate::model::*;
    use crate::notify::{NotifyHub, Recipient};

    async fn engine_with_request() -> (Engine, Arc<NotifyHub>, Ulid, Ulid, Ms) {
        let hub = Arc::new(NotifyHub::new());
        let engine = Engine::from_history(Arc::new(MemoryJournal::new()), &[], hub.clone());
        let holder = Ulid::new();
        let asset = Ulid::new();
        engine.register_user(holder, "Alice".into(), None).await.unwrap();
        engine
            .register_asset(asset, "LAPTOP-07".into(), Category::Hardware, Capacity::SingleOwner)
            .await
            .unwrap();
        engine.allocate(asset, holder, None).await.unwrap();
        let record = engine.request_return(asset, holder, "upgrade".into()).await.unwrap();
        let requested_at = record.return_requested_at.unwrap();
        (engine, hub, holder, asset, requested_at)
    }

    #[tokio::test]
    async fn reminds_each_overdue_record_once() {
        let (engine, hub, holder, _, requested_at) = engine_with_request().await;
        let mut rx = hub.subscribe(Recipient::Holder(holder));
        let mut reminded = HashSet::new();

        assert_eq!(sweep_overdue(&engine, requested_at + 5, 10, &mut reminded).await, 0);
        assert_eq!(sweep_overdue(&engine, requested_at + 11, 10, &mut reminded).await, 1);
        assert_eq!(sweep_overdue(&engine, requested_at + 50, 10, &mut reminded).await, 0);

        let note = rx.try_recv().unwrap();
        assert_eq!(note.title, "Return overdue");
        assert_eq!(note.message, "LAPTOP-07 was requested back and is now overdue");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn returned_records_are_forgotten() {
        let (engine, _, holder, asset, requested_at) = engine_with_request().await;
        let mut reminded = HashSet::new();
        sweep_overdue(&engine, requested_at + 11, 10, &mut reminded).await;
        assert_eq!(reminded.len(), 1);

        engine
            .complete_return(asset, holder, None, ReturnMode::Standard)
            .await
            .unwrap();
        sweep_overdue(&engine, requested_at + 20, 10, &mut reminded).await;
        assert!(reminded.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn compactor_runs_past_threshold() {
        let store = Arc::new(MemoryJournal::new());
        let engine = Arc::new(Engine::from_history(store.clone(), &[], Arc::new(NotifyHub::new())));
        for i in 0..5 {
            engine.register_user(Ulid::new(), format!("user-{i}"), None).await.unwrap();
        }
        assert_eq!(engine.journal_appends_since_compact().await, 5);

        let task = tokio::spawn(run_compactor(engine.clone(), 3, Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        task.abort();

        assert_eq!(engine.journal_appends_since_compact().await, 0);
        assert_eq!(store.events().len(), 5);
    }
}
