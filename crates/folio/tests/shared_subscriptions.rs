mod common;

use anyhow::Result;
use folio_api::{cache_key, Collection, Constraints, JobQueueItem, JobStatus, Record};

use common::{eventually, harness, Recorder};

fn pending_ids(records: &[Record<JobQueueItem>]) -> Vec<String> {
    records.iter().map(|r| r.id.clone()).collect()
}

#[tokio::test]
async fn test_two_consumers_share_one_listener() -> Result<()> {
    let h = harness("u1");
    let cache = h.ctx.cache();
    let pending = || Constraints::new().where_eq("status", "pending");

    let first = Recorder::<Vec<Record<JobQueueItem>>>::new();
    let second = Recorder::<Vec<Record<JobQueueItem>>>::new();
    let lease_a = cache
        .acquire::<JobQueueItem, _, _>(None, pending(), first.sink(), |e| panic!("{e}"))
        .await?;
    let lease_b = cache
        .acquire::<JobQueueItem, _, _>(None, pending(), second.sink(), |e| panic!("{e}"))
        .await?;

    assert_eq!(h.backend.listen_calls(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.ref_count(&cache_key(Collection::JobQueue, &pending())), 2);

    let jobs = h.ctx.job_queue();
    let j1 = jobs.submit("https://jobs.example/1", None).await?;
    eventually("both consumers see the first job", || {
        first.last().map(|r| pending_ids(&r)) == Some(vec![j1.clone()])
            && second.last().map(|r| pending_ids(&r)) == Some(vec![j1.clone()])
    })
    .await;

    lease_a.release();
    let delivered_to_first = first.len();

    let j2 = jobs.submit("https://jobs.example/2", None).await?;
    eventually("the remaining consumer sees the second job", || {
        second
            .last()
            .is_some_and(|r| pending_ids(&r).contains(&j2))
    })
    .await;
    assert_eq!(first.len(), delivered_to_first);
    assert_eq!(h.backend.active_listeners(), 1);

    lease_b.release();
    assert!(cache.is_empty());
    eventually("listener torn down", || h.backend.active_listeners() == 0).await;
    Ok(())
}

#[tokio::test]
async fn test_filter_order_does_not_split_the_cache() -> Result<()> {
    let h = harness("u1");
    let cache = h.ctx.cache();

    let a = Constraints::new()
        .where_eq("status", "pending")
        .where_eq("submittedBy", "u1");
    let b = Constraints::new()
        .where_eq("submittedBy", "u1")
        .where_eq("status", "pending");
    let _lease_a = cache
        .acquire::<JobQueueItem, _, _>(None, a, |_| {}, |_| {})
        .await?;
    let _lease_b = cache
        .acquire::<JobQueueItem, _, _>(None, b, |_| {}, |_| {})
        .await?;

    assert_eq!(cache.len(), 1);
    assert_eq!(h.backend.listen_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_watch_status_through_job_queue_service() -> Result<()> {
    let h = harness("u1");
    let jobs = h.ctx.job_queue();

    let watcher = Recorder::<Vec<Record<JobQueueItem>>>::new();
    let lease = jobs
        .watch_status(JobStatus::Pending, watcher.sink(), |e| panic!("{e}"))
        .await?;

    let id = jobs.submit("https://jobs.example/7", Some("Acme".into())).await?;
    eventually("job shows up as pending", || {
        watcher.last().is_some_and(|r| r.len() == 1)
    })
    .await;

    jobs.update_status(&id, JobStatus::Processing, None).await?;
    eventually("job leaves the pending view", || {
        watcher.last().is_some_and(|r| r.is_empty())
    })
    .await;

    lease.release();
    lease.release();
    Ok(())
}

#[tokio::test]
async fn test_late_joiner_gets_last_snapshot_immediately() -> Result<()> {
    let h = harness("u1");
    let jobs = h.ctx.job_queue();
    jobs.submit("https://jobs.example/9", None).await?;

    let early = Recorder::<Vec<Record<JobQueueItem>>>::new();
    let _early = jobs
        .watch_status(JobStatus::Pending, early.sink(), |_| {})
        .await?;
    eventually("first snapshot", || early.len() == 1).await;

    let late = Recorder::<Vec<Record<JobQueueItem>>>::new();
    let _late = jobs
        .watch_status(JobStatus::Pending, late.sink(), |_| {})
        .await?;
    assert_eq!(late.len(), 1);
    assert_eq!(late.all()[0].len(), 1);
    assert_eq!(h.backend.listen_calls(), 1);
    Ok(())
}
