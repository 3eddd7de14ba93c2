mod common;

use anyhow::Result;
use folio_api::{Collection, JobStatus, StoreError, Value};

use common::harness;

#[tokio::test]
async fn test_status_transitions_stamp_native_dates() -> Result<()> {
    let h = harness("u1");
    let jobs = h.ctx.job_queue();
    let id = jobs.submit("  https://jobs.example/1  ", Some("Acme".into())).await?;

    jobs.update_status(&id, JobStatus::Processing, None).await?;
    let processing = jobs.get(&id).await?.unwrap();
    assert_eq!(processing.data.url, "https://jobs.example/1");
    assert!(processing.data.processed_at.is_some());
    assert!(processing.data.completed_at.is_none());

    jobs.update_status(&id, JobStatus::Failed, Some("posting expired".into()))
        .await?;
    let failed = jobs.get(&id).await?.unwrap();
    assert_eq!(failed.data.status, JobStatus::Failed);
    assert_eq!(failed.data.result_message.as_deref(), Some("posting expired"));
    assert!(failed.data.completed_at.is_some());

    let raw = h.backend.raw(Collection::JobQueue, &id).unwrap();
    assert!(raw.get("completedAt").is_some_and(Value::is_timestamp));
    Ok(())
}

#[tokio::test]
async fn test_requeue_only_from_failed_or_skipped() -> Result<()> {
    let h = harness("u1");
    let jobs = h.ctx.job_queue();
    let id = jobs.submit("https://jobs.example/2", None).await?;

    let err = jobs.requeue(&id).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument { .. }));

    jobs.update_status(&id, JobStatus::Skipped, Some("duplicate".into()))
        .await?;
    jobs.requeue(&id).await?;
    let job = jobs.get(&id).await?.unwrap();
    assert_eq!(job.data.status, JobStatus::Pending);
    assert_eq!(job.data.retry_count, 1);
    assert_eq!(job.data.result_message, None);
    Ok(())
}

#[tokio::test]
async fn test_list_mine_is_scoped_and_newest_first() -> Result<()> {
    let h = harness("u1");
    let jobs = h.ctx.job_queue();
    let first = jobs.submit("https://jobs.example/a", None).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = jobs.submit("https://jobs.example/b", None).await?;
    jobs.update_status(&first, JobStatus::Success, None).await?;

    h.identity.sign_in("u2", None);
    jobs.submit("https://jobs.example/c", None).await?;
    h.identity.sign_in("u1", None);

    let mine: Vec<String> = jobs.list_mine(None).await?.into_iter().map(|r| r.id).collect();
    assert_eq!(mine, vec![second.clone(), first.clone()]);

    let pending: Vec<String> = jobs
        .list_mine(Some(JobStatus::Pending))
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(pending, vec![second]);
    Ok(())
}

#[tokio::test]
async fn test_other_users_jobs_cannot_be_touched() -> Result<()> {
    let h = harness("u2");
    let jobs = h.ctx.job_queue();
    let theirs = jobs.submit("https://jobs.example/x", None).await?;

    h.identity.sign_in("u1", None);
    let err = jobs
        .update_status(&theirs, JobStatus::Processing, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AuthorizationDenied { .. }));
    let err = jobs.remove(&theirs).await.unwrap_err();
    assert!(matches!(err, StoreError::AuthorizationDenied { .. }));
    assert_eq!(h.backend.count(Collection::JobQueue), 1);
    Ok(())
}

#[tokio::test]
async fn test_blank_url_is_rejected() {
    let h = harness("u1");
    let err = h.ctx.job_queue().submit("   ", None).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument { .. }));
}
