use super::*;

use serde_json::json;

use crate::test_support::{eventually, SocketBackend};

fn job(id: usize, skills: &[&str]) -> JobItem {
    JobItem {
        id: id.to_string(),
        title: format!("Job {id}"),
        skills: skills.iter().map(|s| s.to_string()).collect(),
        ..JobItem::default()
    }
}

fn ids(jobs: &[JobItem]) -> Vec<String> {
    jobs.iter().map(|job| job.id.clone()).collect()
}

#[test]
fn batches_prepend_in_arrival_order() {
    let feed = JobFeed::new();
    feed.push_batch(vec![job(1, &[]), job(2, &[])]);
    feed.push_batch(vec![job(3, &[]), job(4, &[])]);
    assert_eq!(ids(&feed.jobs()), vec!["3", "4", "1", "2"]);
}

#[test]
fn feed_is_capped_at_capacity() {
    let feed = JobFeed::new();
    feed.push_batch((0..80).map(|id| job(id, &[])).collect());
    feed.push_batch((80..130).map(|id| job(id, &[])).collect());

    let jobs = feed.jobs();
    assert_eq!(jobs.len(), FEED_CAPACITY);
    assert_eq!(jobs[0].id, "80");
    assert_eq!(jobs[49].id, "129");
    assert_eq!(jobs[50].id, "0");
    assert_eq!(jobs[99].id, "49");
}

#[test]
fn empty_batches_do_not_notify() {
    let feed = JobFeed::new();
    let mut observer = feed.subscribe();
    feed.push_batch(Vec::new());
    feed.clear();
    assert!(!observer.has_changed().expect("sender alive"));

    feed.push_batch(vec![job(1, &[])]);
    assert!(observer.has_changed().expect("sender alive"));
    assert_eq!(observer.borrow_and_update().len(), 1);
}

#[test]
fn scored_sorts_best_match_first_and_keeps_ties_stable() {
    let feed = JobFeed::new();
    feed.push_batch(vec![
        job(1, &["Go", "Kubernetes"]),
        job(2, &["Rust", "Tokio"]),
        job(3, &["Rust", "Kafka"]),
        job(4, &["Rust", "Postgres"]),
    ]);
    let cv = vec!["rust".to_string(), "tokio".to_string()];

    let scored = feed.scored(&SkillMatcher::default(), &cv);
    let order: Vec<&str> = scored.iter().map(|entry| entry.job.id.as_str()).collect();
    assert_eq!(order, vec!["2", "3", "4", "1"]);
    assert_eq!(scored[0].score.percentage, 100);
    assert_eq!(scored[1].score.percentage, 50);
    assert_eq!(scored[3].score.percentage, 0);
}

#[test]
fn subscribe_filters_requires_attachment() {
    let feed = JobFeed::new();
    assert!(!feed.subscribe_filters(json!({"area": "Berlin"})));
}

#[tokio::test]
async fn attached_feed_follows_new_jobs_frames() {
    let mut backend = SocketBackend::spawn().await;
    let ws = backend.connected_client().await;
    let feed = JobFeed::new();
    feed.attach(&ws);

    backend.push(json!({
        "type": "new_jobs",
        "jobs": [
            {"id": 1, "name": "Rust developer", "employer": {"name": "Acme"}},
            {"id": "2", "title": "SRE", "company": "Initech"}
        ]
    }));
    eventually(|| feed.jobs().len() == 2).await;
    let jobs = feed.jobs();
    assert_eq!(jobs[0].title, "Rust developer");
    assert_eq!(jobs[0].company, "Acme");
    assert_eq!(jobs[1].id, "2");

    assert!(feed.subscribe_filters(json!({"text": "rust"})));
    let frame = backend.next_inbound().await;
    assert_eq!(frame, json!({"type": "subscribe", "filters": {"text": "rust"}}));

    feed.detach();
    backend.push(json!({"type": "new_jobs", "jobs": [{"id": 3, "title": "Ops"}]}));
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(feed.jobs().len(), 2);
    ws.destroy();
}
