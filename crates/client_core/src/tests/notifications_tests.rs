use super::*;
use std::time::Duration;

use serde_json::json;
use shared::protocol::WsMessage;
use tokio::time::timeout;

use crate::test_support::SocketBackend;

fn event(frame: serde_json::Value) -> ServerEvent {
    serde_json::from_value::<WsMessage>(frame)
        .expect("frame")
        .to_event()
        .expect("event")
}

fn titles(notifications: &[Notification]) -> Vec<&str> {
    notifications
        .iter()
        .map(|notification| notification.title.as_str())
        .collect()
}

#[test]
fn cv_complete_success_and_failure() {
    let prefs = NotificationPreferences::default();

    let raised = notifications_for(
        &event(json!({"type": "cv_complete", "data": {"filename": "cv.pdf"}})),
        &prefs,
    );
    assert_eq!(titles(&raised), vec!["CV Uploaded"]);
    assert_eq!(raised[0].message, "cv.pdf was uploaded and parsed successfully");
    assert_eq!(raised[0].action.as_ref().map(|a| a.route.as_str()), Some("/search"));

    let raised = notifications_for(
        &event(json!({"type": "cv_complete", "data": {"success": false}})),
        &prefs,
    );
    assert_eq!(titles(&raised), vec!["Upload Failed"]);
    assert_eq!(raised[0].level, NotificationLevel::Error);
    assert!(!raised[0].auto_close);
}

#[test]
fn customization_complete_counts_documents() {
    let prefs = NotificationPreferences::default();

    let raised = notifications_for(
        &event(json!({
            "type": "customization_progress",
            "data": {"status": "completed", "completed": 3, "total": 3}
        })),
        &prefs,
    );
    assert_eq!(titles(&raised), vec!["Customization Complete"]);
    assert_eq!(raised[0].message, "3 CVs have been customized and are ready to apply");

    let raised = notifications_for(
        &event(json!({"type": "customization_progress", "data": {"status": "completed"}})),
        &prefs,
    );
    assert_eq!(raised[0].message, "Your CV has been customized and is ready to apply");

    let raised = notifications_for(
        &event(json!({"type": "customization_progress", "data": {"status": "running"}})),
        &prefs,
    );
    assert!(raised.is_empty());
}

#[test]
fn failed_submission_also_raises_error_detail() {
    let prefs = NotificationPreferences::default();
    let raised = notifications_for(
        &event(json!({
            "type": "application_submitted",
            "data": {"jobId": 9, "success": false, "error": "captcha"}
        })),
        &prefs,
    );
    assert_eq!(titles(&raised), vec!["Application Failed", "Application Error"]);
    assert_eq!(
        raised[0].message,
        "Failed to submit application to Job 9. Please try again."
    );
    assert_eq!(raised[1].message, "captcha");

    let raised = notifications_for(
        &event(json!({
            "type": "application_submitted",
            "data": {"jobTitle": "SRE", "success": true, "error": "ignored"}
        })),
        &prefs,
    );
    assert_eq!(titles(&raised), vec!["Application Submitted"]);
}

#[test]
fn auto_apply_summary_splits_success_and_failure() {
    let raised = notifications_for(
        &event(json!({
            "type": "application_progress",
            "data": {"status": "completed", "completed": 5, "failed": 1}
        })),
        &NotificationPreferences::default(),
    );
    assert_eq!(titles(&raised), vec!["Auto-Apply Complete", "Some Applications Failed"]);
    assert_eq!(raised[0].message, "Successfully submitted 4 applications");
    assert_eq!(raised[1].message, "1 application could not be submitted");
    assert_eq!(raised[1].level, NotificationLevel::Warning);
}

#[test]
fn interview_requests_are_urgent_and_bypass_level_filters() {
    let prefs = NotificationPreferences {
        notify_on_success: false,
        ..NotificationPreferences::default()
    };
    let raised = notifications_for(
        &event(json!({
            "type": "application_response",
            "data": {"responseType": "interview", "company": "Acme", "jobTitle": "SRE"}
        })),
        &prefs,
    );
    assert_eq!(titles(&raised), vec!["Interview Request!"]);
    assert_eq!(raised[0].priority, Priority::Urgent);
    assert_eq!(raised[0].message, "Acme wants to interview you for SRE");

    let raised = notifications_for(
        &event(json!({
            "type": "application_response",
            "data": {"responseType": "rejection", "jobTitle": "SRE"}
        })),
        &prefs,
    );
    assert_eq!(titles(&raised), vec!["Application Update"]);
    assert_eq!(raised[0].message, "Response received for SRE");
}

#[test]
fn rate_limit_updates_warn_near_exhaustion() {
    let prefs = NotificationPreferences::default();

    let raised = notifications_for(
        &event(json!({"type": "rate_limit_update", "data": {"tokens": 10, "capacity": 50}})),
        &prefs,
    );
    assert!(raised.is_empty());

    let raised = notifications_for(
        &event(json!({"type": "rate_limit_update", "data": {"tokens": 3, "capacity": 50}})),
        &prefs,
    );
    assert_eq!(titles(&raised), vec!["Rate Limit Warning"]);
    assert_eq!(raised[0].message, "Only 3 of 50 applications remaining today");

    let raised = notifications_for(
        &event(json!({"type": "rate_limit_update", "data": {"tokens": 0, "capacity": 50}})),
        &prefs,
    );
    assert_eq!(titles(&raised), vec!["Rate Limit Warning", "Rate Limit Reached"]);

    let raised = notifications_for(
        &event(json!({"type": "rate_limit_update", "data": {"tokens": 0, "capacity": 50}})),
        &NotificationPreferences {
            notify_on_rate_limit: false,
            ..NotificationPreferences::default()
        },
    );
    assert!(raised.is_empty());
}

#[test]
fn generic_error_and_queue_events() {
    let prefs = NotificationPreferences::default();

    let raised = notifications_for(&event(json!({"type": "error"})), &prefs);
    assert_eq!(titles(&raised), vec!["Error"]);
    assert_eq!(raised[0].message, "An error occurred");

    let raised = notifications_for(
        &event(json!({"type": "job_queued", "data": {"count": 4}})),
        &prefs,
    );
    assert_eq!(titles(&raised), vec!["Jobs Added to Queue"]);
    assert_eq!(raised[0].message, "4 jobs added to your queue");

    let raised = notifications_for(
        &event(json!({"type": "job_queued", "data": {"count": 1, "jobTitle": "SRE"}})),
        &prefs,
    );
    assert_eq!(titles(&raised), vec!["Job Added"]);
}

#[test]
fn disabled_preferences_silence_everything() {
    let prefs = NotificationPreferences {
        enabled: false,
        ..NotificationPreferences::default()
    };
    assert!(notifications_for(&ServerEvent::RateLimitReached, &prefs).is_empty());
    assert!(notifications_for(
        &event(json!({
            "type": "application_response",
            "data": {"responseType": "interview"}
        })),
        &prefs,
    )
    .is_empty());
}

#[test]
fn preferences_decode_with_defaults() {
    let prefs: NotificationPreferences =
        serde_json::from_value(json!({"notifyOnError": false})).expect("prefs");
    assert!(prefs.enabled);
    assert!(!prefs.notify_on_error);
    assert!(prefs.notify_on_rate_limit);
}

#[tokio::test]
async fn center_turns_socket_frames_into_notifications() {
    let mut backend = SocketBackend::spawn().await;
    let ws = backend.connected_client().await;
    let center = NotificationCenter::default();
    let mut raised = center.subscribe();
    center.attach(&ws);

    backend.push(json!({"type": "new_jobs", "jobs": []}));
    backend.push(json!({"type": "cv_error", "data": {"error": "bad pdf"}}));

    let notification = timeout(Duration::from_secs(5), raised.recv())
        .await
        .expect("notification in time")
        .expect("channel open");
    assert_eq!(notification.title, "CV Upload Failed");
    assert_eq!(notification.message, "bad pdf");

    center.set_preferences(NotificationPreferences {
        notify_on_error: false,
        ..NotificationPreferences::default()
    });
    backend.push(json!({"type": "cv_error", "data": {}}));
    backend.push(json!({"type": "job_queued", "data": {"jobTitle": "SRE"}}));
    let notification = timeout(Duration::from_secs(5), raised.recv())
        .await
        .expect("notification in time")
        .expect("channel open");
    assert_eq!(notification.title, "Job Added");

    center.detach();
    backend.push(json!({"type": "job_queued", "data": {"jobTitle": "Ops"}}));
    assert!(timeout(Duration::from_millis(200), raised.recv()).await.is_err());
    ws.destroy();
}
