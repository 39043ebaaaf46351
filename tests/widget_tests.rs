// Integration tests for the voice widget: one session at a time, toggle,
// and a mute choice that survives reopening.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use common::{mic_frame, test_config, FakeConnector, FakePlatform};
use prombot::{SessionError, SessionState, VoiceWidget};

fn widget(api_key: Option<&str>) -> (VoiceWidget, Arc<FakeConnector>, Arc<FakePlatform>) {
    let connector = Arc::new(FakeConnector::default());
    let platform = Arc::new(FakePlatform::default());
    let widget = VoiceWidget::new(test_config(api_key), connector.clone(), platform.clone());
    (widget, connector, platform)
}

#[tokio::test]
async fn test_opening_again_closes_previous_session() -> Result<()> {
    let (widget, connector, _platform) = widget(Some("test-key"));

    widget.open().await?;
    let first = widget.session().expect("session");

    widget.open().await?;
    let second = widget.session().expect("session");

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.state(), SessionState::Closed);
    assert_eq!(second.state(), SessionState::Connected);
    assert_ne!(first.config().session_id, second.config().session_id);

    let links = connector.links.lock().unwrap().clone();
    assert_eq!(links.len(), 2);
    assert!(links[0].is_closed());
    assert!(!links[1].is_closed());

    widget.close();
    Ok(())
}

#[tokio::test]
async fn test_toggle_alternates() -> Result<()> {
    let (widget, connector, _platform) = widget(Some("test-key"));

    assert!(widget.toggle().await?);
    assert!(widget.snapshot().is_connected);

    assert!(!widget.toggle().await?);
    let snapshot = widget.snapshot();
    assert!(!snapshot.is_open);
    assert!(!snapshot.is_connected);
    assert!(connector.link().is_closed());

    assert!(widget.toggle().await?);
    assert_eq!(connector.connects(), 2);

    widget.close();
    Ok(())
}

#[tokio::test]
async fn test_mute_applies_to_current_and_next_session() -> Result<()> {
    let (widget, connector, _platform) = widget(Some("test-key"));

    widget.set_muted(true);
    widget.open().await?;
    let session = widget.session().expect("session");
    assert!(session.is_muted());
    assert!(!session.send_captured_audio(mic_frame()));

    widget.set_muted(false);
    assert!(session.send_captured_audio(mic_frame()));
    assert_eq!(connector.link().sent_count(), 1);

    widget.set_muted(true);
    widget.open().await?;
    assert!(widget.session().expect("session").is_muted());
    assert!(widget.snapshot().is_muted);

    widget.close();
    Ok(())
}

#[tokio::test]
async fn test_failed_open_keeps_status_visible() {
    let (widget, connector, _platform) = widget(None);

    let err = widget.open().await.unwrap_err();
    assert_eq!(err, SessionError::MissingCredential);

    let snapshot = widget.snapshot();
    assert!(snapshot.is_open);
    assert!(!snapshot.is_connected);
    assert_eq!(snapshot.status.message, "Error: Missing API Key");
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn test_dropping_widget_closes_session() -> Result<()> {
    let (widget, connector, platform) = widget(Some("test-key"));
    widget.open().await?;

    drop(widget);

    assert!(connector.link().is_closed());
    assert!(platform.sink.is_closed());
    assert_eq!(platform.captures_stopped.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_snapshot_without_session() {
    let (widget, _connector, _platform) = widget(Some("test-key"));

    let snapshot = widget.snapshot();

    assert!(!snapshot.is_open);
    assert_eq!(snapshot.status.state, SessionState::Idle);
    assert_eq!(snapshot.status.message, "Initializing...");
    assert_eq!(snapshot.volume, 0.0);
    assert!(snapshot.stats.is_none());
}
