//! In-process learning events.
//!
//! Completion is published only after the transaction that reached 100% has
//! committed, so subscribers never observe a completion that was rolled back.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::core::shared::state::AppState;
use crate::learn::certificates;
use crate::learn::error::LearnError;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LearnEvent {
    CourseCompleted { student_id: i64, course_id: i64 },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LearnEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: LearnEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!("Published {:?} to {} subscriber(s)", event, receivers);
                receivers
            }
            Err(_) => {
                debug!("Published {:?} with no subscribers", event);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LearnEvent> {
        self.sender.subscribe()
    }
}

/// Issues a certificate whenever a course completion is observed.
pub fn spawn_certificate_listener(state: Arc<AppState>) -> JoinHandle<()> {
    let mut rx = state.subscribe();
    tokio::spawn(async move {
        info!("Certificate listener started");
        loop {
            match rx.recv().await {
                Ok(LearnEvent::CourseCompleted {
                    student_id,
                    course_id,
                }) => {
                    if !state.config.learn.auto_issue_certificates {
                        continue;
                    }
                    let state = Arc::clone(&state);
                    let issued = tokio::task::spawn_blocking(move || -> Result<_, LearnError> {
                        let mut conn = state.conn.get()?;
                        certificates::issue_certificate(
                            &mut conn,
                            &state.config.learn,
                            student_id,
                            course_id,
                        )
                    })
                    .await;
                    match issued {
                        Ok(Ok(cert)) => info!(
                            "Certificate {} ready for student {} in course {}",
                            cert.certificate_number, student_id, course_id
                        ),
                        Ok(Err(e)) => error!(
                            "Failed to issue certificate for student {} in course {}: {}",
                            student_id, course_id, e
                        ),
                        Err(e) => error!("Certificate task panicked: {}", e),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Certificate listener lagged, {} event(s) dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Event bus closed, certificate listener stopping");
                    break;
                }
            }
        }
    })
}
