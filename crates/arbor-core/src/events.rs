use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::error::Result;
use crate::models::ActionType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PageEvent {
    PageCreated {
        page_id: String,
        path: String,
    },
    PageUpdated {
        page_id: String,
        path: String,
        revision_id: String,
    },
    AttachmentAttached {
        page_id: String,
        attachment_id: String,
    },
    AttachmentDetached {
        page_id: String,
        attachment_id: String,
    },
    OperationStarted {
        operation_id: String,
        action_type: ActionType,
        from_path: String,
        to_path: Option<String>,
    },
    OperationCompleted {
        operation_id: String,
        action_type: ActionType,
        from_path: String,
        to_path: Option<String>,
    },
    OperationFailed {
        operation_id: String,
        action_type: ActionType,
        error: String,
    },
}

impl PageEvent {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PageCreated { .. } => "page_created",
            Self::PageUpdated { .. } => "page_updated",
            Self::AttachmentAttached { .. } => "attachment_attached",
            Self::AttachmentDetached { .. } => "attachment_detached",
            Self::OperationStarted { .. } => "operation_started",
            Self::OperationCompleted { .. } => "operation_completed",
            Self::OperationFailed { .. } => "operation_failed",
        }
    }
}

pub trait PageEventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, event: &PageEvent) -> Result<()>;
}

/// Synchronous fan-out in subscription order. Delivery is best effort: a
/// failing subscriber is traced and the remaining subscribers still run.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Arc<dyn PageEventSubscriber>>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl EventBus {
    pub fn subscribe(&self, subscriber: Arc<dyn PageEventSubscriber>) {
        match self.subscribers.write() {
            Ok(mut subscribers) => subscribers.push(subscriber),
            Err(_) => tracing::warn!(
                target: "arbor::events",
                subscriber = subscriber.name(),
                "event bus lock poisoned; subscriber dropped"
            ),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn publish(&self, event: &PageEvent) {
        let subscribers = match self.subscribers.read() {
            Ok(subscribers) => subscribers.clone(),
            Err(_) => return,
        };
        for subscriber in subscribers {
            if let Err(err) = subscriber.on_event(event) {
                tracing::warn!(
                    target: "arbor::events",
                    subscriber = subscriber.name(),
                    event = event.kind(),
                    error = %err,
                    "event subscriber failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::ArborError;

    struct Recorder {
        name: String,
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl PageEventSubscriber for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_event(&self, event: &PageEvent) -> Result<()> {
            self.seen
                .lock()
                .expect("recorder lock")
                .push(format!("{}:{}", self.name, event.kind()));
            if self.fail {
                return Err(ArborError::Internal("subscriber down".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn delivers_in_subscription_order_despite_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::default();
        for (name, fail) in [("first", true), ("second", false)] {
            bus.subscribe(Arc::new(Recorder {
                name: name.to_string(),
                seen: Arc::clone(&seen),
                fail,
            }));
        }

        bus.publish(&PageEvent::PageCreated {
            page_id: "p1".to_string(),
            path: "/a".to_string(),
        });

        let seen = seen.lock().expect("seen");
        assert_eq!(
            *seen,
            vec![
                "first:page_created".to_string(),
                "second:page_created".to_string()
            ]
        );
    }

    #[test]
    fn event_serializes_with_tag() {
        let event = PageEvent::OperationFailed {
            operation_id: "op".to_string(),
            action_type: ActionType::Rename,
            error: "boom".to_string(),
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], "operation_failed");
        assert_eq!(value["action_type"], "rename");
    }
}
