//! Event values carried by the bus

use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Every kind of event the core publishes or listens for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    StateChanged,
    ConnectivityConnected,
    ConnectivityDisconnected,
    ConnectivityFailed,
    AuthStarted,
    AuthCompleted,
    AuthFailed,
    TokenRefreshed,
    TokenRefreshFailed,
    PlaybackChanged,
    TrackChanged,
    VolumeChanged,
    UserCommand,
    ErrorRaised,
    UiRefresh,
    ConfigLoaded,
}

/// A published event. Identity is `kind`; how the optional payload fields
/// are read depends on it.
#[derive(Clone)]
pub struct Event {
    pub kind: EventKind,
    pub int: Option<i64>,
    pub float: Option<f32>,
    pub text: Option<String>,
    data: Option<Rc<dyn Any>>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            int: None,
            float: None,
            text: None,
            data: None,
        }
    }

    pub fn with_int(kind: EventKind, value: i64) -> Self {
        Self {
            int: Some(value),
            ..Self::new(kind)
        }
    }

    pub fn with_text(kind: EventKind, value: impl Into<String>) -> Self {
        Self {
            text: Some(value.into()),
            ..Self::new(kind)
        }
    }

    pub fn with_data<T: Any>(kind: EventKind, value: T) -> Self {
        Self {
            data: Some(Rc::new(value)),
            ..Self::new(kind)
        }
    }

    /// Builder-style addition of a text payload next to an int one.
    pub fn and_text(mut self, value: impl Into<String>) -> Self {
        self.text = Some(value.into());
        self
    }

    pub fn and_float(mut self, value: f32) -> Self {
        self.float = Some(value);
        self
    }

    pub fn and_data<T: Any>(mut self, value: T) -> Self {
        self.data = Some(Rc::new(value));
        self
    }

    /// Opaque payload, if it was attached with the requested type.
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_deref().and_then(|d| d.downcast_ref::<T>())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("int", &self.int)
            .field("float", &self.float)
            .field("text", &self.text)
            .field("data", &self.data.is_some())
            .finish()
    }
}
