//! Display panel and status line
//!
//! The panel variants are a closed set chosen once from config. Pixel and
//! touch I/O belong to the device build; on the host the panel only reports
//! its geometry and [`StatusPanel`] writes the status line to the log.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Deserialize;

use crate::app::ApplicationState;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventKind, SubscriptionId};
use crate::session::TrackSnapshot;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayKind {
    Ili9341,
    Ili9488,
    St7789,
    St7796u,
    #[default]
    Headless,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchKind {
    Ft6236,
    Xpt2046,
    #[default]
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u16,
    pub height: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TouchPoint {
    pub x: i16,
    pub y: i16,
}

impl DisplayKind {
    /// Native portrait geometry of the controller.
    pub fn dimensions(self) -> Dimensions {
        let (width, height) = match self {
            Self::Ili9341 => (240, 320),
            Self::Ili9488 | Self::St7796u => (320, 480),
            Self::St7789 => (240, 240),
            Self::Headless => (0, 0),
        };
        Dimensions { width, height }
    }
}

/// What every panel can do.
pub trait PanelDevice {
    fn init(&mut self) -> Result<()>;
    /// Latest touch position, if the screen is being touched.
    fn read(&mut self) -> Option<TouchPoint>;
    fn dimensions(&self) -> Dimensions;
}

pub struct Panel {
    display: DisplayKind,
    touch: TouchKind,
}

impl Panel {
    pub fn new(display: DisplayKind, touch: TouchKind) -> Self {
        Self {
            display,
            touch,
        }
    }

    pub fn display(&self) -> DisplayKind {
        self.display
    }

    pub fn touch(&self) -> TouchKind {
        self.touch
    }
}

impl PanelDevice for Panel {
    fn init(&mut self) -> Result<()> {
        if self.display == DisplayKind::Headless && self.touch != TouchKind::None {
            return Err(Error::Config(format!(
                "display.touch = {:?} needs a display panel",
                self.touch
            )));
        }
        let Dimensions { width, height } = self.display.dimensions();
        tracing::info!(display = ?self.display, touch = ?self.touch, width, height, "Panel initialized");
        Ok(())
    }

    fn read(&mut self) -> Option<TouchPoint> {
        // No touch controller is reachable from the host build
        None
    }

    fn dimensions(&self) -> Dimensions {
        self.display.dimensions()
    }
}

/// What the status line shows.
#[derive(Clone, Debug, Default)]
struct StatusLine {
    state: Option<ApplicationState>,
    address: Option<String>,
    auth_url: Option<String>,
    track: Option<String>,
    playing: bool,
    progress: Option<f32>,
    volume: Option<i64>,
    error: Option<String>,
}

impl StatusLine {
    fn apply(&mut self, event: &Event) -> bool {
        match event.kind {
            EventKind::StateChanged => {
                self.state = event.int.and_then(ApplicationState::from_ordinal);
                if !matches!(
                    self.state,
                    Some(ApplicationState::Error | ApplicationState::AuthRequired)
                ) {
                    self.error = None;
                }
                if self.state != Some(ApplicationState::Authenticating) {
                    self.auth_url = None;
                }
            }
            EventKind::ConnectivityConnected => self.address = event.text.clone(),
            EventKind::ConnectivityDisconnected => self.address = None,
            EventKind::AuthStarted => self.auth_url = event.text.clone(),
            EventKind::ErrorRaised => self.error = event.text.clone(),
            EventKind::TrackChanged => {
                self.track = event
                    .data::<TrackSnapshot>()
                    .map(|t| format!("{} - {}", t.artist, t.title));
            }
            EventKind::PlaybackChanged => {
                self.playing = event.int == Some(1);
                self.progress = event.float;
            }
            EventKind::VolumeChanged => self.volume = event.int,
            _ => return false,
        }
        true
    }

    fn render(&self) -> String {
        let mut parts = vec![self.state.map_or("Init", ApplicationState::name).to_string()];
        parts.push(match &self.address {
            Some(ip) => format!("net {ip}"),
            None => "offline".to_string(),
        });
        if let Some(url) = &self.auth_url {
            parts.push(format!("open {url}"));
        }
        if let Some(track) = &self.track {
            let marker = if self.playing { ">" } else { "||" };
            match self.progress {
                Some(progress) => {
                    parts.push(format!("{marker} {track} {:.0}%", progress * 100.0))
                }
                None => parts.push(format!("{marker} {track}")),
            }
        }
        if let Some(volume) = self.volume {
            parts.push(format!("vol {volume}%"));
        }
        if let Some(error) = &self.error {
            parts.push(format!("! {error}"));
        }
        parts.join(" | ")
    }
}

/// Display-layer consumer of the bus. Keeps a one-line summary of the
/// device and logs it whenever it changes.
pub struct StatusPanel {
    bus: Rc<EventBus>,
    line: Rc<RefCell<StatusLine>>,
    subscription: SubscriptionId,
}

impl StatusPanel {
    pub fn attach(bus: Rc<EventBus>) -> Self {
        let line = Rc::new(RefCell::new(StatusLine::default()));
        let sink = line.clone();
        let subscription = bus.subscribe_all(move |event| {
            let mut line = sink.borrow_mut();
            if line.apply(event) {
                tracing::info!(target: "status", "{}", line.render());
            }
            Ok(())
        });
        Self {
            bus,
            line,
            subscription,
        }
    }

    pub fn status(&self) -> String {
        self.line.borrow().render()
    }
}

impl Drop for StatusPanel {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
    }
}
