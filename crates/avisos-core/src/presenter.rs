//! Presenter seam.
//!
//! The router decides *that* and *what* to present; how a notification
//! is rendered (toast, banner, sound playback) belongs to the embedding
//! UI. Implement [`Presenter`] to plug in a real surface; the default
//! [`TracingPresenter`] just logs.

use std::time::Duration;

use avisos_api::{EventKind, InboundMessage};

/// Visual weight of a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Positive confirmation (green toast in the original UI).
    Success,
    /// Informational update.
    Info,
    /// Neutral notice.
    Plain,
}

/// What the UI should show for one message.
#[derive(Debug, Clone)]
pub struct Presentation {
    pub severity: Severity,
    /// How long the notice should stay on screen.
    pub duration: Duration,
    /// Whether an audio cue should accompany the notice.
    pub sound: bool,
    pub title: Option<String>,
    pub body: String,
}

impl Presentation {
    /// Presentation policy per event kind.
    ///
    /// Returns `None` for kinds that get no transient feedback —
    /// unrecognized types are recorded and fanned out but never
    /// presented.
    pub fn for_message(msg: &InboundMessage) -> Option<Self> {
        let body = msg.message.clone().unwrap_or_default();

        match msg.kind {
            EventKind::ConnectionEstablished => Some(Self {
                severity: Severity::Success,
                duration: Duration::from_secs(4),
                sound: false,
                title: None,
                body,
            }),
            // Patient calls are the loudest notification in the system:
            // long-lived and audible so staff do not miss them.
            EventKind::LlamadaPaciente => Some(Self {
                severity: Severity::Success,
                duration: Duration::from_secs(10),
                sound: true,
                title: msg.title.clone(),
                body,
            }),
            EventKind::CitaCreada | EventKind::CitaActualizada => Some(Self {
                severity: Severity::Info,
                duration: Duration::from_secs(5),
                sound: false,
                title: msg.title.clone(),
                body,
            }),
            EventKind::RecetaCreada | EventKind::RecetaLista => Some(Self {
                severity: Severity::Success,
                duration: Duration::from_secs(7),
                sound: false,
                title: msg.title.clone(),
                body,
            }),
            EventKind::ConsultaCreada | EventKind::ConsultaActualizada => Some(Self {
                severity: Severity::Info,
                duration: Duration::from_secs(5),
                sound: false,
                title: None,
                body: msg
                    .title
                    .clone()
                    .unwrap_or_else(|| "Consulta actualizada".into()),
            }),
            EventKind::NotificacionMedico | EventKind::NotificacionFarmacia => Some(Self {
                severity: Severity::Plain,
                duration: Duration::from_secs(5),
                sound: false,
                title: None,
                body,
            }),
            EventKind::Unknown(_) => None,
        }
    }
}

/// Renders transient feedback for routed messages.
pub trait Presenter: Send + Sync {
    fn present(&self, presentation: &Presentation);
}

/// Default presenter: emits the notification as a structured log line.
#[derive(Debug, Default)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn present(&self, p: &Presentation) {
        tracing::info!(
            severity = ?p.severity,
            title = p.title.as_deref().unwrap_or(""),
            body = %p.body,
            sound = p.sound,
            "notification"
        );
    }
}
