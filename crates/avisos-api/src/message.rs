//! Message envelope and event taxonomy.
//!
//! Every frame on the stream is a JSON object with a mandatory `type`
//! discriminant; all remaining fields vary per type. Unknown types are
//! tolerated end to end — they round-trip the literal wire string so
//! subscribers can still match on them.

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── EventKind ────────────────────────────────────────────────────────

/// The `type` discriminant of a notification frame.
///
/// Covers every event the hospital backend emits today, plus
/// [`Unknown`](EventKind::Unknown) for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// Server greeting right after the handshake.
    ConnectionEstablished,
    /// A patient is being called to a consultation room.
    LlamadaPaciente,
    /// Appointment created.
    CitaCreada,
    /// Appointment updated.
    CitaActualizada,
    /// Prescription created.
    RecetaCreada,
    /// Prescription ready for pickup.
    RecetaLista,
    /// Medical visit created.
    ConsultaCreada,
    /// Medical visit updated.
    ConsultaActualizada,
    /// Direct notice for medical staff.
    NotificacionMedico,
    /// Direct notice for pharmacy staff (e.g. low stock).
    NotificacionFarmacia,
    /// Anything this client does not recognize. Carries the literal
    /// wire string unchanged.
    Unknown(String),
}

impl EventKind {
    /// The wire representation of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionEstablished => "connection_established",
            Self::LlamadaPaciente => "llamada_paciente",
            Self::CitaCreada => "cita_creada",
            Self::CitaActualizada => "cita_actualizada",
            Self::RecetaCreada => "receta_creada",
            Self::RecetaLista => "receta_lista",
            Self::ConsultaCreada => "consulta_creada",
            Self::ConsultaActualizada => "consulta_actualizada",
            Self::NotificacionMedico => "notificacion_medico",
            Self::NotificacionFarmacia => "notificacion_farmacia",
            Self::Unknown(s) => s,
        }
    }

    /// Which entity's data this event invalidates, if any.
    ///
    /// Screens showing that entity should refetch when the matching
    /// reload signal fires. Events outside this table never trigger a
    /// reload.
    pub fn reload_entity(&self) -> Option<ReloadEntity> {
        match self {
            Self::CitaCreada | Self::CitaActualizada => Some(ReloadEntity::Citas),
            Self::RecetaCreada | Self::RecetaLista => Some(ReloadEntity::Recetas),
            Self::ConsultaCreada | Self::ConsultaActualizada => Some(ReloadEntity::Consultas),
            _ => None,
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "connection_established" => Self::ConnectionEstablished,
            "llamada_paciente" => Self::LlamadaPaciente,
            "cita_creada" => Self::CitaCreada,
            "cita_actualizada" => Self::CitaActualizada,
            "receta_creada" => Self::RecetaCreada,
            "receta_lista" => Self::RecetaLista,
            "consulta_creada" => Self::ConsultaCreada,
            "consulta_actualizada" => Self::ConsultaActualizada,
            "notificacion_medico" => Self::NotificacionMedico,
            "notificacion_farmacia" => Self::NotificacionFarmacia,
            _ => Self::Unknown(s),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ReloadEntity ─────────────────────────────────────────────────────

/// A named data set that screens cache locally and refetch on change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadEntity {
    /// Appointments.
    Citas,
    /// Prescriptions.
    Recetas,
    /// Medical visits.
    Consultas,
}

impl ReloadEntity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Citas => "citas",
            Self::Recetas => "recetas",
            Self::Consultas => "consultas",
        }
    }
}

impl std::fmt::Display for ReloadEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── InboundMessage ───────────────────────────────────────────────────

/// A parsed frame from the notification stream.
///
/// `title` and `message` are the fields the UI usually shows; everything
/// else the server sent lands in `extra` via `#[serde(flatten)]`, so no
/// type-specific field is silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Mandatory event discriminant.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Short headline, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Human-readable body, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// All remaining type-specific fields.
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl InboundMessage {
    /// Decode a raw text frame.
    ///
    /// A failure here means the frame is dropped by the router; it must
    /// never tear down the connection.
    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Parse {
            message: e.to_string(),
            body: text.to_owned(),
        })
    }
}

// ── OutboundMessage ──────────────────────────────────────────────────

/// A client-initiated frame, same envelope shape as inbound.
///
/// Used for presence and acknowledgement messages. Sent fire-and-forget:
/// the client only transmits while connected and never queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: EventKind,

    #[serde(flatten)]
    pub payload: serde_json::Value,
}

impl OutboundMessage {
    /// A bare message of the given type.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: EventKind::from(kind.into()),
            payload: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Presence announcement for the given user.
    pub fn presence(user_id: &str) -> Self {
        Self::new("presence").with_field("user_id", user_id)
    }

    /// Attach a payload field.
    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let serde_json::Value::Object(map) = &mut self.payload {
            map.insert(key.to_owned(), value.into());
        }
        self
    }
}
