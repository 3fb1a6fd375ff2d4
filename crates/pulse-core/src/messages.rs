//! Wire contract between a client and its session.
//!
//! Inbound text is parsed into a [`Command`]; outbound [`Report`]s serialize
//! to the flat `{"status": ...}` objects clients already understand:
//!
//! ```json
//! {"status": "calibrating", "progress": 12.4, "message": "Calibrating..."}
//! {"status": "measuring", "hr": 72.5, "confidence": 0.87, "progress": 66.7, "message": "Heart Rate: 72.5 BPM"}
//! ```

use serde::{Deserialize, Serialize, Serializer};

use crate::errors::{DecodeError, EstimationError, ProtocolError, SessionFatalError};

/// A parsed inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// `{"action": "start"}`
    Start,
    /// `{"action": "stop"}`
    Stop,
    /// `{"frame": "<payload>", "timestamp": <number>}`
    Frame {
        payload: String,
        timestamp: Option<f64>,
    },
}

#[derive(Deserialize)]
struct RawInbound {
    action: Option<String>,
    frame: Option<String>,
    timestamp: Option<serde_json::Value>,
}

impl Command {
    /// Parse one inbound text message.
    ///
    /// `start`/`stop` win over a frame in the same message. A message with an
    /// unrecognized action but a frame is still treated as a frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawInbound =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        match raw.action.as_deref() {
            Some("start") => return Ok(Self::Start),
            Some("stop") => return Ok(Self::Stop),
            _ => {}
        }

        match raw.frame {
            Some(payload) if !payload.is_empty() => Ok(Self::Frame {
                payload,
                timestamp: raw.timestamp.as_ref().and_then(serde_json::Value::as_f64),
            }),
            _ => match raw.action {
                Some(action) => Err(ProtocolError::UnknownAction(action)),
                None => Err(ProtocolError::MissingFrame),
            },
        }
    }

    /// Whether this command resets the run (and so interrupts in-flight work).
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Start | Self::Stop)
    }
}

/// Progress label for a session that is accumulating frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Calibrating,
    Measuring,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calibrating => "calibrating",
            Self::Measuring => "measuring",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Calibrating => "Calibrating...",
            Self::Measuring => "Measuring...",
        }
    }
}

/// An outbound status message.
#[derive(Clone, Debug, PartialEq)]
pub enum Report {
    Started {
        message: String,
    },
    Stopped {
        message: String,
    },
    /// A cycle that only advanced the buffer.
    Progress {
        phase: Phase,
        progress: f64,
        message: String,
    },
    /// A cycle that ran the estimator successfully.
    Reading {
        hr: Option<f64>,
        confidence: f64,
        progress: f64,
        message: String,
    },
    Error {
        message: String,
    },
}

impl Report {
    pub fn started() -> Self {
        Self::Started {
            message: "Measurement started".into(),
        }
    }

    pub fn stopped() -> Self {
        Self::Stopped {
            message: "Measurement stopped".into(),
        }
    }

    pub fn progress(phase: Phase, progress: f64) -> Self {
        Self::Progress {
            phase,
            progress: round_to(progress, 1),
            message: phase.message().into(),
        }
    }

    /// A successful estimation. A missing or zero rate is reported as `null`.
    pub fn reading(rate: Option<f64>, quality: f64, progress: f64) -> Self {
        let hr = rate
            .filter(|r| r.is_finite() && *r != 0.0)
            .map(|r| round_to(r, 1));
        let confidence = if quality.is_finite() {
            round_to(quality, 2)
        } else {
            0.0
        };
        let message = match hr {
            Some(bpm) => format!("Heart Rate: {bpm:.1} BPM"),
            None => "Detecting...".into(),
        };
        Self::Reading {
            hr,
            confidence,
            progress: round_to(progress, 1),
            message,
        }
    }

    pub fn frame_error(err: &DecodeError) -> Self {
        Self::Error {
            message: format!("Frame error: {err}"),
        }
    }

    pub fn estimation_error(err: &EstimationError) -> Self {
        Self::Error {
            message: format!("Processing failed: {err}"),
        }
    }

    pub fn session_error(err: &SessionFatalError) -> Self {
        Self::Error {
            message: format!("Session error: {err}"),
        }
    }

    /// Reply to frames that arrive while the run is `Errored`.
    pub fn awaiting_restart() -> Self {
        Self::Error {
            message: "Session is in error state; send start to begin a new measurement".into(),
        }
    }

    /// Last-ditch report when the session loop itself dies.
    pub fn connection_error(cause: impl std::fmt::Display) -> Self {
        Self::Error {
            message: format!("Connection error: {cause}"),
        }
    }

    /// The `status` field on the wire.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Stopped { .. } => "stopped",
            Self::Progress { phase, .. } => phase.as_str(),
            Self::Reading { .. } => "measuring",
            Self::Error { .. } => "error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Started { message }
            | Self::Stopped { message }
            | Self::Progress { message, .. }
            | Self::Reading { message, .. }
            | Self::Error { message } => message,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Flat wire shape. `hr` is `Some(None)` when it must serialize as `null`.
#[derive(Serialize)]
struct WireReport<'a> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hr: Option<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<f64>,
    message: &'a str,
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (hr, confidence, progress) = match self {
            Self::Progress { progress, .. } => (None, None, Some(*progress)),
            Self::Reading {
                hr,
                confidence,
                progress,
                ..
            } => (Some(*hr), Some(*confidence), Some(*progress)),
            _ => (None, None, None),
        };
        WireReport {
            status: self.status(),
            hr,
            confidence,
            progress,
            message: self.message(),
        }
        .serialize(serializer)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
