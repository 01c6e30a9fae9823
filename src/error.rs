//! Outcome of one request/response exchange with the probe.
use crate::frame::DecodeError;
use std::io;

/// Errors of a single exchange.
///
/// None of them is fatal: the poller keeps the last good reading and tries
/// again on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// Nothing arrived within the response window.
    ///
    /// `source` is set when the serial port itself failed (device unplugged,
    /// write error) and no answer could arrive.
    #[error("No response from probe{}", detail(.source))]
    NoResponse { source: Option<io::Error> },

    /// A response arrived but was rejected.
    #[error("Protocol fault: {0}")]
    ProtocolFault(#[from] DecodeError),
}

impl SensorError {
    /// The probe stayed silent for the whole response window.
    pub const fn silence() -> Self {
        SensorError::NoResponse { source: None }
    }

    /// `true` if the probe did not answer or the port failed, `false` if an
    /// answer was received but rejected.
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, SensorError::NoResponse { .. })
    }

    /// The port error behind a [`SensorError::NoResponse`], if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            SensorError::NoResponse { source } => source.as_ref(),
            SensorError::ProtocolFault(..) => None,
        }
    }
}

impl From<io::Error> for SensorError {
    fn from(err: io::Error) -> Self {
        SensorError::NoResponse { source: Some(err) }
    }
}

fn detail(source: &Option<io::Error>) -> String {
    match source {
        Some(err) => format!(": {err}"),
        None => String::new(),
    }
}

/// The result type of an exchange.
pub type Result<T> = std::result::Result<T, SensorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::error::Error as _;

    #[test]
    fn transport_fault_classification() {
        assert!(SensorError::silence().is_transport_fault());
        assert!(SensorError::from(io::Error::from(io::ErrorKind::BrokenPipe)).is_transport_fault());
        assert!(!SensorError::from(DecodeError::TooShort { actual: 3 }).is_transport_fault());
    }

    #[test]
    fn port_failure_is_no_response() {
        let err = SensorError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_matches!(
            &err,
            SensorError::NoResponse { source: Some(port) } if port.kind() == io::ErrorKind::BrokenPipe
        );
        assert_eq!(err.io_error().map(io::Error::kind), Some(io::ErrorKind::BrokenPipe));
        assert!(err.source().is_some());

        assert!(SensorError::silence().io_error().is_none());
        assert!(SensorError::silence().source().is_none());
    }

    #[test]
    fn display() {
        assert_eq!(
            SensorError::from(DecodeError::TooShort { actual: 3 }).to_string(),
            "Protocol fault: Response too short: 3 bytes, expected 19"
        );
        assert_eq!(SensorError::silence().to_string(), "No response from probe");
        assert_eq!(
            SensorError::from(io::Error::from(io::ErrorKind::BrokenPipe)).to_string(),
            "No response from probe: broken pipe"
        );
    }
}
