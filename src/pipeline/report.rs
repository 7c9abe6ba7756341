use std::fmt;

use super::records::format_decimal;

pub const REJECTION_PREAMBLE: &str =
    "The following is a list of rejected spectra\nalong with the reason for its rejection.\n";
pub const ALL_REJECTED_NOTICE: &str = "All spectra were bad. Exiting.";
pub const EMPTY_MANIFEST_NOTICE: &str = "The input file lists no spectra. Exiting.";

/// Why a spectrum was not classified.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// The engine could not read the file.
    LoadFailed(String),
    /// Measured S/N fell below the configured floor.
    BelowFloor { sn: f64, floor: f64 },
    /// A floor was configured but the S/N could not be measured.
    SignalToNoiseUnavailable(String),
    /// The engine failed after a successful load.
    EngineFault(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::LoadFailed(msg) => write!(f, "{}", single_line(msg)),
            RejectReason::BelowFloor { sn, floor } => {
                write!(f, "S/N = {} < {}", format_decimal(*sn), format_decimal(*floor))
            }
            RejectReason::SignalToNoiseUnavailable(msg) => {
                write!(f, "S/N unavailable: {}", single_line(msg))
            }
            RejectReason::EngineFault(msg) => write!(f, "processing failed: {}", single_line(msg)),
        }
    }
}

fn single_line(msg: &str) -> String {
    msg.replace(['\r', '\n'], "")
}

/// One entry of the run's rejection narrative.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub filename: String,
    pub reason: RejectReason,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FILE: {}  REASON: {}", self.filename, self.reason)
    }
}

/// Render the narrative as the single end-of-batch notice; `None` when
/// nothing was rejected.
pub fn render_rejections(rejections: &[Rejection]) -> Option<String> {
    if rejections.is_empty() {
        return None;
    }
    let mut text = String::from(REJECTION_PREAMBLE);
    for r in rejections {
        text.push('\n');
        text.push_str(&r.to_string());
    }
    Some(text)
}

// ---------------------------------------------------------------------------
// Notifier – where user-facing notices go
// ---------------------------------------------------------------------------

pub trait Notifier {
    fn notify(&mut self, message: &str);
}

/// Prints notices on stdout.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&mut self, message: &str) {
        println!("{message}");
    }
}

/// Collects notices; handy for callers that render them elsewhere.
impl Notifier for Vec<String> {
    fn notify(&mut self, message: &str) {
        self.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_one_line_per_rejection() {
        let rejections = vec![
            Rejection {
                filename: "star002.fits".into(),
                reason: RejectReason::BelowFloor { sn: 2.0, floor: 5.0 },
            },
            Rejection {
                filename: "gone.fits".into(),
                reason: RejectReason::LoadFailed("File not found:\n gone.fits".into()),
            },
        ];
        assert_eq!(
            render_rejections(&rejections).unwrap(),
            "The following is a list of rejected spectra\n\
             along with the reason for its rejection.\n\n\
             FILE: star002.fits  REASON: S/N = 2.0 < 5.0\n\
             FILE: gone.fits  REASON: File not found: gone.fits"
        );
        assert_eq!(render_rejections(&[]), None);
    }
}
