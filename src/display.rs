//! Display collaborator: text screens and download progress.

/// Receives per-file download progress
pub trait ProgressSink: Send + Sync {
    /// `percent` of file `file_number` (1-based fetch attempt counter) has arrived
    fn report_progress(&self, file_number: u32, percent: u8);
}

/// The screens the device shows, as text lines
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Screen {
    /// Pairing code the user types into the companion app
    LinkCode(String),
    /// Shown once the backend confirms the pairing
    DeviceLinked,
    /// Idle screen after pairing
    ReadyToUpload,
    /// The storage medium was pulled
    StorageRemoved,
    /// Wi-Fi did not come up
    ConnectionFailed,
    /// Download progress of one file
    Progress {
        /// Fetch attempt counter
        file_number: u32,
        /// Whole percent
        percent: u8,
    },
}

impl Screen {
    /// Text lines, top to bottom
    pub fn lines(&self) -> Vec<String> {
        match self {
            Screen::LinkCode(code) => vec!["Link code:".into(), code.clone()],
            Screen::DeviceLinked => vec!["Device linked".into(), "successfully!".into()],
            Screen::ReadyToUpload => vec!["Ready to".into(), "upload data...".into()],
            Screen::StorageRemoved => vec!["SD card removed".into()],
            Screen::ConnectionFailed => vec!["Connection failed.".into()],
            Screen::Progress {
                file_number,
                percent,
            } => vec![format!("File {file_number}"), format!("{percent}%")],
        }
    }
}

/// [`ProgressSink`] that renders the progress screen to the log
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDisplay;

impl ProgressSink for LogDisplay {
    fn report_progress(&self, file_number: u32, percent: u8) {
        let screen = Screen::Progress {
            file_number,
            percent,
        };
        tracing::info!(file_number, percent, "[Progress] {}", screen.lines().join(": "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_screen_text() {
        let screen = Screen::Progress {
            file_number: 3,
            percent: 68,
        };
        assert_eq!(screen.lines(), vec!["File 3", "68%"]);
    }

    #[test]
    fn link_code_screen_shows_code() {
        let lines = Screen::LinkCode("7KQ2ZD".into()).lines();
        assert_eq!(lines.last().map(String::as_str), Some("7KQ2ZD"));
    }

    #[test]
    fn log_display_accepts_reports() {
        LogDisplay.report_progress(1, 100);
    }
}
