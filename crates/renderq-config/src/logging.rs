use strum::{Display, EnumString};

/// How the daemon renders log events on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, with job ids and peers as fields.
    #[default]
    Json,
    /// Single-line text for interactive runs. Also accepted as `text`.
    #[strum(to_string = "compact", serialize = "text")]
    Compact,
}

impl LogFormat {
    /// Whether events are emitted as machine-readable records.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }
}
