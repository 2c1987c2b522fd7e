use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Voice used by the remote service when speaking back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoicePersona {
    #[default]
    Primary,
    Secondary,
}

impl VoicePersona {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoicePersona::Primary => "primary",
            VoicePersona::Secondary => "secondary",
        }
    }
}

impl fmt::Display for VoicePersona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoicePersona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(VoicePersona::Primary),
            "secondary" => Ok(VoicePersona::Secondary),
            other => Err(format!(
                "unknown voice persona '{}' (expected primary or secondary)",
                other
            )),
        }
    }
}

/// Snapshot of the user's session preferences
///
/// Read once when the session is constructed and sent to the voice service as
/// connection metadata. Never changes while the session runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsContext {
    /// Which synthesized voice answers
    pub voice_persona: VoicePersona,

    /// Whether the service leads the conversation with prompts
    pub guided_session: bool,

    /// Casual tone instead of the default register
    pub tone_mode: bool,
}

impl Default for SettingsContext {
    fn default() -> Self {
        Self {
            voice_persona: VoicePersona::Primary,
            guided_session: true,
            tone_mode: false,
        }
    }
}

impl SettingsContext {
    /// Query fields describing these settings on the connection URL
    pub fn query_pairs(&self) -> [(&'static str, &'static str); 3] {
        [
            ("voice", self.voice_persona.as_str()),
            ("guided", bool_str(self.guided_session)),
            ("tone", bool_str(self.tone_mode)),
        ]
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
