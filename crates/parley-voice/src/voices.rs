//! Voices selectable through the settings API.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoiceInfo {
    pub id: &'static str,
    pub name: &'static str,
}

pub const VOICE_CATALOG: &[VoiceInfo] = &[
    VoiceInfo {
        id: "71a7ad14-091c-4e8e-a314-022ece01c121",
        name: "British Reading Lady",
    },
    VoiceInfo {
        id: "a0e99841-438c-4a64-b679-ae501e7d6091",
        name: "Conversational Female",
    },
    VoiceInfo {
        id: "79a125e8-cd45-4c13-8a67-188112f4dd22",
        name: "Professional Male",
    },
    VoiceInfo {
        id: "87748186-23bb-4158-a1eb-332911b0b708",
        name: "Friendly Female",
    },
    VoiceInfo {
        id: "41534e16-2966-4c6b-9670-111411def906",
        name: "Calm Male",
    },
    VoiceInfo {
        id: "b7d50908-b17c-442d-ad8d-810c63997ed9",
        name: "Energetic Female",
    },
];

/// Looks up a catalog voice by id.
pub fn find_voice(id: &str) -> Option<&'static VoiceInfo> {
    VOICE_CATALOG.iter().find(|voice| voice.id == id)
}
