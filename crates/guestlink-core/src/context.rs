use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Execution surface the guest is rendered in, as assigned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameContext {
    Settings,
    Content,
    Authentication,
    Remove,
    Task,
    SidePanel,
    Stage,
    MeetingStage,
}

impl FrameContext {
    pub const ALL: [FrameContext; 8] = [
        FrameContext::Settings,
        FrameContext::Content,
        FrameContext::Authentication,
        FrameContext::Remove,
        FrameContext::Task,
        FrameContext::SidePanel,
        FrameContext::Stage,
        FrameContext::MeetingStage,
    ];

    /// Wire name of the context.
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameContext::Settings => "settings",
            FrameContext::Content => "content",
            FrameContext::Authentication => "authentication",
            FrameContext::Remove => "remove",
            FrameContext::Task => "task",
            FrameContext::SidePanel => "sidePanel",
            FrameContext::Stage => "stage",
            FrameContext::MeetingStage => "meetingStage",
        }
    }
}

impl std::fmt::Display for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FrameContext::ALL
            .into_iter()
            .find(|ctx| ctx.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown frame context '{s}'"))
    }
}
