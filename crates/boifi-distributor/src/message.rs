use boifi_domain::FaultInjectionPolicy;

/// What a subscriber's channel carries. Every variant except `KeepAlive`
/// is a full snapshot — there is no delta channel (see Open Questions in
/// DESIGN.md).
#[derive(Debug, Clone)]
pub enum DistributorMessage {
    FullConfig { policies: Vec<FaultInjectionPolicy>, revision: u64 },
    Update { policies: Vec<FaultInjectionPolicy>, revision: u64 },
    KeepAlive,
}

impl DistributorMessage {
    pub fn revision(&self) -> Option<u64> {
        match self {
            DistributorMessage::FullConfig { revision, .. } => Some(*revision),
            DistributorMessage::Update { revision, .. } => Some(*revision),
            DistributorMessage::KeepAlive => None,
        }
    }
}
