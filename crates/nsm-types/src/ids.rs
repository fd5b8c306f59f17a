/// Opaque, transport-provided client identifier. The core does not
/// interpret it beyond equality; once evicted from the registry, an id is
/// never reused by this crate (the transport layer decides reuse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        ClientId(raw)
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client:{:#018x}", self.0)
    }
}

impl From<u64> for ClientId {
    fn from(raw: u64) -> Self {
        ClientId::new(raw)
    }
}
