use crate::NetworkId;

/// Issues network ids on the authoritative server
///
/// Ids start at 1 and only ever grow, so an id retired by a destroyed object
/// is never handed out again for the lifetime of the generator.
#[derive(Debug)]
pub struct NetIdGenerator {
    last_network_id: NetworkId,
}

impl NetIdGenerator {
    pub fn new() -> Self {
        Self { last_network_id: 0 }
    }

    pub fn next_id(&mut self) -> NetworkId {
        self.last_network_id += 1;
        self.last_network_id
    }

    pub fn last_issued(&self) -> Option<NetworkId> {
        (self.last_network_id > 0).then_some(self.last_network_id)
    }
}

impl Default for NetIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
