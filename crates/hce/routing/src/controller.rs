use hce_types::T3tIdentifier;

use crate::error::Result;
use crate::packer::PackedTable;

/// Routing side of the contactless controller.
///
/// Calls are made while the resolution lock is held and must not block on
/// anything that could take that lock.
pub trait NfcController: Send + Sync {
    /// Replace the controller's AID routing table.
    fn commit_routing(&self, table: &PackedTable) -> Result<()>;

    fn clear_routing(&self) -> Result<()>;

    fn register_t3t(&self, identifier: &T3tIdentifier) -> Result<()>;

    fn deregister_t3t(&self, identifier: &T3tIdentifier) -> Result<()>;
}
