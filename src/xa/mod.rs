//! XA primitives: transaction identifiers, error codes and the resource
//! contracts the coordinator drives.

mod errors;
mod resource;
mod simulated;
mod xid;

pub use errors::{XaError, XaErrorCode, XaResult};
pub use resource::{Durability, LocalResource, Vote, XaResource};
pub use simulated::{BranchState, LocalState, SimulatedLocalResource, SimulatedResource};
pub use xid::{validate_node_id, Xid, FORMAT_ID, MAX_NODE_ID_LEN};
