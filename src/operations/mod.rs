mod axon;
mod branch_order;
mod branches;
mod caps;
mod connect;
mod connectivity;
mod ingest;
mod merge;
mod soma;
mod summary;

pub use axon::{AxonParams, FindAxons};
pub use branch_order::{BranchOrdering, CalcBranchOrder};
pub use branches::FindBranches;
pub use caps::AddOneNodeCompartments;
pub use connect::{ConnectSegments, CONNECT_TOLERANCE};
pub use connectivity::{CheckConnectivity, Component, ConnectivityUnit};
pub use ingest::{Ingest, RawConnection, RawPoint, RawSegment};
pub use merge::MergeBranchesByOrder;
pub use soma::{FindSoma, SomaParams};
pub use summary::{GeometrySummary, Summary};
