//! Path finding between one source and one receiver.
//!
//! Every function takes the run's [`PropagationData`](crate::data::PropagationData)
//! explicitly and can be called outside of a batch.

mod direct;
mod reflection;
mod side_hull;
mod vertical;

pub use direct::{compute_free_field, compute_h_edge_diffraction, direct_path};
pub use reflection::{MirrorReceiver, REFLECTION_NUDGE, compute_reflexion, mirror_receivers};
pub use side_hull::{MAX_RATIO_HULL_DIRECT_PATH, Side, compute_side_hull};
pub use vertical::compute_v_edge_diffraction;
