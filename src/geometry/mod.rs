//! Geometry utilities: SE3 transforms, SO(3) helpers, planar tag PnP.

pub mod homography;
pub mod pnp;
pub mod se3;
pub mod so3;

pub use homography::Homography;
pub use pnp::{PnpSettings, PoseCandidate, estimate_tag_pose, tag_object_points};
pub use se3::SE3;
