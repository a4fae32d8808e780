/// Planning: diff the desired graph against the applied baseline
pub mod changeset;
pub mod diff;

pub use changeset::{ChangeAction, ChangeOp, Changeset};
pub use diff::diff;
