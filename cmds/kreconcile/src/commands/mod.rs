pub mod apply;
pub mod delete;
pub mod diff;
pub mod prune;
pub mod show;

pub mod util;
