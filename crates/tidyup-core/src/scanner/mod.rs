pub mod walk;

pub use walk::{FileEntry, TreeWalker, WalkOptions};
