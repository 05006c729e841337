//! Consumer module for story fan-out.
//!
//! Reads an author's follower set one page at a time.

mod follower_pager;

pub use follower_pager::FollowerPager;
