//! Ready-made nodes and the factories that place them in a pipeline.

pub use self::{
    adapt::{pull_to_push, push_to_pull},
    basic::{bitbucket, filter, for_each, fork, identity, input_vec, map, output_vec, unique},
    buffer::{buffer, external_buffer, reverse},
    pull::{pull_input_vec, pull_map, pull_output_vec},
    sort::{external_sort, external_sort_by, sort, sort_by, MIN_RUN_ITEMS},
};

macro_rules! node_base {
    () => {
        fn base(&self) -> &crate::node::NodeBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut crate::node::NodeBase {
            &mut self.base
        }
    };
}

mod adapt;
mod basic;
mod buffer;
mod pull;
mod sort;
