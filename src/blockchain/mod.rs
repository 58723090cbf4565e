pub mod block_index;
pub mod chain_state;
pub mod view;

pub use block_index::BlockIndex;
pub use chain_state::ChainState;
pub use view::ChainStateView;
