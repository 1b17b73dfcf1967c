mod add;
mod graph;
mod hash;
mod run;
mod targets;

pub use add::cmd_add;
pub use graph::{cmd_connect, cmd_edges, cmd_graph};
pub use hash::cmd_hash;
pub use run::{RunArgs, cmd_run};
pub use targets::{cmd_list, cmd_show};
