mod common;
mod graph_tests;
mod run_tests;
mod targets_tests;
