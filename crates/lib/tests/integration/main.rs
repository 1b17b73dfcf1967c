mod common;
mod scheduler_tests;
mod store_tests;
