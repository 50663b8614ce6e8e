// Test module organization
pub mod test_api;
pub mod test_basic;
pub mod test_calls;
pub mod test_closures;
pub mod test_dump;
pub mod test_gc;
pub mod test_metamethods;
pub mod test_table;
