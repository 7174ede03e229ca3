//! Integration test entry point.
//!
//! Wires the mock node and the end-to-end flow tests into one test
//! binary.

mod mock_node;
