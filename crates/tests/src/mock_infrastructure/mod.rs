//! Mock infrastructure for chainpool integration tests.
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::RpcMockBuilder;
//!
//! let mut mock = RpcMockBuilder::new().await;
//! mock.mock_block_number(100);
//!
//! // Register mock.url() as a provider URL
//! ```

pub mod rpc_mock;

pub use rpc_mock::{pool_over, RpcMockBuilder};
