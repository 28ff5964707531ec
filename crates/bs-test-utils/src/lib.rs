//! # Broadcast Service Test Utilities
//!
//! Mocks and fixtures for testing the broadcast service without a media
//! server.
//!
//! ## Modules
//!
//! - `mock_engine` - In-memory `MediaEngine` with failure injection
//! - `fixtures` - Test peers, a wired-up coordinator and inbound frame builders
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bs_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let broadcast = TestBroadcast::start();
//!     let mut presenter = TestPeer::new();
//!
//!     broadcast.send(&presenter, &presenter_frame("O1")).await;
//!
//!     let response = presenter.recv_json().await;
//!     assert_eq!(response["response"], "accepted");
//! }
//! ```

pub mod fixtures;
pub mod mock_engine;

pub use fixtures::*;
pub use mock_engine::*;
