//! Shared fixtures for the workspace's end-to-end tests.

pub mod helpers;

pub use helpers::{
    generate_test_tls, init_logging, send_receive_test, setup_insecure_control_pair,
    setup_secure_control_pair, ControlPair, TestTls,
};
