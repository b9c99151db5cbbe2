//! Integration tests for pv-migrate
//!
//! These tests tell the story of an operator moving volume data around a real
//! cluster.
//!
//! # Test Organization
//!
//! - `migration`: Stories about copying data between claims, in one
//!   namespace and across namespaces, and about what is left behind
//!
//! - `helpers`: Namespace, claim and one-shot pod fixtures

mod helpers;
mod migration;
